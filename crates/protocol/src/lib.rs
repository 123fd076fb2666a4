use serde::{Deserialize, Serialize};

pub mod config;
pub mod records;

/// `target_user_id` value that addresses every device.
pub const ALL_TARGETS: &str = "all";
pub const DEFAULT_RECORD_DURATION_MS: u64 = 10_000;

pub const COMMANDS_COLLECTION: &str = "commands";
pub const LOCATIONS_COLLECTION: &str = "locations";
pub const CAPTURES_COLLECTION: &str = "monitoring_logs";

/// A row of the `commands` collection as the store returns it.
///
/// Unset text fields arrive as `""` and unset numbers as `0`, so every field
/// except `id` tolerates absence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandRecord {
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub target_user_id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub duration: Option<f64>,
}

impl CommandRecord {
    pub fn kind(&self) -> CommandKind {
        match self.kind.as_str() {
            "START_MIC" => CommandKind::StartMic {
                duration_ms: record_duration_ms(self.duration),
            },
            "STOP_MIC" => CommandKind::StopMic,
            "CAPTURE_PHOTO" => CommandKind::CapturePhoto,
            "GET_LOCATION" => CommandKind::GetLocation,
            other => CommandKind::Unrecognized(other.to_string()),
        }
    }

    pub fn status(&self) -> CommandStatus {
        CommandStatus::parse(&self.status)
    }

    pub fn is_addressed_to(&self, user_id: &str) -> bool {
        self.target_user_id == ALL_TARGETS || self.target_user_id == user_id
    }
}

fn record_duration_ms(raw: Option<f64>) -> u64 {
    match raw {
        Some(value) if value.is_finite() && value >= 1.0 => value as u64,
        _ => DEFAULT_RECORD_DURATION_MS,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandKind {
    StartMic { duration_ms: u64 },
    StopMic,
    CapturePhoto,
    GetLocation,
    Unrecognized(String),
}

impl CommandKind {
    pub fn label(&self) -> &str {
        match self {
            CommandKind::StartMic { .. } => "START_MIC",
            CommandKind::StopMic => "STOP_MIC",
            CommandKind::CapturePhoto => "CAPTURE_PHOTO",
            CommandKind::GetLocation => "GET_LOCATION",
            CommandKind::Unrecognized(raw) => raw,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl CommandStatus {
    /// Empty and unknown values count as pending.
    pub fn parse(raw: &str) -> Self {
        match raw {
            "in_progress" => CommandStatus::InProgress,
            "completed" => CommandStatus::Completed,
            "failed" => CommandStatus::Failed,
            _ => CommandStatus::Pending,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CommandStatus::Pending => "pending",
            CommandStatus::InProgress => "in_progress",
            CommandStatus::Completed => "completed",
            CommandStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, CommandStatus::Completed | CommandStatus::Failed)
    }
}

/// Filter for pending commands addressed to `user_id` or to everyone.
pub fn pending_commands_filter(user_id: &str) -> String {
    let user_id = user_id.replace('\\', "\\\\").replace('"', "\\\"");
    format!(
        "status = \"pending\" && (target_user_id = \"{user_id}\" || target_user_id = \"{ALL_TARGETS}\")"
    )
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RecordAction {
    Create,
    Update,
    Delete,
    #[serde(other)]
    Other,
}

/// Realtime change notification for the `commands` collection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandEvent {
    pub action: RecordAction,
    pub record: CommandRecord,
}
