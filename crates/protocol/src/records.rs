use serde::{Deserialize, Serialize};

pub const MANUAL_PING: &str = "manual_ping";

/// Upload size cap enforced by the `monitoring_logs` file field.
pub const MAX_UPLOAD_BYTES: u64 = 50 * 1024 * 1024;

pub const ALLOWED_UPLOAD_MIMES: &[&str] = &[
    "image/jpeg",
    "image/png",
    "image/webp",
    "audio/mpeg",
    "audio/mp4",
    "audio/x-m4a",
    "audio/m4a",
    "audio/aac",
    "audio/ogg",
    "audio/wav",
];

pub fn is_allowed_upload_mime(mime: &str) -> bool {
    ALLOWED_UPLOAD_MIMES.contains(&mime)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LocationRecord {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,
    pub timestamp: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub user_id: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CaptureKind {
    Mic,
    Cam,
}

impl CaptureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CaptureKind::Mic => "mic",
            CaptureKind::Cam => "cam",
        }
    }
}
