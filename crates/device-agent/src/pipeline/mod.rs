mod delivery;

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use protocol::records::{LocationRecord, MANUAL_PING};
use protocol::{CommandKind, CommandRecord, CommandStatus};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::capture::{AudioCapture, CaptureError, LocationError, LocationProvider, PhotoTrigger};
use crate::dedupe::RecentIds;
use crate::store::RecordStore;

pub(crate) const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);
pub(crate) const DEFAULT_PAGE_SIZE: u32 = 20;

pub(crate) struct PipelineSettings {
    pub(crate) user_id: Option<String>,
    pub(crate) poll_interval: Duration,
    pub(crate) page_size: u32,
}

impl PipelineSettings {
    pub(crate) fn for_user(user_id: Option<String>) -> Self {
        Self {
            user_id,
            poll_interval: DEFAULT_POLL_INTERVAL,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// Device capabilities the pipeline dispatches to.
pub(crate) struct Capabilities {
    pub(crate) audio: Arc<dyn AudioCapture>,
    pub(crate) photo: Arc<dyn PhotoTrigger>,
    pub(crate) location: Arc<dyn LocationProvider>,
}

/// What the executor did with one delivered record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Execution {
    NotAddressed,
    AlreadyTerminal,
    Duplicate,
    Completed,
    Failed,
}

#[derive(Debug, thiserror::Error)]
enum DispatchError {
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error(transparent)]
    Location(#[from] LocationError),
}

pub(crate) struct CommandPipeline {
    user_id: String,
    poll_interval: Duration,
    page_size: u32,
    store: Arc<dyn RecordStore>,
    capabilities: Capabilities,
    handled: Mutex<RecentIds>,
}

impl CommandPipeline {
    pub(crate) fn new(
        settings: PipelineSettings,
        store: Arc<dyn RecordStore>,
        capabilities: Capabilities,
    ) -> anyhow::Result<Self> {
        let Some(user_id) = settings.user_id.filter(|id| !id.trim().is_empty()) else {
            anyhow::bail!("command pipeline requires an authenticated identity");
        };
        Ok(Self {
            user_id,
            poll_interval: settings.poll_interval,
            page_size: settings.page_size,
            store,
            capabilities,
            handled: Mutex::new(RecentIds::default()),
        })
    }

    pub(crate) fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Runs one delivered command at most once per session and reports its
    /// terminal status. Never fails; store errors are logged.
    pub(crate) async fn execute(&self, record: CommandRecord) -> Execution {
        if !record.is_addressed_to(&self.user_id) {
            return Execution::NotAddressed;
        }
        if record.status().is_terminal() {
            return Execution::AlreadyTerminal;
        }
        if !self.handled.lock().await.insert(&record.id) {
            debug!(command_id = %record.id, "command already handled");
            return Execution::Duplicate;
        }

        let kind = record.kind();
        info!(command_id = %record.id, kind = kind.label(), "executing command");
        self.write_status(&record.id, CommandStatus::InProgress).await;

        match self.dispatch(&record.id, &kind).await {
            Ok(()) => {
                self.write_status(&record.id, CommandStatus::Completed).await;
                Execution::Completed
            }
            Err(err) => {
                warn!(command_id = %record.id, kind = kind.label(), error = %err, "command failed");
                self.write_status(&record.id, CommandStatus::Failed).await;
                Execution::Failed
            }
        }
    }

    async fn dispatch(&self, command_id: &str, kind: &CommandKind) -> Result<(), DispatchError> {
        match kind {
            CommandKind::StartMic { duration_ms } => {
                self.capabilities
                    .audio
                    .start_recording(Duration::from_millis(*duration_ms))
                    .await?;
            }
            CommandKind::StopMic => self.capabilities.audio.stop_recording().await?,
            CommandKind::CapturePhoto => {
                let completion = self.capabilities.photo.trigger();
                let command_id = command_id.to_string();
                tokio::spawn(async move {
                    match completion.await {
                        Ok(Ok(())) => debug!(command_id = %command_id, "photo capture finished"),
                        Ok(Err(err)) => {
                            warn!(command_id = %command_id, error = %err, "photo capture failed")
                        }
                        Err(_) => warn!(command_id = %command_id, "camera dropped capture request"),
                    }
                });
            }
            CommandKind::GetLocation => self.ping_location().await?,
            CommandKind::Unrecognized(raw) => {
                info!(command_id = %command_id, kind = %raw, "unrecognized command type");
            }
        }
        Ok(())
    }

    async fn ping_location(&self) -> Result<(), LocationError> {
        let provider = &self.capabilities.location;
        if !provider.request_permission().await {
            return Err(LocationError::PermissionDenied);
        }
        if !provider.services_enabled().await {
            return Err(LocationError::ServicesDisabled);
        }
        let position = provider.current_position().await?;
        let record = LocationRecord {
            latitude: position.latitude,
            longitude: position.longitude,
            speed: position.speed,
            heading: position.heading,
            timestamp: humantime::format_rfc3339_millis(SystemTime::now()).to_string(),
            kind: MANUAL_PING.to_string(),
            user_id: self.user_id.clone(),
        };
        self.store.create_location(&record).await?;
        Ok(())
    }

    async fn write_status(&self, command_id: &str, status: CommandStatus) {
        if let Err(err) = self.store.update_command_status(command_id, status).await {
            warn!(
                command_id = %command_id,
                status = status.as_str(),
                error = %err,
                "failed to write command status"
            );
        }
    }

    /// One pass over the pending page, in the order the store returns it.
    pub(crate) async fn poll_once(&self) {
        let records = match self
            .store
            .list_pending_commands(&self.user_id, self.page_size)
            .await
        {
            Ok(records) => records,
            Err(err) => {
                warn!(error = %err, "pending command query failed");
                return;
            }
        };
        for record in records {
            self.execute(record).await;
        }
    }
}
