mod pocketbase;
mod sse;

use std::path::PathBuf;

use async_trait::async_trait;
use protocol::records::{CaptureKind, LocationRecord};
use protocol::{CommandEvent, CommandRecord, CommandStatus};
use tokio::sync::mpsc;

pub(crate) use pocketbase::PocketBaseStore;

#[derive(Debug, thiserror::Error)]
pub(crate) enum StoreError {
    #[error("store request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("store returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid store response: {0}")]
    Decode(String),
    #[error("realtime stream closed before connect")]
    Disconnected,
    #[error("failed to read capture file: {0}")]
    Io(#[from] std::io::Error),
}

/// A captured file ready for the captures collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CaptureUpload {
    pub(crate) kind: CaptureKind,
    pub(crate) user_id: String,
    pub(crate) path: PathBuf,
    pub(crate) mime: String,
}

/// The record store operations the agent needs.
#[async_trait]
pub(crate) trait RecordStore: Send + Sync {
    /// Change notifications for the commands collection. The stream ends when
    /// the transport drops.
    async fn subscribe_commands(&self) -> Result<mpsc::Receiver<CommandEvent>, StoreError>;

    /// Pending commands for `user_id` or for everyone, newest first.
    async fn list_pending_commands(
        &self,
        user_id: &str,
        page_size: u32,
    ) -> Result<Vec<CommandRecord>, StoreError>;

    async fn update_command_status(
        &self,
        command_id: &str,
        status: CommandStatus,
    ) -> Result<(), StoreError>;

    async fn create_location(&self, record: &LocationRecord) -> Result<(), StoreError>;

    async fn upload_capture(&self, upload: &CaptureUpload) -> Result<(), StoreError>;
}
