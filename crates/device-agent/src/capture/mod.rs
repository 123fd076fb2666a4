mod camera;
mod location;
mod notice;
mod process;
mod recorder;

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use protocol::records::{is_allowed_upload_mime, MAX_UPLOAD_BYTES};
use tokio::sync::oneshot;

use crate::store::StoreError;

pub(crate) use camera::{spawn_camera, CameraSettings};
pub(crate) use location::FixedLocation;
pub(crate) use notice::CaptureNotice;
pub(crate) use process::ProcessDevice;
pub(crate) use recorder::{Recorder, RecorderSettings};
#[cfg(test)]
pub(crate) use recorder::RecorderPhase;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub(crate) enum CaptureError {
    #[error("{0} consent not granted")]
    PermissionDenied(&'static str),
    #[error("{0} is not configured")]
    Unavailable(&'static str),
    #[error("capture device failed: {0}")]
    Device(String),
    #[error("capture produced no data")]
    EmptyArtifact,
    #[error("capture rejected: {0}")]
    Rejected(String),
    #[error("capture upload failed: {0}")]
    Upload(String),
}

impl From<StoreError> for CaptureError {
    fn from(err: StoreError) -> Self {
        CaptureError::Upload(err.to_string())
    }
}

pub(crate) type CaptureOutcome = Result<(), CaptureError>;

#[derive(Debug, thiserror::Error)]
pub(crate) enum LocationError {
    #[error("location consent not granted")]
    PermissionDenied,
    #[error("location services are disabled")]
    ServicesDisabled,
    #[error("position unavailable: {0}")]
    Unavailable(String),
    #[error("failed to store location: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Position {
    pub(crate) latitude: f64,
    pub(crate) longitude: f64,
    pub(crate) speed: Option<f64>,
    pub(crate) heading: Option<f64>,
}

/// A file produced by a capture device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Artifact {
    pub(crate) path: PathBuf,
    pub(crate) mime: String,
}

/// Microphone as seen by the command pipeline. `start_recording` resolves
/// once the whole record, stop and upload cycle is over.
#[async_trait]
pub(crate) trait AudioCapture: Send + Sync {
    async fn start_recording(&self, duration: Duration) -> CaptureOutcome;
    async fn stop_recording(&self) -> CaptureOutcome;
}

/// Camera as seen by the command pipeline. The receiver reports the outcome
/// of the capture and upload.
pub(crate) trait PhotoTrigger: Send + Sync {
    fn trigger(&self) -> oneshot::Receiver<CaptureOutcome>;
}

#[async_trait]
pub(crate) trait LocationProvider: Send + Sync {
    async fn request_permission(&self) -> bool;
    async fn services_enabled(&self) -> bool;
    async fn current_position(&self) -> Result<Position, LocationError>;
}

/// Hardware side of the microphone.
#[async_trait]
pub(crate) trait AudioDevice: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn ActiveCapture>, CaptureError>;
}

#[async_trait]
pub(crate) trait ActiveCapture: Send {
    /// Releases the device and hands back whatever it wrote.
    async fn finish(self: Box<Self>) -> Result<Artifact, CaptureError>;
}

/// Hardware side of the camera.
#[async_trait]
pub(crate) trait StillCamera: Send + Sync {
    async fn capture(&self) -> Result<Artifact, CaptureError>;
}

/// Checks that an artifact exists, is non-empty and is acceptable to the
/// captures collection.
pub(crate) async fn verify_artifact(artifact: &Artifact) -> Result<u64, CaptureError> {
    let size = match tokio::fs::metadata(&artifact.path).await {
        Ok(meta) => meta.len(),
        Err(_) => return Err(CaptureError::EmptyArtifact),
    };
    if size == 0 {
        let _ = tokio::fs::remove_file(&artifact.path).await;
        return Err(CaptureError::EmptyArtifact);
    }
    if size > MAX_UPLOAD_BYTES {
        return Err(CaptureError::Rejected(format!(
            "{size} bytes exceeds {MAX_UPLOAD_BYTES}"
        )));
    }
    if !is_allowed_upload_mime(&artifact.mime) {
        return Err(CaptureError::Rejected(format!(
            "mime {} not accepted",
            artifact.mime
        )));
    }
    Ok(size)
}
