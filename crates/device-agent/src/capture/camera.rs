use std::sync::Arc;

use protocol::records::CaptureKind;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{
    verify_artifact, CaptureError, CaptureNotice, CaptureOutcome, PhotoTrigger, StillCamera,
};
use crate::store::{CaptureUpload, RecordStore};

const REQUEST_QUEUE: usize = 8;

type CaptureRequest = oneshot::Sender<CaptureOutcome>;

pub(crate) struct CameraSettings {
    pub(crate) store: Arc<dyn RecordStore>,
    pub(crate) device: Option<Arc<dyn StillCamera>>,
    pub(crate) consent: bool,
    pub(crate) user_id: String,
    pub(crate) notice: CaptureNotice,
}

/// Sending half of the camera task's request queue.
#[derive(Clone)]
pub(crate) struct CameraTrigger {
    requests: mpsc::Sender<CaptureRequest>,
}

impl PhotoTrigger for CameraTrigger {
    fn trigger(&self) -> oneshot::Receiver<CaptureOutcome> {
        let (reply, outcome) = oneshot::channel();
        if let Err(err) = self.requests.try_send(reply) {
            let (reply, reason) = match err {
                TrySendError::Full(reply) => (reply, "camera busy"),
                TrySendError::Closed(reply) => (reply, "camera stopped"),
            };
            let _ = reply.send(Err(CaptureError::Device(reason.to_string())));
        }
        outcome
    }
}

/// Runs the camera until `shutdown`; captures are taken one at a time in
/// request order.
pub(crate) fn spawn_camera(
    settings: CameraSettings,
    shutdown: CancellationToken,
) -> (CameraTrigger, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<CaptureRequest>(REQUEST_QUEUE);
    let handle = tokio::spawn(async move {
        loop {
            let reply = tokio::select! {
                _ = shutdown.cancelled() => break,
                request = rx.recv() => match request {
                    Some(reply) => reply,
                    None => break,
                },
            };
            let outcome = capture_and_upload(&settings).await;
            if let Err(err) = &outcome {
                warn!(error = %err, "photo capture failed");
            }
            let _ = reply.send(outcome);
        }
        info!("camera task stopped");
    });
    (CameraTrigger { requests: tx }, handle)
}

async fn capture_and_upload(settings: &CameraSettings) -> CaptureOutcome {
    if !settings.consent {
        return Err(CaptureError::PermissionDenied("camera"));
    }
    let Some(device) = settings.device.as_ref() else {
        return Err(CaptureError::Unavailable("camera"));
    };
    settings.notice.announce("camera photo capture");
    let artifact = device.capture().await?;
    verify_artifact(&artifact).await?;
    let upload = CaptureUpload {
        kind: CaptureKind::Cam,
        user_id: settings.user_id.clone(),
        path: artifact.path.clone(),
        mime: artifact.mime.clone(),
    };
    settings.store.upload_capture(&upload).await?;
    if let Err(err) = tokio::fs::remove_file(&artifact.path).await {
        warn!(path = %artifact.path.display(), error = %err, "failed to remove photo");
    }
    info!("photo uploaded");
    Ok(())
}
