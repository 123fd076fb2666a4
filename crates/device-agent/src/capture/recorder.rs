use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use protocol::records::CaptureKind;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    verify_artifact, ActiveCapture, AudioCapture, AudioDevice, CaptureError, CaptureNotice,
    CaptureOutcome,
};
use crate::store::{CaptureUpload, RecordStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RecorderPhase {
    Idle,
    Recording,
    Stopping,
    Uploading,
}

pub(crate) struct RecorderSettings {
    pub(crate) store: Arc<dyn RecordStore>,
    pub(crate) device: Option<Arc<dyn AudioDevice>>,
    pub(crate) consent: bool,
    pub(crate) user_id: String,
    pub(crate) notice: CaptureNotice,
}

/// One record/stop/upload cycle. Whoever takes it out of `Recorder::active`
/// finishes it and publishes the outcome on `done`.
struct Cycle {
    id: u64,
    capture: Box<dyn ActiveCapture>,
    stop: CancellationToken,
    done: watch::Sender<Option<CaptureOutcome>>,
}

/// Microphone state machine: `Idle -> Recording -> Stopping -> Uploading -> Idle`.
pub(crate) struct Recorder {
    settings: RecorderSettings,
    start_lock: Mutex<()>,
    active: Mutex<Option<Cycle>>,
    phase: watch::Sender<RecorderPhase>,
    next_cycle: AtomicU64,
}

impl Recorder {
    pub(crate) fn new(settings: RecorderSettings) -> Self {
        let (phase, _) = watch::channel(RecorderPhase::Idle);
        Self {
            settings,
            start_lock: Mutex::new(()),
            active: Mutex::new(None),
            phase,
            next_cycle: AtomicU64::new(1),
        }
    }

    #[cfg(test)]
    pub(crate) fn phases(&self) -> watch::Receiver<RecorderPhase> {
        self.phase.subscribe()
    }

    async fn take_cycle(&self, id: u64) -> Option<Cycle> {
        let mut active = self.active.lock().await;
        match active.as_ref() {
            Some(cycle) if cycle.id == id => active.take(),
            _ => None,
        }
    }

    async fn finish(&self, cycle: Cycle) -> CaptureOutcome {
        self.phase.send_replace(RecorderPhase::Stopping);
        let outcome = self.stop_and_upload(cycle.capture).await;
        self.phase.send_replace(RecorderPhase::Idle);
        match &outcome {
            Ok(()) => info!(cycle = cycle.id, "recording uploaded"),
            Err(err) => warn!(cycle = cycle.id, error = %err, "recording cycle failed"),
        }
        cycle.done.send_replace(Some(outcome.clone()));
        outcome
    }

    async fn stop_and_upload(&self, capture: Box<dyn ActiveCapture>) -> CaptureOutcome {
        let artifact = capture.finish().await?;
        let size = verify_artifact(&artifact).await?;
        self.phase.send_replace(RecorderPhase::Uploading);
        debug!(path = %artifact.path.display(), size, "uploading recording");
        let upload = CaptureUpload {
            kind: CaptureKind::Mic,
            user_id: self.settings.user_id.clone(),
            path: artifact.path.clone(),
            mime: artifact.mime.clone(),
        };
        self.settings.store.upload_capture(&upload).await?;
        if let Err(err) = tokio::fs::remove_file(&artifact.path).await {
            warn!(path = %artifact.path.display(), error = %err, "failed to remove recording");
        }
        Ok(())
    }
}

#[async_trait]
impl AudioCapture for Recorder {
    async fn start_recording(&self, duration: Duration) -> CaptureOutcome {
        if !self.settings.consent {
            info!("microphone consent not granted; recording skipped");
            return Ok(());
        }
        let Some(device) = self.settings.device.clone() else {
            return Err(CaptureError::Unavailable("microphone"));
        };

        let start_guard = self.start_lock.lock().await;
        let previous = self.active.lock().await.take();
        if let Some(previous) = previous {
            info!(cycle = previous.id, "restarting active recording");
            previous.stop.cancel();
            let _ = self.finish(previous).await;
        }

        self.settings
            .notice
            .announce("microphone recording started");
        let capture = device.begin().await?;
        let id = self.next_cycle.fetch_add(1, Ordering::Relaxed);
        let stop = CancellationToken::new();
        let (done, mut done_rx) = watch::channel(None);
        *self.active.lock().await = Some(Cycle {
            id,
            capture,
            stop: stop.clone(),
            done,
        });
        self.phase.send_replace(RecorderPhase::Recording);
        info!(cycle = id, duration_ms = duration.as_millis() as u64, "recording started");
        drop(start_guard);

        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = stop.cancelled() => {}
        }

        if let Some(cycle) = self.take_cycle(id).await {
            return self.finish(cycle).await;
        }
        let result = match done_rx.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone().unwrap_or(Ok(())),
            Err(_) => Err(CaptureError::Device(
                "recording cycle abandoned".to_string(),
            )),
        };
        result
    }

    async fn stop_recording(&self) -> CaptureOutcome {
        let cycle = self.active.lock().await.take();
        match cycle {
            Some(cycle) => {
                cycle.stop.cancel();
                self.finish(cycle).await
            }
            None => {
                debug!("stop requested with no active recording");
                Ok(())
            }
        }
    }
}
