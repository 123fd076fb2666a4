use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use protocol::records::LocationRecord;
use protocol::{CommandEvent, CommandRecord, CommandStatus};
use tokio::sync::{mpsc, oneshot, Notify};

use crate::capture::{
    ActiveCapture, Artifact, AudioCapture, AudioDevice, CaptureError, CaptureOutcome,
    LocationError, LocationProvider, PhotoTrigger, Position, StillCamera,
};
use crate::store::{CaptureUpload, RecordStore, StoreError};

pub(crate) fn temp_dir(prefix: &str) -> PathBuf {
    static SEQ: AtomicUsize = AtomicUsize::new(0);
    let mut dir = std::env::temp_dir();
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let seq = SEQ.fetch_add(1, Ordering::Relaxed);
    dir.push(format!("{prefix}-{nanos}-{seq}"));
    fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

pub(crate) fn command(id: &str, kind: &str, target: &str) -> CommandRecord {
    CommandRecord {
        id: id.to_string(),
        kind: kind.to_string(),
        target_user_id: target.to_string(),
        status: "pending".to_string(),
        duration: None,
    }
}

fn store_failure() -> StoreError {
    StoreError::Status {
        status: 503,
        body: "unavailable".to_string(),
    }
}

/// In-memory record store. Commands list newest first.
pub(crate) struct MemoryStore {
    commands: Mutex<Vec<CommandRecord>>,
    status_log: Mutex<Vec<(String, CommandStatus)>>,
    locations: Mutex<Vec<LocationRecord>>,
    uploads: Mutex<Vec<CaptureUpload>>,
    push_tx: mpsc::Sender<CommandEvent>,
    push_rx: Mutex<Option<mpsc::Receiver<CommandEvent>>>,
    upload_gate: Mutex<Option<Arc<Notify>>>,
    list_calls: AtomicUsize,
    failing_lists: AtomicUsize,
    fail_subscribe: AtomicBool,
    fail_status: AtomicBool,
    fail_locations: AtomicBool,
    fail_uploads: AtomicBool,
    keep_pending: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        let (push_tx, push_rx) = mpsc::channel(16);
        Self {
            commands: Mutex::new(Vec::new()),
            status_log: Mutex::new(Vec::new()),
            locations: Mutex::new(Vec::new()),
            uploads: Mutex::new(Vec::new()),
            push_tx,
            push_rx: Mutex::new(Some(push_rx)),
            upload_gate: Mutex::new(None),
            list_calls: AtomicUsize::new(0),
            failing_lists: AtomicUsize::new(0),
            fail_subscribe: AtomicBool::new(false),
            fail_status: AtomicBool::new(false),
            fail_locations: AtomicBool::new(false),
            fail_uploads: AtomicBool::new(false),
            keep_pending: AtomicBool::new(false),
        }
    }
}

impl MemoryStore {
    pub(crate) fn insert_command(&self, record: CommandRecord) {
        self.commands.lock().unwrap().push(record);
    }

    pub(crate) fn push_sender(&self) -> mpsc::Sender<CommandEvent> {
        self.push_tx.clone()
    }

    pub(crate) fn fail_subscribe(&self) {
        self.fail_subscribe.store(true, Ordering::SeqCst);
    }

    pub(crate) fn fail_next_lists(&self, count: usize) {
        self.failing_lists.store(count, Ordering::SeqCst);
    }

    pub(crate) fn fail_status_writes(&self) {
        self.fail_status.store(true, Ordering::SeqCst);
    }

    pub(crate) fn fail_location_writes(&self) {
        self.fail_locations.store(true, Ordering::SeqCst);
    }

    pub(crate) fn fail_uploads(&self) {
        self.fail_uploads.store(true, Ordering::SeqCst);
    }

    /// Status writes are logged but the listed records stay pending.
    pub(crate) fn keep_commands_pending(&self) {
        self.keep_pending.store(true, Ordering::SeqCst);
    }

    /// Uploads block until `gate` is notified.
    pub(crate) fn gate_uploads(&self, gate: Arc<Notify>) {
        *self.upload_gate.lock().unwrap() = Some(gate);
    }

    pub(crate) fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn status_log(&self) -> Vec<(String, CommandStatus)> {
        self.status_log.lock().unwrap().clone()
    }

    pub(crate) fn statuses_for(&self, id: &str) -> Vec<CommandStatus> {
        self.status_log()
            .into_iter()
            .filter(|(logged, _)| logged == id)
            .map(|(_, status)| status)
            .collect()
    }

    /// Current status of a stored command, or the last written status for one
    /// that only arrived by push.
    pub(crate) fn status_of(&self, id: &str) -> Option<CommandStatus> {
        let stored = self
            .commands
            .lock()
            .unwrap()
            .iter()
            .find(|record| record.id == id)
            .map(CommandRecord::status);
        if self.keep_pending.load(Ordering::SeqCst) {
            return stored;
        }
        stored.or_else(|| self.statuses_for(id).last().copied())
    }

    pub(crate) fn locations(&self) -> Vec<LocationRecord> {
        self.locations.lock().unwrap().clone()
    }

    pub(crate) fn uploads(&self) -> Vec<CaptureUpload> {
        self.uploads.lock().unwrap().clone()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn subscribe_commands(&self) -> Result<mpsc::Receiver<CommandEvent>, StoreError> {
        if self.fail_subscribe.load(Ordering::SeqCst) {
            return Err(StoreError::Disconnected);
        }
        self.push_rx
            .lock()
            .unwrap()
            .take()
            .ok_or(StoreError::Disconnected)
    }

    async fn list_pending_commands(
        &self,
        user_id: &str,
        page_size: u32,
    ) -> Result<Vec<CommandRecord>, StoreError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let failing = self.failing_lists.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_lists.store(failing - 1, Ordering::SeqCst);
            return Err(store_failure());
        }
        let commands = self.commands.lock().unwrap();
        Ok(commands
            .iter()
            .rev()
            .filter(|record| record.status() == CommandStatus::Pending)
            .filter(|record| record.is_addressed_to(user_id))
            .take(page_size as usize)
            .cloned()
            .collect())
    }

    async fn update_command_status(
        &self,
        command_id: &str,
        status: CommandStatus,
    ) -> Result<(), StoreError> {
        if self.fail_status.load(Ordering::SeqCst) {
            return Err(store_failure());
        }
        self.status_log
            .lock()
            .unwrap()
            .push((command_id.to_string(), status));
        if !self.keep_pending.load(Ordering::SeqCst) {
            let mut commands = self.commands.lock().unwrap();
            if let Some(record) = commands.iter_mut().find(|record| record.id == command_id) {
                record.status = status.as_str().to_string();
            }
        }
        Ok(())
    }

    async fn create_location(&self, record: &LocationRecord) -> Result<(), StoreError> {
        if self.fail_locations.load(Ordering::SeqCst) {
            return Err(store_failure());
        }
        self.locations.lock().unwrap().push(record.clone());
        Ok(())
    }

    async fn upload_capture(&self, upload: &CaptureUpload) -> Result<(), StoreError> {
        let gate = self.upload_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(store_failure());
        }
        self.uploads.lock().unwrap().push(upload.clone());
        Ok(())
    }
}

/// Records what the pipeline asked of the microphone.
#[derive(Default)]
pub(crate) struct CountingAudio {
    durations: Mutex<Vec<Duration>>,
    pub(crate) stops: AtomicUsize,
    failure: Mutex<Option<CaptureError>>,
}

impl CountingAudio {
    pub(crate) fn durations(&self) -> Vec<Duration> {
        self.durations.lock().unwrap().clone()
    }

    pub(crate) fn fail_with(&self, err: CaptureError) {
        *self.failure.lock().unwrap() = Some(err);
    }

    fn outcome(&self) -> CaptureOutcome {
        match self.failure.lock().unwrap().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl AudioCapture for CountingAudio {
    async fn start_recording(&self, duration: Duration) -> CaptureOutcome {
        self.durations.lock().unwrap().push(duration);
        self.outcome()
    }

    async fn stop_recording(&self) -> CaptureOutcome {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.outcome()
    }
}

#[derive(Default)]
pub(crate) struct CountingPhoto {
    pub(crate) triggers: AtomicUsize,
}

impl PhotoTrigger for CountingPhoto {
    fn trigger(&self) -> oneshot::Receiver<CaptureOutcome> {
        self.triggers.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(Ok(()));
        rx
    }
}

pub(crate) struct StubLocation {
    position: Position,
    permission: bool,
    enabled: bool,
}

impl StubLocation {
    pub(crate) fn at(latitude: f64, longitude: f64) -> Self {
        Self {
            position: Position {
                latitude,
                longitude,
                speed: None,
                heading: None,
            },
            permission: true,
            enabled: true,
        }
    }

    pub(crate) fn without_permission(mut self) -> Self {
        self.permission = false;
        self
    }

    pub(crate) fn services_disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

#[async_trait]
impl LocationProvider for StubLocation {
    async fn request_permission(&self) -> bool {
        self.permission
    }

    async fn services_enabled(&self) -> bool {
        self.enabled
    }

    async fn current_position(&self) -> Result<Position, LocationError> {
        Ok(self.position)
    }
}

/// Microphone hardware that writes a fixed payload when a capture finishes.
pub(crate) struct StubAudioDevice {
    payload: Vec<u8>,
    dir: PathBuf,
    pub(crate) begun: AtomicUsize,
    active: Arc<AtomicUsize>,
    pub(crate) max_concurrent: Arc<AtomicUsize>,
    written: Arc<Mutex<Vec<PathBuf>>>,
}

impl StubAudioDevice {
    pub(crate) fn new(payload: &[u8]) -> Self {
        Self {
            payload: payload.to_vec(),
            dir: temp_dir("fieldlink-stub-audio"),
            begun: AtomicUsize::new(0),
            active: Arc::new(AtomicUsize::new(0)),
            max_concurrent: Arc::new(AtomicUsize::new(0)),
            written: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub(crate) fn written(&self) -> Vec<PathBuf> {
        self.written.lock().unwrap().clone()
    }
}

struct StubCapture {
    path: PathBuf,
    payload: Vec<u8>,
    active: Arc<AtomicUsize>,
    written: Arc<Mutex<Vec<PathBuf>>>,
}

#[async_trait]
impl AudioDevice for StubAudioDevice {
    async fn begin(&self) -> Result<Box<dyn ActiveCapture>, CaptureError> {
        let n = self.begun.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent.fetch_max(now, Ordering::SeqCst);
        Ok(Box::new(StubCapture {
            path: self.dir.join(format!("audio-{n}.wav")),
            payload: self.payload.clone(),
            active: Arc::clone(&self.active),
            written: Arc::clone(&self.written),
        }))
    }
}

#[async_trait]
impl ActiveCapture for StubCapture {
    async fn finish(self: Box<Self>) -> Result<Artifact, CaptureError> {
        self.active.fetch_sub(1, Ordering::SeqCst);
        fs::write(&self.path, &self.payload).map_err(|err| CaptureError::Device(err.to_string()))?;
        self.written.lock().unwrap().push(self.path.clone());
        Ok(Artifact {
            path: self.path.clone(),
            mime: "audio/wav".to_string(),
        })
    }
}

/// Camera hardware that writes a fixed payload per capture.
pub(crate) struct StubCamera {
    payload: Vec<u8>,
    dir: PathBuf,
    captures: AtomicUsize,
}

impl StubCamera {
    pub(crate) fn new(payload: &[u8]) -> Self {
        Self {
            payload: payload.to_vec(),
            dir: temp_dir("fieldlink-stub-camera"),
            captures: AtomicUsize::new(0),
        }
    }

    pub(crate) fn captures(&self) -> usize {
        self.captures.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StillCamera for StubCamera {
    async fn capture(&self) -> Result<Artifact, CaptureError> {
        let n = self.captures.fetch_add(1, Ordering::SeqCst);
        let path = self.dir.join(format!("cam-{n}.jpg"));
        fs::write(&path, &self.payload).map_err(|err| CaptureError::Device(err.to_string()))?;
        Ok(Artifact {
            path,
            mime: "image/jpeg".to_string(),
        })
    }
}
