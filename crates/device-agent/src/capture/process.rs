use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use protocol::config::CaptureDeviceConfig;
use tokio::process::{Child, Command};
use tracing::debug;

use super::{ActiveCapture, Artifact, AudioDevice, CaptureError, StillCamera};
use crate::config::OUTPUT_PLACEHOLDER;

const STOP_GRACE: Duration = Duration::from_secs(3);
const STILL_TIMEOUT: Duration = Duration::from_secs(30);

/// Capture device backed by an external program that writes to `{output}`.
#[derive(Debug, Clone)]
pub(crate) struct ProcessDevice {
    program: String,
    args: Vec<String>,
    extension: String,
    mime: String,
    output_dir: PathBuf,
}

impl ProcessDevice {
    pub(crate) fn from_config(config: &CaptureDeviceConfig) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
            extension: config.extension.clone(),
            mime: config.mime.clone(),
            output_dir: config
                .output_dir
                .clone()
                .unwrap_or_else(std::env::temp_dir),
        }
    }

    fn next_output(&self, prefix: &str) -> PathBuf {
        self.output_dir.join(format!(
            "{prefix}_{}.{}",
            uuid::Uuid::new_v4().simple(),
            self.extension
        ))
    }

    fn spawn(&self, output: &Path) -> Result<Child, CaptureError> {
        std::fs::create_dir_all(&self.output_dir)
            .map_err(|err| CaptureError::Device(format!("output dir: {err}")))?;
        let output = output.to_string_lossy();
        let mut cmd = Command::new(&self.program);
        cmd.args(
            self.args
                .iter()
                .map(|arg| arg.replace(OUTPUT_PLACEHOLDER, &output)),
        )
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true);
        apply_process_group(&mut cmd);
        cmd.spawn()
            .map_err(|err| CaptureError::Device(format!("spawn {}: {err}", self.program)))
    }
}

#[cfg(unix)]
fn apply_process_group(cmd: &mut Command) {
    unsafe {
        cmd.pre_exec(|| {
            if libc::setsid() == -1 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

#[cfg(not(unix))]
fn apply_process_group(_cmd: &mut Command) {}

#[cfg(unix)]
fn signal_child(child: &Child, signal: i32) {
    if let Some(pid) = child.id() {
        unsafe {
            libc::kill(-(pid as i32), signal);
        }
    }
}

#[cfg(not(unix))]
fn signal_child(_child: &Child, _signal: i32) {}

/// Interrupts the capture program so it can finalize its file, then kills it
/// if it lingers.
async fn interrupt_child(child: &mut Child) {
    signal_child(child, libc::SIGINT);
    if tokio::time::timeout(STOP_GRACE, child.wait()).await.is_ok() {
        return;
    }
    signal_child(child, libc::SIGKILL);
    let _ = child.kill().await;
    let _ = child.wait().await;
}

struct ProcessCapture {
    child: Child,
    output: PathBuf,
    mime: String,
}

#[async_trait]
impl ActiveCapture for ProcessCapture {
    async fn finish(mut self: Box<Self>) -> Result<Artifact, CaptureError> {
        match self.child.try_wait() {
            Ok(Some(status)) => debug!(%status, "capture program already exited"),
            _ => interrupt_child(&mut self.child).await,
        }
        Ok(Artifact {
            path: self.output.clone(),
            mime: self.mime.clone(),
        })
    }
}

#[async_trait]
impl AudioDevice for ProcessDevice {
    async fn begin(&self) -> Result<Box<dyn ActiveCapture>, CaptureError> {
        let output = self.next_output("audio");
        let child = self.spawn(&output)?;
        Ok(Box::new(ProcessCapture {
            child,
            output,
            mime: self.mime.clone(),
        }))
    }
}

#[async_trait]
impl StillCamera for ProcessDevice {
    async fn capture(&self) -> Result<Artifact, CaptureError> {
        let output = self.next_output("cam");
        let mut child = self.spawn(&output)?;
        let status = match tokio::time::timeout(STILL_TIMEOUT, child.wait()).await {
            Ok(status) => {
                status.map_err(|err| CaptureError::Device(format!("wait: {err}")))?
            }
            Err(_) => {
                interrupt_child(&mut child).await;
                return Err(CaptureError::Device(format!(
                    "{} timed out after {}s",
                    self.program,
                    STILL_TIMEOUT.as_secs()
                )));
            }
        };
        if !status.success() {
            return Err(CaptureError::Device(format!(
                "{} exited with {status}",
                self.program
            )));
        }
        Ok(Artifact {
            path: output,
            mime: self.mime.clone(),
        })
    }
}
