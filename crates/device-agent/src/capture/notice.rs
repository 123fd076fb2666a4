use std::sync::Arc;

use tokio::process::Command;
use tracing::{info, warn};

/// Tells the device user that a capability is being used.
#[derive(Clone, Default)]
pub(crate) struct CaptureNotice {
    command: Option<Arc<Vec<String>>>,
}

impl CaptureNotice {
    pub(crate) fn new(command: Option<Vec<String>>) -> Self {
        let command = command.filter(|argv| !argv.is_empty()).map(Arc::new);
        Self { command }
    }

    pub(crate) fn announce(&self, message: &str) {
        info!(target: "capture_notice", notice = message, "capture in progress");
        let Some(argv) = self.command.clone() else {
            return;
        };
        let message = message.to_string();
        tokio::spawn(async move {
            let mut cmd = Command::new(&argv[0]);
            cmd.args(&argv[1..]).arg(&message);
            match cmd.status().await {
                Ok(status) if status.success() => {}
                Ok(status) => warn!(%status, program = %argv[0], "notice command exited"),
                Err(err) => warn!(error = %err, program = %argv[0], "notice command failed"),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_command_is_ignored() {
        let notice = CaptureNotice::new(Some(Vec::new()));
        assert!(notice.command.is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn notice_command_receives_message() {
        let dir = crate::test_utils::temp_dir("fieldlink-notice");
        let out = dir.join("notice.txt");
        let script = format!("printf '%s' \"$0\" > {}", out.display());
        let notice = CaptureNotice::new(Some(vec![
            "sh".to_string(),
            "-c".to_string(),
            script,
        ]));
        notice.announce("microphone recording started");
        for _ in 0..100 {
            if let Ok(text) = std::fs::read_to_string(&out) {
                if !text.is_empty() {
                    assert_eq!(text, "microphone recording started");
                    return;
                }
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        panic!("notice command did not run");
    }
}
