use std::sync::Arc;

use protocol::RecordAction;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::CommandPipeline;

/// Running push and poll activities. They run until `stop` is called; dropping
/// the handle leaves them running.
pub(crate) struct PipelineHandle {
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl PipelineHandle {
    /// Cancels both activities and waits for them. A poll pass already in
    /// progress finishes first.
    pub(crate) async fn stop(self) {
        self.shutdown.cancel();
        for task in self.tasks {
            if let Err(err) = task.await {
                warn!(error = %err, "pipeline task ended abnormally");
            }
        }
    }
}

impl CommandPipeline {
    /// Subscribes to pushed commands and starts the poll loop.
    pub(crate) async fn start(self: Arc<Self>) -> PipelineHandle {
        let shutdown = CancellationToken::new();
        let mut tasks = Vec::with_capacity(2);

        match self.store.subscribe_commands().await {
            Ok(events) => {
                info!(user_id = %self.user_id(), "push delivery subscribed");
                tasks.push(tokio::spawn(push_loop(
                    Arc::clone(&self),
                    events,
                    shutdown.clone(),
                )));
            }
            Err(err) => warn!(error = %err, "push subscription failed; relying on polling"),
        }

        tasks.push(tokio::spawn(poll_loop(Arc::clone(&self), shutdown.clone())));
        PipelineHandle { shutdown, tasks }
    }
}

async fn push_loop(
    pipeline: Arc<CommandPipeline>,
    mut events: tokio::sync::mpsc::Receiver<protocol::CommandEvent>,
    shutdown: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => {
                    warn!("push delivery closed; polling continues");
                    break;
                }
            },
        };
        if event.action != RecordAction::Create {
            debug!(command_id = %event.record.id, action = ?event.action, "ignoring command change");
            continue;
        }
        let pipeline = Arc::clone(&pipeline);
        tokio::spawn(async move {
            pipeline.execute(event.record).await;
        });
    }
}

async fn poll_loop(pipeline: Arc<CommandPipeline>, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(pipeline.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }
        pipeline.poll_once().await;
    }
    debug!("poll loop stopped");
}
