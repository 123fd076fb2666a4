mod capture;
mod cli;
mod config;
mod dedupe;
mod logging;
mod pipeline;
mod store;
#[cfg(test)]
mod test_utils;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::capture::{
    spawn_camera, AudioDevice, CameraSettings, CaptureNotice, FixedLocation, ProcessDevice,
    Recorder, RecorderSettings, StillCamera,
};
use crate::cli::Args;
use crate::config::{load_agent_config, AgentConfig};
use crate::logging::init_tracing;
use crate::pipeline::{Capabilities, CommandPipeline, PipelineSettings};
use crate::store::{PocketBaseStore, RecordStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let _file_guard = init_tracing(&args.log_dir, args.log_to_stderr)?;

    let config = load_agent_config(&args.config)?;
    let mut store = PocketBaseStore::new(&config.store.url)
        .with_context(|| format!("failed to build store client for {}", config.store.url))?;
    let user_id = authenticate(&mut store, &config).await?;
    let store: Arc<dyn RecordStore> = Arc::new(store);

    let shutdown = CancellationToken::new();
    let (capabilities, camera_task) =
        build_capabilities(&config, &store, user_id.as_deref(), &shutdown);

    let settings = PipelineSettings {
        poll_interval: Duration::from_millis(config.poll.interval_ms),
        page_size: config.poll.page_size,
        ..PipelineSettings::for_user(user_id)
    };
    let pipeline = Arc::new(CommandPipeline::new(settings, Arc::clone(&store), capabilities)?);
    info!(user_id = %pipeline.user_id(), "command pipeline starting");
    let handle = pipeline.start().await;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown requested");
    shutdown.cancel();
    handle.stop().await;
    if let Err(err) = camera_task.await {
        warn!(error = %err, "camera task ended abnormally");
    }
    Ok(())
}

async fn authenticate(
    store: &mut PocketBaseStore,
    config: &AgentConfig,
) -> anyhow::Result<Option<String>> {
    let Some(auth) = &config.auth else {
        warn!("no [auth] section configured; device has no identity");
        return Ok(None);
    };
    let password = std::env::var(&auth.password_env)
        .with_context(|| format!("password variable {} is not set", auth.password_env))?;
    let user_id = store
        .authenticate(&auth.email, &password)
        .await
        .with_context(|| format!("failed to authenticate {}", auth.email))?;
    info!(user_id = %user_id, "authenticated");
    Ok(Some(user_id))
}

fn build_capabilities(
    config: &AgentConfig,
    store: &Arc<dyn RecordStore>,
    user_id: Option<&str>,
    shutdown: &CancellationToken,
) -> (Capabilities, tokio::task::JoinHandle<()>) {
    let user_id = user_id.unwrap_or_default().to_string();
    let notice = CaptureNotice::new(config.notice.command.clone());

    let microphone = config
        .microphone
        .as_ref()
        .map(|device| Arc::new(ProcessDevice::from_config(device)) as Arc<dyn AudioDevice>);
    let recorder = Recorder::new(RecorderSettings {
        store: Arc::clone(store),
        device: microphone,
        consent: config.consent.microphone,
        user_id: user_id.clone(),
        notice: notice.clone(),
    });

    let camera = config
        .camera
        .as_ref()
        .map(|device| Arc::new(ProcessDevice::from_config(device)) as Arc<dyn StillCamera>);
    let (camera_trigger, camera_task) = spawn_camera(
        CameraSettings {
            store: Arc::clone(store),
            device: camera,
            consent: config.consent.camera,
            user_id,
            notice: notice.clone(),
        },
        shutdown.clone(),
    );

    let location = FixedLocation::new(config.location, config.consent.location, notice);

    let capabilities = Capabilities {
        audio: Arc::new(recorder),
        photo: Arc::new(camera_trigger),
        location: Arc::new(location),
    };
    (capabilities, camera_task)
}
