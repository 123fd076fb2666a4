use anyhow::Context;
pub(crate) use protocol::config::AgentConfig;
use protocol::config::CaptureDeviceConfig;
use protocol::records::is_allowed_upload_mime;
use std::path::Path;

pub(crate) const OUTPUT_PLACEHOLDER: &str = "{output}";
const MAX_PAGE_SIZE: u32 = 500;

fn validate_device(label: &str, device: &CaptureDeviceConfig) -> anyhow::Result<()> {
    if device.program.trim().is_empty() {
        anyhow::bail!("{label} program cannot be empty");
    }
    if !device.args.iter().any(|arg| arg.contains(OUTPUT_PLACEHOLDER)) {
        anyhow::bail!("{label} args must reference {OUTPUT_PLACEHOLDER}");
    }
    if device.extension.trim().is_empty() {
        anyhow::bail!("{label} extension cannot be empty");
    }
    if !is_allowed_upload_mime(&device.mime) {
        anyhow::bail!("{label} mime {} is not accepted by the store", device.mime);
    }
    Ok(())
}

fn validate_agent_config(config: &AgentConfig) -> anyhow::Result<()> {
    let url = config.store.url.trim();
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        anyhow::bail!("store url must be http(s), got {url:?}");
    }
    if config.poll.interval_ms == 0 {
        anyhow::bail!("poll interval_ms must be positive");
    }
    if config.poll.page_size == 0 || config.poll.page_size > MAX_PAGE_SIZE {
        anyhow::bail!("poll page_size must be within 1..={MAX_PAGE_SIZE}");
    }
    if let Some(auth) = &config.auth {
        if auth.email.trim().is_empty() {
            anyhow::bail!("auth email cannot be empty");
        }
    }
    if let Some(device) = &config.microphone {
        validate_device("microphone", device)?;
    }
    if let Some(device) = &config.camera {
        validate_device("camera", device)?;
    }
    if let Some(location) = &config.location {
        if !(-90.0..=90.0).contains(&location.latitude)
            || !(-180.0..=180.0).contains(&location.longitude)
        {
            anyhow::bail!("location coordinates out of range");
        }
    }
    Ok(())
}

pub(crate) fn load_agent_config(path: &Path) -> anyhow::Result<AgentConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let config: AgentConfig = toml::from_str(&raw)
        .with_context(|| format!("failed to parse config {}", path.display()))?;
    validate_agent_config(&config)?;
    Ok(config)
}
