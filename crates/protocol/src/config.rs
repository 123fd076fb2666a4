use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    pub store: StoreConfig,
    pub auth: Option<AuthConfig>,
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub consent: ConsentConfig,
    pub microphone: Option<CaptureDeviceConfig>,
    pub camera: Option<CaptureDeviceConfig>,
    pub location: Option<FixedLocationConfig>,
    #[serde(default)]
    pub notice: NoticeConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    pub email: String,
    /// Environment variable holding the account password.
    #[serde(default = "default_password_env")]
    pub password_env: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_poll_interval_ms(),
            page_size: default_page_size(),
        }
    }
}

/// Capabilities the device owner has agreed to. Everything is off unless
/// granted.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct ConsentConfig {
    #[serde(default)]
    pub microphone: bool,
    #[serde(default)]
    pub camera: bool,
    #[serde(default)]
    pub location: bool,
}

/// External program that captures into `{output}`.
#[derive(Debug, Clone, Deserialize)]
pub struct CaptureDeviceConfig {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    pub extension: String,
    pub mime: String,
    pub output_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct FixedLocationConfig {
    pub latitude: f64,
    pub longitude: f64,
    pub speed: Option<f64>,
    pub heading: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NoticeConfig {
    /// argv of a notifier; the notice text is appended as the last argument.
    pub command: Option<Vec<String>>,
}

fn default_password_env() -> String {
    "FIELDLINK_PASSWORD".to_string()
}

fn default_poll_interval_ms() -> u64 {
    10_000
}

fn default_page_size() -> u32 {
    20
}
