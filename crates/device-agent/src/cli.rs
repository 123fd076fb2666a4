use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "fieldlink-agent",
    version,
    about = "Device agent that runs operator commands against consented capabilities"
)]
pub(crate) struct Args {
    #[arg(long, default_value = "config/agent.toml")]
    pub(crate) config: PathBuf,
    #[arg(long, default_value = "logs")]
    pub(crate) log_dir: PathBuf,
    #[arg(long, default_value_t = false)]
    pub(crate) log_to_stderr: bool,
}
