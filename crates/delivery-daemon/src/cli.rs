use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "paynow-delivery",
    version,
    about = "Delivers store purchases from the backend command queue to a game server"
)]
pub(crate) struct Args {
    #[arg(long, default_value = "config/paynow.toml")]
    pub(crate) config: PathBuf,
    #[arg(long)]
    pub(crate) control_addr: Option<String>,
    #[arg(long)]
    pub(crate) log_dir: Option<PathBuf>,
    #[arg(long, default_value_t = false)]
    pub(crate) log_to_stderr: bool,
}
