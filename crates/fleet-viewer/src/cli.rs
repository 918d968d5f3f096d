use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "fleetdash", version, about = "Live fleet status dashboard")]
pub(crate) struct Args {
    /// TOML config file. Defaults to `<config dir>/fleetdash/config.toml`.
    #[arg(long)]
    pub(crate) config: Option<PathBuf>,
    /// Dashboard API root, e.g. `http://127.0.0.1:8080`.
    #[arg(long)]
    pub(crate) base_url: Option<String>,
    #[arg(long)]
    pub(crate) log_dir: Option<PathBuf>,
    #[arg(long, default_value_t = false)]
    pub(crate) log_to_stderr: bool,
    /// Rows in the recent history table; 0 shows everything.
    #[arg(long)]
    pub(crate) history_limit: Option<usize>,
}
