use anyhow::Context;
use fleet_protocol::DEFAULT_HISTORY_WINDOW;
use fleet_sync::{HttpSettings, SyncTimings};
use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cli::Args;

const DEFAULT_BASE_URL: &str = "http://localhost:8080";
const APP_DIR: &str = "fleetdash";

#[derive(Debug, Default, Deserialize)]
pub(crate) struct FileConfig {
    pub(crate) base_url: Option<String>,
    #[serde(default)]
    pub(crate) sync: SyncSection,
    #[serde(default)]
    pub(crate) view: ViewSection,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct SyncSection {
    #[serde(default, deserialize_with = "duration_opt")]
    pub(crate) poll_interval: Option<Duration>,
    #[serde(default, deserialize_with = "duration_opt")]
    pub(crate) reconnect_delay: Option<Duration>,
    #[serde(default, deserialize_with = "duration_opt")]
    pub(crate) request_timeout: Option<Duration>,
    #[serde(default, deserialize_with = "duration_opt")]
    pub(crate) connect_timeout: Option<Duration>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ViewSection {
    pub(crate) history_limit: Option<usize>,
}

/// Effective settings after CLI, file and defaults are merged.
#[derive(Debug, Clone)]
pub(crate) struct ViewerConfig {
    pub(crate) http: HttpSettings,
    pub(crate) timings: SyncTimings,
    pub(crate) history_limit: usize,
    pub(crate) log_dir: PathBuf,
    pub(crate) log_to_stderr: bool,
}

fn duration_opt<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(raw) = Option::<String>::deserialize(deserializer)? else {
        return Ok(None);
    };
    humantime::parse_duration(raw.trim())
        .map(Some)
        .map_err(|err| serde::de::Error::custom(format!("invalid duration {raw:?}: {err}")))
}

pub(crate) fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR).join("config.toml"))
}

pub(crate) fn default_log_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(format!(".{APP_DIR}")).join("logs"))
        .unwrap_or_else(|| PathBuf::from("logs"))
}

pub(crate) fn load_file_config(path: &Path) -> anyhow::Result<FileConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let config: FileConfig = toml::from_str(&raw)
        .with_context(|| format!("failed to parse config {}", path.display()))?;
    validate_file_config(&config)?;
    Ok(config)
}

/// An explicit `--config` must exist; the default location may be absent.
pub(crate) fn load_for_args(args: &Args) -> anyhow::Result<(FileConfig, Option<PathBuf>)> {
    if let Some(path) = &args.config {
        return Ok((load_file_config(path)?, Some(path.clone())));
    }
    match default_config_path() {
        Some(path) if path.is_file() => Ok((load_file_config(&path)?, Some(path))),
        _ => Ok((FileConfig::default(), None)),
    }
}

fn validate_file_config(config: &FileConfig) -> anyhow::Result<()> {
    if let Some(base_url) = &config.base_url {
        validate_base_url(base_url)?;
    }
    let sync = &config.sync;
    for (name, value) in [
        ("sync.poll_interval", sync.poll_interval),
        ("sync.reconnect_delay", sync.reconnect_delay),
        ("sync.request_timeout", sync.request_timeout),
        ("sync.connect_timeout", sync.connect_timeout),
    ] {
        if value.is_some_and(|duration| duration.is_zero()) {
            anyhow::bail!("{name} must be greater than zero");
        }
    }
    Ok(())
}

fn validate_base_url(base_url: &str) -> anyhow::Result<()> {
    let trimmed = base_url.trim();
    if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
        anyhow::bail!("base_url must start with http:// or https://, got {base_url:?}");
    }
    Ok(())
}

pub(crate) fn resolve(args: &Args, file: FileConfig) -> anyhow::Result<ViewerConfig> {
    let base_url = args
        .base_url
        .clone()
        .or(file.base_url)
        .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
    validate_base_url(&base_url)?;

    let mut http = HttpSettings::new(base_url.trim());
    if let Some(timeout) = file.sync.request_timeout {
        http.request_timeout = timeout;
    }
    if let Some(timeout) = file.sync.connect_timeout {
        http.connect_timeout = timeout;
    }

    let defaults = SyncTimings::default();
    let timings = SyncTimings {
        poll_interval: file.sync.poll_interval.unwrap_or(defaults.poll_interval),
        reconnect_delay: file.sync.reconnect_delay.unwrap_or(defaults.reconnect_delay),
    };

    Ok(ViewerConfig {
        http,
        timings,
        history_limit: args
            .history_limit
            .or(file.view.history_limit)
            .unwrap_or(DEFAULT_HISTORY_WINDOW),
        log_dir: args.log_dir.clone().unwrap_or_else(default_log_dir),
        log_to_stderr: args.log_to_stderr,
    })
}
