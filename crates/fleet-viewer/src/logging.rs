use anyhow::Context;
use std::io;
use std::path::Path;
use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

const LOG_FILE_PREFIX: &str = "fleetdash";
const LOG_FILE_SUFFIX: &str = "log";
const KEEP_LOG_FILES: usize = 7;

fn file_appender(log_dir: &Path) -> anyhow::Result<RollingFileAppender> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("failed to create log dir {}", log_dir.display()))?;
    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .filename_suffix(LOG_FILE_SUFFIX)
        .max_log_files(KEEP_LOG_FILES)
        .build(log_dir)
        .with_context(|| format!("failed to open log file in {}", log_dir.display()))
}

/// Installs the global subscriber. The terminal belongs to the dashboard, so
/// everything goes to the JSON file unless stderr is requested.
pub(crate) fn init_tracing(log_dir: &Path, log_to_stderr: bool) -> anyhow::Result<WorkerGuard> {
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender(log_dir)?);
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    let stderr_layer = log_to_stderr.then(|| {
        fmt::layer()
            .with_writer(io::stderr)
            .with_target(false)
            .compact()
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .json()
                .flatten_event(true),
        )
        .with(stderr_layer)
        .try_init()
        .context("failed to install tracing subscriber")?;
    Ok(guard)
}
