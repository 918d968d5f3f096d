mod cli;
mod config;
mod logging;
mod render;
mod view;

use crate::cli::Args;
use crate::config::{load_for_args, resolve};
use crate::logging::init_tracing;
use crate::render::{Screen, TerminalRenderer};
use anyhow::Context;
use clap::Parser;
use fleet_sync::{HttpSnapshotFetcher, SseConnector, StateStore, SyncSession};
use std::io;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let (file_config, config_path) = load_for_args(&args)?;
    let config = resolve(&args, file_config)?;
    let _log_guard = init_tracing(&config.log_dir, config.log_to_stderr)
        .with_context(|| format!("failed to init logging in {}", config.log_dir.display()))?;

    info!(
        base_url = %config.http.base_url,
        config = ?config_path,
        poll_interval_ms = config.timings.poll_interval.as_millis() as u64,
        reconnect_delay_ms = config.timings.reconnect_delay.as_millis() as u64,
        history_limit = config.history_limit,
        "fleetdash starting"
    );

    let source = Arc::new(
        HttpSnapshotFetcher::new(config.http.clone()).context("failed to build http client")?,
    );
    let connector =
        Arc::new(SseConnector::new(&config.http).context("failed to build event stream client")?);

    let store = Arc::new(StateStore::new());
    let renderer = Arc::new(TerminalRenderer::new(
        &store,
        config.history_limit,
        io::stdout(),
    ));
    let screen = Screen::enter().context("failed to enter alternate screen")?;
    store.subscribe(renderer.clone());
    renderer.redraw();

    let shutdown = CancellationToken::new();
    tokio::spawn(wait_for_shutdown(shutdown.clone()));

    let session = SyncSession::start(
        Arc::clone(&store),
        source,
        connector,
        config.timings,
        shutdown.clone(),
    )
    .await;
    shutdown.cancelled().await;
    session.shutdown().await;
    drop(screen);
    info!("fleetdash stopped");
    Ok(())
}

async fn wait_for_shutdown(shutdown: CancellationToken) {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
    shutdown.cancel();
}
