use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::fetch::{fetch_and_apply, SnapshotSource};
use crate::store::{StateStore, UpdateSource};

/// Periodic full refresh. Runs regardless of feed health; the first poll fires
/// one interval after start.
pub struct FallbackPoller {
    source: Arc<dyn SnapshotSource>,
    store: Arc<StateStore>,
    interval: Duration,
}

impl FallbackPoller {
    pub fn new(source: Arc<dyn SnapshotSource>, store: Arc<StateStore>, interval: Duration) -> Self {
        Self {
            source,
            store,
            interval,
        }
    }

    pub async fn run(&self, shutdown: CancellationToken) {
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            event = "poll.started",
            interval_ms = self.interval.as_millis() as u64,
            "fallback polling started"
        );
        let mut polls: u64 = 0;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            polls += 1;
            let applied = tokio::select! {
                _ = shutdown.cancelled() => break,
                applied = fetch_and_apply(self.source.as_ref(), &self.store, UpdateSource::Poll) => applied,
            };
            debug!(event = "poll.tick", polls, applied, "fallback poll finished");
        }
        info!(event = "poll.stopped", polls, "fallback polling stopped");
    }
}
