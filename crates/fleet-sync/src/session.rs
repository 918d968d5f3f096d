use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::feed::{FeedConnector, FeedManager, FeedState};
use crate::fetch::{fetch_and_apply, SnapshotSource};
use crate::poller::FallbackPoller;
use crate::store::{StateStore, UpdateSource};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SyncTimings {
    pub poll_interval: Duration,
    pub reconnect_delay: Duration,
}

impl Default for SyncTimings {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }
}

/// Running synchronization: one feed task and one poll task writing into a
/// shared store.
pub struct SyncSession {
    feed_state: watch::Receiver<FeedState>,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl SyncSession {
    /// Seeds the store with one fetch, then opens the feed and starts polling.
    /// A failed seed only raises the notice; the feed and poller start anyway.
    pub async fn start(
        store: Arc<StateStore>,
        source: Arc<dyn SnapshotSource>,
        connector: Arc<dyn FeedConnector>,
        timings: SyncTimings,
        shutdown: CancellationToken,
    ) -> Self {
        info!(
            event = "session.start",
            poll_interval_ms = timings.poll_interval.as_millis() as u64,
            reconnect_delay_ms = timings.reconnect_delay.as_millis() as u64,
            "starting sync session"
        );
        let seeded = tokio::select! {
            _ = shutdown.cancelled() => false,
            seeded = fetch_and_apply(source.as_ref(), &store, UpdateSource::InitialFetch) => seeded,
        };
        if !seeded {
            warn!(event = "session.seed_failed", "initial snapshot unavailable");
        }

        let feed = Arc::new(FeedManager::new(
            connector,
            Arc::clone(&store),
            timings.reconnect_delay,
        ));
        let feed_state = feed.subscribe_state();
        let poller = FallbackPoller::new(source, Arc::clone(&store), timings.poll_interval);

        let feed_shutdown = shutdown.child_token();
        let poll_shutdown = shutdown.child_token();
        let tasks = vec![
            tokio::spawn(async move { feed.run(feed_shutdown).await }),
            tokio::spawn(async move { poller.run(poll_shutdown).await }),
        ];

        Self {
            feed_state,
            shutdown,
            tasks,
        }
    }

    pub fn feed_state(&self) -> FeedState {
        *self.feed_state.borrow()
    }

    pub fn subscribe_feed_state(&self) -> watch::Receiver<FeedState> {
        self.feed_state.clone()
    }

    /// Cancels both tasks and waits for them. The feed connection is closed
    /// before this returns.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        for task in self.tasks {
            if let Err(err) = task.await {
                warn!(event = "session.task_failed", error = %err, "sync task ended abnormally");
            }
        }
        info!(event = "session.stopped", "sync session stopped");
    }
}
