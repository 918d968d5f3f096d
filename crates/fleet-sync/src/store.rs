use chrono::{DateTime, Utc};
use fleet_protocol::Snapshot;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tracing::{debug, info};

/// Notice shown while the most recent fetch or poll failed.
pub const LOAD_FAILED_NOTICE: &str = "Failed to load data. Retrying...";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateSource {
    InitialFetch,
    Poll,
    Feed,
}

impl UpdateSource {
    pub fn as_str(self) -> &'static str {
        match self {
            UpdateSource::InitialFetch => "initial_fetch",
            UpdateSource::Poll => "poll",
            UpdateSource::Feed => "feed",
        }
    }
}

impl fmt::Display for UpdateSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The current snapshot together with where and when it arrived.
///
/// `revision` increases by one per publish and is informational only: a
/// publish is never rejected because of it.
#[derive(Clone, Debug)]
pub struct PublishedSnapshot {
    pub snapshot: Arc<Snapshot>,
    pub source: UpdateSource,
    pub revision: u64,
    pub received_at: DateTime<Utc>,
}

/// Render-side subscriber. Callbacks run synchronously on the publishing task
/// and must not publish back into the store.
pub trait StoreObserver: Send + Sync {
    fn snapshot_changed(&self, published: &PublishedSnapshot);

    fn live_changed(&self, _live: bool) {}

    fn load_failed(&self, _notice: &str) {}
}

#[derive(Default)]
struct StoreCell {
    current: Option<PublishedSnapshot>,
    live: bool,
    notice: Option<String>,
    revision: u64,
}

/// Single mutation point for synchronized state.
///
/// `cell` guards the data; `gate` serializes each replace-then-notify sequence
/// so observers see changes in the order they were applied.
#[derive(Default)]
pub struct StateStore {
    cell: Mutex<StoreCell>,
    gate: Mutex<()>,
    observers: RwLock<Vec<Arc<dyn StoreObserver>>>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, observer: Arc<dyn StoreObserver>) {
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(observer);
    }

    /// Replaces the held snapshot unconditionally (last write wins), clears the
    /// failure notice, then notifies observers.
    pub fn publish(&self, snapshot: Snapshot, source: UpdateSource) -> PublishedSnapshot {
        let _gate = lock(&self.gate);
        let published = {
            let mut cell = lock(&self.cell);
            cell.revision += 1;
            let published = PublishedSnapshot {
                snapshot: Arc::new(snapshot),
                source,
                revision: cell.revision,
                received_at: Utc::now(),
            };
            cell.current = Some(published.clone());
            cell.notice = None;
            published
        };
        debug!(
            event = "store.publish",
            source = %source,
            revision = published.revision,
            machines = published.snapshot.machines.len(),
            "snapshot published"
        );
        for observer in self.observer_list() {
            observer.snapshot_changed(&published);
        }
        published
    }

    pub fn current(&self) -> Option<Arc<Snapshot>> {
        lock(&self.cell)
            .current
            .as_ref()
            .map(|published| Arc::clone(&published.snapshot))
    }

    pub fn current_published(&self) -> Option<PublishedSnapshot> {
        lock(&self.cell).current.clone()
    }

    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        lock(&self.cell)
            .current
            .as_ref()
            .map(|published| published.received_at)
    }

    pub fn revision(&self) -> u64 {
        lock(&self.cell).revision
    }

    pub fn is_live(&self) -> bool {
        lock(&self.cell).live
    }

    pub fn notice(&self) -> Option<String> {
        lock(&self.cell).notice.clone()
    }

    /// Updates the feed health indicator; observers hear about transitions only.
    pub fn set_live(&self, live: bool) {
        let _gate = lock(&self.gate);
        let changed = {
            let mut cell = lock(&self.cell);
            let changed = cell.live != live;
            cell.live = live;
            changed
        };
        if !changed {
            return;
        }
        info!(event = "store.live", live, "live indicator changed");
        for observer in self.observer_list() {
            observer.live_changed(live);
        }
    }

    /// Records a fetch or poll failure. The held snapshot is left untouched.
    pub fn report_failure(&self, notice: &str) {
        let _gate = lock(&self.gate);
        lock(&self.cell).notice = Some(notice.to_string());
        for observer in self.observer_list() {
            observer.load_failed(notice);
        }
    }

    fn observer_list(&self) -> Vec<Arc<dyn StoreObserver>> {
        self.observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
