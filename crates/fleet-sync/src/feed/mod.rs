mod sse;

pub use sse::{SseConnection, SseConnector, SseDecoder};

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fleet_protocol::Snapshot;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{SyncError, SyncResult};
use crate::store::{StateStore, UpdateSource};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FeedState {
    Disconnected,
    Connecting,
    Connected,
    Error,
    Reconnecting,
}

impl FeedState {
    pub fn as_str(self) -> &'static str {
        match self {
            FeedState::Disconnected => "disconnected",
            FeedState::Connecting => "connecting",
            FeedState::Connected => "connected",
            FeedState::Error => "error",
            FeedState::Reconnecting => "reconnecting",
        }
    }
}

impl fmt::Display for FeedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[async_trait]
pub trait FeedConnector: Send + Sync {
    async fn connect(&self) -> SyncResult<Box<dyn FeedConnection>>;
}

/// One open push connection.
#[async_trait]
pub trait FeedConnection: Send {
    /// Next raw message payload. `None` means the server closed the stream.
    /// Must be cancel safe: dropping the future loses no buffered data.
    async fn next_message(&mut self) -> Option<SyncResult<String>>;

    async fn close(&mut self);
}

enum SessionEnd {
    Shutdown,
    Failed(SyncError),
}

/// Owns the push connection and drives
/// `Disconnected → Connecting → Connected → Error → Reconnecting → Connecting …`
/// until cancelled. Reconnects are unbounded and spaced by a fixed delay.
pub struct FeedManager {
    connector: Arc<dyn FeedConnector>,
    store: Arc<StateStore>,
    reconnect_delay: Duration,
    state_tx: watch::Sender<FeedState>,
}

impl FeedManager {
    pub fn new(
        connector: Arc<dyn FeedConnector>,
        store: Arc<StateStore>,
        reconnect_delay: Duration,
    ) -> Self {
        let (state_tx, _) = watch::channel(FeedState::Disconnected);
        Self {
            connector,
            store,
            reconnect_delay,
            state_tx,
        }
    }

    pub fn state(&self) -> FeedState {
        *self.state_tx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<FeedState> {
        self.state_tx.subscribe()
    }

    pub async fn run(&self, shutdown: CancellationToken) {
        let mut attempt: u64 = 0;
        loop {
            if shutdown.is_cancelled() {
                break;
            }
            attempt += 1;
            self.set_state(FeedState::Connecting);
            info!(event = "feed.connecting", attempt, "opening live feed");
            let connected = tokio::select! {
                _ = shutdown.cancelled() => break,
                result = self.connector.connect() => result,
            };
            let failure = match connected {
                Ok(mut connection) => match self.pump(connection.as_mut(), &shutdown).await {
                    SessionEnd::Shutdown => {
                        connection.close().await;
                        break;
                    }
                    SessionEnd::Failed(err) => {
                        self.enter_error(&err);
                        connection.close().await;
                        err
                    }
                },
                Err(err) => {
                    self.enter_error(&err);
                    err
                }
            };
            self.set_state(FeedState::Reconnecting);
            info!(
                event = "feed.reconnect_scheduled",
                attempt,
                delay_ms = self.reconnect_delay.as_millis() as u64,
                error = %failure,
                "live feed reconnect scheduled"
            );
            if wait_reconnect_or_shutdown(&shutdown, self.reconnect_delay).await {
                break;
            }
        }
        self.store.set_live(false);
        self.set_state(FeedState::Disconnected);
        info!(event = "feed.stopped", "live feed stopped");
    }

    async fn pump(
        &self,
        connection: &mut dyn FeedConnection,
        shutdown: &CancellationToken,
    ) -> SessionEnd {
        loop {
            let message = tokio::select! {
                _ = shutdown.cancelled() => return SessionEnd::Shutdown,
                message = connection.next_message() => message,
            };
            match message {
                Some(Ok(payload)) => self.handle_message(&payload),
                Some(Err(err)) => return SessionEnd::Failed(err),
                None => {
                    return SessionEnd::Failed(SyncError::transport("event stream closed by server"))
                }
            }
        }
    }

    fn handle_message(&self, payload: &str) {
        match Snapshot::decode(payload.as_bytes()) {
            Ok(snapshot) => {
                let published = self.store.publish(snapshot, UpdateSource::Feed);
                if self.state() != FeedState::Connected {
                    info!(
                        event = "feed.connected",
                        revision = published.revision,
                        "live feed connected"
                    );
                }
                self.set_state(FeedState::Connected);
                self.store.set_live(true);
            }
            Err(err) => {
                warn!(
                    event = "feed.message_dropped",
                    payload_len = payload.len(),
                    error = %err,
                    "failed to parse feed message"
                );
            }
        }
    }

    fn enter_error(&self, err: &SyncError) {
        self.store.set_live(false);
        self.set_state(FeedState::Error);
        warn!(event = "feed.error", error = %err, "live feed connection error");
    }

    fn set_state(&self, state: FeedState) {
        self.state_tx.send_replace(state);
    }
}

async fn wait_reconnect_or_shutdown(shutdown: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => true,
        _ = tokio::time::sleep(delay) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{
        snapshot_json, snapshot_named, ConnectionEvent, ScriptedConnector, Step,
    };
    use tokio::time::{advance, sleep, Instant};

    const DELAY: Duration = Duration::from_secs(5);

    fn manager(connector: Arc<ScriptedConnector>, store: Arc<StateStore>) -> Arc<FeedManager> {
        Arc::new(FeedManager::new(connector, store, DELAY))
    }

    fn spawn(manager: &Arc<FeedManager>, shutdown: &CancellationToken) -> tokio::task::JoinHandle<()> {
        let manager = Arc::clone(manager);
        let shutdown = shutdown.clone();
        tokio::spawn(async move { manager.run(shutdown).await })
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn message_publishes_and_marks_live() {
        let store = Arc::new(StateStore::new());
        let connector = Arc::new(ScriptedConnector::new(vec![vec![
            Step::Message(snapshot_json("feed-a")),
            Step::Hold,
        ]]));
        let manager = manager(connector.clone(), store.clone());
        let shutdown = CancellationToken::new();
        let handle = spawn(&manager, &shutdown);
        settle().await;

        assert_eq!(manager.state(), FeedState::Connected);
        assert!(store.is_live());
        assert_eq!(store.current().as_deref(), Some(&snapshot_named("feed-a")));

        shutdown.cancel();
        handle.await.unwrap();
        assert_eq!(manager.state(), FeedState::Disconnected);
        assert!(!store.is_live());
        assert_eq!(connector.open_connections(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_message_is_dropped_without_closing() {
        let store = Arc::new(StateStore::new());
        let connector = Arc::new(ScriptedConnector::new(vec![vec![
            Step::Message(snapshot_json("good")),
            Step::Message("{not json".to_string()),
            Step::Hold,
        ]]));
        let manager = manager(connector.clone(), store.clone());
        let shutdown = CancellationToken::new();
        let handle = spawn(&manager, &shutdown);
        settle().await;

        assert_eq!(store.current().as_deref(), Some(&snapshot_named("good")));
        assert_eq!(store.revision(), 1);
        assert_eq!(manager.state(), FeedState::Connected);
        assert!(store.is_live());
        assert_eq!(connector.open_connections(), 1);
        assert_eq!(connector.connect_count(), 1);

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn consecutive_errors_reconnect_once_each_after_delay() {
        const FAILURES: usize = 4;
        let store = Arc::new(StateStore::new());
        let mut script: Vec<Vec<Step>> = (0..FAILURES).map(|_| vec![Step::Fail]).collect();
        script.push(vec![Step::Hold]);
        let connector = Arc::new(ScriptedConnector::new(script));
        let manager = manager(connector.clone(), store.clone());
        let mut states = manager.subscribe_state();
        let shutdown = CancellationToken::new();
        let handle = spawn(&manager, &shutdown);

        let watcher_store = store.clone();
        let watcher = tokio::spawn(async move {
            let mut live_in_error_window = false;
            while states.changed().await.is_ok() {
                let state = *states.borrow_and_update();
                if matches!(state, FeedState::Error | FeedState::Reconnecting)
                    && watcher_store.is_live()
                {
                    live_in_error_window = true;
                }
                if state == FeedState::Disconnected {
                    break;
                }
            }
            live_in_error_window
        });

        sleep(DELAY * (FAILURES as u32 + 1)).await;
        settle().await;

        assert_eq!(connector.connect_count(), FAILURES + 1);
        let events = connector.events();
        let mut opens: Vec<Instant> = Vec::new();
        let mut open = false;
        for event in &events {
            match event {
                ConnectionEvent::Opened(at) => {
                    assert!(!open, "connection opened while another was open");
                    open = true;
                    opens.push(*at);
                }
                ConnectionEvent::Closed(_) => open = false,
            }
        }
        assert_eq!(opens.len(), FAILURES + 1);
        for pair in opens.windows(2) {
            assert!(pair[1].duration_since(pair[0]) >= DELAY);
        }
        assert!(!store.is_live());

        shutdown.cancel();
        handle.await.unwrap();
        assert!(!watcher.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn connect_failures_retry_indefinitely() {
        let store = Arc::new(StateStore::new());
        let connector = Arc::new(ScriptedConnector::refusing());
        let manager = manager(connector.clone(), store.clone());
        let shutdown = CancellationToken::new();
        let handle = spawn(&manager, &shutdown);

        for expected in 1..=20 {
            settle().await;
            assert_eq!(connector.connect_count(), expected);
            assert_eq!(manager.state(), FeedState::Reconnecting);
            advance(DELAY).await;
        }
        assert!(!store.is_live());

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn drop_mid_session_recovers_after_delay() {
        let store = Arc::new(StateStore::new());
        let connector = Arc::new(ScriptedConnector::new(vec![
            vec![Step::Message(snapshot_json("before")), Step::Wait(Duration::from_secs(60)), Step::Fail],
            vec![Step::Message(snapshot_json("after")), Step::Hold],
        ]));
        let manager = manager(connector.clone(), store.clone());
        let shutdown = CancellationToken::new();
        let handle = spawn(&manager, &shutdown);
        settle().await;
        assert!(store.is_live());

        advance(Duration::from_secs(60)).await;
        settle().await;
        assert!(!store.is_live());
        assert_eq!(manager.state(), FeedState::Reconnecting);
        assert_eq!(connector.connect_count(), 1);
        assert_eq!(connector.open_connections(), 0);

        advance(DELAY - Duration::from_millis(1)).await;
        settle().await;
        assert_eq!(connector.connect_count(), 1);

        advance(Duration::from_millis(1)).await;
        settle().await;
        assert_eq!(connector.connect_count(), 2);
        assert_eq!(manager.state(), FeedState::Connected);
        assert!(store.is_live());
        assert_eq!(store.current().as_deref(), Some(&snapshot_named("after")));

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn server_close_counts_as_error() {
        let store = Arc::new(StateStore::new());
        let connector = Arc::new(ScriptedConnector::new(vec![
            vec![Step::Message(snapshot_json("one"))],
            vec![Step::Hold],
        ]));
        let manager = manager(connector.clone(), store.clone());
        let shutdown = CancellationToken::new();
        let handle = spawn(&manager, &shutdown);
        settle().await;

        assert_eq!(manager.state(), FeedState::Reconnecting);
        assert!(!store.is_live());
        assert_eq!(store.current().as_deref(), Some(&snapshot_named("one")));

        advance(DELAY).await;
        settle().await;
        assert_eq!(connector.connect_count(), 2);
        // Connected only once a message arrives on the fresh connection.
        assert_eq!(manager.state(), FeedState::Connecting);

        shutdown.cancel();
        handle.await.unwrap();
        assert_eq!(connector.open_connections(), 0);
    }
}
