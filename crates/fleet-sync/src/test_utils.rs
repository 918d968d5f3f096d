use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use fleet_protocol::{MachineState, Snapshot};
use tokio::time::{sleep_until, Instant};

use crate::error::{SyncError, SyncResult};
use crate::feed::{FeedConnection, FeedConnector};
use crate::fetch::SnapshotSource;
use crate::store::{PublishedSnapshot, StoreObserver, UpdateSource};

/// A snapshot holding one empty machine called `name`.
pub(crate) fn snapshot_named(name: &str) -> Snapshot {
    let mut machines = BTreeMap::new();
    machines.insert(name.to_string(), MachineState::default());
    Snapshot {
        machines,
        timestamp: None,
    }
}

pub(crate) fn snapshot_json(name: &str) -> String {
    serde_json::to_string(&snapshot_named(name)).expect("encode snapshot")
}

#[derive(Default)]
pub(crate) struct RecordingObserver {
    published: Mutex<Vec<(u64, UpdateSource)>>,
    failures: Mutex<Vec<String>>,
    live: Mutex<Vec<bool>>,
}

impl RecordingObserver {
    pub(crate) fn revisions(&self) -> Vec<u64> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .map(|(revision, _)| *revision)
            .collect()
    }

    pub(crate) fn sources(&self) -> Vec<UpdateSource> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .map(|(_, source)| *source)
            .collect()
    }

    pub(crate) fn failures(&self) -> Vec<String> {
        self.failures.lock().unwrap().clone()
    }

    pub(crate) fn live_values(&self) -> Vec<bool> {
        self.live.lock().unwrap().clone()
    }
}

impl StoreObserver for RecordingObserver {
    fn snapshot_changed(&self, published: &PublishedSnapshot) {
        self.published
            .lock()
            .unwrap()
            .push((published.revision, published.source));
    }

    fn live_changed(&self, live: bool) {
        self.live.lock().unwrap().push(live);
    }

    fn load_failed(&self, notice: &str) {
        self.failures.lock().unwrap().push(notice.to_string());
    }
}

#[derive(Clone, Debug)]
pub(crate) enum Reply {
    Snapshot(String),
    Status(u16),
    Malformed,
}

impl Reply {
    fn into_result(self) -> SyncResult<Snapshot> {
        match self {
            Reply::Snapshot(name) => Ok(snapshot_named(&name)),
            Reply::Status(code) => Err(SyncError::status(code, "GET /api/state")),
            Reply::Malformed => Snapshot::decode(b"<html>").map_err(SyncError::from),
        }
    }
}

/// Fake snapshot source: answers from a queue, then repeats `fallback`.
pub(crate) struct ScriptedSource {
    replies: Mutex<VecDeque<Reply>>,
    fallback: Reply,
    calls: Mutex<Vec<Instant>>,
}

impl ScriptedSource {
    pub(crate) fn new(replies: Vec<Reply>, fallback: Reply) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            fallback,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub(crate) fn call_times(&self) -> Vec<Instant> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl SnapshotSource for ScriptedSource {
    async fn fetch(&self) -> SyncResult<Snapshot> {
        self.calls.lock().unwrap().push(Instant::now());
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        reply.into_result()
    }
}

pub(crate) enum Step {
    /// Deliver one raw payload.
    Message(String),
    /// Block until this much time has passed since the step was reached.
    Wait(Duration),
    /// Fail the connection.
    Fail,
    /// Stay open and silent forever.
    Hold,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ConnectionEvent {
    Opened(Instant),
    Closed(Instant),
}

/// Fake push endpoint. Each successful connect consumes one script; once the
/// scripts run out every connect is refused.
pub(crate) struct ScriptedConnector {
    scripts: Mutex<VecDeque<Vec<Step>>>,
    attempts: Mutex<usize>,
    events: Arc<Mutex<Vec<ConnectionEvent>>>,
}

impl ScriptedConnector {
    pub(crate) fn new(scripts: Vec<Vec<Step>>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            attempts: Mutex::new(0),
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub(crate) fn refusing() -> Self {
        Self::new(Vec::new())
    }

    pub(crate) fn connect_count(&self) -> usize {
        *self.attempts.lock().unwrap()
    }

    pub(crate) fn events(&self) -> Vec<ConnectionEvent> {
        self.events.lock().unwrap().clone()
    }

    pub(crate) fn open_connections(&self) -> usize {
        let events = self.events.lock().unwrap();
        let opened = events
            .iter()
            .filter(|event| matches!(event, ConnectionEvent::Opened(_)))
            .count();
        opened - (events.len() - opened)
    }
}

#[async_trait]
impl FeedConnector for ScriptedConnector {
    async fn connect(&self) -> SyncResult<Box<dyn FeedConnection>> {
        *self.attempts.lock().unwrap() += 1;
        let script = self.scripts.lock().unwrap().pop_front();
        let Some(script) = script else {
            return Err(SyncError::transport("connect: connection refused"));
        };
        self.events
            .lock()
            .unwrap()
            .push(ConnectionEvent::Opened(Instant::now()));
        Ok(Box::new(ScriptedConnection {
            steps: script.into(),
            wait_until: None,
            closed: false,
            events: Arc::clone(&self.events),
        }))
    }
}

struct ScriptedConnection {
    steps: VecDeque<Step>,
    wait_until: Option<Instant>,
    closed: bool,
    events: Arc<Mutex<Vec<ConnectionEvent>>>,
}

#[async_trait]
impl FeedConnection for ScriptedConnection {
    async fn next_message(&mut self) -> Option<SyncResult<String>> {
        loop {
            if self.closed {
                return None;
            }
            match self.steps.front() {
                None => return None,
                Some(Step::Hold) => std::future::pending::<()>().await,
                Some(Step::Wait(duration)) => {
                    let deadline = *self
                        .wait_until
                        .get_or_insert_with(|| Instant::now() + *duration);
                    sleep_until(deadline).await;
                    self.wait_until = None;
                    self.steps.pop_front();
                }
                Some(Step::Message(_)) | Some(Step::Fail) => match self.steps.pop_front() {
                    Some(Step::Message(payload)) => return Some(Ok(payload)),
                    _ => return Some(Err(SyncError::transport("body: stream reset"))),
                },
            }
        }
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.events
            .lock()
            .unwrap()
            .push(ConnectionEvent::Closed(Instant::now()));
    }
}
