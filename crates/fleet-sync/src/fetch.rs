use async_trait::async_trait;
use fleet_protocol::Snapshot;
use reqwest::header::ACCEPT;
use reqwest::Client;
use tracing::{debug, warn};

use crate::error::{SyncError, SyncResult};
use crate::http::{build_http_client, HttpSettings, STATE_PATH};
use crate::store::{StateStore, UpdateSource, LOAD_FAILED_NOTICE};

/// Point-in-time snapshot request. Implementations hold no per-request state
/// and can be called repeatedly.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn fetch(&self) -> SyncResult<Snapshot>;
}

pub struct HttpSnapshotFetcher {
    client: Client,
    url: String,
    settings: HttpSettings,
}

impl HttpSnapshotFetcher {
    pub fn new(settings: HttpSettings) -> SyncResult<Self> {
        let client = build_http_client(&settings)?;
        Self::with_client(client, settings)
    }

    pub fn with_client(client: Client, settings: HttpSettings) -> SyncResult<Self> {
        let url = settings.url(STATE_PATH)?;
        Ok(Self {
            client,
            url,
            settings,
        })
    }
}

#[async_trait]
impl SnapshotSource for HttpSnapshotFetcher {
    async fn fetch(&self) -> SyncResult<Snapshot> {
        let response = self
            .client
            .get(&self.url)
            .header(ACCEPT, "application/json")
            .timeout(self.settings.request_timeout)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::status(status.as_u16(), "GET /api/state"));
        }
        let body = response.bytes().await?;
        debug!(url = %self.url, body_len = body.len(), "snapshot fetched");
        Ok(Snapshot::decode(&body)?)
    }
}

/// Applies one fetch outcome: success publishes, failure leaves the held
/// snapshot alone and raises the retry notice.
pub(crate) fn apply_fetch_result(
    store: &StateStore,
    result: SyncResult<Snapshot>,
    source: UpdateSource,
) -> bool {
    match result {
        Ok(snapshot) => {
            store.publish(snapshot, source);
            true
        }
        Err(err) => {
            warn!(
                event = "fetch.failed",
                source = %source,
                decode = err.is_decode(),
                status = ?err.http_status(),
                error = %err,
                "failed to load state"
            );
            store.report_failure(LOAD_FAILED_NOTICE);
            false
        }
    }
}

pub(crate) async fn fetch_and_apply(
    source: &dyn SnapshotSource,
    store: &StateStore,
    update: UpdateSource,
) -> bool {
    let result = source.fetch().await;
    apply_fetch_result(store, result, update)
}
