use std::time::Duration;

use reqwest::Client;

use crate::error::{SyncError, SyncResult};

pub const STATE_PATH: &str = "/api/state";
pub const EVENTS_PATH: &str = "/api/events";

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection settings shared by the fetcher and the feed.
#[derive(Clone, Debug)]
pub struct HttpSettings {
    pub base_url: String,
    pub connect_timeout: Duration,
    /// Applies to point-in-time fetches only; the feed stream is long-lived.
    pub request_timeout: Duration,
}

impl HttpSettings {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn url(&self, path: &str) -> SyncResult<String> {
        join_base_path(&self.base_url, path)
    }
}

pub fn build_http_client(settings: &HttpSettings) -> SyncResult<Client> {
    Client::builder()
        .connect_timeout(settings.connect_timeout)
        .build()
        .map_err(SyncError::from)
}

pub fn join_base_path(base: &str, path: &str) -> SyncResult<String> {
    let base = base.trim();
    if base.is_empty() {
        return Err(SyncError::transport("base_url is empty"));
    }
    let normalized_base = base.trim_end_matches('/');
    let normalized_path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    };
    Ok(format!("{normalized_base}{normalized_path}"))
}
