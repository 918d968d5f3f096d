//! Keeps a local fleet snapshot current from one state endpoint and one
//! push feed, with periodic polling as a fallback.

pub mod error;
pub mod feed;
pub mod fetch;
pub mod http;
pub mod poller;
pub mod session;
pub mod store;

#[cfg(test)]
mod test_utils;

pub use error::{SyncError, SyncResult};
pub use feed::{FeedConnection, FeedConnector, FeedManager, FeedState, SseConnector};
pub use fetch::{HttpSnapshotFetcher, SnapshotSource};
pub use http::HttpSettings;
pub use poller::FallbackPoller;
pub use session::{SyncSession, SyncTimings, DEFAULT_POLL_INTERVAL, DEFAULT_RECONNECT_DELAY};
pub use store::{PublishedSnapshot, StateStore, StoreObserver, UpdateSource, LOAD_FAILED_NOTICE};
