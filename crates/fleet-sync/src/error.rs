use thiserror::Error;

pub type SyncResult<T> = Result<T, SyncError>;

#[derive(Debug, Error)]
pub enum SyncError {
    /// Network failure, timeout, non-success status, or a feed stream that
    /// failed or was closed by the server.
    #[error("transport error: {message}")]
    Transport {
        message: String,
        status: Option<u16>,
    },

    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),
}

impl SyncError {
    pub fn transport(message: impl Into<String>) -> Self {
        SyncError::Transport {
            message: message.into(),
            status: None,
        }
    }

    pub fn status(status: u16, context: &str) -> Self {
        SyncError::Transport {
            message: format!("{context} returned status {status}"),
            status: Some(status),
        }
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, SyncError::Transport { .. })
    }

    pub fn is_decode(&self) -> bool {
        matches!(self, SyncError::Decode(_))
    }

    pub fn http_status(&self) -> Option<u16> {
        match self {
            SyncError::Transport { status, .. } => *status,
            SyncError::Decode(_) => None,
        }
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            "timeout"
        } else if err.is_connect() {
            "connect"
        } else if err.is_body() {
            "body"
        } else {
            "request"
        };
        SyncError::Transport {
            message: format!("{kind}: {err}"),
            status: err.status().map(|status| status.as_u16()),
        }
    }
}
