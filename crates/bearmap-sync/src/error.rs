use bearmap_core::RecordError;
use thiserror::Error;

/// Coarse classification used by the engine to decide what a failure means.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteErrorKind {
    /// Transport, timeout or server-side failure. Retryable.
    Network,
    /// No identity, or the identity was refused.
    Auth,
    /// The payload or response was malformed. Not retryable.
    Validation,
}

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    #[error("server returned {status}: {body}")]
    Server { status: u16, body: String },

    #[error("not signed in")]
    Unauthenticated,

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invalid record from remote: {0}")]
    Record(#[from] RecordError),

    #[cfg(feature = "http")]
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RemoteError {
    pub fn kind(&self) -> RemoteErrorKind {
        match self {
            RemoteError::Network(_) | RemoteError::Timeout | RemoteError::Server { .. } => {
                RemoteErrorKind::Network
            }
            RemoteError::Unauthenticated | RemoteError::Auth(_) => RemoteErrorKind::Auth,
            RemoteError::Validation(_) | RemoteError::Record(_) => RemoteErrorKind::Validation,
            #[cfg(feature = "http")]
            RemoteError::Json(_) => RemoteErrorKind::Validation,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == RemoteErrorKind::Network
    }
}

#[cfg(feature = "http")]
impl From<reqwest::Error> for RemoteError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            RemoteError::Timeout
        } else if e.is_decode() {
            RemoteError::Validation(e.to_string())
        } else {
            RemoteError::Network(e.to_string())
        }
    }
}
