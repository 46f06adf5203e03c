use bearmap_core::RecordError;
use bearmap_store::StoreError;
use bearmap_sync::RemoteError;
use thiserror::Error;

/// Failure of a single engine operation. Never poisons engine state.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid report: {0}")]
    Validation(#[from] RecordError),

    #[error("invalid email address: {0:?}")]
    InvalidEmail(String),

    #[error("no remote configured")]
    RemoteDisabled,

    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
}
