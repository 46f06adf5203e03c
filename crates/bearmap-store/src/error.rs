use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid store key: {0:?}")]
    InvalidKey(String),

    #[error("stored replica is not a JSON array")]
    NotAnArray,

    #[error("{0}")]
    Other(String),
}
