//! Report replication and reconciliation.
//!
//! The [`Engine`] keeps a local replica of observation records, merges
//! windowed fetches from a [`RemoteSource`](bearmap_sync::RemoteSource) into it,
//! and promotes optimistic drafts once the remote confirms them. Without a
//! remote it runs local-only with the same API.

mod config;
mod engine;
mod error;
mod event;
mod persist;
pub mod replica;

pub use config::{EngineConfig, RetryPolicy};
pub use engine::{Engine, Submission};
pub use error::EngineError;
pub use event::{BackendState, EngineEvent, SyncOutcome, UnsyncedReason};
pub use replica::{Lifecycle, MergeStats, ReplicaSet};
