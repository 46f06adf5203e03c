//! Sync layer: the remote report source, the session gate, and its transports.

mod error;
pub mod gate;
pub mod memory;
pub mod source;

pub use error::{RemoteError, RemoteErrorKind};
pub use gate::{Identity, SessionGate, SessionState};
pub use memory::{InjectedFailure, MemoryRemote};
pub use source::{DEFAULT_FETCH_LIMIT, DEFAULT_LOOKBACK_DAYS, FetchWindow, RemoteSource};

#[cfg(feature = "http")]
pub mod http;

#[cfg(feature = "http")]
pub use http::{HttpRemote, RemoteConfig};
