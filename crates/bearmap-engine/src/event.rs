//! Discrete notifications delivered to the UI.

use bearmap_core::RecordId;
use bearmap_sync::{RemoteErrorKind, SessionState};

/// Connectivity as shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendState {
    /// No remote configured: local-only mode.
    #[default]
    Disabled,
    Connecting,
    /// Remote reachable but nobody signed in. Submissions stay local.
    Unauthenticated,
    Connected,
    /// Identity check failed at the transport level.
    Failed,
}

/// Why a draft did not reach the remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnsyncedReason {
    NotConnected,
    Remote(RemoteErrorKind),
}

/// Result of one insert attempt for a draft.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Confirmed(RecordId),
    Unsynced(UnsyncedReason),
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// The derived view should be re-read.
    ViewChanged,
    BackendChanged(BackendState),
    SessionChanged(SessionState),
    /// Prompt the user to sign in before reporting to the server.
    AuthenticationRequired,
    WindowMerged {
        fetched: usize,
        inserted: usize,
        replaced: usize,
    },
    FetchFailed(RemoteErrorKind),
    /// A fetch finished after the viewport moved on and was dropped.
    FetchSuperseded,
    DraftConfirmed {
        local_id: RecordId,
        server_id: RecordId,
    },
    DraftUnsynced {
        id: RecordId,
        reason: UnsyncedReason,
    },
    PersistFailed,
}
