//! Session capability gate.
//!
//! The engine only needs to know whether an identity exists and how to ask
//! for one. Identity contents stay opaque.

use std::fmt;

use async_trait::async_trait;

use crate::RemoteError;

/// Opaque handle for an authenticated user.
#[derive(Clone, PartialEq, Eq)]
pub struct Identity(String);

impl Identity {
    pub fn new(subject: impl Into<String>) -> Self {
        Self(subject.into())
    }

    /// Transport-level subject, for remotes that scope writes by user.
    pub fn subject(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Identity(..)")
    }
}

/// Where the sign-in flow stands, as far as the engine can tell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    NoIdentity,
    /// A sign-in link was sent; the identity appears on a later check.
    Pending,
    Identity,
}

#[async_trait]
pub trait SessionGate: Send + Sync {
    /// Current identity, if the user has completed sign-in.
    async fn current_identity(&self) -> Result<Option<Identity>, RemoteError>;

    /// Send a sign-in link to `email`. Completion does not yield an identity.
    async fn authenticate(&self, email: &str) -> Result<(), RemoteError>;

    async fn sign_out(&self) -> Result<(), RemoteError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_debug_hides_subject() {
        let id = Identity::new("user-7f3a");
        assert_eq!(format!("{id:?}"), "Identity(..)");
        assert_eq!(id.subject(), "user-7f3a");
    }

    #[test]
    fn session_defaults_to_no_identity() {
        assert_eq!(SessionState::default(), SessionState::NoIdentity);
    }
}
