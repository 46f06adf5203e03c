//! In-process remote with the same contract as the HTTP remote.
//!
//! Useful for running the engine without a backend and for exercising the
//! failure paths: offline mode, injected fetch/insert failures and fetch
//! latency are all switchable at runtime.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bearmap_core::{NewReport, Record, RecordId, cmp_recency};
use tracing::debug;

use crate::{FetchWindow, Identity, RemoteError, RemoteSource, SessionGate};

/// Failure to inject into upcoming fetches or the next insert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum InjectedFailure {
    #[default]
    Network,
    Unauthenticated,
    Validation,
}

impl InjectedFailure {
    fn into_error(self) -> RemoteError {
        match self {
            InjectedFailure::Network => RemoteError::Network("injected failure".into()),
            InjectedFailure::Unauthenticated => RemoteError::Unauthenticated,
            InjectedFailure::Validation => RemoteError::Validation("injected failure".into()),
        }
    }
}

#[derive(Default)]
struct State {
    records: Vec<Record>,
    next_id: u64,
    identity: Option<Identity>,
    sign_in_requests: Vec<String>,
    offline: bool,
    failing_fetches: u32,
    fetch_failure: InjectedFailure,
    failing_insert: Option<InjectedFailure>,
    fetch_delay: Duration,
    fetch_log: Vec<FetchWindow>,
}

#[derive(Default)]
pub struct MemoryRemote {
    state: Mutex<State>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seed a confirmed record as if another user had inserted it.
    pub fn seed(&self, record: Record) {
        self.state().records.push(record);
    }

    /// Sign in directly, skipping the link flow.
    pub fn sign_in(&self, subject: &str) {
        self.state().identity = Some(Identity::new(subject));
    }

    /// Finish the out-of-band step for the most recent sign-in request.
    /// Returns `false` when no request is outstanding.
    pub fn complete_sign_in(&self) -> bool {
        let mut state = self.state();
        match state.sign_in_requests.last().cloned() {
            Some(email) => {
                state.identity = Some(Identity::new(email));
                true
            }
            None => false,
        }
    }

    pub fn set_offline(&self, offline: bool) {
        self.state().offline = offline;
    }

    /// Fail the next `n` fetches with a network error.
    pub fn fail_next_fetches(&self, n: u32) {
        self.fail_next_fetches_with(n, InjectedFailure::Network);
    }

    /// Fail the next `n` fetches with the given error.
    pub fn fail_next_fetches_with(&self, n: u32, failure: InjectedFailure) {
        let mut state = self.state();
        state.failing_fetches = n;
        state.fetch_failure = failure;
    }

    pub fn fail_next_insert(&self, failure: InjectedFailure) {
        self.state().failing_insert = Some(failure);
    }

    pub fn set_fetch_delay(&self, delay: Duration) {
        self.state().fetch_delay = delay;
    }

    /// Windows passed to `fetch_window`, in call order.
    pub fn fetch_log(&self) -> Vec<FetchWindow> {
        self.state().fetch_log.clone()
    }

    /// Everything stored server-side.
    pub fn stored(&self) -> Vec<Record> {
        self.state().records.clone()
    }

    pub fn sign_in_requests(&self) -> Vec<String> {
        self.state().sign_in_requests.clone()
    }
}

#[async_trait]
impl SessionGate for MemoryRemote {
    async fn current_identity(&self) -> Result<Option<Identity>, RemoteError> {
        let state = self.state();
        if state.offline {
            return Err(RemoteError::Network("offline".into()));
        }
        Ok(state.identity.clone())
    }

    async fn authenticate(&self, email: &str) -> Result<(), RemoteError> {
        let mut state = self.state();
        if state.offline {
            return Err(RemoteError::Network("offline".into()));
        }
        if email.trim().is_empty() {
            return Err(RemoteError::Validation("email is empty".into()));
        }
        state.sign_in_requests.push(email.trim().to_string());
        Ok(())
    }

    async fn sign_out(&self) -> Result<(), RemoteError> {
        self.state().identity = None;
        Ok(())
    }
}

#[async_trait]
impl RemoteSource for MemoryRemote {
    async fn fetch_window(&self, window: &FetchWindow) -> Result<Vec<Record>, RemoteError> {
        let delay = {
            let mut state = self.state();
            state.fetch_log.push(window.clone());
            state.fetch_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state();
        if state.offline {
            return Err(RemoteError::Network("offline".into()));
        }
        if state.failing_fetches > 0 {
            state.failing_fetches -= 1;
            return Err(state.fetch_failure.into_error());
        }
        let mut hits: Vec<Record> = state
            .records
            .iter()
            .filter(|r| window.matches(r))
            .cloned()
            .collect();
        hits.sort_by(cmp_recency);
        hits.truncate(window.limit);
        debug!(hits = hits.len(), "memory remote fetch");
        Ok(hits)
    }

    async fn insert(&self, report: &NewReport) -> Result<Record, RemoteError> {
        let mut state = self.state();
        if state.offline {
            return Err(RemoteError::Network("offline".into()));
        }
        if let Some(failure) = state.failing_insert.take() {
            return Err(failure.into_error());
        }
        if state.identity.is_none() {
            return Err(RemoteError::Unauthenticated);
        }
        state.next_id += 1;
        let id = RecordId::from_server(format!("srv-{}", state.next_id))?;
        let record = report.confirm(id)?;
        state.records.push(record.clone());
        Ok(record)
    }
}
