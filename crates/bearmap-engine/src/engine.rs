//! Reconciliation engine: owns the replica, drives window fetches, and turns
//! optimistic drafts into confirmed records.
//!
//! All replica mutation goes through one `RwLock<State>`, which is never held
//! across an `.await`. Network work runs on spawned tasks and reports back
//! through [`EngineEvent`]s; the returned join handles are for callers that
//! want to wait (tests, shutdown paths) and can otherwise be dropped.

use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use bearmap_core::{
    BoundingBox, LatLng, NewReport, Record, RecordId, ReportKind, ViewOrder, ViewRow, derive_view,
};
use bearmap_store::LocalReplica;
use bearmap_sync::{FetchWindow, RemoteError, RemoteErrorKind, RemoteSource, SessionState};
use chrono::Utc;
use tokio::sync::{Notify, broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::persist::{Persister, Snapshot, spawn_writer};
use crate::replica::{Lifecycle, ReplicaSet};
use crate::{BackendState, EngineConfig, EngineError, EngineEvent, SyncOutcome, UnsyncedReason};

#[derive(Default)]
struct State {
    replica: ReplicaSet,
    /// Bumped on every replica mutation; drives the persistence writer.
    generation: u64,
    viewport: Option<BoundingBox>,
    /// Bumped on every viewport change; fetches from older epochs are dropped.
    fetch_epoch: u64,
    backend: BackendState,
    session: SessionState,
    position: Option<LatLng>,
    selected: Option<RecordId>,
}

struct Inner {
    config: EngineConfig,
    remote: Option<Arc<dyn RemoteSource>>,
    state: RwLock<State>,
    events: broadcast::Sender<EngineEvent>,
    snapshots: watch::Sender<Snapshot>,
    persister: Arc<Persister>,
    shutdown: Arc<Notify>,
    writer: Mutex<Option<JoinHandle<()>>>,
    startup: Mutex<Option<JoinHandle<()>>>,
}

/// Result of [`Engine::submit`]: the draft as inserted, plus the insert task
/// when the engine was connected.
pub struct Submission {
    pub record: Record,
    pub sync: Option<JoinHandle<SyncOutcome>>,
}

#[derive(Clone)]
pub struct Engine {
    inner: Arc<Inner>,
}

impl Engine {
    /// Load the replica and, if a remote is given, start connecting.
    ///
    /// Must be called from within a Tokio runtime. Returns as soon as the
    /// local replica is loaded; use [`ready`](Self::ready) to wait for the
    /// identity check and the first window fetch.
    pub fn start(
        config: EngineConfig,
        replica: LocalReplica,
        remote: Option<Arc<dyn RemoteSource>>,
    ) -> Self {
        let replica_set = ReplicaSet::from_records(replica.load());
        let initial = Snapshot {
            generation: 0,
            records: Arc::new(replica_set.snapshot()),
        };
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let (snapshots, snapshot_rx) = watch::channel(initial);
        let persister = Arc::new(Persister::new(replica));
        let shutdown = Arc::new(Notify::new());
        let writer = spawn_writer(
            Arc::clone(&persister),
            snapshot_rx,
            Arc::clone(&shutdown),
            events.clone(),
        );

        info!(
            records = replica_set.len(),
            remote = remote.is_some(),
            "engine started"
        );

        let engine = Self {
            inner: Arc::new(Inner {
                config,
                remote,
                state: RwLock::new(State {
                    replica: replica_set,
                    ..State::default()
                }),
                events,
                snapshots,
                persister,
                shutdown,
                writer: Mutex::new(Some(writer)),
                startup: Mutex::new(None),
            }),
        };

        if engine.inner.remote.is_some() {
            engine.set_backend(BackendState::Connecting);
            let connecting = engine.clone();
            let handle = tokio::spawn(async move {
                connecting.refresh_session().await;
            });
            *engine.lock_startup() = Some(handle);
        }
        engine
    }

    /// Wait for startup network work (identity check, first fetch) to finish.
    pub async fn ready(&self) {
        let handle = self.lock_startup().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "startup task failed");
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.inner.events.subscribe()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    // ── Reads ──

    pub fn backend_state(&self) -> BackendState {
        self.read().backend
    }

    pub fn session_state(&self) -> SessionState {
        self.read().session
    }

    pub fn viewport(&self) -> Option<BoundingBox> {
        self.read().viewport
    }

    pub fn position(&self) -> Option<LatLng> {
        self.read().position
    }

    pub fn selected(&self) -> Option<RecordId> {
        self.read().selected.clone()
    }

    pub fn len(&self) -> usize {
        self.read().replica.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().replica.is_empty()
    }

    pub fn get(&self, id: &RecordId) -> Option<Record> {
        self.read().replica.get(id).cloned()
    }

    pub fn lifecycle(&self, id: &RecordId) -> Option<Lifecycle> {
        self.read().replica.lifecycle(id)
    }

    /// All records, newest first.
    pub fn records(&self) -> Vec<Record> {
        self.read().replica.snapshot()
    }

    /// Sorted presentation rows with age and distance labels.
    pub fn view(&self, order: ViewOrder) -> Vec<ViewRow> {
        let (records, position) = {
            let state = self.read();
            (state.replica.snapshot(), state.position)
        };
        derive_view(records, position, order, Utc::now())
    }

    // ── UI inputs ──

    /// Move the viewport. Fetches the new window when connected.
    ///
    /// Returns the fetch task, or `None` if the viewport did not change or the
    /// engine is not connected.
    pub fn set_viewport(&self, bbox: BoundingBox) -> Option<JoinHandle<()>> {
        let (epoch, connected) = {
            let mut state = self.write();
            if state.viewport == Some(bbox) {
                return None;
            }
            state.viewport = Some(bbox);
            state.fetch_epoch += 1;
            (state.fetch_epoch, state.backend == BackendState::Connected)
        };
        if !connected {
            return None;
        }
        let engine = self.clone();
        Some(tokio::spawn(async move {
            engine.run_fetch(epoch, bbox).await;
        }))
    }

    /// Update the user's position. `None` clears it.
    pub fn set_position(&self, position: Option<LatLng>) -> Result<(), EngineError> {
        if let Some(p) = &position {
            p.validate()?;
        }
        self.write().position = position;
        self.emit(EngineEvent::ViewChanged);
        Ok(())
    }

    /// Select a record, or clear the selection. Unknown ids are ignored.
    pub fn select(&self, id: Option<RecordId>) -> bool {
        let mut state = self.write();
        match id {
            Some(id) if !state.replica.contains(&id) => false,
            id => {
                state.selected = id;
                true
            }
        }
    }

    /// Record an observation.
    ///
    /// The draft lands in the replica (and is selected) before this returns.
    /// When connected, an insert is started in the background; failures leave
    /// the draft in place as unsynced.
    pub fn submit(
        &self,
        kind: ReportKind,
        note: Option<&str>,
        location: LatLng,
    ) -> Result<Submission, EngineError> {
        let draft = Record::draft(kind, note, location, Utc::now())?;
        let id = draft.id().clone();
        let connected = {
            let mut state = self.write();
            state.replica.insert_draft(draft.clone());
            state.selected = Some(id.clone());
            self.publish(&mut state);
            state.backend == BackendState::Connected
        };
        info!(id = %id, kind = %kind, "draft recorded");
        self.emit(EngineEvent::ViewChanged);

        let sync = if connected {
            self.spawn_sync(id)
        } else {
            debug!(id = %id, "not connected, draft stays local");
            self.emit(EngineEvent::DraftUnsynced {
                id,
                reason: UnsyncedReason::NotConnected,
            });
            None
        };
        Ok(Submission {
            record: draft,
            sync,
        })
    }

    // ── Session ──

    /// Re-check the identity and update the backend state.
    ///
    /// Becoming connected triggers a window fetch for the current viewport,
    /// which this call awaits.
    pub async fn refresh_session(&self) -> BackendState {
        let Some(remote) = self.inner.remote.clone() else {
            return BackendState::Disabled;
        };
        let was_connected = self.backend_state() == BackendState::Connected;

        let next = match remote.current_identity().await {
            Ok(Some(_)) => {
                self.set_session(SessionState::Identity);
                BackendState::Connected
            }
            Ok(None) => {
                if self.session_state() == SessionState::Identity {
                    self.set_session(SessionState::NoIdentity);
                }
                BackendState::Unauthenticated
            }
            Err(e) => {
                warn!(error = %e, "identity check failed");
                BackendState::Failed
            }
        };
        self.set_backend(next);

        match next {
            BackendState::Unauthenticated => self.emit(EngineEvent::AuthenticationRequired),
            BackendState::Connected if !was_connected => self.refresh_window().await,
            _ => {}
        }
        next
    }

    /// Send a sign-in link. The identity shows up on a later
    /// [`refresh_session`](Self::refresh_session).
    pub async fn authenticate(&self, email: &str) -> Result<(), EngineError> {
        let email = email.trim();
        if email.is_empty() || !email.contains('@') {
            return Err(EngineError::InvalidEmail(email.to_string()));
        }
        let remote = self.inner.remote.clone().ok_or(EngineError::RemoteDisabled)?;
        remote.authenticate(email).await?;
        self.set_session(SessionState::Pending);
        info!("sign-in link sent");
        Ok(())
    }

    pub async fn sign_out(&self) -> Result<(), EngineError> {
        let remote = self.inner.remote.clone().ok_or(EngineError::RemoteDisabled)?;
        remote.sign_out().await?;
        self.set_session(SessionState::NoIdentity);
        self.set_backend(BackendState::Unauthenticated);
        self.emit(EngineEvent::AuthenticationRequired);
        Ok(())
    }

    // ── Sync ──

    /// Fetch the current viewport's window now, superseding any fetch in
    /// flight. No-op unless connected with a viewport set.
    pub async fn refresh_window(&self) {
        let target = {
            let mut state = self.write();
            match (state.backend, state.viewport) {
                (BackendState::Connected, Some(bbox)) => {
                    state.fetch_epoch += 1;
                    Some((state.fetch_epoch, bbox))
                }
                _ => None,
            }
        };
        if let Some((epoch, bbox)) = target {
            self.run_fetch(epoch, bbox).await;
        }
    }

    /// Retry the insert for every unsynced draft, oldest first.
    ///
    /// Drafts are never retried automatically; this is the explicit path for
    /// drafts orphaned by an earlier failure or by being offline.
    pub async fn sync_drafts(&self) -> Vec<SyncOutcome> {
        let ids = {
            let state = self.read();
            if state.backend != BackendState::Connected {
                return Vec::new();
            }
            state.replica.unsynced()
        };
        if !ids.is_empty() {
            info!(drafts = ids.len(), "retrying unsynced drafts");
        }
        let tasks: Vec<_> = ids.into_iter().filter_map(|id| self.spawn_sync(id)).collect();
        futures::future::join_all(tasks)
            .await
            .into_iter()
            .filter_map(|joined| match joined {
                Ok(outcome) => Some(outcome),
                Err(e) => {
                    warn!(error = %e, "draft sync task failed");
                    None
                }
            })
            .collect()
    }

    // ── Persistence ──

    /// Save the newest replica state now, if it is not already on disk.
    pub async fn flush(&self) -> Result<(), EngineError> {
        let snapshot = self.inner.snapshots.borrow().clone();
        self.inner.persister.save(&snapshot).await?;
        Ok(())
    }

    /// Stop the background writer and flush. Mutations after this are kept in
    /// memory only until the next [`flush`](Self::flush).
    pub async fn shutdown(&self) -> Result<(), EngineError> {
        if let Some(startup) = self.lock_startup().take() {
            startup.abort();
        }
        self.inner.shutdown.notify_one();
        let writer = self
            .inner
            .writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(writer) = writer {
            if let Err(e) = writer.await {
                warn!(error = %e, "persistence writer failed");
            }
        }
        self.flush().await?;
        info!("engine shut down");
        Ok(())
    }

    // ── Internals ──

    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.inner.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.inner.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_startup(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.inner.startup.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: EngineEvent) {
        // No subscribers is fine.
        let _ = self.inner.events.send(event);
    }

    /// Record a replica mutation and hand the new state to the writer.
    fn publish(&self, state: &mut State) {
        state.generation += 1;
        self.inner.snapshots.send_replace(Snapshot {
            generation: state.generation,
            records: Arc::new(state.replica.snapshot()),
        });
    }

    fn set_backend(&self, next: BackendState) {
        let previous = std::mem::replace(&mut self.write().backend, next);
        if previous != next {
            info!(from = ?previous, to = ?next, "backend state changed");
            self.emit(EngineEvent::BackendChanged(next));
        }
    }

    fn set_session(&self, next: SessionState) {
        let previous = std::mem::replace(&mut self.write().session, next);
        if previous != next {
            self.emit(EngineEvent::SessionChanged(next));
        }
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.read().fetch_epoch == epoch
    }

    async fn run_fetch(&self, epoch: u64, bbox: BoundingBox) {
        let Some(remote) = self.inner.remote.clone() else {
            return;
        };
        let config = &self.inner.config;
        let window = FetchWindow::lookback(bbox, Utc::now(), config.lookback(), config.fetch_limit);
        let policy = &config.fetch_retry;

        let mut attempt = 1;
        let result = loop {
            if !self.is_current(epoch) {
                debug!(epoch, "fetch superseded before completion");
                self.emit(EngineEvent::FetchSuperseded);
                return;
            }
            match remote.fetch_window(&window).await {
                Ok(records) => break Ok(records),
                Err(e) if e.is_retryable() && attempt < policy.max_attempts => {
                    let delay = policy.delay_for(attempt);
                    warn!(error = %e, attempt, delay_ms = delay.as_millis() as u64, "window fetch failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => break Err(e),
            }
        };

        let records = match result {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, attempts = attempt, "window fetch failed, keeping local replica");
                let kind = e.kind();
                self.emit(EngineEvent::FetchFailed(kind));
                if kind == RemoteErrorKind::Auth {
                    self.on_auth_lost(&e);
                }
                return;
            }
        };

        let fetched = records.len();
        let stats = {
            let mut state = self.write();
            if state.fetch_epoch != epoch {
                None
            } else {
                let stats = state.replica.merge(records);
                if stats.inserted + stats.replaced > 0 {
                    self.publish(&mut state);
                }
                Some(stats)
            }
        };

        match stats {
            None => {
                debug!(epoch, fetched, "dropping stale fetch result");
                self.emit(EngineEvent::FetchSuperseded);
            }
            Some(stats) => {
                info!(
                    fetched,
                    inserted = stats.inserted,
                    replaced = stats.replaced,
                    "merged report window"
                );
                self.emit(EngineEvent::WindowMerged {
                    fetched,
                    inserted: stats.inserted,
                    replaced: stats.replaced,
                });
                self.emit(EngineEvent::ViewChanged);
            }
        }
    }

    /// Mark the draft pending and start its insert.
    fn spawn_sync(&self, id: RecordId) -> Option<JoinHandle<SyncOutcome>> {
        let payload = self.write().replica.begin_sync(&id)?;
        let engine = self.clone();
        Some(tokio::spawn(async move { engine.push_draft(id, payload).await }))
    }

    async fn push_draft(&self, local_id: RecordId, payload: NewReport) -> SyncOutcome {
        let Some(remote) = self.inner.remote.clone() else {
            self.write().replica.abandon_sync(&local_id);
            return SyncOutcome::Unsynced(UnsyncedReason::NotConnected);
        };

        match remote.insert(&payload).await {
            Ok(confirmed) => {
                let server_id = confirmed.id().clone();
                {
                    let mut state = self.write();
                    state.replica.promote(&local_id, confirmed);
                    if state.selected.as_ref() == Some(&local_id) {
                        state.selected = Some(server_id.clone());
                    }
                    self.publish(&mut state);
                }
                info!(local_id = %local_id, server_id = %server_id, "draft confirmed");
                self.emit(EngineEvent::DraftConfirmed {
                    local_id,
                    server_id: server_id.clone(),
                });
                self.emit(EngineEvent::ViewChanged);
                SyncOutcome::Confirmed(server_id)
            }
            Err(e) => {
                self.write().replica.abandon_sync(&local_id);
                warn!(id = %local_id, error = %e, "insert failed, keeping draft locally");
                let kind = e.kind();
                if kind == RemoteErrorKind::Auth {
                    self.on_auth_lost(&e);
                }
                let reason = UnsyncedReason::Remote(kind);
                self.emit(EngineEvent::DraftUnsynced {
                    id: local_id,
                    reason,
                });
                SyncOutcome::Unsynced(reason)
            }
        }
    }

    fn on_auth_lost(&self, error: &RemoteError) {
        debug!(error = %error, "remote refused identity");
        self.set_session(SessionState::NoIdentity);
        self.set_backend(BackendState::Unauthenticated);
        self.emit(EngineEvent::AuthenticationRequired);
    }
}
