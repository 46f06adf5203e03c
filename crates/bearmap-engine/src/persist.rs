//! Background writer that keeps the durable replica in step with memory.
//!
//! Mutations publish generation-stamped snapshots on a watch channel. The
//! writer only ever sees the newest one, so bursts of mutations coalesce into
//! a single save. Saves are serialized and never go backwards in generation.

use std::sync::Arc;

use bearmap_core::Record;
use bearmap_store::{LocalReplica, StoreError};
use tokio::sync::{Mutex, Notify, broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::EngineEvent;

#[derive(Debug, Clone)]
pub(crate) struct Snapshot {
    pub generation: u64,
    pub records: Arc<Vec<Record>>,
}

pub(crate) struct Persister {
    replica: LocalReplica,
    /// Generation of the last successful save.
    saved: Mutex<u64>,
}

impl Persister {
    pub fn new(replica: LocalReplica) -> Self {
        Self {
            replica,
            saved: Mutex::new(0),
        }
    }

    /// Write `snapshot` unless something at least as new is already on disk.
    /// Returns whether a write happened.
    pub async fn save(&self, snapshot: &Snapshot) -> Result<bool, StoreError> {
        let mut saved = self.saved.lock().await;
        if snapshot.generation <= *saved {
            return Ok(false);
        }
        let replica = self.replica.clone();
        let records = Arc::clone(&snapshot.records);
        tokio::task::spawn_blocking(move || replica.save(&records))
            .await
            .map_err(|e| StoreError::Other(format!("save task failed: {e}")))??;
        *saved = snapshot.generation;
        debug!(generation = snapshot.generation, records = snapshot.records.len(), "replica saved");
        Ok(true)
    }
}

pub(crate) fn spawn_writer(
    persister: Arc<Persister>,
    mut snapshots: watch::Receiver<Snapshot>,
    shutdown: Arc<Notify>,
    events: broadcast::Sender<EngineEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                changed = snapshots.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = shutdown.notified() => break,
            }
            let snapshot = snapshots.borrow_and_update().clone();
            if let Err(e) = persister.save(&snapshot).await {
                warn!(error = %e, generation = snapshot.generation, "failed to save local replica");
                let _ = events.send(EngineEvent::PersistFailed);
            }
        }

        let last = snapshots.borrow().clone();
        if let Err(e) = persister.save(&last).await {
            warn!(error = %e, generation = last.generation, "final replica save failed");
            let _ = events.send(EngineEvent::PersistFailed);
        }
    })
}
