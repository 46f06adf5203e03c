//! Durable local replica: the whole record set serialized under one key.

use std::collections::HashMap;
use std::sync::Arc;

use bearmap_core::{Record, RecordId};
use tracing::{info, warn};

use crate::{KvStore, StoreError};

/// Namespaced key holding the serialized record array.
pub const REPLICA_KEY: &str = "bearmap.reports.v0";

/// Whole-set persistence for records.
///
/// There is no per-record API: [`save`](Self::save) overwrites the entire
/// set, [`load`](Self::load) reads it back.
#[derive(Clone)]
pub struct LocalReplica {
    store: Arc<dyn KvStore>,
    key: String,
}

impl LocalReplica {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self::with_key(store, REPLICA_KEY)
    }

    pub fn with_key(store: Arc<dyn KvStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Load the persisted set, never failing.
    ///
    /// Absent or unreadable storage, or a payload that is not a JSON array,
    /// yields an empty set. Array elements that do not decode as a record are
    /// skipped.
    pub fn load(&self) -> Vec<Record> {
        match self.try_load() {
            Ok(records) => records,
            Err(e) => {
                warn!(key = %self.key, error = %e, "local replica unreadable, starting empty");
                Vec::new()
            }
        }
    }

    /// Strict load: storage and top-level decode errors are returned.
    pub fn try_load(&self) -> Result<Vec<Record>, StoreError> {
        let Some(bytes) = self.store.get(&self.key)? else {
            return Ok(Vec::new());
        };
        let value: serde_json::Value = serde_json::from_slice(&bytes)?;
        let serde_json::Value::Array(items) = value else {
            return Err(StoreError::NotAnArray);
        };

        let total = items.len();
        let mut by_id: HashMap<RecordId, usize> = HashMap::with_capacity(total);
        let mut records: Vec<Record> = Vec::with_capacity(total);
        for (index, item) in items.into_iter().enumerate() {
            match serde_json::from_value::<Record>(item) {
                Ok(record) => match by_id.get(record.id()) {
                    // Duplicate id: last occurrence wins.
                    Some(&slot) => records[slot] = record,
                    None => {
                        by_id.insert(record.id().clone(), records.len());
                        records.push(record);
                    }
                },
                Err(e) => warn!(key = %self.key, index, error = %e, "skipping malformed record"),
            }
        }
        info!(key = %self.key, loaded = records.len(), stored = total, "loaded local replica");
        Ok(records)
    }

    /// Replace the persisted set with `records`.
    pub fn save(&self, records: &[Record]) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(records)?;
        self.store.put(&self.key, &bytes)
    }
}
