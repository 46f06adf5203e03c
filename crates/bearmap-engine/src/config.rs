//! Engine tuning knobs. Every field has a default, so an empty JSON object
//! (or no config at all) gives the stock behaviour.

use std::sync::Arc;
use std::time::Duration;

use bearmap_store::{KvStore, LocalReplica, REPLICA_KEY};
use bearmap_sync::{DEFAULT_FETCH_LIMIT, DEFAULT_LOOKBACK_DAYS};
use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// How far back a window fetch reaches.
    pub lookback_days: i64,
    /// Maximum records per window fetch.
    pub fetch_limit: usize,
    /// Key the replica is persisted under.
    pub storage_key: String,
    /// Buffered events per subscriber before slow receivers start lagging.
    pub event_capacity: usize,
    pub fetch_retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lookback_days: DEFAULT_LOOKBACK_DAYS,
            fetch_limit: DEFAULT_FETCH_LIMIT,
            storage_key: REPLICA_KEY.to_string(),
            event_capacity: 64,
            fetch_retry: RetryPolicy::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn lookback(&self) -> TimeDelta {
        TimeDelta::days(self.lookback_days.max(0))
    }

    /// Local replica over `store`, keyed by [`storage_key`](Self::storage_key).
    pub fn replica(&self, store: Arc<dyn KvStore>) -> LocalReplica {
        LocalReplica::with_key(store, self.storage_key.clone())
    }
}

/// Bounded exponential backoff for window fetches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (1-based): base * 2^(retry-1), capped.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 1u64 << retry.saturating_sub(1).min(32);
        let ms = self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms);
        Duration::from_millis(ms)
    }
}
