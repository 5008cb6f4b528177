//! Per-key rate limit and daily quota counters
//!
//! Counts live in a shared counter store keyed by `(api key, window)`. The
//! per-minute window is the UTC minute `yyyy-MM-dd-HH-mm`; the daily window is
//! the UTC date `yyyy-MM-dd`. A count at or above the limit is exceeded.
//!
//! Store reads fail open: an unreachable counter store must not take request
//! traffic down with it, so read errors are logged and treated as not exceeded.
//! Key verification itself never fails open; that policy lives in the verifier.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::warn;
use uuid::Uuid;

use crate::services::cache::CounterCache;

/// Minute counters outlive their window slightly so in-flight reads never miss
pub const MINUTE_WINDOW_TTL: Duration = Duration::from_secs(2 * 60);

/// Daily counters are kept long enough to span clock skew across replicas
pub const DAILY_WINDOW_TTL: Duration = Duration::from_secs(48 * 60 * 60);

/// Counter key for the current UTC minute window
pub fn minute_window_key(api_key_id: Uuid) -> String {
    minute_window_key_at(api_key_id, Utc::now())
}

/// Counter key for the current UTC day window
pub fn daily_window_key(api_key_id: Uuid) -> String {
    daily_window_key_at(api_key_id, Utc::now())
}

pub(crate) fn minute_window_key_at(api_key_id: Uuid, now: DateTime<Utc>) -> String {
    format!("rate_limit:{}:{}", api_key_id, now.format("%Y-%m-%d-%H-%M"))
}

pub(crate) fn daily_window_key_at(api_key_id: Uuid, now: DateTime<Utc>) -> String {
    format!("daily_quota:{}:{}", api_key_id, now.format("%Y-%m-%d"))
}

/// Shared counter storage, external from this component's point of view
///
/// Increments tolerate lost updates under races; counts are enforcement
/// telemetry, not a ledger.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Current count for `key`, `None` when no counter exists
    async fn get(&self, key: &str) -> Result<Option<i64>>;

    /// Add one to the counter at `key`, creating it with `ttl` when absent
    async fn increment(&self, key: &str, ttl: Duration) -> Result<i64>;
}

/// In-process counter store over the TTL cache
pub struct MemoryCounterStore {
    counters: CounterCache,
}

impl MemoryCounterStore {
    pub fn new(max_entries: usize) -> Self {
        Self {
            counters: CounterCache::new(max_entries),
        }
    }
}

impl Default for MemoryCounterStore {
    fn default() -> Self {
        Self::new(100_000)
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn get(&self, key: &str) -> Result<Option<i64>> {
        Ok(self.counters.get(&key.to_string()).await)
    }

    async fn increment(&self, key: &str, ttl: Duration) -> Result<i64> {
        Ok(self.counters.increment_with_ttl(key.to_string(), 1, ttl).await)
    }
}

/// Read-side decisions over the counter store
///
/// Incrementing on successful verification is the verifier's job; this
/// component only reads and decides.
#[derive(Clone)]
pub struct RateLimitCounter {
    store: Arc<dyn CounterStore>,
}

impl RateLimitCounter {
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self { store }
    }

    /// Whether the key's current-minute count has reached `limit_per_minute`
    pub async fn is_rate_limit_exceeded(&self, api_key_id: Uuid, limit_per_minute: i64) -> bool {
        let key = minute_window_key(api_key_id);
        self.is_exceeded(&key, limit_per_minute, api_key_id).await
    }

    /// Whether the key's current-day count has reached `daily_quota`
    pub async fn is_daily_quota_exceeded(&self, api_key_id: Uuid, daily_quota: i64) -> bool {
        let key = daily_window_key(api_key_id);
        self.is_exceeded(&key, daily_quota, api_key_id).await
    }

    /// Current-minute count, 0 when absent or unreadable
    pub async fn current_rate_limit_usage(&self, api_key_id: Uuid) -> i64 {
        self.read_count(&minute_window_key(api_key_id), api_key_id)
            .await
    }

    /// Current-day count, 0 when absent or unreadable
    pub async fn current_daily_quota_usage(&self, api_key_id: Uuid) -> i64 {
        self.read_count(&daily_window_key(api_key_id), api_key_id)
            .await
    }

    async fn is_exceeded(&self, key: &str, limit: i64, api_key_id: Uuid) -> bool {
        match self.store.get(key).await {
            // At-limit already counts as exceeded.
            Ok(Some(count)) => count >= limit,
            Ok(None) => false,
            Err(error) => {
                warn!(
                    api_key_id = %api_key_id,
                    counter_key = key,
                    error = %error,
                    "Counter store read failed, allowing request"
                );
                false
            }
        }
    }

    async fn read_count(&self, key: &str, api_key_id: Uuid) -> i64 {
        match self.store.get(key).await {
            Ok(count) => count.unwrap_or(0),
            Err(error) => {
                warn!(
                    api_key_id = %api_key_id,
                    counter_key = key,
                    error = %error,
                    "Counter store read failed, reporting zero usage"
                );
                0
            }
        }
    }
}
