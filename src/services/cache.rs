//! In-memory TTL cache backing the rate-limit counter store
//!
//! Counters are keyed per window, so expiry does the daily/minute reset work;
//! no background sweeper runs. Expired entries are evicted opportunistically
//! when the map is at capacity.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

/// Cache entry with expiration tracking
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub data: T,
    pub inserted_at: Instant,
    pub ttl: Duration,
}

impl<T> CacheEntry<T> {
    pub fn new(data: T, ttl: Duration) -> Self {
        Self {
            data,
            inserted_at: Instant::now(),
            ttl,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.inserted_at.elapsed() > self.ttl
    }
}

/// Generic cache storage with TTL support
#[derive(Debug)]
pub struct Cache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    entries: RwLock<HashMap<K, CacheEntry<V>>>,
    max_entries: usize,
}

impl<K, V> Cache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_entries,
        }
    }

    /// Get a value from cache if it exists and is not expired
    pub async fn get(&self, key: &K) -> Option<V> {
        let entries = self.entries.read().await;
        if let Some(entry) = entries.get(key) {
            if !entry.is_expired() {
                return Some(entry.data.clone());
            }
        }
        None
    }

    /// Set a value in cache with the given TTL
    pub async fn set_with_ttl(&self, key: K, value: V, ttl: Duration) {
        let mut entries = self.entries.write().await;
        self.make_room_locked(&mut entries);
        entries.insert(key, CacheEntry::new(value, ttl));
    }

    /// Remove a value from cache
    pub async fn remove(&self, key: &K) -> Option<V> {
        let mut entries = self.entries.write().await;
        entries.remove(key).map(|e| e.data)
    }

    /// Clear all entries from cache
    pub async fn clear(&self) {
        let mut entries = self.entries.write().await;
        entries.clear();
    }

    /// Remove all expired entries
    pub async fn evict_expired(&self) -> usize {
        let mut entries = self.entries.write().await;
        self.evict_expired_locked(&mut entries)
    }

    /// Check if cache contains a non-expired entry for key
    pub async fn contains(&self, key: &K) -> bool {
        self.get(key).await.is_some()
    }

    /// Get cache statistics
    pub async fn stats(&self) -> CacheStats {
        let entries = self.entries.read().await;
        let total = entries.len();
        let expired = entries.values().filter(|e| e.is_expired()).count();

        CacheStats {
            total_entries: total,
            expired_entries: expired,
            valid_entries: total - expired,
            max_entries: self.max_entries,
        }
    }

    fn make_room_locked(&self, entries: &mut HashMap<K, CacheEntry<V>>) {
        if entries.len() >= self.max_entries {
            self.evict_expired_locked(entries);
        }
        // Still full after eviction: drop the oldest entry.
        if entries.len() >= self.max_entries {
            if let Some(oldest_key) = entries
                .iter()
                .min_by_key(|(_, entry)| entry.inserted_at)
                .map(|(k, _)| k.clone())
            {
                entries.remove(&oldest_key);
            }
        }
    }

    fn evict_expired_locked(&self, entries: &mut HashMap<K, CacheEntry<V>>) -> usize {
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired());
        before - entries.len()
    }
}

impl<K> Cache<K, i64>
where
    K: Eq + Hash + Clone,
{
    /// Add `by` to the counter at `key`, creating it with `ttl` when absent or expired
    ///
    /// The increment happens under one write lock, and an existing counter keeps its
    /// original insertion time: a window's counter expires at the window end no matter
    /// how often it is touched.
    pub async fn increment_with_ttl(&self, key: K, by: i64, ttl: Duration) -> i64 {
        let mut entries = self.entries.write().await;
        match entries.get_mut(&key) {
            Some(entry) if !entry.is_expired() => {
                entry.data += by;
                entry.data
            }
            _ => {
                self.make_room_locked(&mut entries);
                entries.insert(key, CacheEntry::new(by, ttl));
                by
            }
        }
    }
}

/// Cache statistics
#[derive(Debug, Clone)]
pub struct CacheStats {
    pub total_entries: usize,
    pub expired_entries: usize,
    pub valid_entries: usize,
    pub max_entries: usize,
}

/// Counter cache keyed by `(api key, window)` strings
pub type CounterCache = Cache<String, i64>;
