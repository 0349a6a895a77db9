//! In-process L1 cache with TTL and configurable eviction

use std::sync::Mutex;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::config::EvictionPolicy;

/// A single cached entry with the bookkeeping the eviction policies need
struct Entry<V> {
    value: V,
    expires_at: Instant,
    last_access: Instant,
    access_count: u64,
    inserted_at: Instant,
}

/// Bounded in-memory cache.
///
/// Lookups update recency/frequency bookkeeping atomically with the read
/// (per-entry shard lock). Eviction runs under a dedicated lock so that
/// concurrent inserts at capacity pick distinct victims.
pub struct L1Cache<V> {
    entries: DashMap<String, Entry<V>>,
    max_entries: usize,
    ttl: Duration,
    policy: EvictionPolicy,
    eviction_lock: Mutex<()>,
}

impl<V: Clone> L1Cache<V> {
    pub fn new(max_entries: usize, ttl: Duration, policy: EvictionPolicy) -> Self {
        Self {
            entries: DashMap::new(),
            max_entries,
            ttl,
            policy,
            eviction_lock: Mutex::new(()),
        }
    }

    /// Look up a key. Expired entries are removed on access.
    pub fn get(&self, key: &str) -> Option<V> {
        let expired = match self.entries.get_mut(key) {
            Some(mut entry) => {
                if entry.expires_at <= Instant::now() {
                    true
                } else {
                    entry.last_access = Instant::now();
                    entry.access_count += 1;
                    return Some(entry.value.clone());
                }
            }
            None => return None,
        };

        if expired {
            self.entries.remove(key);
        }
        None
    }

    /// Insert or replace a value, evicting one entry first when full.
    pub fn set(&self, key: &str, value: V) {
        let now = Instant::now();

        if let Some(mut entry) = self.entries.get_mut(key) {
            entry.value = value;
            entry.expires_at = now + self.ttl;
            entry.last_access = now;
            entry.inserted_at = now;
            return;
        }

        if self.entries.len() >= self.max_entries {
            self.evict_one();
        }

        self.entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: now + self.ttl,
                last_access: now,
                access_count: 0,
                inserted_at: now,
            },
        );
    }

    pub fn delete(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every expired entry, returning the number removed.
    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        before - self.entries.len()
    }

    /// Evict the single worst entry under the configured policy.
    fn evict_one(&self) {
        let _guard = self.eviction_lock.lock().unwrap_or_else(|e| e.into_inner());

        if self.entries.len() < self.max_entries {
            return;
        }

        let victim = match self.policy {
            EvictionPolicy::Lru => self
                .entries
                .iter()
                .min_by_key(|entry| entry.last_access)
                .map(|entry| entry.key().clone()),
            EvictionPolicy::Fifo => self
                .entries
                .iter()
                .min_by_key(|entry| entry.inserted_at)
                .map(|entry| entry.key().clone()),
            // Ties on frequency fall back to insertion age
            EvictionPolicy::Lfu => self
                .entries
                .iter()
                .min_by(|a, b| {
                    a.access_count
                        .cmp(&b.access_count)
                        .then(a.inserted_at.cmp(&b.inserted_at))
                })
                .map(|entry| entry.key().clone()),
        };

        if let Some(key) = victim {
            self.entries.remove(&key);
            tracing::debug!(key = %key, policy = ?self.policy, "evicted cache entry");
        }
    }
}
