//! Multi-level cache with asynchronous L2-to-L1 promotion
//!
//! L1 is a bounded in-process store; L2 is a pluggable backend (shared
//! store, Redis, ...). Reads consult L1 first and fall back to L2; an L2
//! hit enqueues a non-blocking promotion task handled by a fixed worker
//! pool, so `get` never waits on promotion backpressure.

pub mod l1;

pub use l1::L1Cache;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::CacheConfig;

/// How long shutdown waits for the promotion workers before giving up
const SHUTDOWN_WAIT: Duration = Duration::from_secs(5);

/// Cache error type
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Cache backend failure: {0}")]
    Backend(String),
}

/// Pluggable second-level cache backend
#[async_trait]
pub trait CacheBackend<V>: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<V>, CacheError>;
    async fn set(&self, key: &str, value: V) -> Result<(), CacheError>;
    async fn delete(&self, key: &str) -> Result<(), CacheError>;
    async fn clear(&self) -> Result<(), CacheError>;
}

/// In-memory [`CacheBackend`], used as the L2 of single-node deployments
/// and in tests.
pub struct MemoryBackend<V> {
    entries: DashMap<String, V>,
}

impl<V> MemoryBackend<V> {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }
}

impl<V> Default for MemoryBackend<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<V: Clone + Send + Sync + 'static> CacheBackend<V> for MemoryBackend<V> {
    async fn get(&self, key: &str) -> Result<Option<V>, CacheError> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    async fn set(&self, key: &str, value: V) -> Result<(), CacheError> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        self.entries.clear();
        Ok(())
    }
}

/// A pending L2-to-L1 promotion
struct Promotion<V> {
    key: String,
    value: V,
}

/// Hit/miss counters for monitoring
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub l1_size: usize,
    pub promotions_dropped: u64,
}

/// Two-level cache service.
///
/// All operations are safe under concurrent callers; reads never serialize
/// on a single writer lock. `shutdown` is idempotent and bounded.
pub struct CacheService<V: Clone + Send + Sync + 'static> {
    name: String,
    l1: Option<Arc<L1Cache<V>>>,
    l2: Option<Arc<dyn CacheBackend<V>>>,
    promotion_tx: Mutex<Option<mpsc::Sender<Promotion<V>>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    cancel: CancellationToken,
    shut_down: AtomicBool,
    hits: AtomicU64,
    misses: AtomicU64,
    promotions_dropped: AtomicU64,
}

impl<V: Clone + Send + Sync + 'static> CacheService<V> {
    /// Build a cache service and start its background tasks.
    ///
    /// `name` labels log lines; it is the canonical string form of the
    /// cache's key space (e.g. `"token_context"`, `"jwks"`).
    pub fn new(name: &str, config: &CacheConfig, l2: Option<Arc<dyn CacheBackend<V>>>) -> Self {
        let l1 = if config.l1.enabled {
            Some(Arc::new(L1Cache::new(
                config.l1.max_size,
                Duration::from_secs(config.l1.default_ttl_secs),
                config.l1.eviction_policy,
            )))
        } else {
            None
        };

        let cancel = CancellationToken::new();
        let mut workers = Vec::new();
        let mut promotion_tx = None;

        if let (Some(l1), true, true) = (&l1, l2.is_some(), config.l1.enable_promotion) {
            let (tx, rx) = mpsc::channel::<Promotion<V>>(config.promotion.queue_size);
            let rx = Arc::new(tokio::sync::Mutex::new(rx));

            for worker_id in 0..config.promotion.workers {
                let l1 = Arc::clone(l1);
                let rx = Arc::clone(&rx);
                let cancel = cancel.clone();
                let cache_name = name.to_string();

                workers.push(tokio::spawn(async move {
                    loop {
                        let task = tokio::select! {
                            _ = cancel.cancelled() => break,
                            task = async { rx.lock().await.recv().await } => task,
                        };

                        match task {
                            Some(promotion) => {
                                l1.set(&promotion.key, promotion.value);
                                tracing::trace!(
                                    cache = %cache_name,
                                    worker = worker_id,
                                    key = %promotion.key,
                                    "promoted entry to L1"
                                );
                            }
                            None => break,
                        }
                    }
                }));
            }

            promotion_tx = Some(tx);
        }

        if config.cleanup_interval_secs > 0 {
            if let Some(l1) = &l1 {
                let l1 = Arc::clone(l1);
                let cancel = cancel.clone();
                let interval = Duration::from_secs(config.cleanup_interval_secs as u64);
                let cache_name = name.to_string();

                workers.push(tokio::spawn(async move {
                    loop {
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = tokio::time::sleep(interval) => {
                                let removed = l1.cleanup_expired();
                                if removed > 0 {
                                    tracing::debug!(
                                        cache = %cache_name,
                                        removed = removed,
                                        "cleaned up expired entries"
                                    );
                                }
                            }
                        }
                    }
                }));
            }
        }

        Self {
            name: name.to_string(),
            l1,
            l2,
            promotion_tx: Mutex::new(promotion_tx),
            workers: Mutex::new(workers),
            cancel,
            shut_down: AtomicBool::new(false),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            promotions_dropped: AtomicU64::new(0),
        }
    }

    /// Store into L1, and into L2 when enabled. A failure on one level is
    /// logged and does not prevent the other level from succeeding.
    pub async fn set(&self, key: &str, value: V) {
        if self.shut_down.load(Ordering::SeqCst) {
            return;
        }

        if let Some(l1) = &self.l1 {
            l1.set(key, value.clone());
        }

        if let Some(l2) = &self.l2 {
            if let Err(e) = l2.set(key, value).await {
                tracing::warn!(cache = %self.name, key = %key, error = %e, "L2 set failed");
            }
        }
    }

    /// Look up a key, consulting L1 then L2. An L2 hit schedules a
    /// non-blocking promotion into L1.
    pub async fn get(&self, key: &str) -> Option<V> {
        if let Some(l1) = &self.l1 {
            if let Some(value) = l1.get(key) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(value);
            }
        }

        if let Some(l2) = &self.l2 {
            match l2.get(key).await {
                Ok(Some(value)) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    self.promote(key, value.clone());
                    return Some(value);
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(cache = %self.name, key = %key, error = %e, "L2 get failed");
                }
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Best-effort delete on both levels.
    pub async fn delete(&self, key: &str) {
        if let Some(l1) = &self.l1 {
            l1.delete(key);
        }

        if let Some(l2) = &self.l2 {
            if let Err(e) = l2.delete(key).await {
                tracing::warn!(cache = %self.name, key = %key, error = %e, "L2 delete failed");
            }
        }
    }

    /// Best-effort clear on both levels.
    pub async fn clear(&self) {
        if let Some(l1) = &self.l1 {
            l1.clear();
        }

        if let Some(l2) = &self.l2 {
            if let Err(e) = l2.clear().await {
                tracing::warn!(cache = %self.name, error = %e, "L2 clear failed");
            }
        }
    }

    /// Offer a promotion task without blocking; a full queue drops the task.
    fn promote(&self, key: &str, value: V) {
        if self.shut_down.load(Ordering::SeqCst) {
            return;
        }

        let tx = self.promotion_tx.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(tx) = tx.as_ref() {
            match tx.try_send(Promotion {
                key: key.to_string(),
                value,
            }) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    self.promotions_dropped.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(cache = %self.name, key = %key, "promotion queue full, dropping task");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
    }

    /// Stop accepting promotions, cancel the workers, and wait for them
    /// within a bound. Safe to call more than once and from any task.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }

        // Closing the channel lets idle workers drain and exit
        self.promotion_tx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        self.cancel.cancel();

        let handles: Vec<JoinHandle<()>> = {
            let mut workers = self.workers.lock().unwrap_or_else(|e| e.into_inner());
            workers.drain(..).collect()
        };

        for handle in handles {
            if tokio::time::timeout(SHUTDOWN_WAIT, handle).await.is_err() {
                tracing::warn!(cache = %self.name, "worker did not stop within shutdown window");
            }
        }

        tracing::debug!(cache = %self.name, "cache shut down");
    }

    /// Counters for monitoring.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            l1_size: self.l1.as_ref().map(|l1| l1.len()).unwrap_or(0),
            promotions_dropped: self.promotions_dropped.load(Ordering::Relaxed),
        }
    }
}
