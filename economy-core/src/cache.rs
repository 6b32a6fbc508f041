//! Cache invalidation capability
//!
//! Read caches live outside the engine. The engine only needs the ability to
//! drop entries after a successful commit, so the coordinator is injected as
//! a trait object rather than reached through a process global. Invalidation
//! keys are deterministic: `balance-<accountId>`, `shop-<shopId>`,
//! `trade-<tradeId>`.

use dashmap::DashMap;
use parking_lot::Mutex;

/// Cache namespaces the engine invalidates
pub mod namespaces {
    /// Balance reads, keyed by account id
    pub const BALANCE: &str = "balance";
    /// Shop/item reads, keyed by shop id
    pub const SHOP: &str = "shop";
    /// Trade reads, keyed by trade id
    pub const TRADE: &str = "trade";
}

/// Capability to drop cached entries after a commit
///
/// Called only after the transaction has committed, never before, so a
/// rollback can never leave a freshly-cleared cache to be repopulated with
/// stale data.
pub trait CacheInvalidator: Send + Sync {
    /// Remove the cached entry for `namespace`/`key`, if any
    fn clear(&self, namespace: &str, key: &str);
}

/// Invalidator that does nothing; the default when no cache is attached
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopInvalidator;

impl CacheInvalidator for NoopInvalidator {
    fn clear(&self, _namespace: &str, _key: &str) {}
}

/// Counters kept by [`InMemoryCache`]
#[derive(Debug, Default, Clone)]
pub struct CacheStats {
    /// Successful reads
    pub hits: u64,
    /// Reads that found nothing
    pub misses: u64,
    /// Entries written
    pub sets: u64,
    /// Entries invalidated
    pub clears: u64,
}

impl CacheStats {
    /// Hit percentage over all reads
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64) / (total as f64) * 100.0
        }
    }
}

/// Process-local read cache backed by a concurrent map
///
/// Production deployments put a real cache tier behind [`CacheInvalidator`];
/// this implementation serves single-process setups and deterministic tests.
#[derive(Debug, Default)]
pub struct InMemoryCache {
    entries: DashMap<String, String>,
    stats: Mutex<CacheStats>,
}

impl InMemoryCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    fn full_key(namespace: &str, key: &str) -> String {
        format!("{}-{}", namespace, key)
    }

    /// Store a serialized entry
    pub fn put(&self, namespace: &str, key: &str, value: impl Into<String>) {
        self.entries
            .insert(Self::full_key(namespace, key), value.into());
        self.stats.lock().sets += 1;
    }

    /// Read a serialized entry
    pub fn get(&self, namespace: &str, key: &str) -> Option<String> {
        let value = self
            .entries
            .get(&Self::full_key(namespace, key))
            .map(|entry| entry.value().clone());
        let mut stats = self.stats.lock();
        match value {
            Some(v) => {
                stats.hits += 1;
                Some(v)
            }
            None => {
                stats.misses += 1;
                None
            }
        }
    }

    /// Snapshot of the counters
    pub fn stats(&self) -> CacheStats {
        self.stats.lock().clone()
    }
}

impl CacheInvalidator for InMemoryCache {
    fn clear(&self, namespace: &str, key: &str) {
        if self.entries.remove(&Self::full_key(namespace, key)).is_some() {
            self.stats.lock().clears += 1;
        }
    }
}
