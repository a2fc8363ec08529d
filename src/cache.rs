// Short-lived memoization of successful upstream responses.
// Entries are keyed by the serialized RequestKey and expire after a per-entry TTL.

use std::{
    sync::{Arc, Weak},
    time::Duration,
};

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Deserialize;
use tokio::{task::JoinHandle, time::Instant};

#[derive(Debug, Default, Clone)]
pub struct CacheStats {
    pub items_count: usize,
    pub hit_count: usize,
    pub miss_count: usize,
    pub expired_count: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub default_ttl_seconds: u64,
    pub cleanup_interval_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_seconds: 300,
            cleanup_interval_seconds: 300,
        }
    }
}

struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

impl<V> CacheEntry<V> {
    fn is_alive(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

pub struct TtlCache<V> {
    store: DashMap<String, CacheEntry<V>>,
    config: CacheConfig,
    cache_stats: RwLock<CacheStats>,
}

impl<V: Clone + Send + Sync + 'static> TtlCache<V> {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            store: DashMap::new(),
            config,
            cache_stats: RwLock::new(CacheStats::default()),
        }
    }

    /// Stores `value` under `key`. `None` falls back to the configured default TTL.
    pub fn set(&self, key: &str, value: V, ttl: Option<Duration>) {
        let ttl = ttl.unwrap_or_else(|| Duration::from_secs(self.config.default_ttl_seconds));
        let entry = CacheEntry {
            value,
            expires_at: Instant::now() + ttl,
        };
        self.store.insert(key.to_string(), entry);
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();

        // The read guard must be released before removing from the same shard.
        let hit = self
            .store
            .get(key)
            .map(|entry| (entry.is_alive(now), entry.value.clone()));

        match hit {
            Some((true, value)) => {
                self.cache_stats.write().hit_count += 1;
                Some(value)
            }
            Some((false, _)) => {
                self.store
                    .remove_if(key, |_, entry| !entry.is_alive(Instant::now()));
                let mut stats = self.cache_stats.write();
                stats.expired_count += 1;
                stats.miss_count += 1;
                None
            }
            None => {
                self.cache_stats.write().miss_count += 1;
                None
            }
        }
    }

    pub fn has(&self, key: &str) -> bool {
        let now = Instant::now();
        let alive = match self.store.get(key) {
            Some(entry) => entry.is_alive(now),
            None => return false,
        };

        if !alive {
            self.store.remove_if(key, |_, entry| !entry.is_alive(now));
            self.cache_stats.write().expired_count += 1;
        }
        alive
    }

    pub fn delete(&self, key: &str) -> bool {
        self.store.remove(key).is_some()
    }

    pub fn clear(&self) {
        self.store.clear();
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Evicts every expired entry and returns how many were dropped.
    pub fn cleanup(&self) -> usize {
        let now = Instant::now();
        let before = self.store.len();
        self.store.retain(|_, entry| entry.is_alive(now));
        let removed = before.saturating_sub(self.store.len());

        if removed > 0 {
            self.cache_stats.write().expired_count += removed;
            tracing::debug!(removed, remaining = self.store.len(), "cache sweep");
        }
        removed
    }

    pub fn stats(&self) -> CacheStats {
        let mut stats = self.cache_stats.read().clone();
        stats.items_count = self.store.len();
        stats
    }

    /// Starts the periodic sweep. The task only holds a weak reference, so it
    /// stops on its own once the cache is dropped; callers may also abort the handle.
    pub fn spawn_cleanup(self: &Arc<Self>) -> JoinHandle<()> {
        let period = Duration::from_secs(self.config.cleanup_interval_seconds.max(1));
        let cache: Weak<Self> = Arc::downgrade(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match cache.upgrade() {
                    Some(cache) => {
                        cache.cleanup();
                    }
                    None => break,
                }
            }
        })
    }
}
