// Response cache shared by every request handler of the proxy.
// All entries live for the same, process-wide TTL and read as absent once it elapses.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::debug;

// Key under which the full country list is stored
pub const COUNTRIES_CACHE_KEY: &str = "countries";

// Counters reported by the health endpoint
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hit_count: usize,
    pub miss_count: usize,
    pub expired_count: usize,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub ttl: Duration,
}

impl CacheConfig {
    pub fn from_secs(ttl_seconds: u64) -> Self {
        Self {
            ttl: Duration::from_secs(ttl_seconds),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::from_secs(3600)
    }
}

// Expiring key/value store the proxy handlers are written against
pub trait ExpiringCache: Send + Sync + 'static {
    type Value;

    fn new(config: CacheConfig) -> Self
    where
        Self: Sized;

    // Value stored under `key`, or None when it was never stored or has expired
    fn get(&self, key: &str) -> Option<Self::Value>;

    // Store `value` stamped with the current instant, replacing any prior entry
    fn set(&self, key: &str, value: Self::Value);

    // Drop every expired entry, returning how many were removed
    fn purge_expired(&self) -> usize;

    fn stats(&self) -> CacheStats;
}

// Key for a holiday listing: country and year joined by an underscore
pub fn holiday_cache_key(country: &str, year: i32) -> String {
    format!("{}_{}", country, year)
}

struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
}

impl<V> CacheEntry<V> {
    fn is_alive(&self, ttl: Duration) -> bool {
        self.inserted_at.elapsed() < ttl
    }
}

enum Lookup<V> {
    Fresh(V),
    Expired,
    Absent,
}

pub struct TtlCache<V> {
    store: DashMap<String, CacheEntry<V>>,
    config: CacheConfig,
    cache_stats: RwLock<CacheStats>,
}

impl<V> ExpiringCache for TtlCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    type Value = V;

    fn new(config: CacheConfig) -> Self {
        Self {
            store: DashMap::new(),
            config,
            cache_stats: RwLock::new(CacheStats::default()),
        }
    }

    fn get(&self, key: &str) -> Option<V> {
        let ttl = self.config.ttl;

        let lookup = match self.store.get(key) {
            Some(entry) if entry.is_alive(ttl) => Lookup::Fresh(entry.value.clone()),
            Some(_) => Lookup::Expired,
            None => Lookup::Absent,
        };

        match lookup {
            Lookup::Fresh(value) => {
                self.cache_stats.write().hit_count += 1;
                Some(value)
            }
            Lookup::Expired => {
                // a concurrent set may have refreshed the key since the read
                let removed = self
                    .store
                    .remove_if(key, |_, entry| !entry.is_alive(ttl))
                    .is_some();

                let mut stats = self.cache_stats.write();
                stats.miss_count += 1;
                if removed {
                    stats.expired_count += 1;
                }
                None
            }
            Lookup::Absent => {
                self.cache_stats.write().miss_count += 1;
                None
            }
        }
    }

    fn set(&self, key: &str, value: V) {
        self.store.insert(
            key.to_string(),
            CacheEntry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    fn purge_expired(&self) -> usize {
        let ttl = self.config.ttl;
        let mut removed = 0;

        self.store.retain(|_, entry| {
            let alive = entry.is_alive(ttl);
            if !alive {
                removed += 1;
            }
            alive
        });

        if removed > 0 {
            self.cache_stats.write().expired_count += removed;
        }
        removed
    }

    fn stats(&self) -> CacheStats {
        let mut stats = self.cache_stats.read().clone();
        stats.entries = self.store.len();
        stats
    }
}

// Periodically removes expired entries so keys that are never requested again do not pile up
pub fn spawn_sweeper<V>(cache: Arc<dyn ExpiringCache<Value = V>>, every: Duration) -> JoinHandle<()>
where
    V: 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        // the first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let removed = cache.purge_expired();
            if removed > 0 {
                debug!(removed, "Swept expired cache entries");
            }
        }
    })
}
