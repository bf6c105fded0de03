use crate::clock::Clock;
use crate::metrics;
use crate::sweep::SweepTask;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheConfig {
    /// Prefix of every cache key
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// How often expired entries are swept, in seconds
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Per-action TTL overrides in seconds (e.g. `getTokenPrice: 60`)
    #[serde(default)]
    pub ttl_overrides: HashMap<String, u64>,
}

fn default_namespace() -> String {
    "moralis".to_string()
}

fn default_sweep_interval_secs() -> u64 {
    60
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            sweep_interval_secs: default_sweep_interval_secs(),
            ttl_overrides: HashMap::new(),
        }
    }
}

impl CacheConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Cached payload with its absolute expiry
#[derive(Clone, Debug)]
struct CacheEntry {
    payload: String,
    /// Epoch milliseconds
    expires_at: u64,
}

impl CacheEntry {
    fn is_expired(&self, now: u64) -> bool {
        now > self.expires_at
    }
}

/// TTL cache for serialized upstream responses.
///
/// Expired entries are never returned: they are removed when read and by a
/// periodic sweep, so keys written once and never read again do not pile up.
pub struct ResponseCache {
    entries: Arc<DashMap<String, CacheEntry>>,
    clock: Arc<dyn Clock>,
    hits: AtomicU64,
    misses: AtomicU64,
    sweeper: Mutex<Option<SweepTask>>,
}

impl ResponseCache {
    /// Create a new response cache
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            clock,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            sweeper: Mutex::new(None),
        }
    }

    /// Get a stored payload if present and not expired
    pub fn get(&self, key: &str) -> Option<String> {
        let now = self.clock.now_millis();

        let found = self.entries.get(key).map(|entry| {
            if entry.is_expired(now) {
                None
            } else {
                Some(entry.payload.clone())
            }
        });

        match found {
            Some(Some(payload)) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, "Cache hit");
                Some(payload)
            }
            Some(None) => {
                // Re-check under the shard lock in case a fresh value landed meanwhile
                self.entries.remove_if(key, |_, entry| entry.is_expired(now));
                self.misses.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, "Cache entry expired");
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store `payload` under `key` for `ttl_secs`, replacing any previous value
    pub fn set(&self, key: impl Into<String>, payload: impl Into<String>, ttl_secs: u64) {
        let key = key.into();
        let expires_at = self
            .clock
            .now_millis()
            .saturating_add(ttl_secs.saturating_mul(1000));

        debug!(key = %key, ttl_secs, "Cached response");

        self.entries.insert(
            key,
            CacheEntry {
                payload: payload.into(),
                expires_at,
            },
        );
        metrics::record_cache_entries(self.entries.len());
    }

    /// Remove a single entry
    pub fn invalidate(&self, key: &str) {
        self.entries.remove(key);
        debug!(key = %key, "Invalidated cache entry");
    }

    /// Delete every expired entry, returning how many were removed
    pub fn sweep(&self) -> usize {
        sweep_entries(&self.entries, self.clock.as_ref())
    }

    /// Sweep every `period` in the background until the cache is dropped or
    /// [`stop_sweeper`](Self::stop_sweeper) is called.
    pub fn start_sweeper(&self, period: Duration) {
        let entries = self.entries.clone();
        let clock = self.clock.clone();

        let task = SweepTask::spawn("cache_sweep", period, move || {
            let removed = sweep_entries(&entries, clock.as_ref());
            async move {
                if removed > 0 {
                    debug!(removed, "Swept expired cache entries");
                }
            }
        });

        if let Ok(mut slot) = self.sweeper.lock() {
            *slot = Some(task);
        }
    }

    pub fn stop_sweeper(&self) {
        if let Ok(mut slot) = self.sweeper.lock() {
            if let Some(task) = slot.take() {
                task.stop();
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entry_count: self.entries.len() as u64,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

fn sweep_entries(entries: &DashMap<String, CacheEntry>, clock: &dyn Clock) -> usize {
    let now = clock.now_millis();
    let mut removed = 0;

    entries.retain(|_, entry| {
        let keep = !entry.is_expired(now);
        if !keep {
            removed += 1;
        }
        keep
    });

    metrics::record_cache_entries(entries.len());
    removed
}

/// Cache statistics
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CacheStats {
    pub entry_count: u64,
    pub hits: u64,
    pub misses: u64,
}
