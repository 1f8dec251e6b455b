//! TTL cache with per-key single-flight fetches
//!
//! Entries expire after a fixed TTL (`Duration::ZERO` means never). When a
//! key is missing, the first caller fetches it while concurrent callers for
//! the same key wait and then read the stored value, so a burst of identical
//! requests causes one backend call.

use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;

/// Time source for expiry decisions
pub trait Clock: Send + Sync {
    /// Current instant
    fn now(&self) -> Instant;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    /// A clock frozen at the current instant
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    /// Move the clock forward
    pub fn advance(&self, by: Duration) {
        *self.offset.lock() += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + *self.offset.lock()
    }
}

/// How a value was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheStatus {
    /// Served from the cache
    Hit,
    /// Fetched and stored
    Miss,
    /// Caching is disabled; fetched and not stored
    Bypass,
}

impl CacheStatus {
    /// Wire name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Hit => "hit",
            Self::Miss => "miss",
            Self::Bypass => "bypass",
        }
    }
}

struct Entry<V> {
    value: V,
    inserted_at: Instant,
}

/// Cache statistics tracked atomically
#[derive(Debug, Default)]
struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    fetches: AtomicU64,
    coalesced: AtomicU64,
}

/// Snapshot of cache statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStatsSnapshot {
    /// Lookups served from the cache
    pub hits: u64,
    /// Lookups that found nothing valid
    pub misses: u64,
    /// Entries removed because they expired or the cache was full
    pub evictions: u64,
    /// Backend fetches performed
    pub fetches: u64,
    /// Callers that waited on another caller's fetch
    pub coalesced: u64,
    /// Current number of entries
    pub size: usize,
    /// Hit rate (0.0-1.0)
    pub hit_rate: f64,
}

/// Thread-safe TTL cache
pub struct TtlCache<K, V> {
    entries: DashMap<K, Entry<V>>,
    inflight: DashMap<K, Arc<tokio::sync::Mutex<()>>>,
    stats: CacheStats,
    clock: Arc<dyn Clock>,
    enabled: bool,
    ttl: Duration,
    max_entries: usize,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Create a cache on the wall clock. A `max_entries` of 0 disables the bound.
    #[must_use]
    pub fn new(enabled: bool, ttl: Duration, max_entries: usize) -> Self {
        Self::with_clock(enabled, ttl, max_entries, Arc::new(SystemClock))
    }

    /// Create a cache on a custom clock
    #[must_use]
    pub fn with_clock(enabled: bool, ttl: Duration, max_entries: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            inflight: DashMap::new(),
            stats: CacheStats::default(),
            clock,
            enabled,
            ttl,
            max_entries,
        }
    }

    /// Whether values are stored at all
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn is_expired(&self, entry: &Entry<V>, now: Instant) -> bool {
        !self.ttl.is_zero() && now.saturating_duration_since(entry.inserted_at) >= self.ttl
    }

    /// Read a valid entry without touching the counters. Expired entries are
    /// removed.
    fn peek(&self, key: &K) -> Option<V> {
        let now = self.clock.now();
        let entry = self.entries.get(key)?;
        if self.is_expired(&entry, now) {
            drop(entry);
            if self
                .entries
                .remove_if(key, |_, e| self.is_expired(e, now))
                .is_some()
            {
                self.stats.evictions.fetch_add(1, Ordering::Relaxed);
            }
            None
        } else {
            Some(entry.value.clone())
        }
    }

    /// Get a valid entry
    pub fn get(&self, key: &K) -> Option<V> {
        let found = self.peek(key);
        let counter = if found.is_some() {
            &self.stats.hits
        } else {
            &self.stats.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    /// Store a value, evicting the oldest entry if the cache is full
    pub fn insert(&self, key: K, value: V) {
        if !self.enabled {
            return;
        }
        let now = self.clock.now();
        if self.max_entries > 0
            && self.entries.len() >= self.max_entries
            && !self.entries.contains_key(&key)
        {
            self.evict_expired();
            if self.entries.len() >= self.max_entries {
                self.evict_oldest();
            }
        }
        self.entries.insert(
            key,
            Entry {
                value,
                inserted_at: now,
            },
        );
    }

    fn evict_oldest(&self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|e| e.value().inserted_at)
            .map(|e| e.key().clone());
        if let Some(key) = oldest {
            if self.entries.remove(&key).is_some() {
                self.stats.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Drop every expired entry
    pub fn evict_expired(&self) {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, e| !self.is_expired(e, now));
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            self.stats
                .evictions
                .fetch_add(removed as u64, Ordering::Relaxed);
        }
    }

    /// Return the cached value for `key`, or run `fetch` and store its
    /// result. Concurrent callers for the same key share one fetch; a failed
    /// fetch is not stored and the next waiter tries again.
    pub async fn get_or_fetch<F, Fut, E>(&self, key: K, fetch: F) -> Result<(V, CacheStatus), E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if !self.enabled {
            self.stats.fetches.fetch_add(1, Ordering::Relaxed);
            return fetch().await.map(|v| (v, CacheStatus::Bypass));
        }

        if let Some(value) = self.get(&key) {
            return Ok((value, CacheStatus::Hit));
        }

        let gate = Arc::clone(
            self.inflight
                .entry(key.clone())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .value(),
        );
        let _guard = match gate.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                self.stats.coalesced.fetch_add(1, Ordering::Relaxed);
                gate.lock().await
            }
        };

        // The caller we waited on may have stored the value.
        if let Some(value) = self.peek(&key) {
            return Ok((value, CacheStatus::Hit));
        }

        self.stats.fetches.fetch_add(1, Ordering::Relaxed);
        let result = fetch().await;
        if let Ok(value) = &result {
            self.insert(key.clone(), value.clone());
        }
        self.inflight.remove_if(&key, |_, g| Arc::ptr_eq(g, &gate));
        result.map(|v| (v, CacheStatus::Miss))
    }

    /// Drop every entry
    pub fn invalidate_all(&self) {
        self.entries.clear();
    }

    /// Current number of entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Statistics snapshot
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn stats(&self) -> CacheStatsSnapshot {
        let hits = self.stats.hits.load(Ordering::Relaxed);
        let misses = self.stats.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStatsSnapshot {
            hits,
            misses,
            evictions: self.stats.evictions.load(Ordering::Relaxed),
            fetches: self.stats.fetches.load(Ordering::Relaxed),
            coalesced: self.stats.coalesced.load(Ordering::Relaxed),
            size: self.entries.len(),
            hit_rate: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
        }
    }
}
