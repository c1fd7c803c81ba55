//! Process-wide keyed cache with absolute expiry.
//!
//! The cache is constructed once by the composition root and shared as an
//! `Arc`. Values are replaced wholesale, never patched in place, so a
//! reader sees either the old list or the new one.
//!
//! # Invalidation generations
//!
//! Every `invalidate` bumps a generation counter. A read-through caller
//! records the generation it observed on a miss (`lookup`) and repopulates
//! with `set_if_fresh`; if an invalidation landed while it was reading the
//! backing store the write is dropped. Without this, a read that started
//! before an insert committed could put a list missing that insert back
//! into the cache for a full TTL.
//!
//! # Locking
//!
//! A single `std::sync::Mutex` guards the map. It is only held for map
//! operations and never across an `.await`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Key holding the recent-messages list.
pub const RECENT_MESSAGES_KEY: &str = "recent_messages";

/// Generation observed by a cache miss.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Generation(u64);

/// Result of a read-through lookup.
#[derive(Debug, Clone)]
pub enum Lookup<V> {
    /// Value present and not expired
    Hit(V),
    /// Nothing usable; repopulate with `set_if_fresh` using this generation
    Miss(Generation),
}

/// Point-in-time counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub invalidations: u64,
    pub evictions: u64,
    pub entries: usize,
}

struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

struct CacheState<V> {
    entries: HashMap<String, CacheEntry<V>>,
    generation: u64,
}

/// Keyed cache with a fixed deadline per entry and an optional capacity.
pub struct TtlCache<V> {
    state: Mutex<CacheState<V>>,
    /// Maximum number of entries, 0 = unbounded
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    invalidations: AtomicU64,
    evictions: AtomicU64,
}

impl<V: Clone> TtlCache<V> {
    /// Creates an unbounded cache.
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Creates a cache holding at most `capacity` entries (0 = unbounded).
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                generation: 0,
            }),
            capacity,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState<V>> {
        // A panic while holding the lock cannot leave a half-written entry
        // (entries are inserted whole), so the poisoned state is still valid.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the value for `key` if present and not expired.
    pub fn get(&self, key: &str) -> Option<V> {
        match self.lookup(key) {
            Lookup::Hit(value) => Some(value),
            Lookup::Miss(_) => None,
        }
    }

    /// Like `get`, but a miss reports the generation to repopulate against.
    pub fn lookup(&self, key: &str) -> Lookup<V> {
        let now = Instant::now();
        let mut state = self.lock();

        let expired = match state.entries.get(key) {
            Some(entry) if entry.expires_at > now => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                trace!(key, "Cache hit");
                return Lookup::Hit(entry.value.clone());
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            state.entries.remove(key);
            trace!(key, "Cache entry expired");
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        trace!(key, "Cache miss");
        Lookup::Miss(Generation(state.generation))
    }

    /// Stores `value` under `key` until `ttl` elapses.
    pub fn set(&self, key: &str, value: V, ttl: Duration) {
        let mut state = self.lock();
        self.insert_locked(&mut state, key, value, ttl);
    }

    /// Stores `value` only if no invalidation happened since `generation`.
    ///
    /// Returns `false` when the write was dropped.
    pub fn set_if_fresh(&self, key: &str, value: V, ttl: Duration, generation: Generation) -> bool {
        let mut state = self.lock();
        if state.generation != generation.0 {
            debug!(key, "Skipping cache fill, invalidated during read");
            return false;
        }
        self.insert_locked(&mut state, key, value, ttl);
        true
    }

    /// Removes `key`. Safe to call when the key was never set.
    pub fn invalidate(&self, key: &str) {
        let mut state = self.lock();
        state.generation = state.generation.wrapping_add(1);
        let removed = state.entries.remove(key).is_some();
        drop(state);

        self.invalidations.fetch_add(1, Ordering::Relaxed);
        debug!(key, removed, "Cache invalidated");
    }

    /// Drops every expired entry and returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut state = self.lock();
        let before = state.entries.len();
        state.entries.retain(|_, entry| entry.expires_at > now);
        before - state.entries.len()
    }

    /// Number of stored entries, expired ones included until purged.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns a snapshot of the hit/miss counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }

    fn insert_locked(&self, state: &mut CacheState<V>, key: &str, value: V, ttl: Duration) {
        let now = Instant::now();

        if self.capacity > 0 && !state.entries.contains_key(key) {
            if state.entries.len() >= self.capacity {
                state.entries.retain(|_, entry| entry.expires_at > now);
            }
            while state.entries.len() >= self.capacity {
                let oldest = state
                    .entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.expires_at)
                    .map(|(k, _)| k.clone());
                let Some(oldest) = oldest else { break };
                state.entries.remove(&oldest);
                self.evictions.fetch_add(1, Ordering::Relaxed);
                debug!(evicted = %oldest, "Cache at capacity, evicted entry");
            }
        }

        state.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                expires_at: now + ttl,
            },
        );
    }
}

impl<V: Clone> Default for TtlCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawns a task that purges expired entries every `every` until cancelled.
pub fn spawn_expiry_sweeper<V>(
    cache: Arc<TtlCache<V>>,
    every: Duration,
    cancel_token: CancellationToken,
) -> JoinHandle<()>
where
    V: Clone + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => {
                    debug!("Cache sweeper shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let purged = cache.purge_expired();
                    if purged > 0 {
                        debug!(purged, "Purged expired cache entries");
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(300);

    #[tokio::test(start_paused = true)]
    async fn test_set_then_get_returns_value() {
        let cache = TtlCache::new();
        cache.set("k", Arc::new(vec![1, 2, 3]), TTL);

        let value = cache.get("k").expect("value should be cached");
        assert_eq!(*value, vec![1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_returns_same_object() {
        let cache = TtlCache::new();
        let value = Arc::new(vec![1]);
        cache.set("k", Arc::clone(&value), TTL);

        let first = cache.get("k").unwrap();
        let second = cache.get("k").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(Arc::ptr_eq(&first, &value));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_is_absolute() {
        let cache = TtlCache::new();
        cache.set("k", 1, TTL);

        tokio::time::advance(Duration::from_secs(299)).await;
        // Reads do not extend the deadline
        assert_eq!(cache.get("k"), Some(1));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(cache.get("k"), None);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_removes_value() {
        let cache = TtlCache::new();
        cache.set("k", 1, TTL);
        cache.invalidate("k");
        assert_eq!(cache.get("k"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_missing_key_is_noop() {
        let cache: TtlCache<i32> = TtlCache::new();
        cache.invalidate("never-set");
        assert_eq!(cache.get("never-set"), None);
        assert_eq!(cache.stats().invalidations, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_if_fresh_dropped_after_invalidate() {
        let cache = TtlCache::new();

        let Lookup::Miss(generation) = cache.lookup("k") else {
            panic!("expected miss");
        };
        cache.invalidate("k");

        assert!(!cache.set_if_fresh("k", 1, TTL, generation));
        assert_eq!(cache.get("k"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_if_fresh_without_invalidate() {
        let cache = TtlCache::new();
        let Lookup::Miss(generation) = cache.lookup("k") else {
            panic!("expected miss");
        };
        assert!(cache.set_if_fresh("k", 1, TTL, generation));
        assert_eq!(cache.get("k"), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_evicts_earliest_deadline() {
        let cache = TtlCache::with_capacity(2);
        cache.set("a", 1, Duration::from_secs(10));
        cache.set("b", 2, Duration::from_secs(20));
        cache.set("c", 3, Duration::from_secs(30));

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("b"), Some(2));
        assert_eq!(cache.get("c"), Some(3));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_prefers_purging_expired() {
        let cache = TtlCache::with_capacity(2);
        cache.set("short", 1, Duration::from_secs(1));
        cache.set("long", 2, Duration::from_secs(100));
        tokio::time::advance(Duration::from_secs(2)).await;

        cache.set("new", 3, TTL);
        assert_eq!(cache.get("long"), Some(2));
        assert_eq!(cache.get("new"), Some(3));
        assert_eq!(cache.stats().evictions, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overwrite_at_capacity_does_not_evict() {
        let cache = TtlCache::with_capacity(1);
        cache.set("k", 1, TTL);
        cache.set("k", 2, TTL);
        assert_eq!(cache.get("k"), Some(2));
        assert_eq!(cache.stats().evictions, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stats_count_hits_and_misses() {
        let cache = TtlCache::new();
        let _ = cache.get("k");
        cache.set("k", 1, TTL);
        let _ = cache.get("k");
        let _ = cache.get("k");

        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_purges_expired_entries() {
        let cache = Arc::new(TtlCache::new());
        cache.set("k", 1, Duration::from_secs(5));

        let cancel = CancellationToken::new();
        let handle = spawn_expiry_sweeper(Arc::clone(&cache), Duration::from_secs(10), cancel.clone());

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(cache.is_empty());

        cancel.cancel();
        handle.await.unwrap();
    }
}
