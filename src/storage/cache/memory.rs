//! In-process cache backend.
//!
//! A `Mutex`-guarded [`LruCache`]. Each read-check-write runs under the
//! lock, so concurrent callers never see a half-applied update.
//!
//! - An entry is expired once `now > expires_at`; a read at exactly the TTL
//!   boundary is still a hit. Expired entries are dropped when touched or
//!   by [`CacheBackend::purge_expired`].
//! - Reads use `peek` and never promote, so recency order is creation
//!   order. When a new key is inserted into a full cache, the single entry
//!   created first is evicted.

use super::{CacheBackend, CacheValue, Clock, MATCH_OPTIONS, SystemClock, compile_pattern};
use crate::Result;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Default maximum number of entries.
pub const DEFAULT_MAX_SIZE: usize = 1000;

#[derive(Debug)]
struct Entry {
    value: CacheValue,
    expires_at: Option<u64>,
}

impl Entry {
    fn is_expired(&self, now: u64) -> bool {
        self.expires_at.is_some_and(|at| now > at)
    }
}

#[derive(Debug)]
struct Store {
    entries: LruCache<String, Entry>,
    evictions: u64,
    expirations: u64,
}

impl Store {
    fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: LruCache::new(capacity),
            evictions: 0,
            expirations: 0,
        }
    }

    /// Returns the live entry for `key`, dropping it if expired.
    fn live(&mut self, key: &str, now: u64) -> Option<&Entry> {
        if self.entries.peek(key).is_some_and(|e| e.is_expired(now)) {
            self.entries.pop(key);
            self.expirations += 1;
            return None;
        }
        self.entries.peek(key)
    }

    fn insert(&mut self, key: &str, entry: Entry) {
        if let Some((evicted, _)) = self.entries.push(key.to_string(), entry)
            && evicted != key
        {
            self.evictions += 1;
        }
    }

    fn purge_expired(&mut self, now: u64) -> usize {
        let doomed: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &doomed {
            self.entries.pop(key);
        }
        self.expirations += doomed.len() as u64;
        doomed.len()
    }
}

/// Counters reported by [`MemoryCacheBackend::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemoryCacheStats {
    /// Entries currently stored, including not-yet-collected expired ones.
    pub entries: usize,
    /// Entries evicted for capacity.
    pub evictions: u64,
    /// Entries dropped after expiry.
    pub expirations: u64,
}

/// Bounded in-process cache.
pub struct MemoryCacheBackend {
    max_size: usize,
    clock: Arc<dyn Clock>,
    store: Mutex<Store>,
}

impl MemoryCacheBackend {
    /// Creates a cache holding at most `max_size` entries, on the system clock.
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        Self::with_clock(max_size, Arc::new(SystemClock))
    }

    /// Creates a cache on a caller-supplied clock.
    #[must_use]
    pub fn with_clock(max_size: usize, clock: Arc<dyn Clock>) -> Self {
        let capacity = NonZeroUsize::new(max_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            max_size: capacity.get(),
            clock,
            store: Mutex::new(Store::new(capacity)),
        }
    }

    /// Returns the capacity.
    #[must_use]
    pub const fn max_size(&self) -> usize {
        self.max_size
    }

    /// Returns current counters.
    #[must_use]
    pub fn stats(&self) -> MemoryCacheStats {
        let store = self.lock();
        MemoryCacheStats {
            entries: store.entries.len(),
            evictions: store.evictions,
            expirations: store.expirations,
        }
    }

    /// Returns the number of stored entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, Store> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MemoryCacheBackend {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SIZE)
    }
}

impl std::fmt::Debug for MemoryCacheBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCacheBackend")
            .field("max_size", &self.max_size)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl CacheBackend for MemoryCacheBackend {
    fn get(&self, key: &str) -> Result<Option<CacheValue>> {
        let now = self.clock.now_millis();
        let mut store = self.lock();
        Ok(store.live(key, now).map(|e| e.value.clone()))
    }

    fn set(&self, key: &str, value: CacheValue, ttl: Option<Duration>) -> Result<()> {
        let now = self.clock.now_millis();
        let expires_at = ttl.map(|ttl| {
            now.saturating_add(u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX))
        });

        self.lock().insert(key, Entry { value, expires_at });
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool> {
        let now = self.clock.now_millis();
        let mut store = self.lock();
        let existed = store.live(key, now).is_some();
        store.entries.pop(key);
        Ok(existed)
    }

    fn exists(&self, key: &str) -> Result<bool> {
        let now = self.clock.now_millis();
        let mut store = self.lock();
        Ok(store.live(key, now).is_some())
    }

    fn clear(&self, pattern: Option<&str>) -> Result<usize> {
        let matcher = pattern.map(compile_pattern).transpose()?;
        let mut store = self.lock();
        let Some(matcher) = matcher else {
            let count = store.entries.len();
            store.entries.clear();
            return Ok(count);
        };

        let doomed: Vec<String> = store
            .entries
            .iter()
            .filter(|(key, _)| matcher.matches_with(key, MATCH_OPTIONS))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &doomed {
            store.entries.pop(key);
        }
        Ok(doomed.len())
    }

    fn purge_expired(&self) -> Result<usize> {
        let now = self.clock.now_millis();
        let purged = self.lock().purge_expired(now);
        if purged > 0 {
            tracing::debug!(purged, "Purged expired cache entries");
        }
        Ok(purged)
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::cache::ManualClock;
    use serde_json::json;

    fn cache_with_clock(max_size: usize) -> (MemoryCacheBackend, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(10_000));
        let cache = MemoryCacheBackend::with_clock(max_size, clock.clone());
        (cache, clock)
    }

    fn json_value(n: i64) -> CacheValue {
        CacheValue::Json(json!(n))
    }

    #[test]
    fn test_set_get_delete() {
        let cache = MemoryCacheBackend::default();
        assert!(cache.set("k", json_value(1), None).is_ok());
        assert_eq!(cache.get("k").ok().flatten(), Some(json_value(1)));
        assert_eq!(cache.delete("k").ok(), Some(true));
        assert_eq!(cache.delete("k").ok(), Some(false));
        assert_eq!(cache.get("k").ok().flatten(), None);
    }

    #[test]
    fn test_ttl_boundary_is_inclusive() {
        let (cache, clock) = cache_with_clock(10);
        assert!(cache.set("k", json_value(1), Some(Duration::from_secs(1))).is_ok());

        clock.advance(Duration::from_millis(1000));
        assert_eq!(cache.exists("k").ok(), Some(true));

        clock.advance(Duration::from_millis(1));
        assert_eq!(cache.get("k").ok().flatten(), None);
        assert_eq!(cache.stats().expirations, 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_evicts_oldest_on_insert() {
        let (cache, clock) = cache_with_clock(2);
        assert!(cache.set("a", json_value(1), None).is_ok());
        clock.advance(Duration::from_millis(1));
        assert!(cache.set("b", json_value(2), None).is_ok());
        clock.advance(Duration::from_millis(1));
        assert!(cache.set("c", json_value(3), None).is_ok());

        assert_eq!(cache.exists("a").ok(), Some(false));
        assert_eq!(cache.exists("b").ok(), Some(true));
        assert_eq!(cache.exists("c").ok(), Some(true));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_eviction_ties_use_insertion_order() {
        let (cache, _clock) = cache_with_clock(2);
        assert!(cache.set("first", json_value(1), None).is_ok());
        assert!(cache.set("second", json_value(2), None).is_ok());
        assert!(cache.set("third", json_value(3), None).is_ok());
        assert_eq!(cache.exists("first").ok(), Some(false));
        assert_eq!(cache.exists("second").ok(), Some(true));
    }

    #[test]
    fn test_overwrite_does_not_evict() {
        let (cache, _clock) = cache_with_clock(2);
        assert!(cache.set("a", json_value(1), None).is_ok());
        assert!(cache.set("b", json_value(2), None).is_ok());
        assert!(cache.set("a", json_value(3), None).is_ok());
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a").ok().flatten(), Some(json_value(3)));
        assert_eq!(cache.stats().evictions, 0);
    }

    #[test]
    fn test_clear_by_pattern() {
        let cache = MemoryCacheBackend::default();
        for key in ["tcm:a", "tcm:b", "other:a"] {
            assert!(cache.set(key, json_value(0), None).is_ok());
        }
        assert_eq!(cache.clear(Some("tcm:*")).ok(), Some(2));
        assert_eq!(cache.len(), 1);
        assert!(cache.clear(Some("[")).is_err());
        assert_eq!(cache.clear(None).ok(), Some(1));
    }

    #[test]
    fn test_rewrite_moves_key_to_newest() {
        let (cache, _clock) = cache_with_clock(2);
        assert!(cache.set("a", json_value(1), None).is_ok());
        assert!(cache.set("b", json_value(2), None).is_ok());
        assert!(cache.set("a", json_value(3), None).is_ok());
        assert!(cache.set("c", json_value(4), None).is_ok());
        assert_eq!(cache.exists("a").ok(), Some(true));
        assert_eq!(cache.exists("b").ok(), Some(false));
    }

    #[test]
    fn test_reads_do_not_change_eviction_order() {
        let (cache, _clock) = cache_with_clock(2);
        assert!(cache.set("a", json_value(1), None).is_ok());
        assert!(cache.set("b", json_value(2), None).is_ok());
        for _ in 0..3 {
            assert!(cache.get("a").ok().flatten().is_some());
        }
        assert!(cache.set("c", json_value(3), None).is_ok());
        assert_eq!(cache.exists("a").ok(), Some(false));
        assert_eq!(cache.exists("b").ok(), Some(true));
    }

    #[test]
    fn test_purge_expired_sweeps_untouched_entries() {
        let (cache, clock) = cache_with_clock(10);
        assert!(cache.set("short", json_value(1), Some(Duration::from_secs(1))).is_ok());
        assert!(cache.set("long", json_value(2), Some(Duration::from_secs(60))).is_ok());
        assert!(cache.set("forever", json_value(3), None).is_ok());

        assert_eq!(cache.purge_expired().ok(), Some(0));
        clock.advance(Duration::from_secs(2));
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.purge_expired().ok(), Some(1));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.stats().expirations, 1);
    }

    #[test]
    fn test_zero_capacity_holds_one() {
        let cache = MemoryCacheBackend::new(0);
        assert_eq!(cache.max_size(), 1);
        assert!(cache.set("a", json_value(1), None).is_ok());
        assert!(cache.set("b", json_value(2), None).is_ok());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_bytes_payload() {
        let cache = MemoryCacheBackend::default();
        let bytes = CacheValue::Bytes(vec![0xde, 0xad]);
        assert!(cache.set("raw", bytes.clone(), None).is_ok());
        assert_eq!(cache.get("raw").ok().flatten(), Some(bytes));
    }
}
