//! Two-level cache: a bounded in-process L1 in front of a shared L2.
//!
//! ```text
//! get ──► L1 hit? ──yes──► value
//!           │ no
//!           ▼
//!         L2 hit? ──yes──► backfill L1 ──► value
//!           │ no
//!           ▼
//!          miss
//! ```
//!
//! Writes go to L2 first, then L1. L1 entries live at most `l1_ttl`, which
//! bounds how long one process can serve a value another process already
//! replaced in L2. L1 failures are logged and treated as misses; L2
//! failures propagate.

use super::{CacheBackend, CacheValue};
use crate::Result;
use std::sync::Arc;
use std::time::Duration;

/// Default lifetime of an L1 entry.
pub const DEFAULT_L1_TTL: Duration = Duration::from_secs(60);

/// L1/L2 cache with read backfill.
pub struct TieredCacheBackend {
    l1: Arc<dyn CacheBackend>,
    l2: Arc<dyn CacheBackend>,
    l1_ttl: Duration,
}

impl TieredCacheBackend {
    /// Layers `l1` over `l2`.
    #[must_use]
    pub fn new(l1: Arc<dyn CacheBackend>, l2: Arc<dyn CacheBackend>) -> Self {
        Self {
            l1,
            l2,
            l1_ttl: DEFAULT_L1_TTL,
        }
    }

    /// Caps the lifetime of L1 entries.
    #[must_use]
    pub const fn with_l1_ttl(mut self, ttl: Duration) -> Self {
        self.l1_ttl = ttl;
        self
    }

    /// Returns the L1 backend.
    #[must_use]
    pub fn l1(&self) -> &Arc<dyn CacheBackend> {
        &self.l1
    }

    /// Returns the L2 backend.
    #[must_use]
    pub fn l2(&self) -> &Arc<dyn CacheBackend> {
        &self.l2
    }

    fn l1_ttl_for(&self, ttl: Option<Duration>) -> Duration {
        ttl.map_or(self.l1_ttl, |ttl| ttl.min(self.l1_ttl))
    }

    fn l1_write(&self, operation: &'static str, key: &str, value: CacheValue, ttl: Duration) {
        if let Err(err) = self.l1.set(key, value, Some(ttl)) {
            tracing::warn!(operation, key, error = %err, "L1 cache write failed");
        }
    }
}

impl std::fmt::Debug for TieredCacheBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TieredCacheBackend")
            .field("l1", &self.l1.backend_name())
            .field("l2", &self.l2.backend_name())
            .field("l1_ttl", &self.l1_ttl)
            .finish()
    }
}

impl CacheBackend for TieredCacheBackend {
    fn get(&self, key: &str) -> Result<Option<CacheValue>> {
        match self.l1.get(key) {
            Ok(Some(value)) => return Ok(Some(value)),
            Ok(None) => {},
            Err(err) => tracing::warn!(key, error = %err, "L1 cache read failed"),
        }

        let found = self.l2.get(key)?;
        if let Some(value) = &found {
            self.l1_write("backfill", key, value.clone(), self.l1_ttl);
        }
        Ok(found)
    }

    fn set(&self, key: &str, value: CacheValue, ttl: Option<Duration>) -> Result<()> {
        self.l2.set(key, value.clone(), ttl)?;
        self.l1_write("set", key, value, self.l1_ttl_for(ttl));
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool> {
        let in_l1 = self.l1.delete(key).unwrap_or_else(|err| {
            tracing::warn!(key, error = %err, "L1 cache delete failed");
            false
        });
        let in_l2 = self.l2.delete(key)?;
        Ok(in_l1 || in_l2)
    }

    fn exists(&self, key: &str) -> Result<bool> {
        if self.l1.exists(key).unwrap_or(false) {
            return Ok(true);
        }
        self.l2.exists(key)
    }

    fn clear(&self, pattern: Option<&str>) -> Result<usize> {
        let from_l1 = self.l1.clear(pattern)?;
        let from_l2 = self.l2.clear(pattern)?;
        tracing::debug!(from_l1, from_l2, "Cleared tiered cache");
        Ok(from_l2)
    }

    fn purge_expired(&self) -> Result<usize> {
        Ok(self.l1.purge_expired()? + self.l2.purge_expired()?)
    }

    fn backend_name(&self) -> &'static str {
        "tiered"
    }
}
