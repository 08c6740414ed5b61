//! Cache backends.
//!
//! | Backend | Use Case | Expiry |
//! |---------|----------|--------|
//! | [`MemoryCacheBackend`] | Default; single process | Lazy on read, or swept |
//! | [`RedisCacheBackend`] | Shared across processes | Server-side `PX` |
//! | [`TieredCacheBackend`] | Memory L1 in front of a shared L2 | Per level |
//!
//! Keys are plain strings. Clear patterns are Redis-style globs (`*`, `?`,
//! `[...]`) in both backends.

pub mod codec;
mod memory;
mod redis;
mod tiered;

pub use memory::{MemoryCacheBackend, MemoryCacheStats};
pub use redis::RedisCacheBackend;
pub use tiered::{DEFAULT_L1_TTL, TieredCacheBackend};

use crate::Result;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// A cached payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheValue {
    /// JSON document.
    Json(Value),
    /// Opaque bytes for payloads that are not JSON.
    Bytes(Vec<u8>),
}

impl CacheValue {
    /// Returns the JSON document, if this is one.
    #[must_use]
    pub const fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(value) => Some(value),
            Self::Bytes(_) => None,
        }
    }

    /// Consumes the value and returns the JSON document, if this is one.
    #[must_use]
    pub fn into_json(self) -> Option<Value> {
        match self {
            Self::Json(value) => Some(value),
            Self::Bytes(_) => None,
        }
    }
}

impl From<Value> for CacheValue {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

impl From<Vec<u8>> for CacheValue {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(bytes)
    }
}

/// Key-value store with per-entry TTL.
///
/// Implementations must be thread-safe (`Send + Sync`).
pub trait CacheBackend: Send + Sync {
    /// Returns the live value for `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn get(&self, key: &str) -> Result<Option<CacheValue>>;

    /// Stores `value` under `key`; `None` TTL means no expiry.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be written.
    fn set(&self, key: &str, value: CacheValue, ttl: Option<Duration>) -> Result<()>;

    /// Removes `key`; returns true if it existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be written.
    fn delete(&self, key: &str) -> Result<bool>;

    /// Returns true if `key` holds a live value.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn exists(&self, key: &str) -> Result<bool>;

    /// Removes keys matching `pattern`, or every key when `None`.
    /// Returns the number of keys removed.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidInput`] for a malformed pattern.
    fn clear(&self, pattern: Option<&str>) -> Result<usize>;

    /// Batch read. Missing keys are absent from the result.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn get_many(&self, keys: &[String]) -> Result<HashMap<String, CacheValue>> {
        let mut found = HashMap::with_capacity(keys.len());
        for key in keys {
            if let Some(value) = self.get(key)? {
                found.insert(key.clone(), value);
            }
        }
        Ok(found)
    }

    /// Batch write with a shared TTL.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be written.
    fn set_many(&self, entries: Vec<(String, CacheValue)>, ttl: Option<Duration>) -> Result<()> {
        for (key, value) in entries {
            self.set(&key, value, ttl)?;
        }
        Ok(())
    }

    /// Drops expired entries that have not been touched since they expired.
    /// Returns the number removed. Backends with server-side expiry have
    /// nothing to sweep.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be written.
    fn purge_expired(&self) -> Result<usize> {
        Ok(0)
    }

    /// Backend name for logs and metrics.
    fn backend_name(&self) -> &'static str;
}

/// Source of wall-clock milliseconds.
pub trait Clock: Send + Sync {
    /// Milliseconds since the Unix epoch.
    fn now_millis(&self) -> u64;
}

/// The system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        crate::current_timestamp_millis()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    /// Creates a clock reading `start_millis`.
    #[must_use]
    pub const fn new(start_millis: u64) -> Self {
        Self {
            now: AtomicU64::new(start_millis),
        }
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        let millis = u64::try_from(by.as_millis()).unwrap_or(u64::MAX);
        self.now.fetch_add(millis, Ordering::SeqCst);
    }

    /// Sets the clock to an absolute reading.
    pub fn set(&self, millis: u64) {
        self.now.store(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

impl<C: Clock + ?Sized> Clock for std::sync::Arc<C> {
    fn now_millis(&self) -> u64 {
        (**self).now_millis()
    }
}

/// Compiles a Redis-style glob.
pub(crate) fn compile_pattern(pattern: &str) -> Result<glob::Pattern> {
    glob::Pattern::new(pattern)
        .map_err(|e| crate::Error::InvalidInput(format!("invalid cache pattern '{pattern}': {e}")))
}

/// Match options that let `*` cross `:` and `/` like Redis does.
pub(crate) const MATCH_OPTIONS: glob::MatchOptions = glob::MatchOptions {
    case_sensitive: true,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};
