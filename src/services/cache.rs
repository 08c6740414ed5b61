//! Namespaced cache manager.
//!
//! Wraps a [`CacheBackend`] with key namespacing, default TTLs, typed JSON
//! helpers, hit/miss accounting and a single-flight [`CacheManager::get_or_set`].
//!
//! Backend failures never escape the manager: reads degrade to a miss and
//! writes report `false`. Each failure is logged and counted in
//! `cache_operations_total{backend, operation, status}`.
//!
//! # Invalidation
//!
//! [`CacheManager::invalidate`] bumps an epoch before clearing. A
//! `get_or_set` fill that started under an older epoch still returns its
//! value but does not leave it in the backend, so a read that raced a
//! write cannot outlive the write's invalidation.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use lingshu::services::CacheManager;
//! use lingshu::storage::MemoryCacheBackend;
//!
//! let cache = CacheManager::new(Arc::new(MemoryCacheBackend::default()))
//!     .with_namespace("tcm")?
//!     .with_default_ttl(Some(Duration::from_secs(300)));
//!
//! let herbs: Vec<String> = cache.get_or_set(
//!     "warming_herbs",
//!     || Ok(vec!["ginger".to_string(), "cinnamon".to_string()]),
//!     None,
//! )?;
//! assert_eq!(herbs.len(), 2);
//! assert!(cache.exists("warming_herbs"));
//! # Ok::<(), lingshu::Error>(())
//! ```

use crate::storage::cache::{CacheBackend, CacheValue};
use crate::{Error, Result};
use once_cell::sync::OnceCell;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Hit/miss counters for a [`CacheManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    /// Reads that found a value.
    pub hits: u64,
    /// Reads that found nothing.
    pub misses: u64,
    /// Backend failures.
    pub errors: u64,
}

impl CacheStats {
    /// Fraction of reads that hit, `0.0` when nothing was read.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Cache manager over a pluggable backend.
pub struct CacheManager {
    backend: Arc<dyn CacheBackend>,
    namespace: Option<String>,
    default_ttl: Option<Duration>,
    inflight: Mutex<HashMap<String, Arc<OnceCell<Value>>>>,
    epoch: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
}

impl CacheManager {
    /// Creates a manager without a namespace or default TTL.
    #[must_use]
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self {
            backend,
            namespace: None,
            default_ttl: None,
            inflight: Mutex::new(HashMap::new()),
            epoch: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    /// Prefixes every key with `"{namespace}:"`. An empty namespace
    /// leaves keys unprefixed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the namespace contains `:`, a glob
    /// metacharacter (`*?[]\`) or a control character.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Result<Self> {
        let namespace = namespace.into();
        validate_namespace(&namespace)?;
        self.namespace = Some(namespace).filter(|ns| !ns.is_empty());
        Ok(self)
    }

    /// TTL applied when a write passes `None`.
    #[must_use]
    pub const fn with_default_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Returns the namespace.
    #[must_use]
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// Returns the backend.
    #[must_use]
    pub fn backend(&self) -> &Arc<dyn CacheBackend> {
        &self.backend
    }

    /// Returns hit/miss counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }

    fn qualify(&self, key: &str) -> String {
        match &self.namespace {
            Some(ns) => format!("{ns}:{key}"),
            None => key.to_string(),
        }
    }

    fn unqualify<'a>(&self, key: &'a str) -> &'a str {
        self.namespace
            .as_deref()
            .and_then(|ns| key.strip_prefix(ns))
            .and_then(|rest| rest.strip_prefix(':'))
            .unwrap_or(key)
    }

    fn record(&self, operation: &'static str, status: &'static str) {
        metrics::counter!(
            "cache_operations_total",
            "backend" => self.backend.backend_name(),
            "operation" => operation,
            "status" => status
        )
        .increment(1);
    }

    fn degrade<T>(&self, operation: &'static str, key: &str, result: Result<T>) -> Option<T> {
        match result {
            Ok(value) => {
                self.record(operation, "success");
                Some(value)
            },
            Err(err) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                self.record(operation, "error");
                tracing::warn!(
                    backend = self.backend.backend_name(),
                    operation,
                    key,
                    error_kind = err.kind(),
                    error = %err,
                    "Cache operation failed"
                );
                None
            },
        }
    }

    /// Reads a value; `None` on miss or backend failure.
    pub fn get(&self, key: &str) -> Option<CacheValue> {
        let qualified = self.qualify(key);
        let found = self
            .degrade("get", &qualified, self.backend.get(&qualified))
            .flatten();
        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        found
    }

    /// Writes a value; `ttl` falls back to the default TTL.
    pub fn set(&self, key: &str, value: CacheValue, ttl: Option<Duration>) -> bool {
        let qualified = self.qualify(key);
        let ttl = ttl.or(self.default_ttl);
        self.degrade("set", &qualified, self.backend.set(&qualified, value, ttl))
            .is_some()
    }

    /// Removes a key; true if it existed.
    pub fn delete(&self, key: &str) -> bool {
        let qualified = self.qualify(key);
        self.degrade("delete", &qualified, self.backend.delete(&qualified))
            .unwrap_or(false)
    }

    /// Returns true if the key holds a live value.
    pub fn exists(&self, key: &str) -> bool {
        let qualified = self.qualify(key);
        self.degrade("exists", &qualified, self.backend.exists(&qualified))
            .unwrap_or(false)
    }

    /// Reads and deserializes a JSON value.
    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.get(key)?.into_json()?;
        match serde_json::from_value(value) {
            Ok(typed) => Some(typed),
            Err(e) => {
                tracing::warn!(key, error = %e, "Cached value has unexpected shape");
                None
            },
        }
    }

    /// Serializes and writes a JSON value.
    pub fn set_json<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Option<Duration>) -> bool {
        match serde_json::to_value(value) {
            Ok(json) => self.set(key, CacheValue::Json(json), ttl),
            Err(e) => {
                tracing::warn!(key, error = %e, "Value is not JSON-serializable");
                false
            },
        }
    }

    /// Removes keys matching `pattern` within the namespace.
    ///
    /// With a namespace, `None` clears `"{ns}:*"` and a pattern is matched
    /// after the prefix. Returns the number of keys removed, 0 on failure.
    pub fn clear(&self, pattern: Option<&str>) -> usize {
        let qualified = match (&self.namespace, pattern) {
            (Some(ns), pattern) => Some(format!("{ns}:{}", pattern.unwrap_or("*"))),
            (None, pattern) => pattern.map(str::to_string),
        };
        let label = qualified.as_deref().unwrap_or("*");
        self.degrade("clear", label, self.backend.clear(qualified.as_deref()))
            .unwrap_or(0)
    }

    /// Clears like [`clear`](Self::clear) and retires every fill already in
    /// flight, so none of them can store a value computed before the call.
    pub fn invalidate(&self, pattern: Option<&str>) -> usize {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.inflight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.clear(pattern)
    }

    /// Sweeps expired entries the backend has not dropped yet. Returns the
    /// number removed, 0 on failure.
    pub fn cleanup_expired(&self) -> usize {
        self.degrade("purge_expired", "*", self.backend.purge_expired())
            .unwrap_or(0)
    }

    /// Batch read; result keys are returned without the namespace prefix.
    pub fn get_many(&self, keys: &[&str]) -> HashMap<String, CacheValue> {
        let qualified: Vec<String> = keys.iter().map(|k| self.qualify(k)).collect();
        let found = self
            .degrade("get_many", "*", self.backend.get_many(&qualified))
            .unwrap_or_default();
        let hits = found.len() as u64;
        self.hits.fetch_add(hits, Ordering::Relaxed);
        self.misses
            .fetch_add((keys.len() as u64).saturating_sub(hits), Ordering::Relaxed);
        found
            .into_iter()
            .map(|(k, v)| (self.unqualify(&k).to_string(), v))
            .collect()
    }

    /// Batch write with a shared TTL.
    pub fn set_many(&self, entries: Vec<(String, CacheValue)>, ttl: Option<Duration>) -> bool {
        let entries = entries
            .into_iter()
            .map(|(k, v)| (self.qualify(&k), v))
            .collect();
        let ttl = ttl.or(self.default_ttl);
        self.degrade("set_many", "*", self.backend.set_many(entries, ttl))
            .is_some()
    }

    /// Returns the cached value or computes, stores and returns it.
    ///
    /// Concurrent callers missing on the same key share one `factory`
    /// invocation and its result. Factory errors are returned to the
    /// caller that ran it and nothing is stored. A value computed across an
    /// [`invalidate`](Self::invalidate) is returned but not kept.
    ///
    /// # Errors
    ///
    /// Returns the factory's error, or [`Error::OperationFailed`] if the
    /// value cannot be converted to or from JSON.
    pub fn get_or_set<T, F>(&self, key: &str, factory: F, ttl: Option<Duration>) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<T>,
    {
        if let Some(cached) = self.get_json::<T>(key) {
            return Ok(cached);
        }

        let qualified = self.qualify(key);
        let cell = {
            let mut inflight = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(
                inflight
                    .entry(qualified.clone())
                    .or_insert_with(|| Arc::new(OnceCell::new())),
            )
        };

        let filled = cell.get_or_try_init(|| {
            // Another flight may have finished between the miss and the cell.
            if let Some(value) = self.get(key).and_then(CacheValue::into_json) {
                return Ok(value);
            }
            let epoch = self.epoch.load(Ordering::SeqCst);
            let value = factory()?;
            let json = serde_json::to_value(&value).map_err(|e| Error::OperationFailed {
                operation: "cache_encode".to_string(),
                cause: e.to_string(),
            })?;
            if self.epoch.load(Ordering::SeqCst) == epoch {
                self.set(key, CacheValue::Json(json.clone()), ttl);
                // An invalidation may have cleared the namespace just before
                // the write landed.
                if self.epoch.load(Ordering::SeqCst) != epoch {
                    self.delete(key);
                }
            } else {
                tracing::debug!(key, "Skipping cache fill invalidated by a write");
            }
            Ok::<_, Error>(json)
        });

        {
            let mut inflight = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
            if inflight
                .get(&qualified)
                .is_some_and(|current| Arc::ptr_eq(current, &cell))
            {
                inflight.remove(&qualified);
            }
        }

        let json = filled?.clone();
        serde_json::from_value(json).map_err(|e| Error::OperationFailed {
            operation: "cache_decode".to_string(),
            cause: e.to_string(),
        })
    }
}

impl std::fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheManager")
            .field("backend", &self.backend.backend_name())
            .field("namespace", &self.namespace)
            .field("default_ttl", &self.default_ttl)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

fn validate_namespace(namespace: &str) -> Result<()> {
    let reserved = |c: char| matches!(c, ':' | '*' | '?' | '[' | ']' | '\\') || c.is_control();
    match namespace.chars().find(|c| reserved(*c)) {
        Some(c) => Err(Error::InvalidInput(format!(
            "cache namespace '{}' must not contain {c:?}",
            namespace.escape_debug()
        ))),
        None => Ok(()),
    }
}

// ============================================================================
// Cache Keys
// ============================================================================

/// Deterministic key built from positional and keyword arguments.
///
/// The key is the SHA-256 hex of a canonical JSON rendering: positional
/// arguments in order, keyword arguments sorted by name, object keys sorted
/// at every level. It identifies a call signature; it is not a secret.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheKey {
    args: Vec<Value>,
    kwargs: BTreeMap<String, Value>,
}

impl CacheKey {
    /// Creates an empty key.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a positional argument.
    #[must_use]
    pub fn arg<T: Serialize + ?Sized>(mut self, value: &T) -> Self {
        self.args.push(to_canonical(value));
        self
    }

    /// Sets a keyword argument.
    #[must_use]
    pub fn kwarg<T: Serialize + ?Sized>(mut self, name: impl Into<String>, value: &T) -> Self {
        self.kwargs.insert(name.into(), to_canonical(value));
        self
    }

    /// Renders the key.
    #[must_use]
    pub fn build(&self) -> String {
        cache_key(&self.args, &self.kwargs)
    }
}

fn to_canonical<T: Serialize + ?Sized>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

/// Hashes positional and keyword arguments into a cache key.
#[must_use]
pub fn cache_key(args: &[Value], kwargs: &BTreeMap<String, Value>) -> String {
    // serde_json::Map is ordered, so objects serialize with sorted keys.
    let canonical = serde_json::json!({ "args": args, "kwargs": kwargs }).to_string();
    hex::encode(Sha256::digest(canonical.as_bytes()))
}
