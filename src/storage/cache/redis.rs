//! Redis cache backend.
//!
//! Values are stored as [`codec`](super::codec)-tagged strings with a
//! server-side `PX` expiry. Pattern clears walk the keyspace with
//! `SCAN MATCH` and delete each batch, so they never block the server the
//! way `KEYS` would.

#[cfg(feature = "redis")]
mod implementation {
    use crate::storage::cache::{CacheBackend, CacheValue, codec, compile_pattern};
    use crate::storage::retry::{Idempotency, RetryPolicy};
    use crate::{Error, Result};
    use redis::{Client, Connection, RedisError};
    use std::collections::HashMap;
    use std::sync::{Mutex, PoisonError};
    use std::time::Duration;

    const BACKEND: &str = "redis";
    const SCAN_BATCH: usize = 500;

    /// Redis-backed cache.
    ///
    /// Holds one cached connection; a new one is opened with the retry
    /// policy whenever the cached one is missing or was dropped after an
    /// I/O error.
    pub struct RedisCacheBackend {
        client: Client,
        connection: Mutex<Option<Connection>>,
        retry: RetryPolicy,
        timeout: Duration,
    }

    impl RedisCacheBackend {
        /// Creates a backend for `url`.
        ///
        /// # Errors
        ///
        /// Returns [`Error::InvalidInput`] if the URL cannot be parsed.
        pub fn new(url: &str) -> Result<Self> {
            let client = Client::open(url).map_err(|e| {
                Error::InvalidInput(format!("invalid redis url: {e}"))
            })?;
            Ok(Self {
                client,
                connection: Mutex::new(None),
                retry: RetryPolicy::from_env(),
                timeout: Duration::from_secs(5),
            })
        }

        /// Sets the retry policy used when opening connections.
        #[must_use]
        pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
            self.retry = retry;
            self
        }

        /// Sets the read/write timeout for each command.
        #[must_use]
        pub const fn with_timeout(mut self, timeout: Duration) -> Self {
            self.timeout = timeout;
            self
        }

        fn map_err(operation: &str, err: &RedisError) -> Error {
            if err.is_io_error() || err.is_timeout() || err.is_connection_dropped() {
                Error::Connection {
                    backend: BACKEND.to_string(),
                    cause: err.to_string(),
                }
            } else {
                Error::OperationFailed {
                    operation: format!("redis_{operation}"),
                    cause: err.to_string(),
                }
            }
        }

        fn get_connection(&self) -> Result<Connection> {
            let cached = self
                .connection
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            if let Some(conn) = cached {
                return Ok(conn);
            }

            self.retry
                .run("redis_connect", Idempotency::Idempotent, || {
                    let conn = self
                        .client
                        .get_connection()
                        .map_err(|e| Self::map_err("connect", &e))?;
                    conn.set_read_timeout(Some(self.timeout))
                        .map_err(|e| Self::map_err("set_read_timeout", &e))?;
                    conn.set_write_timeout(Some(self.timeout))
                        .map_err(|e| Self::map_err("set_write_timeout", &e))?;
                    Ok(conn)
                })
        }

        fn return_connection(&self, conn: Connection) {
            *self
                .connection
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(conn);
        }

        /// Runs `call` on a pooled connection; the connection is kept only
        /// if the call did not fail at the transport level.
        fn with_connection<T, F>(&self, operation: &str, call: F) -> Result<T>
        where
            F: FnOnce(&mut Connection) -> redis::RedisResult<T>,
        {
            let mut conn = self.get_connection()?;
            match call(&mut conn) {
                Ok(value) => {
                    self.return_connection(conn);
                    Ok(value)
                },
                Err(err) => {
                    let mapped = Self::map_err(operation, &err);
                    if !mapped.is_retryable() {
                        self.return_connection(conn);
                    }
                    tracing::debug!(backend = BACKEND, operation, error = %err, "Redis command failed");
                    Err(mapped)
                },
            }
        }

        fn ttl_millis(ttl: Duration) -> u64 {
            u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
        }
    }

    impl CacheBackend for RedisCacheBackend {
        fn get(&self, key: &str) -> Result<Option<CacheValue>> {
            let raw: Option<Vec<u8>> =
                self.with_connection("get", |conn| redis::cmd("GET").arg(key).query(conn))?;
            raw.map(|bytes| codec::decode(&bytes)).transpose()
        }

        fn set(&self, key: &str, value: CacheValue, ttl: Option<Duration>) -> Result<()> {
            let payload = codec::encode(&value)?;
            self.with_connection("set", |conn| {
                let mut cmd = redis::cmd("SET");
                cmd.arg(key).arg(payload);
                if let Some(ttl) = ttl {
                    cmd.arg("PX").arg(Self::ttl_millis(ttl));
                }
                cmd.query::<()>(conn)
            })
        }

        fn delete(&self, key: &str) -> Result<bool> {
            let removed: usize =
                self.with_connection("delete", |conn| redis::cmd("DEL").arg(key).query(conn))?;
            Ok(removed > 0)
        }

        fn exists(&self, key: &str) -> Result<bool> {
            self.with_connection("exists", |conn| redis::cmd("EXISTS").arg(key).query(conn))
        }

        fn clear(&self, pattern: Option<&str>) -> Result<usize> {
            let pattern = pattern.unwrap_or("*");
            compile_pattern(pattern)?;

            self.with_connection("clear", |conn| {
                let mut cursor: u64 = 0;
                let mut removed = 0_usize;
                loop {
                    let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(pattern)
                        .arg("COUNT")
                        .arg(SCAN_BATCH)
                        .query(conn)?;
                    if !keys.is_empty() {
                        let deleted: usize = redis::cmd("DEL").arg(&keys).query(conn)?;
                        removed += deleted;
                    }
                    if next == 0 {
                        return Ok(removed);
                    }
                    cursor = next;
                }
            })
        }

        fn get_many(&self, keys: &[String]) -> Result<HashMap<String, CacheValue>> {
            if keys.is_empty() {
                return Ok(HashMap::new());
            }
            let raw: Vec<Option<Vec<u8>>> =
                self.with_connection("get_many", |conn| redis::cmd("MGET").arg(keys).query(conn))?;

            let mut found = HashMap::with_capacity(keys.len());
            for (key, bytes) in keys.iter().zip(raw) {
                if let Some(bytes) = bytes {
                    found.insert(key.clone(), codec::decode(&bytes)?);
                }
            }
            Ok(found)
        }

        fn set_many(&self, entries: Vec<(String, CacheValue)>, ttl: Option<Duration>) -> Result<()> {
            if entries.is_empty() {
                return Ok(());
            }
            let mut pipe = redis::pipe();
            for (key, value) in &entries {
                let payload = codec::encode(value)?;
                let cmd = pipe.cmd("SET").arg(key).arg(payload);
                if let Some(ttl) = ttl {
                    cmd.arg("PX").arg(Self::ttl_millis(ttl));
                }
                cmd.ignore();
            }
            self.with_connection("set_many", |conn| pipe.query::<()>(conn))
        }

        fn backend_name(&self) -> &'static str {
            BACKEND
        }
    }
}

#[cfg(feature = "redis")]
pub use implementation::RedisCacheBackend;

#[cfg(not(feature = "redis"))]
mod stub {
    use crate::storage::cache::{CacheBackend, CacheValue};
    use crate::{Error, Result};
    use std::time::Duration;

    /// Stub Redis cache when the feature is not enabled.
    pub struct RedisCacheBackend;

    impl RedisCacheBackend {
        /// Creates a new Redis cache (stub).
        ///
        /// # Errors
        ///
        /// Always returns an error because the feature is not enabled.
        pub fn new(_url: &str) -> Result<Self> {
            Err(Error::FeatureNotEnabled("redis".to_string()))
        }
    }

    impl CacheBackend for RedisCacheBackend {
        fn get(&self, _key: &str) -> Result<Option<CacheValue>> {
            Err(Error::FeatureNotEnabled("redis".to_string()))
        }

        fn set(&self, _key: &str, _value: CacheValue, _ttl: Option<Duration>) -> Result<()> {
            Err(Error::FeatureNotEnabled("redis".to_string()))
        }

        fn delete(&self, _key: &str) -> Result<bool> {
            Err(Error::FeatureNotEnabled("redis".to_string()))
        }

        fn exists(&self, _key: &str) -> Result<bool> {
            Err(Error::FeatureNotEnabled("redis".to_string()))
        }

        fn clear(&self, _pattern: Option<&str>) -> Result<usize> {
            Err(Error::FeatureNotEnabled("redis".to_string()))
        }

        fn backend_name(&self) -> &'static str {
            "redis"
        }
    }
}

#[cfg(not(feature = "redis"))]
pub use stub::RedisCacheBackend;
