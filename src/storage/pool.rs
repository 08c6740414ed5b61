//! Bounded, blocking connection pool on top of deadpool.
//!
//! The pool owns a [`ManageConnection`] that knows how to open and validate
//! connections for one backend. Connections are checked out with
//! [`ConnectionPool::acquire`] and come back automatically when the
//! returned [`PooledConnection`] is dropped, on every exit path.
//!
//! Checkout, waiting and slot accounting are delegated to a
//! [`deadpool::managed::Pool`]. The synchronous facade drives it on a small
//! tokio runtime owned by the pool, so callers must not invoke it from
//! inside an async context.
//!
//! # Lifecycle
//!
//! ```text
//! +---------+   start() check ok    +---------+
//! | Stopped | --------------------> | Running |
//! +---------+ <-------------------- +---------+
//!                    stop()
//! ```
//!
//! Stopping closes the deadpool instance; connections checked out from it
//! are closed instead of returned when released. A later `start` builds a
//! fresh instance.
//!
//! # Capacity
//!
//! At most `pool_size + max_overflow` connections are checked out at once.
//! Up to `pool_size` of them are kept idle after release; the rest are
//! closed. When the pool is at capacity, `acquire` waits up to `timeout`
//! and then fails with [`Error::PoolExhausted`].

use crate::{Error, Result};
use deadpool::Runtime;
use deadpool::managed::{self, Metrics, Object, Pool, PoolError, RecycleError, TimeoutType};
use once_cell::sync::OnceCell;
use std::cell::Cell;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

/// Opens and validates connections for one backend.
pub trait ManageConnection: Send + Sync + 'static {
    /// The connection type handed out by the pool.
    type Connection: Send + 'static;

    /// Opens a new connection.
    ///
    /// Runs on a blocking worker thread, never on an async task.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be reached.
    fn connect(&self) -> Result<Self::Connection>;

    /// Runs a trivial round trip to verify the connection is alive.
    ///
    /// # Errors
    ///
    /// Returns an error if the round trip fails.
    fn validate(&self, conn: &mut Self::Connection) -> Result<()>;

    /// Backend name for errors, logs and metrics.
    fn backend_name(&self) -> &'static str;
}

/// Pool sizing and timing configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Connections kept idle for reuse.
    pub pool_size: usize,
    /// Extra connections allowed beyond `pool_size` under load.
    pub max_overflow: usize,
    /// Maximum time `acquire` waits for a free slot.
    pub timeout: Duration,
    /// Idle connections older than this are closed instead of reused.
    pub recycle: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            pool_size: 10,
            max_overflow: 20,
            timeout: Duration::from_secs(30),
            recycle: Some(Duration::from_secs(3600)),
        }
    }
}

impl PoolConfig {
    /// Creates a pool config with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads pool configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Applies environment variable overrides.
    ///
    /// | Variable | Field |
    /// |----------|-------|
    /// | `LINGSHU_POOL_SIZE` | `pool_size` (min 1) |
    /// | `LINGSHU_POOL_MAX_OVERFLOW` | `max_overflow` |
    /// | `LINGSHU_POOL_TIMEOUT_MS` | `timeout` |
    /// | `LINGSHU_POOL_RECYCLE_SECS` | `recycle` (0 disables) |
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(v) = std::env::var("LINGSHU_POOL_SIZE")
            && let Ok(parsed) = v.parse::<usize>()
        {
            self.pool_size = parsed.max(1);
        }
        if let Ok(v) = std::env::var("LINGSHU_POOL_MAX_OVERFLOW")
            && let Ok(parsed) = v.parse::<usize>()
        {
            self.max_overflow = parsed;
        }
        if let Ok(v) = std::env::var("LINGSHU_POOL_TIMEOUT_MS")
            && let Ok(parsed) = v.parse::<u64>()
        {
            self.timeout = Duration::from_millis(parsed);
        }
        if let Ok(v) = std::env::var("LINGSHU_POOL_RECYCLE_SECS")
            && let Ok(parsed) = v.parse::<u64>()
        {
            self.recycle = (parsed > 0).then(|| Duration::from_secs(parsed));
        }
        self
    }

    /// Sets the idle pool size.
    #[must_use]
    pub const fn with_pool_size(mut self, size: usize) -> Self {
        self.pool_size = size;
        self
    }

    /// Sets the overflow allowance.
    #[must_use]
    pub const fn with_max_overflow(mut self, overflow: usize) -> Self {
        self.max_overflow = overflow;
        self
    }

    /// Sets the acquisition timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the recycle age.
    #[must_use]
    pub const fn with_recycle(mut self, recycle: Option<Duration>) -> Self {
        self.recycle = recycle;
        self
    }

    /// Maximum simultaneous checked-out connections.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.pool_size.saturating_add(self.max_overflow)
    }

    fn timeout_ms(&self) -> u64 {
        u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX)
    }
}

/// Whether the pool is serving connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    /// Not started, or stopped.
    Stopped,
    /// Started and serving.
    Running,
}

/// Point-in-time pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Lifecycle state.
    pub state: PoolState,
    /// Idle connections ready for reuse.
    pub idle: usize,
    /// Connections currently checked out (including ones being opened).
    pub checked_out: usize,
    /// Maximum simultaneous checked-out connections.
    pub capacity: usize,
}

// ============================================================================
// deadpool adapter
// ============================================================================

/// Bridges a [`ManageConnection`] into deadpool.
///
/// `create` runs the blocking connect on tokio's blocking pool. `recycle`
/// only enforces the recycle age; liveness checks happen in
/// [`ConnectionPool::start`] and [`ConnectionPool::health_check`].
struct Adapter<M> {
    manager: Arc<M>,
    recycle: Option<Duration>,
}

impl<M: ManageConnection> managed::Manager for Adapter<M> {
    type Type = M::Connection;
    type Error = Error;

    async fn create(&self) -> Result<M::Connection> {
        let manager = Arc::clone(&self.manager);
        let backend = manager.backend_name();
        let conn = tokio::task::spawn_blocking(move || manager.connect())
            .await
            .map_err(|e| Error::OperationFailed {
                operation: "pool_connect".to_string(),
                cause: e.to_string(),
            })??;
        metrics::counter!("pool_connections_opened_total", "backend" => backend).increment(1);
        Ok(conn)
    }

    async fn recycle(
        &self,
        _conn: &mut M::Connection,
        metrics: &Metrics,
    ) -> managed::RecycleResult<Error> {
        if self.recycle.is_some_and(|max_age| metrics.age() >= max_age) {
            tracing::debug!(backend = self.manager.backend_name(), "Recycling aged connection");
            return Err(RecycleError::Message("connection expired".into()));
        }
        Ok(())
    }
}

type InnerPool<M> = Pool<Adapter<M>>;

// ============================================================================
// ConnectionPool
// ============================================================================

/// A bounded pool of backend connections.
pub struct ConnectionPool<M: ManageConnection> {
    manager: Arc<M>,
    config: PoolConfig,
    inner: RwLock<Option<InnerPool<M>>>,
    runtime: OnceCell<tokio::runtime::Runtime>,
}

impl<M: ManageConnection> ConnectionPool<M> {
    /// Creates a stopped pool. Call [`start`](Self::start) before acquiring.
    pub fn new(manager: M, config: PoolConfig) -> Self {
        Self {
            manager: Arc::new(manager),
            config,
            inner: RwLock::new(None),
            runtime: OnceCell::new(),
        }
    }

    /// Returns the connection manager.
    pub fn manager(&self) -> &M {
        &self.manager
    }

    /// Returns the pool configuration.
    pub const fn config(&self) -> &PoolConfig {
        &self.config
    }

    fn current(&self) -> Option<InnerPool<M>> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn block_on<F: std::future::Future>(&self, f: F) -> Result<F::Output> {
        let runtime = self.runtime.get_or_try_init(|| {
            tokio::runtime::Builder::new_multi_thread()
                .worker_threads(1)
                .thread_name("lingshu-pool")
                .enable_time()
                .build()
                .map_err(|e| Error::OperationFailed {
                    operation: "pool_runtime".to_string(),
                    cause: e.to_string(),
                })
        })?;
        Ok(runtime.block_on(f))
    }

    fn build_inner(&self) -> Result<InnerPool<M>> {
        let adapter = Adapter {
            manager: Arc::clone(&self.manager),
            recycle: self.config.recycle,
        };
        Pool::builder(adapter)
            .max_size(self.config.capacity().max(1))
            .wait_timeout(Some(self.config.timeout))
            .create_timeout(Some(self.config.timeout))
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| Error::OperationFailed {
                operation: "pool_build".to_string(),
                cause: e.to_string(),
            })
    }

    /// Opens and validates one connection, then marks the pool running.
    ///
    /// The network round trip happens before the pool is installed, so
    /// concurrent callers never wait on it. Calling `start` on a running
    /// pool is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BackendUnavailable`] if the check fails. The pool
    /// stays stopped and caches nothing.
    pub fn start(&self) -> Result<()> {
        let backend = self.manager.backend_name();
        if self.current().is_some() {
            return Ok(());
        }

        let pool = self.build_inner()?;
        let checked = self
            .block_on(pool.get())
            .and_then(|got| got.map_err(|e| pool_error(backend, &self.config, e)))
            .and_then(|mut conn| self.manager.validate(&mut conn).map(|()| conn));

        match checked {
            Ok(conn) => {
                drop(conn);
                let mut slot = self.inner.write().unwrap_or_else(PoisonError::into_inner);
                if slot.is_some() {
                    drop(slot);
                    pool.close();
                    return Ok(());
                }
                *slot = Some(pool);
                drop(slot);
                tracing::info!(backend, "Connection pool started");
                metrics::gauge!("pool_connections_idle", "backend" => backend).set(1.0);
                Ok(())
            },
            Err(err) => {
                pool.close();
                tracing::warn!(backend, error = %err, "Connection pool failed to start");
                Err(Error::BackendUnavailable {
                    backend: backend.to_string(),
                    cause: err.to_string(),
                })
            },
        }
    }

    /// Stops the pool and closes idle connections.
    ///
    /// Connections still checked out are closed when released. Calling
    /// `stop` on a stopped pool is a no-op.
    pub fn stop(&self) {
        let backend = self.manager.backend_name();
        let taken = self
            .inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(pool) = taken else {
            return;
        };
        pool.close();
        tracing::info!(backend, "Connection pool stopped");
        metrics::gauge!("pool_connections_idle", "backend" => backend).set(0.0);
    }

    /// Returns true if a connection can be acquired and validated.
    pub fn health_check(&self) -> bool {
        let result = self.acquire().and_then(|mut conn| {
            let checked = self.manager.validate(&mut conn);
            if checked.is_err() {
                conn.mark_broken();
            }
            checked
        });
        match result {
            Ok(()) => true,
            Err(err) => {
                tracing::debug!(
                    backend = self.manager.backend_name(),
                    error = %err,
                    "Connection pool health check failed"
                );
                false
            },
        }
    }

    /// Returns current pool counters.
    pub fn status(&self) -> PoolStatus {
        let capacity = self.config.capacity();
        self.current().map_or(
            PoolStatus {
                state: PoolState::Stopped,
                idle: 0,
                checked_out: 0,
                capacity,
            },
            |pool| {
                let status = pool.status();
                PoolStatus {
                    state: PoolState::Running,
                    idle: status.available,
                    checked_out: status.size.saturating_sub(status.available),
                    capacity,
                }
            },
        )
    }

    /// Checks out a connection.
    ///
    /// # Errors
    ///
    /// - [`Error::PoolClosed`] if the pool is stopped
    /// - [`Error::PoolExhausted`] if no slot frees up within `timeout`
    /// - the manager's connect error if a new connection cannot be opened
    pub fn acquire(&self) -> Result<PooledConnection<'_, M>> {
        let backend = self.manager.backend_name();
        let pool = self.current().ok_or_else(|| Error::PoolClosed {
            backend: backend.to_string(),
        })?;
        let object = self
            .block_on(pool.get())?
            .map_err(|e| pool_error(backend, &self.config, e))?;
        Ok(PooledConnection {
            owner: self,
            pool,
            object: Some(object),
            broken: false,
        })
    }

    /// Closes idle connections beyond `pool_size` and ones past the recycle
    /// age.
    fn trim(&self, pool: &InnerPool<M>) {
        let backend = self.manager.backend_name();
        if pool.status().available > self.config.pool_size {
            let kept = Cell::new(0_usize);
            let retained = pool.retain(|_, metrics| {
                let fresh = self
                    .config
                    .recycle
                    .is_none_or(|max_age| metrics.age() < max_age);
                let keep = fresh && kept.get() < self.config.pool_size;
                if keep {
                    kept.set(kept.get() + 1);
                }
                keep
            });
            if !retained.removed.is_empty() {
                tracing::debug!(backend, closed = retained.removed.len(), "Closed overflow connections");
            }
        }

        #[allow(clippy::cast_precision_loss)]
        let idle = pool.status().available as f64;
        metrics::gauge!("pool_connections_idle", "backend" => backend).set(idle);
    }
}

fn pool_error(backend: &str, config: &PoolConfig, err: PoolError<Error>) -> Error {
    match err {
        PoolError::Timeout(TimeoutType::Wait) => {
            metrics::counter!("pool_exhausted_total", "backend" => backend.to_string())
                .increment(1);
            Error::PoolExhausted {
                backend: backend.to_string(),
                timeout_ms: config.timeout_ms(),
            }
        },
        PoolError::Timeout(kind) => Error::Connection {
            backend: backend.to_string(),
            cause: format!("timed out during {kind:?}"),
        },
        PoolError::Backend(err) => err,
        PoolError::Closed => Error::PoolClosed {
            backend: backend.to_string(),
        },
        other => Error::OperationFailed {
            operation: "pool_acquire".to_string(),
            cause: other.to_string(),
        },
    }
}

impl<M: ManageConnection> std::fmt::Debug for ConnectionPool<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("backend", &self.manager.backend_name())
            .field("config", &self.config)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl<M: ManageConnection> Drop for ConnectionPool<M> {
    fn drop(&mut self) {
        if let Some(pool) = self
            .inner
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            pool.close();
        }
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

// ============================================================================
// PooledConnection
// ============================================================================

/// A checked-out connection; returns to the pool on drop.
pub struct PooledConnection<'a, M: ManageConnection> {
    owner: &'a ConnectionPool<M>,
    pool: InnerPool<M>,
    object: Option<Object<Adapter<M>>>,
    broken: bool,
}

impl<M: ManageConnection> PooledConnection<'_, M> {
    /// Marks the connection as unusable so it is closed on release.
    pub const fn mark_broken(&mut self) {
        self.broken = true;
    }
}

impl<M: ManageConnection> Deref for PooledConnection<'_, M> {
    type Target = M::Connection;

    fn deref(&self) -> &Self::Target {
        // `object` is only taken in `drop`.
        self.object.as_deref().unwrap_or_else(|| unreachable!())
    }
}

impl<M: ManageConnection> DerefMut for PooledConnection<'_, M> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.object.as_deref_mut().unwrap_or_else(|| unreachable!())
    }
}

impl<M: ManageConnection> Drop for PooledConnection<'_, M> {
    fn drop(&mut self) {
        if let Some(object) = self.object.take() {
            if self.broken {
                drop(Object::take(object));
            } else {
                drop(object);
            }
        }
        self.owner.trim(&self.pool);
    }
}
