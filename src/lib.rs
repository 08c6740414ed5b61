//! # Lingshu
//!
//! Knowledge graph query, connection pool and cache core for TCM health
//! services.
//!
//! Lingshu stores syndromes, symptoms, herbs, formulas and the relations
//! between them in a graph database, and serves typed lookups, neighbour
//! queries, shortest paths and bounded subgraphs to service-layer callers.
//!
//! ## Features
//!
//! - Parameterized Cypher building (filter values never enter query text)
//! - Bounded connection pool with scoped acquisition and retry policy
//! - Namespaced cache manager with single-flight `get_or_set`
//! - Pluggable backends (Neo4j over HTTP, in-process graph, memory/Redis cache)
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use lingshu::models::graph::{Entity, EntityType, Relation, RelationType};
//! use lingshu::services::KnowledgeGraphClient;
//! use lingshu::storage::graph::{MemoryGraph, MemoryGraphManager};
//! use lingshu::storage::{ConnectionPool, PoolConfig, RetryPolicy};
//!
//! let graph = MemoryGraph::new();
//! let pool = Arc::new(ConnectionPool::new(
//!     MemoryGraphManager::new(graph.clone()),
//!     PoolConfig::default(),
//! ));
//! pool.start()?;
//!
//! let client = KnowledgeGraphClient::new(pool, RetryPolicy::default());
//! client.create_entity(&Entity::new("e1", "Qi Deficiency", EntityType::Syndrome));
//! client.create_entity(&Entity::new("e2", "Fatigue", EntityType::Symptom));
//! client.create_relation(&Relation::new("e1", "e2", RelationType::new("causes")?));
//!
//! let related = client.get_related_entities("e1", None, None);
//! assert_eq!(related.len(), 1);
//! # Ok::<(), lingshu::Error>(())
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![allow(clippy::multiple_crate_versions)]

use thiserror::Error as ThisError;

// Module declarations
pub mod config;
pub mod models;
pub mod observability;
pub mod services;
pub mod storage;

// Re-exports for convenience
pub use config::LingshuConfig;
pub use models::graph::{
    Entity, EntityType, PathStep, RelatedEntity, Relation, RelationType, Subgraph,
};
pub use services::{CacheManager, KnowledgeGraphClient, KnowledgeServices};
pub use storage::{CacheBackend, ConnectionPool, ManageConnection, PoolConfig, RetryPolicy};

/// Error type for lingshu operations.
///
/// # Error Variant Triggers
///
/// | Variant | Raised When | Retryable |
/// |---------|-------------|-----------|
/// | `InvalidInput` | Bad relation type, glob pattern or config value | no |
/// | `OperationFailed` | Query rejected, record decode fails, I/O fails | no |
/// | `Connection` | Network, connect or request timeout failure | yes |
/// | `Transient` | Backend reports a transient fault | yes |
/// | `PoolExhausted` | Acquisition waited the full pool timeout | no |
/// | `PoolClosed` | Acquisition on a stopped pool | no |
/// | `BackendUnavailable` | Start-up check failed | no |
/// | `FeatureNotEnabled` | Backend requires a compile-time feature | no |
#[derive(Debug, ThisError)]
pub enum Error {
    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An operation failed.
    ///
    /// Raised when:
    /// - The graph backend rejects a statement (syntax, constraint)
    /// - A raw record cannot be decoded into the typed model
    /// - A config file cannot be read or parsed
    #[error("operation '{operation}' failed: {cause}")]
    OperationFailed {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// The backend could not be reached.
    #[error("connection to '{backend}' failed: {cause}")]
    Connection {
        /// Backend name.
        backend: String,
        /// The underlying cause.
        cause: String,
    },

    /// The backend reported a fault that may succeed on retry.
    #[error("transient failure in '{backend}': {cause}")]
    Transient {
        /// Backend name.
        backend: String,
        /// The underlying cause.
        cause: String,
    },

    /// Every pooled connection stayed checked out for the whole timeout.
    #[error("connection pool for '{backend}' exhausted after {timeout_ms}ms")]
    PoolExhausted {
        /// Backend name.
        backend: String,
        /// How long the caller waited.
        timeout_ms: u64,
    },

    /// The pool is not running.
    #[error("connection pool for '{backend}' is not running")]
    PoolClosed {
        /// Backend name.
        backend: String,
    },

    /// The start-up liveness check failed.
    #[error("backend '{backend}' unavailable: {cause}")]
    BackendUnavailable {
        /// Backend name.
        backend: String,
        /// The underlying cause.
        cause: String,
    },

    /// Feature not enabled (requires feature flag).
    #[error("feature not enabled: {0} (compile with --features {0})")]
    FeatureNotEnabled(String),
}

impl Error {
    /// Returns true for network-class failures that a retry may fix.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Transient { .. })
    }

    /// Stable label for logs and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::OperationFailed { .. } => "operation_failed",
            Self::Connection { .. } => "connection",
            Self::Transient { .. } => "transient",
            Self::PoolExhausted { .. } => "pool_exhausted",
            Self::PoolClosed { .. } => "pool_closed",
            Self::BackendUnavailable { .. } => "backend_unavailable",
            Self::FeatureNotEnabled(_) => "feature_not_enabled",
        }
    }
}

/// Result type alias for lingshu operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Returns the current Unix timestamp in milliseconds.
///
/// Falls back to 0 if the system clock is before the Unix epoch.
#[must_use]
pub fn current_timestamp_millis() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
