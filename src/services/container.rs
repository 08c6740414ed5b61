//! Service container wiring configuration to backends.
//!
//! ```text
//! KnowledgeServices
//!   ├── pool   → ConnectionPool<GraphBackend>   (Neo4j | in-process graph)
//!   ├── cache  → Option<Arc<CacheManager>>      (memory | redis | tiered | disabled)
//!   └── graph  → KnowledgeGraphClient<GraphBackend>
//! ```
//!
//! Construction does not touch the network. Call [`KnowledgeServices::start`]
//! to open and check the first graph connection.

use crate::config::{CacheBackendKind, CacheConfig, GraphBackendKind, LingshuConfig};
use crate::services::{CacheManager, KnowledgeGraphClient};
use crate::storage::cache::{
    CacheBackend, MemoryCacheBackend, RedisCacheBackend, TieredCacheBackend,
};
use crate::storage::graph::{
    GraphConnection, GraphStatement, MemoryGraph, MemoryGraphConnection, MemoryGraphManager,
    Neo4jConnection, Neo4jConnectionManager, Record,
};
use crate::storage::pool::{ConnectionPool, ManageConnection, PoolStatus};
use crate::{Error, Result};
use secrecy::ExposeSecret;
use std::sync::Arc;

/// Graph backend selected at runtime.
#[derive(Debug, Clone)]
pub enum GraphBackend {
    /// Neo4j server.
    Neo4j(Neo4jConnectionManager),
    /// In-process graph.
    Memory(MemoryGraphManager),
}

/// A connection from a [`GraphBackend`].
#[derive(Debug)]
pub enum GraphBackendConnection {
    /// Neo4j connection.
    Neo4j(Neo4jConnection),
    /// In-process graph connection.
    Memory(MemoryGraphConnection),
}

impl ManageConnection for GraphBackend {
    type Connection = GraphBackendConnection;

    fn connect(&self) -> Result<Self::Connection> {
        match self {
            Self::Neo4j(manager) => manager.connect().map(GraphBackendConnection::Neo4j),
            Self::Memory(manager) => manager.connect().map(GraphBackendConnection::Memory),
        }
    }

    fn validate(&self, conn: &mut Self::Connection) -> Result<()> {
        match (self, conn) {
            (Self::Neo4j(manager), GraphBackendConnection::Neo4j(conn)) => manager.validate(conn),
            (Self::Memory(manager), GraphBackendConnection::Memory(conn)) => manager.validate(conn),
            _ => Err(Error::OperationFailed {
                operation: "validate".to_string(),
                cause: "connection belongs to a different backend".to_string(),
            }),
        }
    }

    fn backend_name(&self) -> &'static str {
        match self {
            Self::Neo4j(manager) => manager.backend_name(),
            Self::Memory(manager) => manager.backend_name(),
        }
    }
}

impl GraphConnection for GraphBackendConnection {
    fn execute(&mut self, statement: &GraphStatement) -> Result<Vec<Record>> {
        match self {
            Self::Neo4j(conn) => conn.execute(statement),
            Self::Memory(conn) => conn.execute(statement),
        }
    }
}

/// Composition root for the knowledge services.
pub struct KnowledgeServices {
    config: LingshuConfig,
    pool: Arc<ConnectionPool<GraphBackend>>,
    cache: Option<Arc<CacheManager>>,
    graph: KnowledgeGraphClient<GraphBackend>,
}

impl KnowledgeServices {
    /// Builds services for `config`.
    ///
    /// The memory graph backend starts from an empty graph.
    ///
    /// # Errors
    ///
    /// Returns an error if a backend cannot be constructed, including
    /// [`Error::FeatureNotEnabled`] when Redis is configured without the
    /// `redis` feature.
    pub fn from_config(config: LingshuConfig) -> Result<Self> {
        let backend = match config.graph_backend {
            GraphBackendKind::Neo4j => {
                GraphBackend::Neo4j(Neo4jConnectionManager::new(config.graph.clone())?)
            },
            GraphBackendKind::Memory => {
                GraphBackend::Memory(MemoryGraphManager::new(MemoryGraph::new()))
            },
        };
        Self::with_backend(config, backend)
    }

    /// Builds services on an explicit graph backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache backend cannot be constructed.
    pub fn with_backend(config: LingshuConfig, backend: GraphBackend) -> Result<Self> {
        let cache = build_cache(&config.cache)?;
        let pool = Arc::new(ConnectionPool::new(backend, config.pool.clone()));

        let mut graph = KnowledgeGraphClient::new(Arc::clone(&pool), config.retry.clone())
            .with_config(config.client.clone());
        if let Some(cache) = &cache {
            graph = graph.with_cache(Arc::clone(cache), None);
        }

        tracing::info!(
            graph_backend = pool.manager().backend_name(),
            cache_backend = cache.as_ref().map_or("disabled", |c| c.backend().backend_name()),
            "Knowledge services configured"
        );

        Ok(Self {
            config,
            pool,
            cache,
            graph,
        })
    }

    /// Opens and checks the first graph connection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BackendUnavailable`] if the graph cannot be reached.
    pub fn start(&self) -> Result<()> {
        self.pool.start()
    }

    /// Stops the pool and drops its connections.
    pub fn stop(&self) {
        self.pool.stop();
    }

    /// Returns true if the graph backend answers a ping.
    pub fn health_check(&self) -> bool {
        self.pool.health_check()
    }

    /// Returns the pool status.
    pub fn status(&self) -> PoolStatus {
        self.pool.status()
    }

    /// Returns the graph client.
    #[must_use]
    pub const fn graph(&self) -> &KnowledgeGraphClient<GraphBackend> {
        &self.graph
    }

    /// Returns the cache manager, if caching is enabled.
    #[must_use]
    pub const fn cache(&self) -> Option<&Arc<CacheManager>> {
        self.cache.as_ref()
    }

    /// Returns the connection pool.
    #[must_use]
    pub const fn pool(&self) -> &Arc<ConnectionPool<GraphBackend>> {
        &self.pool
    }

    /// Returns the configuration the services were built from.
    #[must_use]
    pub const fn config(&self) -> &LingshuConfig {
        &self.config
    }
}

impl std::fmt::Debug for KnowledgeServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KnowledgeServices")
            .field("graph", &self.graph)
            .field("cached", &self.cache.is_some())
            .finish_non_exhaustive()
    }
}

fn build_cache(config: &CacheConfig) -> Result<Option<Arc<CacheManager>>> {
    let backend: Arc<dyn CacheBackend> = match config.backend {
        CacheBackendKind::Disabled => return Ok(None),
        CacheBackendKind::Memory => Arc::new(MemoryCacheBackend::new(config.max_size)),
        CacheBackendKind::Redis => Arc::new(redis_backend(config)?),
        CacheBackendKind::Tiered => {
            let l1 = Arc::new(MemoryCacheBackend::new(config.max_size));
            let l2 = Arc::new(redis_backend(config)?);
            Arc::new(TieredCacheBackend::new(l1, l2).with_l1_ttl(config.l1_ttl))
        },
    };

    let mut manager = CacheManager::new(backend).with_default_ttl(config.default_ttl);
    if let Some(namespace) = &config.namespace {
        manager = manager.with_namespace(namespace.clone())?;
    }
    Ok(Some(Arc::new(manager)))
}

fn redis_backend(config: &CacheConfig) -> Result<RedisCacheBackend> {
    let url = config
        .redis_url
        .as_ref()
        .map_or("redis://127.0.0.1:6379", |url| url.expose_secret());
    RedisCacheBackend::new(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Entity, EntityType};

    fn memory_config() -> LingshuConfig {
        LingshuConfig::default().with_graph_backend(GraphBackendKind::Memory)
    }

    #[test]
    fn test_memory_services_round_trip() {
        let services = KnowledgeServices::from_config(memory_config());
        let Ok(services) = services else {
            unreachable!("memory services always build");
        };
        assert!(services.start().is_ok());
        assert!(services.health_check());

        let herb = Entity::new("h1", "Ginseng", EntityType::Herb);
        assert!(services.graph().create_entity(&herb));
        assert_eq!(services.graph().get_entity_by_id("h1"), Some(herb));
        assert!(services.cache().is_some());

        services.stop();
        assert!(!services.health_check());
    }

    #[test]
    fn test_cache_disabled() {
        let config = memory_config().with_cache_backend(CacheBackendKind::Disabled);
        let services = KnowledgeServices::from_config(config);
        assert!(services.is_ok_and(|s| s.cache().is_none()));
    }

    #[cfg(not(feature = "redis"))]
    #[test]
    fn test_redis_requires_feature() {
        let config = memory_config().with_cache_backend(CacheBackendKind::Redis);
        let result = KnowledgeServices::from_config(config);
        assert!(matches!(result, Err(Error::FeatureNotEnabled(_))));
    }

    #[cfg(not(feature = "redis"))]
    #[test]
    fn test_tiered_requires_feature() {
        let config = memory_config().with_cache_backend(CacheBackendKind::Tiered);
        let result = KnowledgeServices::from_config(config);
        assert!(matches!(result, Err(Error::FeatureNotEnabled(_))));
    }

    #[test]
    fn test_invalid_namespace_rejected() {
        let mut config = memory_config();
        config.cache.namespace = Some("tcm:v2".to_string());
        let result = KnowledgeServices::from_config(config);
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_shared_memory_graph() {
        let graph = MemoryGraph::new();
        let backend = GraphBackend::Memory(MemoryGraphManager::new(graph.clone()));
        let services = KnowledgeServices::with_backend(memory_config(), backend);
        let Ok(services) = services else {
            unreachable!("memory services always build");
        };
        assert!(services.start().is_ok());
        assert!(services.graph().create_entity(&Entity::new("s1", "Cough", EntityType::Symptom)));
        assert_eq!(graph.node_count(), 1);
    }
}
