//! Business logic services.
//!
//! Services orchestrate storage backends and provide high-level operations.
//!
//! - [`KnowledgeGraphClient`]: typed graph queries with degradation and caching
//! - [`CacheManager`]: namespaced cache facade with single-flight fills
//! - [`KnowledgeServices`]: wires both from a [`LingshuConfig`](crate::LingshuConfig)

pub mod cache;
mod container;
pub mod knowledge_graph;

pub use cache::{CacheKey, CacheManager, CacheStats, cache_key};
pub use container::{GraphBackend, GraphBackendConnection, KnowledgeServices};
pub use knowledge_graph::{GraphClientConfig, KnowledgeGraphClient};
