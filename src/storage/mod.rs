//! Storage layer.
//!
//! - **Pool**: bounded deadpool-backed connection pool generic over a [`ManageConnection`]
//! - **Retry**: bounded exponential backoff for retryable failures
//! - **Graph**: Cypher statement building and graph backends (Neo4j, in-process)
//! - **Cache**: key-value cache backends (in-process, Redis, tiered)

// Allow significant_drop_tightening - guards are released explicitly where it matters.
#![allow(clippy::significant_drop_tightening)]
// Allow match_same_arms for explicit enum handling.
#![allow(clippy::match_same_arms)]

pub mod cache;
pub mod graph;
pub mod pool;
pub mod retry;

pub use cache::{
    CacheBackend, CacheValue, Clock, ManualClock, MemoryCacheBackend, RedisCacheBackend,
    SystemClock, TieredCacheBackend,
};
pub use graph::{
    GraphConfig, GraphConnection, GraphStatement, MemoryGraph, MemoryGraphManager,
    Neo4jConnectionManager, Record,
};
pub use pool::{ConnectionPool, ManageConnection, PoolConfig, PoolState, PoolStatus, PooledConnection};
pub use retry::{Idempotency, RetryPolicy};
