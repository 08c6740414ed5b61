//! Graph backends for knowledge graph queries.
//!
//! Backends execute [`GraphStatement`]s and return raw [`Record`]s, one JSON
//! object per result row keyed by column name. Typed mapping happens in
//! [`crate::services::KnowledgeGraphClient`].
//!
//! # Available Backends
//!
//! | Backend | Use Case | Transport |
//! |---------|----------|-----------|
//! | [`Neo4jConnectionManager`] | Production | Neo4j HTTP transactional endpoint |
//! | [`MemoryGraphManager`] | Testing, development | In-process |

pub mod cypher;
mod memory;
mod neo4j;

pub use cypher::{CypherBuilder, CypherQuery, GraphStatement, Operation, Predicate};
pub use memory::{MemoryGraph, MemoryGraphConnection, MemoryGraphManager};
pub use neo4j::{GraphConfig, Neo4jConnection, Neo4jConnectionManager};

use crate::Result;

/// One result row keyed by column name.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// A live connection able to execute graph statements.
pub trait GraphConnection: Send {
    /// Executes a statement and returns its rows.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Connection`] or [`crate::Error::Transient`] for
    /// failures a retry may fix, and [`crate::Error::OperationFailed`] when
    /// the backend rejects the statement.
    fn execute(&mut self, statement: &GraphStatement) -> Result<Vec<Record>>;
}
