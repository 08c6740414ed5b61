//! Data models for the knowledge graph.

pub mod graph;

pub use graph::{
    Attributes, Direction, Entity, EntityRelations, EntityType, HierarchyNode, PathStep,
    RelatedEntity, Relation, RelationType, Subgraph, SubgraphBuilder, Suggestion, pair_path,
};
