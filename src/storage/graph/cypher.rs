//! Parameterized Cypher statement building.
//!
//! Every graph call is described by a structured [`Operation`]. The
//! operation is rendered into a [`CypherQuery`] whose filter values travel
//! only in the parameter map; the query text holds `$placeholders`, labels
//! from the closed [`EntityType`] enum, quoted [`RelationType`] identifiers
//! and typed integer depth bounds.
//!
//! Backends that speak Cypher execute [`GraphStatement::cypher`]; the
//! in-process engine interprets [`GraphStatement::operation`]. Both return
//! records with the column layout documented on each [`Operation`] variant.

use crate::models::graph::{Attributes, Direction, EntityType, RelationType};
use serde_json::{Map, Value};

/// Projection of a node into a `{id, name, labels, properties}` map.
#[must_use]
pub fn node_projection(var: &str) -> String {
    format!(
        "{{id: {var}.id, name: {var}.name, labels: labels({var}), properties: properties({var})}}"
    )
}

/// Projection of an edge into a `{type, source_id, target_id, properties}` map.
#[must_use]
pub fn relation_projection(var: &str) -> String {
    format!(
        "{{type: type({var}), source_id: startNode({var}).id, target_id: endNode({var}).id, properties: properties({var})}}"
    )
}

/// A rendered Cypher statement with its parameters.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CypherQuery {
    /// Statement text with `$name` placeholders.
    pub text: String,
    /// Parameter values keyed by placeholder name.
    pub params: Map<String, Value>,
}

/// A `WHERE` condition referencing a bound parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Predicate {
    /// `var.name CONTAINS $param`
    NameContains {
        /// Node variable.
        var: &'static str,
    },
    /// `$param IN labels(var)`
    HasLabel {
        /// Node variable.
        var: &'static str,
    },
    /// `ANY(label IN labels(var) WHERE label IN $param)`
    HasAnyLabel {
        /// Node variable.
        var: &'static str,
    },
    /// `var.id IN $param`
    IdIn {
        /// Node variable.
        var: &'static str,
    },
    /// `NOT var.id IN $param`
    IdNotIn {
        /// Node variable.
        var: &'static str,
    },
    /// `type(var) = $param`
    RelationTypeIs {
        /// Edge variable.
        var: &'static str,
    },
    /// `ALL(r IN relationships(path) WHERE type(r) IN $param)`
    PathRelationTypesIn {
        /// Path variable.
        path: &'static str,
    },
}

impl Predicate {
    fn render(self, param: &str) -> String {
        match self {
            Self::NameContains { var } => format!("{var}.name CONTAINS ${param}"),
            Self::HasLabel { var } => format!("${param} IN labels({var})"),
            Self::HasAnyLabel { var } => {
                format!("ANY(label IN labels({var}) WHERE label IN ${param})")
            },
            Self::IdIn { var } => format!("{var}.id IN ${param}"),
            Self::IdNotIn { var } => format!("NOT {var}.id IN ${param}"),
            Self::RelationTypeIs { var } => format!("type({var}) = ${param}"),
            Self::PathRelationTypesIn { path } => {
                format!("ALL(rel IN relationships({path}) WHERE type(rel) IN ${param})")
            },
        }
    }
}

/// Incremental builder for [`CypherQuery`].
///
/// Filters added between two clauses are emitted as one `WHERE` joined by
/// `AND` ahead of the next clause.
#[derive(Debug, Default)]
pub struct CypherBuilder {
    lines: Vec<String>,
    conditions: Vec<String>,
    params: Map<String, Value>,
}

impl CypherBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn flush_conditions(&mut self) {
        if !self.conditions.is_empty() {
            self.lines
                .push(format!("WHERE {}", self.conditions.join(" AND ")));
            self.conditions.clear();
        }
    }

    /// Appends a clause.
    #[must_use]
    pub fn clause(mut self, clause: impl Into<String>) -> Self {
        self.flush_conditions();
        self.lines.push(clause.into());
        self
    }

    /// Adds a condition and binds its value to `param`.
    #[must_use]
    pub fn filter(mut self, predicate: Predicate, param: &str, value: impl Into<Value>) -> Self {
        self.conditions.push(predicate.render(param));
        self.params.insert(param.to_string(), value.into());
        self
    }

    /// Adds a condition on a parameter bound elsewhere.
    #[must_use]
    pub fn condition(mut self, predicate: Predicate, param: &str) -> Self {
        self.conditions.push(predicate.render(param));
        self
    }

    /// Adds a condition only when a value is present.
    #[must_use]
    pub fn filter_opt<V: Into<Value>>(
        self,
        predicate: Predicate,
        param: &str,
        value: Option<V>,
    ) -> Self {
        match value {
            Some(value) => self.filter(predicate, param, value),
            None => self,
        }
    }

    /// Binds a parameter without adding a condition.
    #[must_use]
    pub fn bind(mut self, param: &str, value: impl Into<Value>) -> Self {
        self.params.insert(param.to_string(), value.into());
        self
    }

    /// Finishes the query.
    #[must_use]
    pub fn build(mut self) -> CypherQuery {
        self.flush_conditions();
        CypherQuery {
            text: self.lines.join("\n"),
            params: self.params,
        }
    }
}

/// A structured graph operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// Liveness check. Columns: `ok`.
    Ping,
    /// Insert or update a node by id. Columns: `node`.
    UpsertEntity {
        /// Node id.
        id: String,
        /// Display name.
        name: String,
        /// Node label.
        entity_type: EntityType,
        /// Attributes without reserved keys.
        attributes: Attributes,
    },
    /// Merge attributes into an existing node. Columns: `node`.
    UpdateEntity {
        /// Node id.
        id: String,
        /// Attributes without reserved keys.
        attributes: Attributes,
    },
    /// Remove a node and its edges. Columns: `id`.
    DeleteEntity {
        /// Node id.
        id: String,
    },
    /// Create a directed edge between existing nodes. Columns: `relation`.
    CreateRelation {
        /// Source node id.
        source_id: String,
        /// Target node id.
        target_id: String,
        /// Edge label.
        relation_type: RelationType,
        /// Edge attributes.
        attributes: Attributes,
    },
    /// Remove every edge of a type between two nodes. Columns: `deleted`.
    DeleteRelation {
        /// Source node id.
        source_id: String,
        /// Target node id.
        target_id: String,
        /// Edge label.
        relation_type: RelationType,
    },
    /// Fetch one node. Columns: `node`.
    EntityById {
        /// Node id.
        id: String,
    },
    /// Fetch the first node with an exact name, lowest id first.
    /// Columns: `node`.
    EntityByName {
        /// Exact display name.
        name: String,
        /// Optional label filter.
        entity_type: Option<EntityType>,
    },
    /// One-hop neighbours in one direction.
    /// Columns: `entity`, `relation_type`, `relation_attributes`.
    Related {
        /// Origin node id.
        id: String,
        /// Edge direction relative to the origin.
        direction: Direction,
        /// Optional edge type filter.
        relation_type: Option<RelationType>,
        /// Optional neighbour label filter.
        entity_type: Option<EntityType>,
        /// Maximum rows.
        limit: usize,
    },
    /// Name substring search. Columns: `node`.
    Search {
        /// Case-sensitive substring.
        keyword: String,
        /// Label allow-list; empty matches every label.
        entity_types: Vec<EntityType>,
        /// Maximum rows.
        limit: usize,
    },
    /// Undirected shortest path. Columns: `nodes`, `relationships`.
    ShortestPath {
        /// Start node id.
        source_id: String,
        /// End node id.
        target_id: String,
        /// Maximum hops (at least 1).
        max_depth: u32,
    },
    /// Undirected paths from a root. One row per path.
    /// Columns: `nodes`, `relationships`.
    Subgraph {
        /// Root node id.
        id: String,
        /// Maximum hops.
        depth: u32,
        /// Optional edge type allow-list.
        relation_types: Option<Vec<RelationType>>,
        /// Maximum rows.
        limit: usize,
    },
    /// Directed paths leaving a root, the zero-length root path included.
    /// One row per path. Columns: `nodes`, `relationships`.
    Descendants {
        /// Root node id.
        id: String,
        /// Maximum hops.
        depth: u32,
        /// Optional edge type allow-list.
        relation_types: Option<Vec<RelationType>>,
        /// Maximum rows.
        limit: usize,
    },
    /// Nodes one or two undirected hops from any seed, excluding the seeds,
    /// scored by the number of such paths. Ordered by relevance, then id.
    /// Columns: `entity`, `relevance`.
    Suggest {
        /// Seed node ids.
        seed_ids: Vec<String>,
        /// Maximum rows.
        limit: usize,
    },
}

impl Operation {
    /// Stable operation name for logs and metrics.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::UpsertEntity { .. } => "create_entity",
            Self::UpdateEntity { .. } => "update_entity",
            Self::DeleteEntity { .. } => "delete_entity",
            Self::CreateRelation { .. } => "create_relation",
            Self::DeleteRelation { .. } => "delete_relation",
            Self::EntityById { .. } => "get_entity_by_id",
            Self::EntityByName { .. } => "get_entity_by_name",
            Self::Related {
                direction: Direction::Outgoing,
                ..
            } => "get_related_entities",
            Self::Related {
                direction: Direction::Incoming,
                ..
            } => "get_incoming_entities",
            Self::Search { .. } => "search_entities",
            Self::ShortestPath { .. } => "get_shortest_path",
            Self::Subgraph { .. } => "get_subgraph",
            Self::Descendants { .. } => "get_knowledge_hierarchy",
            Self::Suggest { .. } => "suggest_related_content",
        }
    }

    /// Returns true if the operation modifies the graph.
    #[must_use]
    pub const fn is_write(&self) -> bool {
        matches!(
            self,
            Self::UpsertEntity { .. }
                | Self::UpdateEntity { .. }
                | Self::DeleteEntity { .. }
                | Self::CreateRelation { .. }
                | Self::DeleteRelation { .. }
        )
    }

    /// Renders the operation as parameterized Cypher.
    #[must_use]
    pub fn to_cypher(&self) -> CypherQuery {
        let node = node_projection("n");
        match self {
            Self::Ping => CypherBuilder::new().clause("RETURN 1 AS ok").build(),
            Self::UpsertEntity {
                id,
                name,
                entity_type,
                attributes,
            } => CypherBuilder::new()
                .clause("MERGE (n {id: $id})")
                .clause(format!(
                    "SET n:{}, n += $attributes, n.name = $name",
                    entity_type.label()
                ))
                .clause(format!("RETURN {node} AS node"))
                .bind("id", id.as_str())
                .bind("name", name.as_str())
                .bind("attributes", attributes_value(attributes))
                .build(),
            Self::UpdateEntity { id, attributes } => CypherBuilder::new()
                .clause("MATCH (n {id: $id})")
                .clause("SET n += $attributes")
                .clause(format!("RETURN {node} AS node"))
                .bind("id", id.as_str())
                .bind("attributes", attributes_value(attributes))
                .build(),
            Self::DeleteEntity { id } => CypherBuilder::new()
                .clause("MATCH (n {id: $id})")
                .clause("WITH n, n.id AS id")
                .clause("DETACH DELETE n")
                .clause("RETURN id")
                .bind("id", id.as_str())
                .build(),
            Self::CreateRelation {
                source_id,
                target_id,
                relation_type,
                attributes,
            } => CypherBuilder::new()
                .clause("MATCH (source {id: $source_id}), (target {id: $target_id})")
                .clause(format!(
                    "CREATE (source)-[r:{}]->(target)",
                    relation_type.cypher_identifier()
                ))
                .clause("SET r += $attributes")
                .clause(format!("RETURN {} AS relation", relation_projection("r")))
                .bind("source_id", source_id.as_str())
                .bind("target_id", target_id.as_str())
                .bind("attributes", attributes_value(attributes))
                .build(),
            Self::DeleteRelation {
                source_id,
                target_id,
                relation_type,
            } => CypherBuilder::new()
                .clause("MATCH (source {id: $source_id})-[r]->(target {id: $target_id})")
                .filter(
                    Predicate::RelationTypeIs { var: "r" },
                    "relation_type",
                    relation_type.as_str(),
                )
                .clause("DELETE r")
                .clause("RETURN count(*) AS deleted")
                .bind("source_id", source_id.as_str())
                .bind("target_id", target_id.as_str())
                .build(),
            Self::EntityById { id } => CypherBuilder::new()
                .clause("MATCH (n {id: $id})")
                .clause(format!("RETURN {node} AS node"))
                .clause("LIMIT 1")
                .bind("id", id.as_str())
                .build(),
            Self::EntityByName { name, entity_type } => CypherBuilder::new()
                .clause("MATCH (n {name: $name})")
                .filter_opt(
                    Predicate::HasLabel { var: "n" },
                    "entity_type",
                    entity_type.map(|t| t.label()),
                )
                .clause(format!("RETURN {node} AS node"))
                .clause("ORDER BY n.id")
                .clause("LIMIT 1")
                .bind("name", name.as_str())
                .build(),
            Self::Related {
                id,
                direction,
                relation_type,
                entity_type,
                limit,
            } => CypherBuilder::new()
                .clause(match direction {
                    Direction::Outgoing => "MATCH (n {id: $id})-[r]->(m)",
                    Direction::Incoming => "MATCH (n {id: $id})<-[r]-(m)",
                })
                .filter_opt(
                    Predicate::RelationTypeIs { var: "r" },
                    "relation_type",
                    relation_type.as_ref().map(RelationType::as_str),
                )
                .filter_opt(
                    Predicate::HasLabel { var: "m" },
                    "entity_type",
                    entity_type.map(|t| t.label()),
                )
                .clause(format!(
                    "RETURN {} AS entity, type(r) AS relation_type, properties(r) AS relation_attributes",
                    node_projection("m")
                ))
                .clause("LIMIT $limit")
                .bind("id", id.as_str())
                .bind("limit", *limit)
                .build(),
            Self::Search {
                keyword,
                entity_types,
                limit,
            } => CypherBuilder::new()
                .clause("MATCH (n)")
                .filter(Predicate::NameContains { var: "n" }, "keyword", keyword.as_str())
                .filter_opt(
                    Predicate::HasAnyLabel { var: "n" },
                    "entity_types",
                    (!entity_types.is_empty()).then(|| {
                        entity_types
                            .iter()
                            .map(|t| Value::from(t.label()))
                            .collect::<Vec<_>>()
                    }),
                )
                .clause(format!("RETURN {node} AS node"))
                .clause("ORDER BY n.name, n.id")
                .clause("LIMIT $limit")
                .bind("limit", *limit)
                .build(),
            Self::ShortestPath {
                source_id,
                target_id,
                max_depth,
            } => CypherBuilder::new()
                .clause("MATCH (source {id: $source_id}), (target {id: $target_id})")
                .clause(format!(
                    "MATCH p = shortestPath((source)-[*..{}]-(target))",
                    (*max_depth).max(1)
                ))
                .clause(path_return("p"))
                .bind("source_id", source_id.as_str())
                .bind("target_id", target_id.as_str())
                .build(),
            Self::Subgraph {
                id,
                depth,
                relation_types,
                limit,
            } => CypherBuilder::new()
                .clause(format!("MATCH p = (root {{id: $id}})-[*0..{depth}]-(n)"))
                .filter_opt(
                    Predicate::PathRelationTypesIn { path: "p" },
                    "relation_types",
                    relation_types.as_deref().map(type_list),
                )
                .clause(path_return("p"))
                .clause("LIMIT $limit")
                .bind("id", id.as_str())
                .bind("limit", *limit)
                .build(),
            Self::Descendants {
                id,
                depth,
                relation_types,
                limit,
            } => CypherBuilder::new()
                .clause(format!("MATCH p = (root {{id: $id}})-[*0..{depth}]->(n)"))
                .filter_opt(
                    Predicate::PathRelationTypesIn { path: "p" },
                    "relation_types",
                    relation_types.as_deref().map(type_list),
                )
                .clause(path_return("p"))
                .clause("ORDER BY length(p)")
                .clause("LIMIT $limit")
                .bind("id", id.as_str())
                .bind("limit", *limit)
                .build(),
            Self::Suggest { seed_ids, limit } => {
                let seeds: Vec<Value> = seed_ids.iter().map(|id| Value::from(id.as_str())).collect();
                CypherBuilder::new()
                    .clause("MATCH (seed)-[*1..2]-(related)")
                    .filter(Predicate::IdIn { var: "seed" }, "seed_ids", seeds)
                    .condition(Predicate::IdNotIn { var: "related" }, "seed_ids")
                    .clause("WITH related, count(*) AS relevance")
                    .clause("ORDER BY relevance DESC, related.id")
                    .clause("LIMIT $limit")
                    .clause(format!(
                        "RETURN {} AS entity, relevance",
                        node_projection("related")
                    ))
                    .bind("limit", *limit)
                    .build()
            },
        }
    }
}

fn type_list(types: &[RelationType]) -> Vec<Value> {
    types.iter().map(|t| Value::from(t.as_str())).collect()
}

fn path_return(path: &str) -> String {
    format!(
        "RETURN [x IN nodes({path}) | {}] AS nodes, [e IN relationships({path}) | {}] AS relationships",
        node_projection("x"),
        relation_projection("e")
    )
}

fn attributes_value(attributes: &Attributes) -> Value {
    Value::Object(
        attributes
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
    )
}

/// An operation together with its rendered Cypher.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphStatement {
    /// Structured description.
    pub operation: Operation,
    /// Rendered query.
    pub cypher: CypherQuery,
}

impl GraphStatement {
    /// Renders an operation into a statement.
    #[must_use]
    pub fn new(operation: Operation) -> Self {
        let cypher = operation.to_cypher();
        Self { operation, cypher }
    }

    /// Operation name for logs and metrics.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.operation.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn rel(label: &str) -> RelationType {
        RelationType::new(label).unwrap_or_else(|_| unreachable!())
    }

    fn related(relation_type: Option<RelationType>, entity_type: Option<EntityType>) -> CypherQuery {
        Operation::Related {
            id: "e1".to_string(),
            direction: Direction::Outgoing,
            relation_type,
            entity_type,
            limit: 100,
        }
        .to_cypher()
    }

    #[test]
    fn test_builder_joins_conditions_with_and() {
        let query = CypherBuilder::new()
            .clause("MATCH (n)")
            .filter(Predicate::NameContains { var: "n" }, "keyword", "Qi")
            .filter(Predicate::HasLabel { var: "n" }, "label", "Syndrome")
            .clause("RETURN n")
            .build();
        assert_eq!(
            query.text,
            "MATCH (n)\nWHERE n.name CONTAINS $keyword AND $label IN labels(n)\nRETURN n"
        );
        assert_eq!(query.params["keyword"], "Qi");
        assert_eq!(query.params["label"], "Syndrome");
    }

    #[test]
    fn test_builder_without_filters_has_no_where() {
        let query = CypherBuilder::new().clause("MATCH (n)").clause("RETURN n").build();
        assert!(!query.text.contains("WHERE"));
    }

    #[test_case(None, None, &[] ; "no filters")]
    #[test_case(Some("treats"), None, &["type(r) = $relation_type"] ; "relation only")]
    #[test_case(None, Some(EntityType::Herb), &["$entity_type IN labels(m)"] ; "type only")]
    #[test_case(
        Some("treats"),
        Some(EntityType::Herb),
        &["type(r) = $relation_type AND $entity_type IN labels(m)"] ;
        "both filters"
    )]
    fn test_related_filter_composition(
        relation: Option<&str>,
        entity_type: Option<EntityType>,
        expected: &[&str],
    ) {
        let query = related(relation.map(rel), entity_type);
        for fragment in expected {
            assert!(query.text.contains(fragment), "{}", query.text);
        }
        assert_eq!(query.text.contains("WHERE"), !expected.is_empty());
        assert_eq!(query.params.contains_key("relation_type"), relation.is_some());
        assert_eq!(query.params.contains_key("entity_type"), entity_type.is_some());
    }

    #[test]
    fn test_filter_values_stay_out_of_text() {
        let hostile = "x' OR 1=1 //";
        let query = related(Some(rel(hostile)), Some(EntityType::Symptom));
        assert!(!query.text.contains(hostile));
        assert_eq!(query.params["relation_type"], hostile);
        assert_eq!(query.params["entity_type"], "Symptom");

        let search = Operation::Search {
            keyword: "}) DETACH DELETE n //".to_string(),
            entity_types: Vec::new(),
            limit: 10,
        }
        .to_cypher();
        assert!(!search.text.contains("DETACH"));
    }

    #[test]
    fn test_create_relation_quotes_type() {
        let query = Operation::CreateRelation {
            source_id: "a".to_string(),
            target_id: "b".to_string(),
            relation_type: rel("bad`]->() DELETE n //"),
            attributes: Attributes::new(),
        }
        .to_cypher();
        assert!(query.text.contains("[r:`bad``]->() DELETE n //`]"));
        assert_eq!(query.params["source_id"], "a");
    }

    #[test]
    fn test_upsert_uses_enum_label() {
        let query = Operation::UpsertEntity {
            id: "e1".to_string(),
            name: "Qi Deficiency".to_string(),
            entity_type: EntityType::Syndrome,
            attributes: Attributes::new(),
        }
        .to_cypher();
        assert!(query.text.starts_with("MERGE (n {id: $id})"));
        assert!(query.text.contains("SET n:Syndrome"));
        assert_eq!(query.params["name"], "Qi Deficiency");
        assert!(query.params["attributes"].is_object());
    }

    #[test]
    fn test_shortest_path_depth_is_typed_bound() {
        let query = Operation::ShortestPath {
            source_id: "a".to_string(),
            target_id: "b".to_string(),
            max_depth: 4,
        }
        .to_cypher();
        assert!(query.text.contains("shortestPath((source)-[*..4]-(target))"));
    }

    #[test]
    fn test_subgraph_allow_list_is_parameter() {
        let query = Operation::Subgraph {
            id: "root".to_string(),
            depth: 2,
            relation_types: Some(vec![rel("treats"), rel("contains")]),
            limit: 1000,
        }
        .to_cypher();
        assert!(query.text.contains("[*0..2]"));
        assert!(query.text.contains("type(rel) IN $relation_types"));
        assert_eq!(
            query.params["relation_types"],
            serde_json::json!(["treats", "contains"])
        );
    }

    #[test]
    fn test_incoming_related_reverses_arrow() {
        let query = Operation::Related {
            id: "s1".to_string(),
            direction: Direction::Incoming,
            relation_type: None,
            entity_type: None,
            limit: 100,
        };
        assert_eq!(query.name(), "get_incoming_entities");
        assert!(query.to_cypher().text.starts_with("MATCH (n {id: $id})<-[r]-(m)"));
    }

    #[test]
    fn test_entity_by_name_binds_name() {
        let query = Operation::EntityByName {
            name: "Ren Shen' OR 1=1".to_string(),
            entity_type: Some(EntityType::Herb),
        }
        .to_cypher();
        assert!(query.text.starts_with("MATCH (n {name: $name})"));
        assert!(query.text.contains("$entity_type IN labels(n)"));
        assert!(query.text.ends_with("ORDER BY n.id\nLIMIT 1"));
        assert!(!query.text.contains("OR 1=1"));
        assert_eq!(query.params["entity_type"], "Herb");
    }

    #[test_case(&[] ; "any label")]
    #[test_case(&[EntityType::Herb] ; "one label")]
    #[test_case(&[EntityType::Herb, EntityType::Formula] ; "several labels")]
    fn test_search_label_allow_list(types: &[EntityType]) {
        let query = Operation::Search {
            keyword: "Qi".to_string(),
            entity_types: types.to_vec(),
            limit: 50,
        }
        .to_cypher();
        assert_eq!(
            query.text.contains("ANY(label IN labels(n) WHERE label IN $entity_types)"),
            !types.is_empty()
        );
        if !types.is_empty() {
            let labels: Vec<&str> = types.iter().map(|t| t.label()).collect();
            assert_eq!(query.params["entity_types"], serde_json::json!(labels));
        }
    }

    #[test]
    fn test_descendants_follow_edge_direction() {
        let query = Operation::Descendants {
            id: "root".to_string(),
            depth: 3,
            relation_types: Some(vec![rel("contains")]),
            limit: 1000,
        }
        .to_cypher();
        assert!(query.text.contains("(root {id: $id})-[*0..3]->(n)"));
        assert_eq!(query.params["relation_types"], serde_json::json!(["contains"]));
    }

    #[test]
    fn test_suggest_reuses_seed_parameter() {
        let query = Operation::Suggest {
            seed_ids: vec!["e1".to_string(), "e2".to_string()],
            limit: 10,
        }
        .to_cypher();
        assert!(query.text.contains("WHERE seed.id IN $seed_ids AND NOT related.id IN $seed_ids"));
        assert!(query.text.contains("ORDER BY relevance DESC, related.id"));
        assert_eq!(query.params["seed_ids"], serde_json::json!(["e1", "e2"]));
        assert_eq!(query.params["limit"], 10);
    }

    #[test]
    fn test_write_classification() {
        assert!(Operation::DeleteEntity { id: "x".to_string() }.is_write());
        assert!(!Operation::Ping.is_write());
        assert_eq!(GraphStatement::new(Operation::Ping).name(), "ping");
    }
}
