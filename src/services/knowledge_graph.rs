//! Knowledge graph client.
//!
//! [`KnowledgeGraphClient`] turns typed calls into [`GraphStatement`]s, runs
//! them through the retry policy on a pooled connection, and maps the raw
//! records back into [`Entity`], [`RelatedEntity`], [`PathStep`],
//! [`Subgraph`], [`HierarchyNode`] and [`Suggestion`] values.
//!
//! # Failure semantics
//!
//! Public operations never return an error. Failures are logged with the
//! operation name, error kind and the ids involved, counted in
//! `graph_query_failures_total{operation, kind}`, and the call degrades to
//! `false`, `None` or an empty collection. Degraded results are not cached.
//!
//! # Caching
//!
//! With [`KnowledgeGraphClient::with_cache`], reads go through
//! [`CacheManager::get_or_set`] keyed by the operation and its arguments,
//! and every successful write invalidates the cache namespace. A fill that
//! raced the write is returned to its caller but never stored.
//!
//! # Truncation
//!
//! Path-expanding reads stop at `subgraph_path_limit` rows and
//! `get_subgraph` keeps at most `subgraph_max_nodes` nodes. A result cut
//! short by either bound is logged at warn and, for subgraphs, flagged
//! with [`Subgraph::truncated`].

use crate::models::graph::{
    Attributes, Direction, Entity, EntityRelations, EntityType, HierarchyNode, PathStep,
    RESERVED_KEYS, RelatedEntity, Relation, RelationType, Subgraph, SubgraphBuilder, Suggestion,
    pair_path,
};
use crate::services::cache::{CacheKey, CacheManager};
use crate::storage::graph::{GraphConnection, GraphStatement, Operation, Record};
use crate::storage::pool::{ConnectionPool, ManageConnection};
use crate::storage::retry::{Idempotency, RetryPolicy};
use crate::{Error, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Limits and defaults for graph queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphClientConfig {
    /// Maximum rows returned by `search_entities`.
    pub search_limit: usize,
    /// Maximum rows returned by `get_related_entities`.
    pub related_limit: usize,
    /// Maximum paths expanded by `get_subgraph` and `get_knowledge_hierarchy`.
    pub subgraph_path_limit: usize,
    /// Maximum distinct nodes kept by `get_subgraph`.
    pub subgraph_max_nodes: usize,
    /// Hop bound used when `get_shortest_path` is given no depth.
    pub default_max_depth: u32,
    /// TTL for cached reads; `None` uses the cache manager's default.
    pub cache_ttl: Option<Duration>,
}

impl Default for GraphClientConfig {
    fn default() -> Self {
        Self {
            search_limit: 50,
            related_limit: 100,
            subgraph_path_limit: 1000,
            subgraph_max_nodes: 100,
            default_max_depth: 5,
            cache_ttl: None,
        }
    }
}

impl GraphClientConfig {
    /// Loads the config from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Applies `LINGSHU_GRAPH_*` environment variable overrides.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(v) = std::env::var("LINGSHU_GRAPH_SEARCH_LIMIT")
            && let Ok(parsed) = v.parse::<usize>()
        {
            self.search_limit = parsed;
        }
        if let Ok(v) = std::env::var("LINGSHU_GRAPH_RELATED_LIMIT")
            && let Ok(parsed) = v.parse::<usize>()
        {
            self.related_limit = parsed;
        }
        if let Ok(v) = std::env::var("LINGSHU_GRAPH_SUBGRAPH_PATH_LIMIT")
            && let Ok(parsed) = v.parse::<usize>()
        {
            self.subgraph_path_limit = parsed;
        }
        if let Ok(v) = std::env::var("LINGSHU_GRAPH_SUBGRAPH_MAX_NODES")
            && let Ok(parsed) = v.parse::<usize>()
        {
            self.subgraph_max_nodes = parsed.max(1);
        }
        if let Ok(v) = std::env::var("LINGSHU_GRAPH_MAX_DEPTH")
            && let Ok(parsed) = v.parse::<u32>()
        {
            self.default_max_depth = parsed;
        }
        if let Ok(v) = std::env::var("LINGSHU_GRAPH_CACHE_TTL_SECS")
            && let Ok(parsed) = v.parse::<u64>()
        {
            self.cache_ttl = Some(Duration::from_secs(parsed));
        }
        self
    }

    /// Sets the search row limit.
    #[must_use]
    pub const fn with_search_limit(mut self, limit: usize) -> Self {
        self.search_limit = limit;
        self
    }

    /// Sets the related-entities row limit.
    #[must_use]
    pub const fn with_related_limit(mut self, limit: usize) -> Self {
        self.related_limit = limit;
        self
    }

    /// Sets the subgraph path limit.
    #[must_use]
    pub const fn with_subgraph_path_limit(mut self, limit: usize) -> Self {
        self.subgraph_path_limit = limit;
        self
    }

    /// Sets the subgraph node cap (at least 1).
    #[must_use]
    pub const fn with_subgraph_max_nodes(mut self, max_nodes: usize) -> Self {
        self.subgraph_max_nodes = if max_nodes == 0 { 1 } else { max_nodes };
        self
    }

    /// Sets the default shortest-path hop bound.
    #[must_use]
    pub const fn with_default_max_depth(mut self, depth: u32) -> Self {
        self.default_max_depth = depth;
        self
    }
}

/// Typed client for the TCM knowledge graph.
pub struct KnowledgeGraphClient<M>
where
    M: ManageConnection,
    M::Connection: GraphConnection,
{
    pool: Arc<ConnectionPool<M>>,
    retry: RetryPolicy,
    config: GraphClientConfig,
    cache: Option<Arc<CacheManager>>,
}

impl<M> KnowledgeGraphClient<M>
where
    M: ManageConnection,
    M::Connection: GraphConnection,
{
    /// Creates a client with default limits and no cache.
    #[must_use]
    pub fn new(pool: Arc<ConnectionPool<M>>, retry: RetryPolicy) -> Self {
        Self {
            pool,
            retry,
            config: GraphClientConfig::default(),
            cache: None,
        }
    }

    /// Replaces the query limits.
    #[must_use]
    pub fn with_config(mut self, config: GraphClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Routes reads through `cache`; `ttl` overrides the configured cache TTL.
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<CacheManager>, ttl: Option<Duration>) -> Self {
        self.cache = Some(cache);
        if ttl.is_some() {
            self.config.cache_ttl = ttl;
        }
        self
    }

    /// Returns the connection pool.
    #[must_use]
    pub const fn pool(&self) -> &Arc<ConnectionPool<M>> {
        &self.pool
    }

    /// Returns the query limits.
    #[must_use]
    pub const fn config(&self) -> &GraphClientConfig {
        &self.config
    }

    /// Returns true if the backend answers a ping.
    pub fn health_check(&self) -> bool {
        self.pool.health_check()
    }

    // =========================================================================
    // Execution
    // =========================================================================

    fn execute(&self, operation: Operation, idempotency: Idempotency) -> Result<Vec<Record>> {
        let statement = GraphStatement::new(operation);
        let name = statement.name();
        self.retry.run(name, idempotency, || {
            let mut conn = self.pool.acquire()?;
            let result = conn.execute(&statement);
            if let Err(err) = &result
                && err.is_retryable()
            {
                conn.mark_broken();
            }
            result
        })
    }

    fn report(operation: &'static str, subject: &str, err: &Error) {
        tracing::warn!(
            operation,
            error_kind = err.kind(),
            ids = subject,
            error = %err,
            "Graph operation failed; returning degraded result"
        );
        metrics::counter!(
            "graph_query_failures_total",
            "operation" => operation,
            "kind" => err.kind()
        )
        .increment(1);
    }

    fn write(&self, operation: Operation, idempotency: Idempotency, subject: &str) -> Option<Vec<Record>> {
        let name = operation.name();
        match self.execute(operation, idempotency) {
            Ok(rows) => {
                if let Some(cache) = &self.cache {
                    cache.invalidate(None);
                }
                Some(rows)
            },
            Err(err) => {
                Self::report(name, subject, &err);
                None
            },
        }
    }

    fn read<T, F>(&self, operation: &'static str, subject: &str, key: &CacheKey, fallback: T, query: F) -> T
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<T>,
    {
        let result = match &self.cache {
            Some(cache) => cache.get_or_set(
                &format!("{operation}:{}", key.build()),
                query,
                self.config.cache_ttl,
            ),
            None => query(),
        };
        result.unwrap_or_else(|err| {
            Self::report(operation, subject, &err);
            fallback
        })
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Creates the entity, or updates it in place if the id already exists.
    ///
    /// Returns true if exactly one node was written.
    pub fn create_entity(&self, entity: &Entity) -> bool {
        let operation = Operation::UpsertEntity {
            id: entity.id.clone(),
            name: entity.name.clone(),
            entity_type: entity.entity_type,
            attributes: strip_reserved(&entity.attributes),
        };
        self.write(operation, Idempotency::Idempotent, &entity.id)
            .is_some_and(|rows| rows.len() == 1)
    }

    /// Merges `attributes` into an existing entity.
    ///
    /// Returns false if the entity does not exist.
    pub fn update_entity(&self, id: &str, attributes: &Attributes) -> bool {
        let operation = Operation::UpdateEntity {
            id: id.to_string(),
            attributes: strip_reserved(attributes),
        };
        self.write(operation, Idempotency::Idempotent, id)
            .is_some_and(|rows| rows.len() == 1)
    }

    /// Deletes an entity and every relation touching it.
    pub fn delete_entity(&self, id: &str) -> bool {
        let operation = Operation::DeleteEntity { id: id.to_string() };
        self.write(operation, Idempotency::Idempotent, id)
            .is_some_and(|rows| rows.len() == 1)
    }

    /// Creates a directed relation between two existing entities.
    ///
    /// Never retried, so a transient failure cannot create a duplicate edge.
    /// Returns false if either endpoint is missing.
    pub fn create_relation(&self, relation: &Relation) -> bool {
        let subject = format!("{}->{}", relation.source_id, relation.target_id);
        let operation = Operation::CreateRelation {
            source_id: relation.source_id.clone(),
            target_id: relation.target_id.clone(),
            relation_type: relation.relation_type.clone(),
            attributes: relation.attributes.clone(),
        };
        self.write(operation, Idempotency::NonIdempotent, &subject)
            .is_some_and(|rows| rows.len() == 1)
    }

    /// Deletes every `relation_type` edge from `source_id` to `target_id`.
    ///
    /// Returns the number of edges removed.
    pub fn delete_relation(
        &self,
        source_id: &str,
        target_id: &str,
        relation_type: &RelationType,
    ) -> usize {
        let subject = format!("{source_id}->{target_id}");
        let operation = Operation::DeleteRelation {
            source_id: source_id.to_string(),
            target_id: target_id.to_string(),
            relation_type: relation_type.clone(),
        };
        self.write(operation, Idempotency::Idempotent, &subject)
            .and_then(|rows| {
                rows.first()
                    .and_then(|row| row.get("deleted"))
                    .and_then(Value::as_u64)
            })
            .map_or(0, |n| usize::try_from(n).unwrap_or(usize::MAX))
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Fetches an entity by id.
    pub fn get_entity_by_id(&self, id: &str) -> Option<Entity> {
        let key = CacheKey::new().arg(id);
        self.read("get_entity_by_id", id, &key, None, || {
            let rows = self.execute(
                Operation::EntityById { id: id.to_string() },
                Idempotency::Idempotent,
            )?;
            match rows.first() {
                Some(row) => Ok(entity_from_value(column(row, "node")?)),
                None => Ok(None),
            }
        })
    }

    /// Fetches the first entity named exactly `name`, lowest id first,
    /// optionally restricted to one entity type.
    pub fn get_entity_by_name(&self, name: &str, entity_type: Option<EntityType>) -> Option<Entity> {
        let key = CacheKey::new().arg(name).kwarg("entity_type", &entity_type);
        self.read("get_entity_by_name", name, &key, None, || {
            let rows = self.execute(
                Operation::EntityByName {
                    name: name.to_string(),
                    entity_type,
                },
                Idempotency::Idempotent,
            )?;
            match rows.first() {
                Some(row) => Ok(entity_from_value(column(row, "node")?)),
                None => Ok(None),
            }
        })
    }

    /// Outgoing one-hop neighbours of `id`, optionally filtered by edge type
    /// and neighbour type.
    pub fn get_related_entities(
        &self,
        id: &str,
        relation_type: Option<&RelationType>,
        entity_type: Option<EntityType>,
    ) -> Vec<RelatedEntity> {
        self.neighbours(id, Direction::Outgoing, relation_type, entity_type)
    }

    /// Entities with an edge pointing at `id`, optionally filtered by edge
    /// type and neighbour type.
    pub fn get_incoming_entities(
        &self,
        id: &str,
        relation_type: Option<&RelationType>,
        entity_type: Option<EntityType>,
    ) -> Vec<RelatedEntity> {
        self.neighbours(id, Direction::Incoming, relation_type, entity_type)
    }

    /// Every one-hop neighbour of `id`, split by edge direction.
    pub fn get_entity_relations(&self, id: &str) -> EntityRelations {
        EntityRelations {
            outgoing: self.get_related_entities(id, None, None),
            incoming: self.get_incoming_entities(id, None, None),
        }
    }

    fn neighbours(
        &self,
        id: &str,
        direction: Direction,
        relation_type: Option<&RelationType>,
        entity_type: Option<EntityType>,
    ) -> Vec<RelatedEntity> {
        let operation = Operation::Related {
            id: id.to_string(),
            direction,
            relation_type: relation_type.cloned(),
            entity_type,
            limit: self.config.related_limit,
        };
        let name = operation.name();
        let key = CacheKey::new()
            .arg(id)
            .kwarg("relation_type", &relation_type)
            .kwarg("entity_type", &entity_type);
        self.read(name, id, &key, Vec::new(), || {
            let rows = self.execute(operation, Idempotency::Idempotent)?;
            let mut related = Vec::with_capacity(rows.len());
            for row in &rows {
                let Some(entity) = entity_from_value(column(row, "entity")?) else {
                    continue;
                };
                let Some(relation_type) = column(row, "relation_type")?
                    .as_str()
                    .and_then(|t| RelationType::new(t).ok())
                else {
                    tracing::warn!(origin_id = id, entity_id = %entity.id, "Skipping edge with invalid type");
                    continue;
                };
                related.push(RelatedEntity {
                    entity,
                    relation_type,
                    relation_attributes: attributes_from_value(row.get("relation_attributes")),
                });
            }
            Ok(related)
        })
    }

    /// Entities whose name contains `keyword` (case-sensitive), ordered by name.
    pub fn search_entities(&self, keyword: &str, entity_type: Option<EntityType>) -> Vec<Entity> {
        self.search_entities_by_types(keyword, entity_type.as_slice())
    }

    /// Like [`search_entities`](Self::search_entities), matching any of
    /// `entity_types`; an empty list matches every type.
    pub fn search_entities_by_types(&self, keyword: &str, entity_types: &[EntityType]) -> Vec<Entity> {
        let mut types = entity_types.to_vec();
        types.sort_unstable();
        types.dedup();
        let key = CacheKey::new().arg(keyword).kwarg("entity_types", &types);
        self.read("search_entities", keyword, &key, Vec::new(), || {
            let rows = self.execute(
                Operation::Search {
                    keyword: keyword.to_string(),
                    entity_types: types.clone(),
                    limit: self.config.search_limit,
                },
                Idempotency::Idempotent,
            )?;
            let mut entities = Vec::with_capacity(rows.len());
            for row in &rows {
                entities.extend(entity_from_value(column(row, "node")?));
            }
            Ok(entities)
        })
    }

    /// Shortest undirected path within `max_depth` hops.
    ///
    /// `steps[0].relation` is `None`; `steps[i].relation` is the edge
    /// traversed to reach `steps[i].entity`. Empty when no path exists in
    /// the bound. `None` uses the configured default depth.
    pub fn get_shortest_path(
        &self,
        source_id: &str,
        target_id: &str,
        max_depth: Option<u32>,
    ) -> Vec<PathStep> {
        let max_depth = max_depth.unwrap_or(self.config.default_max_depth);
        if source_id == target_id {
            return self
                .get_entity_by_id(source_id)
                .map(|entity| {
                    vec![PathStep {
                        entity,
                        relation: None,
                    }]
                })
                .unwrap_or_default();
        }
        if max_depth == 0 {
            return Vec::new();
        }

        let subject = format!("{source_id}->{target_id}");
        let key = CacheKey::new()
            .arg(source_id)
            .arg(target_id)
            .kwarg("max_depth", &max_depth);
        self.read("get_shortest_path", &subject, &key, Vec::new(), || {
            let rows = self.execute(
                Operation::ShortestPath {
                    source_id: source_id.to_string(),
                    target_id: target_id.to_string(),
                    max_depth,
                },
                Idempotency::Idempotent,
            )?;
            let Some(row) = rows.first() else {
                return Ok(Vec::new());
            };

            let raw_nodes = array_column(row, "nodes")?;
            let nodes: Vec<Entity> = raw_nodes.iter().filter_map(entity_from_value).collect();
            if nodes.len() != raw_nodes.len() {
                return Err(Error::OperationFailed {
                    operation: "get_shortest_path".to_string(),
                    cause: "path contains a node without an entity label".to_string(),
                });
            }
            let raw_relations = array_column(row, "relationships")?;
            let relations: Vec<Relation> =
                raw_relations.iter().filter_map(relation_from_value).collect();
            if relations.len() != raw_relations.len() {
                return Err(Error::OperationFailed {
                    operation: "get_shortest_path".to_string(),
                    cause: "path contains an edge that cannot be decoded".to_string(),
                });
            }
            Ok(pair_path(nodes, relations))
        })
    }

    /// Everything reachable from `id` in at most `depth` undirected hops,
    /// following only the allowed edge types when a list is given.
    ///
    /// Keeps at most `subgraph_max_nodes` nodes and drops the edges of any
    /// node past the cap.
    pub fn get_subgraph(
        &self,
        id: &str,
        depth: u32,
        relation_types: Option<&[RelationType]>,
    ) -> Subgraph {
        let key = CacheKey::new()
            .arg(id)
            .kwarg("depth", &depth)
            .kwarg("relation_types", &relation_types);
        self.read("get_subgraph", id, &key, Subgraph::new(), || {
            let rows = self.execute(
                Operation::Subgraph {
                    id: id.to_string(),
                    depth,
                    relation_types: relation_types.map(<[RelationType]>::to_vec),
                    limit: self.config.subgraph_path_limit,
                },
                Idempotency::Idempotent,
            )?;
            let limit = self.config.subgraph_path_limit;
            let mut builder = SubgraphBuilder::new().with_max_nodes(self.config.subgraph_max_nodes);
            if rows.len() >= limit {
                builder.mark_truncated();
            }
            for row in &rows {
                for node in array_column(row, "nodes")? {
                    if let Some(entity) = entity_from_value(node) {
                        builder.add_node(entity);
                    }
                }
                for edge in array_column(row, "relationships")? {
                    if let Some(relation) = relation_from_value(edge) {
                        builder.add_relation(relation);
                    }
                }
            }
            let subgraph = builder.build();
            if subgraph.truncated {
                tracing::warn!(
                    root_id = id,
                    depth,
                    rows = rows.len(),
                    path_limit = limit,
                    nodes = subgraph.nodes.len(),
                    max_nodes = self.config.subgraph_max_nodes,
                    "Subgraph truncated"
                );
            }
            Ok(subgraph)
        })
    }

    /// The tree of entities reachable from `root_id` over outgoing edges in
    /// at most `max_depth` hops, children ordered by id.
    ///
    /// An entity reachable along several paths appears under each distinct
    /// parent chain; a directed cycle ends the chain that would repeat a
    /// node. `None` if the root does not exist.
    pub fn get_knowledge_hierarchy(
        &self,
        root_id: &str,
        max_depth: u32,
        relation_types: Option<&[RelationType]>,
    ) -> Option<HierarchyNode> {
        let key = CacheKey::new()
            .arg(root_id)
            .kwarg("max_depth", &max_depth)
            .kwarg("relation_types", &relation_types);
        self.read("get_knowledge_hierarchy", root_id, &key, None, || {
            let limit = self.config.subgraph_path_limit;
            let rows = self.execute(
                Operation::Descendants {
                    id: root_id.to_string(),
                    depth: max_depth,
                    relation_types: relation_types.map(<[RelationType]>::to_vec),
                    limit,
                },
                Idempotency::Idempotent,
            )?;
            if rows.len() >= limit {
                tracing::warn!(root_id, max_depth, path_limit = limit, "Knowledge hierarchy truncated");
            }

            let mut root: Option<HierarchyNode> = None;
            for row in &rows {
                let nodes = array_column(row, "nodes")?;
                let edges = array_column(row, "relationships")?;
                let entities: Vec<Entity> = nodes.iter().filter_map(entity_from_value).collect();
                let relations: Vec<Relation> = edges.iter().filter_map(relation_from_value).collect();
                if entities.len() != nodes.len() || relations.len() != edges.len() {
                    continue;
                }
                let mut entities = entities.into_iter();
                let Some(first) = entities.next() else {
                    continue;
                };
                let tree = root.get_or_insert_with(|| HierarchyNode::leaf(first, None));
                tree.insert_chain(entities.zip(relations.into_iter().map(|r| r.relation_type)));
            }
            Ok(root.map(|mut tree| {
                tree.sort();
                tree
            }))
        })
    }

    /// Entities one or two hops from any of `seed_ids`, excluding the seeds,
    /// ranked by how many such paths reach them.
    pub fn suggest_related_content(&self, seed_ids: &[&str], limit: usize) -> Vec<Suggestion> {
        let mut seeds: Vec<String> = seed_ids.iter().map(|id| (*id).to_string()).collect();
        seeds.sort_unstable();
        seeds.dedup();
        if seeds.is_empty() || limit == 0 {
            return Vec::new();
        }
        let subject = seeds.join(",");
        let key = CacheKey::new().arg(&seeds).kwarg("limit", &limit);
        self.read("suggest_related_content", &subject, &key, Vec::new(), || {
            let rows = self.execute(
                Operation::Suggest {
                    seed_ids: seeds.clone(),
                    limit,
                },
                Idempotency::Idempotent,
            )?;
            let mut suggestions = Vec::with_capacity(rows.len());
            for row in &rows {
                let Some(entity) = entity_from_value(column(row, "entity")?) else {
                    continue;
                };
                let relevance = column(row, "relevance")?.as_u64().unwrap_or(0);
                suggestions.push(Suggestion { entity, relevance });
            }
            Ok(suggestions)
        })
    }
}

impl<M> std::fmt::Debug for KnowledgeGraphClient<M>
where
    M: ManageConnection,
    M::Connection: GraphConnection,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KnowledgeGraphClient")
            .field("backend", &self.pool.manager().backend_name())
            .field("retry", &self.retry)
            .field("config", &self.config)
            .field("cached", &self.cache.is_some())
            .finish()
    }
}

// ============================================================================
// Record Mapping
// ============================================================================

fn strip_reserved(attributes: &Attributes) -> Attributes {
    attributes
        .iter()
        .filter(|(k, _)| !RESERVED_KEYS.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

fn column<'a>(record: &'a Record, name: &str) -> Result<&'a Value> {
    record.get(name).ok_or_else(|| Error::OperationFailed {
        operation: "decode_record".to_string(),
        cause: format!("missing column '{name}'"),
    })
}

fn array_column<'a>(record: &'a Record, name: &str) -> Result<&'a Vec<Value>> {
    column(record, name)?
        .as_array()
        .ok_or_else(|| Error::OperationFailed {
            operation: "decode_record".to_string(),
            cause: format!("column '{name}' is not a list"),
        })
}

fn string_field(value: &Value, field: &str) -> Option<String> {
    match value.get(field)? {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn attributes_from_value(value: Option<&Value>) -> Attributes {
    value
        .and_then(Value::as_object)
        .map(|props| {
            props
                .iter()
                .filter(|(k, _)| !RESERVED_KEYS.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        })
        .unwrap_or_default()
}

/// Maps a `{id, name, labels, properties}` projection to an entity.
///
/// Returns `None`, after logging, for nodes with no known entity label.
fn entity_from_value(value: &Value) -> Option<Entity> {
    let id = string_field(value, "id")?;
    let labels: Vec<&str> = value
        .get("labels")
        .and_then(Value::as_array)
        .map(|labels| labels.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    let known: Vec<EntityType> = labels.iter().filter_map(|l| EntityType::from_label(l)).collect();

    let entity_type = match known.as_slice() {
        [] => {
            tracing::warn!(entity_id = %id, labels = ?labels, "Skipping node without an entity label");
            return None;
        },
        [only] => *only,
        [first, ..] => {
            tracing::warn!(
                entity_id = %id,
                labels = ?labels,
                chosen = first.label(),
                "Node carries several entity labels"
            );
            *first
        },
    };

    Some(Entity {
        name: string_field(value, "name").unwrap_or_default(),
        id,
        entity_type,
        attributes: attributes_from_value(value.get("properties")),
    })
}

/// Maps a `{type, source_id, target_id, properties}` projection to a relation.
///
/// Returns `None`, after logging, for edges whose type is not a valid label.
fn relation_from_value(value: &Value) -> Option<Relation> {
    let source_id = string_field(value, "source_id")?;
    let target_id = string_field(value, "target_id")?;
    let raw_type = value.get("type").and_then(Value::as_str).unwrap_or_default();
    let relation_type = match RelationType::new(raw_type) {
        Ok(relation_type) => relation_type,
        Err(err) => {
            tracing::warn!(
                source_id = %source_id,
                target_id = %target_id,
                relation_type = %raw_type.escape_debug(),
                error = %err,
                "Skipping edge with invalid type"
            );
            return None;
        },
    };
    Some(Relation {
        source_id,
        target_id,
        relation_type,
        attributes: value
            .get("properties")
            .and_then(Value::as_object)
            .map(|props| props.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default(),
    })
}
