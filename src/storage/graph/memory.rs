//! In-process graph engine.
//!
//! Interprets [`Operation`]s against an in-memory property graph and
//! returns records with the same columns the Cypher statements produce.
//! Used for tests, local development, and as the fallback backend when no
//! graph database is configured.
//!
//! Fault injection ([`MemoryGraph::set_offline`],
//! [`MemoryGraph::inject_failures`]) simulates an unreachable or flaky
//! backend.

// Allow significant_drop_tightening - locks are held for the whole operation.
#![allow(clippy::significant_drop_tightening)]

use super::cypher::{GraphStatement, Operation};
use super::{GraphConnection, Record};
use crate::models::graph::{Attributes, Direction, RelationType};
use crate::storage::pool::ManageConnection;
use crate::{Error, Result};
use serde_json::{Map, Value, json};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

const BACKEND: &str = "memory_graph";

#[derive(Debug, Clone)]
struct NodeData {
    labels: BTreeSet<String>,
    /// Includes `id` and `name`.
    properties: Map<String, Value>,
}

#[derive(Debug, Clone)]
struct EdgeData {
    source: String,
    target: String,
    relation_type: String,
    properties: Map<String, Value>,
}

impl EdgeData {
    fn touches(&self, id: &str) -> bool {
        self.source == id || self.target == id
    }

    /// `(origin, neighbour)` when the edge is walked in `direction`.
    fn ends(&self, direction: Direction) -> (&str, &str) {
        match direction {
            Direction::Outgoing => (&self.source, &self.target),
            Direction::Incoming => (&self.target, &self.source),
        }
    }

    fn other_end(&self, id: &str) -> &str {
        if self.source == id {
            &self.target
        } else {
            &self.source
        }
    }
}

#[derive(Debug, Default)]
struct GraphData {
    nodes: HashMap<String, NodeData>,
    edges: Vec<EdgeData>,
}

#[derive(Debug, Default)]
struct Shared {
    data: RwLock<GraphData>,
    offline: AtomicBool,
    pending_failures: AtomicU32,
    executions: AtomicUsize,
}

/// Breadth-first visit record.
struct Visit {
    depth: u32,
    parent: Option<(String, usize)>,
}

/// Shared handle to an in-memory property graph.
///
/// Clones refer to the same graph.
#[derive(Debug, Clone, Default)]
pub struct MemoryGraph {
    shared: Arc<Shared>,
}

impl MemoryGraph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.read().nodes.len()
    }

    /// Returns the number of edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.read().edges.len()
    }

    /// Returns the labels of a node, sorted.
    #[must_use]
    pub fn labels_of(&self, id: &str) -> Vec<String> {
        self.read()
            .nodes
            .get(id)
            .map(|n| n.labels.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Inserts a node with arbitrary labels, bypassing the typed model.
    pub fn insert_raw_node(&self, id: &str, labels: &[&str], mut properties: Map<String, Value>) {
        properties.insert("id".to_string(), Value::from(id));
        self.write().nodes.insert(
            id.to_string(),
            NodeData {
                labels: labels.iter().map(|l| (*l).to_string()).collect(),
                properties,
            },
        );
    }

    /// Removes all nodes and edges.
    pub fn clear(&self) {
        let mut data = self.write();
        data.nodes.clear();
        data.edges.clear();
    }

    /// Makes every call fail with a connection error while `offline` is set.
    pub fn set_offline(&self, offline: bool) {
        self.shared.offline.store(offline, Ordering::SeqCst);
    }

    /// Makes the next `count` executions fail with a connection error.
    pub fn inject_failures(&self, count: u32) {
        self.shared.pending_failures.store(count, Ordering::SeqCst);
    }

    /// Number of operations executed so far, including failed ones.
    #[must_use]
    pub fn executions(&self) -> usize {
        self.shared.executions.load(Ordering::SeqCst)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, GraphData> {
        self.shared.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, GraphData> {
        self.shared
            .data
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn check_reachable(&self) -> Result<()> {
        if self.shared.offline.load(Ordering::SeqCst) {
            return Err(Error::Connection {
                backend: BACKEND.to_string(),
                cause: "graph is offline".to_string(),
            });
        }
        let injected = self
            .shared
            .pending_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if injected.is_ok() {
            return Err(Error::Connection {
                backend: BACKEND.to_string(),
                cause: "injected failure".to_string(),
            });
        }
        Ok(())
    }

    /// Executes one operation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] when offline or when a failure was injected.
    pub fn execute(&self, operation: &Operation) -> Result<Vec<Record>> {
        self.shared.executions.fetch_add(1, Ordering::SeqCst);
        self.check_reachable()?;

        let rows = match operation {
            Operation::Ping => vec![json!({ "ok": 1 })],
            Operation::UpsertEntity {
                id,
                name,
                entity_type,
                attributes,
            } => {
                let mut data = self.write();
                let node = data.nodes.entry(id.clone()).or_insert_with(|| NodeData {
                    labels: BTreeSet::new(),
                    properties: Map::from_iter([("id".to_string(), Value::from(id.as_str()))]),
                });
                node.labels.insert(entity_type.label().to_string());
                merge_properties(&mut node.properties, attributes);
                node.properties
                    .insert("name".to_string(), Value::from(name.as_str()));
                vec![json!({ "node": node_value(node) })]
            },
            Operation::UpdateEntity { id, attributes } => {
                let mut data = self.write();
                data.nodes
                    .get_mut(id)
                    .map(|node| {
                        merge_properties(&mut node.properties, attributes);
                        json!({ "node": node_value(node) })
                    })
                    .into_iter()
                    .collect()
            },
            Operation::DeleteEntity { id } => {
                let mut data = self.write();
                if data.nodes.remove(id).is_some() {
                    data.edges.retain(|e| !e.touches(id));
                    vec![json!({ "id": id })]
                } else {
                    Vec::new()
                }
            },
            Operation::CreateRelation {
                source_id,
                target_id,
                relation_type,
                attributes,
            } => {
                let mut data = self.write();
                if data.nodes.contains_key(source_id) && data.nodes.contains_key(target_id) {
                    let edge = EdgeData {
                        source: source_id.clone(),
                        target: target_id.clone(),
                        relation_type: relation_type.as_str().to_string(),
                        properties: attributes
                            .iter()
                            .map(|(k, v)| (k.clone(), v.clone()))
                            .collect(),
                    };
                    let row = json!({ "relation": edge_value(&edge) });
                    data.edges.push(edge);
                    vec![row]
                } else {
                    Vec::new()
                }
            },
            Operation::DeleteRelation {
                source_id,
                target_id,
                relation_type,
            } => {
                let mut data = self.write();
                let before = data.edges.len();
                data.edges.retain(|e| {
                    !(e.source == *source_id
                        && e.target == *target_id
                        && e.relation_type == relation_type.as_str())
                });
                vec![json!({ "deleted": before - data.edges.len() })]
            },
            Operation::EntityById { id } => self
                .read()
                .nodes
                .get(id)
                .map(|node| json!({ "node": node_value(node) }))
                .into_iter()
                .collect(),
            Operation::EntityByName { name, entity_type } => {
                let data = self.read();
                data.nodes
                    .iter()
                    .filter(|(_, node)| {
                        node.properties.get("name").and_then(Value::as_str) == Some(name.as_str())
                    })
                    .filter(|(_, node)| {
                        entity_type.is_none_or(|t| node.labels.contains(t.label()))
                    })
                    .min_by(|a, b| a.0.cmp(b.0))
                    .map(|(_, node)| json!({ "node": node_value(node) }))
                    .into_iter()
                    .collect()
            },
            Operation::Related {
                id,
                direction,
                relation_type,
                entity_type,
                limit,
            } => {
                let data = self.read();
                data.edges
                    .iter()
                    .filter(|e| e.ends(*direction).0 == id.as_str())
                    .filter(|e| {
                        relation_type
                            .as_ref()
                            .is_none_or(|t| e.relation_type == t.as_str())
                    })
                    .filter_map(|e| data.nodes.get(e.ends(*direction).1).map(|node| (e, node)))
                    .filter(|(_, node)| {
                        entity_type.is_none_or(|t| node.labels.contains(t.label()))
                    })
                    .take(*limit)
                    .map(|(e, node)| {
                        json!({
                            "entity": node_value(node),
                            "relation_type": e.relation_type,
                            "relation_attributes": e.properties,
                        })
                    })
                    .collect()
            },
            Operation::Search {
                keyword,
                entity_types,
                limit,
            } => {
                let data = self.read();
                let mut hits: Vec<(&str, &str, &NodeData)> = data
                    .nodes
                    .iter()
                    .filter_map(|(id, node)| {
                        let name = node.properties.get("name").and_then(Value::as_str)?;
                        Some((name, id.as_str(), node))
                    })
                    .filter(|(name, _, _)| name.contains(keyword.as_str()))
                    .filter(|(_, _, node)| {
                        entity_types.is_empty()
                            || entity_types.iter().any(|t| node.labels.contains(t.label()))
                    })
                    .collect();
                hits.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));
                hits.into_iter()
                    .take(*limit)
                    .map(|(_, _, node)| json!({ "node": node_value(node) }))
                    .collect()
            },
            Operation::ShortestPath {
                source_id,
                target_id,
                max_depth,
            } => {
                let data = self.read();
                if !data.nodes.contains_key(source_id) || !data.nodes.contains_key(target_id) {
                    Vec::new()
                } else {
                    let visits = bfs(&data, source_id, *max_depth, |_| true);
                    if visits.contains_key(target_id) {
                        let (nodes, edges) = trace(&visits, target_id);
                        vec![path_row(&data, &nodes, &edges)]
                    } else {
                        Vec::new()
                    }
                }
            },
            Operation::Subgraph {
                id,
                depth,
                relation_types,
                limit,
            } => {
                let data = self.read();
                subgraph_rows(&data, id, *depth, relation_types.as_deref(), *limit)
            },
            Operation::Descendants {
                id,
                depth,
                relation_types,
                limit,
            } => {
                let data = self.read();
                descendant_rows(&data, id, *depth, relation_types.as_deref(), *limit)
            },
            Operation::Suggest { seed_ids, limit } => {
                let data = self.read();
                suggestion_rows(&data, seed_ids, *limit)
            },
        };

        Ok(rows.into_iter().filter_map(into_record).collect())
    }
}

fn into_record(value: Value) -> Option<Record> {
    match value {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

fn merge_properties(properties: &mut Map<String, Value>, attributes: &Attributes) {
    for (key, value) in attributes {
        properties.insert(key.clone(), value.clone());
    }
}

fn node_value(node: &NodeData) -> Value {
    json!({
        "id": node.properties.get("id").cloned().unwrap_or(Value::Null),
        "name": node.properties.get("name").cloned().unwrap_or(Value::Null),
        "labels": node.labels,
        "properties": node.properties,
    })
}

fn edge_value(edge: &EdgeData) -> Value {
    json!({
        "type": edge.relation_type,
        "source_id": edge.source,
        "target_id": edge.target,
        "properties": edge.properties,
    })
}

/// Undirected breadth-first search bounded by `max_depth` hops.
fn bfs<F>(data: &GraphData, start: &str, max_depth: u32, allowed: F) -> HashMap<String, Visit>
where
    F: Fn(&EdgeData) -> bool,
{
    let mut visits = HashMap::from([(
        start.to_string(),
        Visit {
            depth: 0,
            parent: None,
        },
    )]);
    let mut queue = VecDeque::from([start.to_string()]);

    while let Some(current) = queue.pop_front() {
        let depth = visits.get(&current).map_or(0, |v| v.depth);
        if depth >= max_depth {
            continue;
        }
        for (idx, edge) in data.edges.iter().enumerate() {
            if !edge.touches(&current) || !allowed(edge) {
                continue;
            }
            let next = edge.other_end(&current);
            if visits.contains_key(next) || !data.nodes.contains_key(next) {
                continue;
            }
            visits.insert(
                next.to_string(),
                Visit {
                    depth: depth + 1,
                    parent: Some((current.clone(), idx)),
                },
            );
            queue.push_back(next.to_string());
        }
    }
    visits
}

/// Walks parent links back to the search origin.
fn trace(visits: &HashMap<String, Visit>, target: &str) -> (Vec<String>, Vec<usize>) {
    let mut nodes = vec![target.to_string()];
    let mut edges = Vec::new();
    let mut cursor = target.to_string();
    while let Some((parent, edge)) = visits.get(&cursor).and_then(|v| v.parent.clone()) {
        nodes.push(parent.clone());
        edges.push(edge);
        cursor = parent;
    }
    nodes.reverse();
    edges.reverse();
    (nodes, edges)
}

fn path_row(data: &GraphData, nodes: &[String], edges: &[usize]) -> Value {
    let nodes: Vec<Value> = nodes
        .iter()
        .filter_map(|id| data.nodes.get(id).map(node_value))
        .collect();
    let relationships: Vec<Value> = edges
        .iter()
        .filter_map(|idx| data.edges.get(*idx).map(edge_value))
        .collect();
    json!({ "nodes": nodes, "relationships": relationships })
}

/// One row for the root, then one row per reachable allowed edge: the
/// shortest path to its nearer endpoint followed by the edge itself.
fn subgraph_rows(
    data: &GraphData,
    root: &str,
    depth: u32,
    relation_types: Option<&[RelationType]>,
    limit: usize,
) -> Vec<Value> {
    if !data.nodes.contains_key(root) || limit == 0 {
        return Vec::new();
    }
    let allowed = |edge: &EdgeData| {
        relation_types.is_none_or(|types| types.iter().any(|t| t.as_str() == edge.relation_type))
    };
    let visits = bfs(data, root, depth, allowed);

    let mut rows = vec![path_row(data, &[root.to_string()], &[])];
    for (idx, edge) in data.edges.iter().enumerate() {
        if rows.len() >= limit {
            break;
        }
        if !allowed(edge) {
            continue;
        }
        let near = match (visits.get(&edge.source), visits.get(&edge.target)) {
            (Some(s), Some(t)) if t.depth < s.depth => &edge.target,
            (Some(_), _) => &edge.source,
            (None, Some(_)) => &edge.target,
            (None, None) => continue,
        };
        let near_depth = visits.get(near).map_or(u32::MAX, |v| v.depth);
        if near_depth >= depth {
            continue;
        }
        let far = edge.other_end(near).to_string();
        let (mut nodes, mut edges) = trace(&visits, near);
        nodes.push(far);
        edges.push(idx);
        rows.push(path_row(data, &nodes, &edges));
    }
    rows
}

fn type_allowed(relation_types: Option<&[RelationType]>, edge: &EdgeData) -> bool {
    relation_types.is_none_or(|types| types.iter().any(|t| t.as_str() == edge.relation_type))
}

/// Directed simple paths from `root`, shortest first, the root itself
/// included as a zero-length path.
fn descendant_rows(
    data: &GraphData,
    root: &str,
    depth: u32,
    relation_types: Option<&[RelationType]>,
    limit: usize,
) -> Vec<Value> {
    if !data.nodes.contains_key(root) {
        return Vec::new();
    }
    let max_hops = usize::try_from(depth).unwrap_or(usize::MAX);
    let mut rows = Vec::new();
    let mut queue = VecDeque::from([(vec![root.to_string()], Vec::<usize>::new())]);

    while let Some((nodes, edges)) = queue.pop_front() {
        if rows.len() >= limit {
            break;
        }
        rows.push(path_row(data, &nodes, &edges));
        if edges.len() >= max_hops {
            continue;
        }
        let Some(last) = nodes.last() else {
            continue;
        };
        for (idx, edge) in data.edges.iter().enumerate() {
            if edge.source != *last
                || !type_allowed(relation_types, edge)
                || nodes.contains(&edge.target)
                || !data.nodes.contains_key(&edge.target)
            {
                continue;
            }
            let mut next_nodes = nodes.clone();
            next_nodes.push(edge.target.clone());
            let mut next_edges = edges.clone();
            next_edges.push(idx);
            queue.push_back((next_nodes, next_edges));
        }
    }
    rows
}

/// Counts one- and two-hop undirected paths from the seeds to every other
/// node. A path never reuses an edge.
fn suggestion_rows(data: &GraphData, seed_ids: &[String], limit: usize) -> Vec<Value> {
    let is_seed = |id: &str| seed_ids.iter().any(|s| s == id);
    let mut relevance: HashMap<&str, u64> = HashMap::new();

    for seed in seed_ids.iter().filter(|s| data.nodes.contains_key(s.as_str())) {
        for (first_idx, first) in data.edges.iter().enumerate() {
            if !first.touches(seed) {
                continue;
            }
            let middle = first.other_end(seed);
            if !data.nodes.contains_key(middle) {
                continue;
            }
            if !is_seed(middle) {
                *relevance.entry(middle).or_default() += 1;
            }
            for (second_idx, second) in data.edges.iter().enumerate() {
                if second_idx == first_idx || !second.touches(middle) {
                    continue;
                }
                let end = second.other_end(middle);
                if !is_seed(end) && data.nodes.contains_key(end) {
                    *relevance.entry(end).or_default() += 1;
                }
            }
        }
    }

    let mut ranked: Vec<(&str, u64)> = relevance.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    ranked
        .into_iter()
        .take(limit)
        .filter_map(|(id, score)| {
            data.nodes
                .get(id)
                .map(|node| json!({ "entity": node_value(node), "relevance": score }))
        })
        .collect()
}

/// Connection manager for [`MemoryGraph`].
#[derive(Debug, Clone)]
pub struct MemoryGraphManager {
    graph: MemoryGraph,
}

impl MemoryGraphManager {
    /// Creates a manager handing out connections to `graph`.
    #[must_use]
    pub const fn new(graph: MemoryGraph) -> Self {
        Self { graph }
    }

    /// Returns the underlying graph.
    #[must_use]
    pub const fn graph(&self) -> &MemoryGraph {
        &self.graph
    }
}

/// A connection to a [`MemoryGraph`].
#[derive(Debug)]
pub struct MemoryGraphConnection {
    graph: MemoryGraph,
}

impl GraphConnection for MemoryGraphConnection {
    fn execute(&mut self, statement: &GraphStatement) -> Result<Vec<Record>> {
        self.graph.execute(&statement.operation)
    }
}

impl ManageConnection for MemoryGraphManager {
    type Connection = MemoryGraphConnection;

    fn connect(&self) -> Result<Self::Connection> {
        if self.graph.shared.offline.load(Ordering::SeqCst) {
            return Err(Error::Connection {
                backend: BACKEND.to_string(),
                cause: "graph is offline".to_string(),
            });
        }
        Ok(MemoryGraphConnection {
            graph: self.graph.clone(),
        })
    }

    fn validate(&self, conn: &mut Self::Connection) -> Result<()> {
        conn.execute(&GraphStatement::new(Operation::Ping)).map(|_| ())
    }

    fn backend_name(&self) -> &'static str {
        BACKEND
    }
}
