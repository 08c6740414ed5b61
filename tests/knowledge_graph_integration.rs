//! Knowledge graph client integration tests.
//!
//! Runs the client end to end over the in-process graph: neighbour queries,
//! search, shortest paths, subgraphs on cyclic and diamond-shaped graphs,
//! hierarchies, suggestions, degradation and caching.

// Integration tests use expect/unwrap for simplicity - panics are acceptable in tests
#![allow(clippy::expect_used, clippy::unwrap_used)]

use lingshu::Result;
use lingshu::models::graph::{Attributes, Entity, EntityType, Relation, RelationType};
use lingshu::services::{CacheManager, KnowledgeGraphClient};
use lingshu::storage::graph::{GraphStatement, MemoryGraph, MemoryGraphManager, Operation};
use lingshu::storage::{
    CacheBackend, CacheValue, ConnectionPool, MemoryCacheBackend, PoolConfig, RetryPolicy,
};
use serde_json::{Map, Value, json};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::Duration;

type Client = KnowledgeGraphClient<MemoryGraphManager>;

fn fast_retry() -> RetryPolicy {
    RetryPolicy::default()
        .with_base_delay(Duration::from_millis(1))
        .with_max_delay(Duration::from_millis(4))
}

fn client_for(graph: &MemoryGraph) -> Client {
    let pool = Arc::new(ConnectionPool::new(
        MemoryGraphManager::new(graph.clone()),
        PoolConfig::default().with_timeout(Duration::from_millis(200)),
    ));
    pool.start().expect("memory pool starts");
    KnowledgeGraphClient::new(pool, fast_retry())
}

fn rel(name: &str) -> RelationType {
    RelationType::new(name).expect("valid relation type")
}

/// Seeds a small TCM graph:
///
/// ```text
/// f1 -contains-> h1
/// f1 -treats->   s1 -has_symptom-> y1
///                   -has_symptom-> y2
/// ```
fn seeded() -> (Client, MemoryGraph) {
    let graph = MemoryGraph::new();
    let client = client_for(&graph);

    let entities = [
        Entity::new("s1", "Qi Deficiency", EntityType::Syndrome).with_attribute("organ", "spleen"),
        Entity::new("y1", "Fatigue", EntityType::Symptom),
        Entity::new("y2", "Poor Appetite", EntityType::Symptom),
        Entity::new("h1", "Ginseng", EntityType::Herb).with_attribute("nature", "warm"),
        Entity::new("f1", "Si Jun Zi Tang", EntityType::Formula),
    ];
    for entity in &entities {
        assert!(client.create_entity(entity));
    }

    let relations = [
        Relation::new("f1", "h1", rel("contains")).with_attribute("dose_g", 9),
        Relation::new("f1", "s1", rel("treats")),
        Relation::new("s1", "y1", rel("has_symptom")),
        Relation::new("s1", "y2", rel("has_symptom")),
    ];
    for relation in &relations {
        assert!(client.create_relation(relation));
    }
    (client, graph)
}

// ============================================================================
// Neighbours and search
// ============================================================================

#[test]
fn test_related_entities_unfiltered() {
    let (client, _graph) = seeded();
    let related = client.get_related_entities("s1", None, None);
    let ids: HashSet<_> = related.iter().map(|r| r.entity.id.as_str()).collect();
    assert_eq!(ids, HashSet::from(["y1", "y2"]));
    assert!(related.iter().all(|r| r.relation_type.as_str() == "has_symptom"));
}

#[test]
fn test_related_entities_filters_compose() {
    let (client, _graph) = seeded();

    let treats = rel("treats");
    let syndromes = client.get_related_entities("f1", Some(&treats), Some(EntityType::Syndrome));
    assert_eq!(syndromes.len(), 1);
    assert_eq!(syndromes[0].entity.name, "Qi Deficiency");

    let herbs = client.get_related_entities("f1", None, Some(EntityType::Herb));
    assert_eq!(herbs.len(), 1);
    assert_eq!(herbs[0].relation_attributes.get("dose_g"), Some(&json!(9)));

    assert!(client.get_related_entities("f1", Some(&treats), Some(EntityType::Herb)).is_empty());
}

#[test]
fn test_related_entities_are_directed() {
    let (client, _graph) = seeded();
    assert!(client.get_related_entities("y1", None, None).is_empty());
    assert!(client.get_related_entities("missing", None, None).is_empty());
}

#[test]
fn test_search_is_case_sensitive_and_ordered() {
    let (client, _graph) = seeded();

    let hits = client.search_entities("Qi", None);
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, "s1");
    assert!(client.search_entities("qi", None).is_empty());

    let all: Vec<String> = client.search_entities("", None).into_iter().map(|e| e.name).collect();
    let mut sorted = all.clone();
    sorted.sort();
    assert_eq!(all, sorted);
    assert_eq!(all.len(), 5);

    let symptoms = client.search_entities("", Some(EntityType::Symptom));
    assert_eq!(symptoms.len(), 2);
}

#[test]
fn test_search_respects_limit() {
    let graph = MemoryGraph::new();
    let pool = Arc::new(ConnectionPool::new(
        MemoryGraphManager::new(graph),
        PoolConfig::default(),
    ));
    pool.start().unwrap();
    let client = KnowledgeGraphClient::new(pool, fast_retry()).with_config(
        lingshu::services::GraphClientConfig::default().with_search_limit(3),
    );
    for i in 0..10 {
        assert!(client.create_entity(&Entity::new(format!("h{i}"), format!("Herb {i}"), EntityType::Herb)));
    }
    assert_eq!(client.search_entities("Herb", None).len(), 3);
}

// ============================================================================
// Paths and subgraphs
// ============================================================================

#[test]
fn test_shortest_path_pairs_edges_with_steps() {
    let (client, _graph) = seeded();
    let path = client.get_shortest_path("h1", "y1", None);

    let ids: Vec<&str> = path.iter().map(|s| s.entity.id.as_str()).collect();
    assert_eq!(ids, ["h1", "f1", "s1", "y1"]);
    assert!(path[0].relation.is_none());

    let types: Vec<&str> = path[1..]
        .iter()
        .map(|s| s.relation.as_ref().unwrap().relation_type.as_str())
        .collect();
    assert_eq!(types, ["contains", "treats", "has_symptom"]);

    // The edge keeps its stored direction even when walked backwards.
    let first = path[1].relation.as_ref().unwrap();
    assert_eq!((first.source_id.as_str(), first.target_id.as_str()), ("f1", "h1"));
}

#[test]
fn test_shortest_path_bounded_by_depth() {
    let (client, _graph) = seeded();
    assert!(client.get_shortest_path("h1", "y1", Some(2)).is_empty());
    assert_eq!(client.get_shortest_path("h1", "y1", Some(3)).len(), 4);
    assert_eq!(client.get_shortest_path("y1", "y2", Some(2)).len(), 3);
}

#[test]
fn test_shortest_path_to_self() {
    let (client, _graph) = seeded();
    let path = client.get_shortest_path("s1", "s1", Some(0));
    assert_eq!(path.len(), 1);
    assert_eq!(path[0].entity.id, "s1");
    assert!(client.get_shortest_path("nobody", "nobody", None).is_empty());
}

#[test]
fn test_subgraph_depth_one() {
    let (client, _graph) = seeded();
    let subgraph = client.get_subgraph("s1", 1, None);

    let ids: HashSet<_> = subgraph.nodes.iter().map(|n| n.id.as_str()).collect();
    assert_eq!(ids, HashSet::from(["s1", "y1", "y2", "f1"]));
    assert_eq!(subgraph.nodes.len(), ids.len());
    assert_eq!(subgraph.relationships.len(), 3);
    assert_eq!(subgraph.nodes[0].id, "s1");
}

#[test]
fn test_subgraph_depth_two_reaches_herb() {
    let (client, _graph) = seeded();
    let subgraph = client.get_subgraph("s1", 2, None);
    assert_eq!(subgraph.nodes.len(), 5);
    assert_eq!(subgraph.relationships.len(), 4);
}

#[test]
fn test_subgraph_relation_filter() {
    let (client, _graph) = seeded();
    let allowed = [rel("has_symptom")];
    let subgraph = client.get_subgraph("s1", 3, Some(allowed.as_slice()));

    let ids: HashSet<_> = subgraph.nodes.iter().map(|n| n.id.as_str()).collect();
    assert_eq!(ids, HashSet::from(["s1", "y1", "y2"]));
    assert!(subgraph.relationships.iter().all(|r| r.relation_type.as_str() == "has_symptom"));

    let nothing: [RelationType; 0] = [];
    let root_only = client.get_subgraph("s1", 3, Some(nothing.as_slice()));
    assert_eq!(root_only.nodes.len(), 1);
    assert!(root_only.relationships.is_empty());
}

#[test]
fn test_subgraph_depth_zero_and_missing_root() {
    let (client, _graph) = seeded();
    let root = client.get_subgraph("s1", 0, None);
    assert_eq!(root.nodes.len(), 1);
    assert!(root.relationships.is_empty());
    assert!(client.get_subgraph("missing", 2, None).is_empty());
}

/// Upserts herbs named after their ids and links them in order.
fn linked(edges: &[(&str, &str)]) -> (Client, MemoryGraph) {
    let graph = MemoryGraph::new();
    let client = client_for(&graph);
    for (source, target) in edges {
        for id in [source, target] {
            assert!(client.create_entity(&Entity::new(*id, *id, EntityType::Herb)));
        }
        assert!(client.create_relation(&Relation::new(*source, *target, rel("pairs_with"))));
    }
    (client, graph)
}

#[test]
fn test_subgraph_on_triangle_lists_each_element_once() {
    let (client, _graph) = linked(&[("a", "b"), ("b", "c"), ("c", "a")]);
    // b-c joins two depth-1 nodes, so it only appears from depth 2 on
    let one_hop = client.get_subgraph("a", 1, None);
    assert_eq!(one_hop.nodes.len(), 3);
    assert_eq!(one_hop.relationships.len(), 2);

    for depth in [2, 5] {
        let subgraph = client.get_subgraph("a", depth, None);
        assert_eq!(subgraph.nodes.len(), 3, "depth {depth}");
        assert_eq!(subgraph.relationships.len(), 3, "depth {depth}");
        assert!(!subgraph.truncated);
    }
}

#[test]
fn test_subgraph_on_diamond_lists_each_element_once() {
    let (client, _graph) = linked(&[("a", "b"), ("a", "c"), ("b", "d"), ("c", "d")]);
    let subgraph = client.get_subgraph("a", 2, None);

    let ids: HashSet<_> = subgraph.nodes.iter().map(|n| n.id.as_str()).collect();
    assert_eq!(ids, HashSet::from(["a", "b", "c", "d"]));
    assert_eq!(subgraph.nodes.len(), 4);
    assert_eq!(subgraph.relationships.len(), 4);

    let one_hop = client.get_subgraph("a", 1, None);
    assert_eq!(one_hop.nodes.len(), 3);
    assert_eq!(one_hop.relationships.len(), 2);
}

#[test]
fn test_hierarchy_on_cycle_terminates() {
    let (client, _graph) = linked(&[("a", "b"), ("b", "c"), ("c", "a")]);
    let tree = client.get_knowledge_hierarchy("a", 10, None).unwrap();
    assert_eq!(tree.size(), 3);
    assert_eq!(tree.children[0].entity.id, "b");
    assert_eq!(tree.children[0].children[0].entity.id, "c");
    assert!(tree.children[0].children[0].children.is_empty());
}

#[test]
fn test_hierarchy_follows_allowed_types() {
    let (client, _graph) = seeded();
    let tree = client.get_knowledge_hierarchy("f1", 3, None).unwrap();
    let children: Vec<&str> = tree.children.iter().map(|c| c.entity.id.as_str()).collect();
    assert_eq!(children, ["h1", "s1"]);
    assert_eq!(tree.size(), 5);
    assert_eq!(
        tree.children[1].relation_type.as_ref().map(RelationType::as_str),
        Some("treats")
    );

    let allowed = [rel("treats")];
    let treats_only = client.get_knowledge_hierarchy("f1", 3, Some(allowed.as_slice())).unwrap();
    assert_eq!(treats_only.size(), 2);
}

#[test]
fn test_suggestions_exclude_seeds() {
    let (client, _graph) = seeded();
    let suggestions = client.suggest_related_content(&["s1", "y1"], 10);
    let ids: Vec<&str> = suggestions.iter().map(|s| s.entity.id.as_str()).collect();
    assert!(!ids.contains(&"s1"));
    assert!(!ids.contains(&"y1"));
    assert!(ids.contains(&"y2"));
    assert!(ids.contains(&"h1"));
    assert!(suggestions.windows(2).all(|w| w[0].relevance >= w[1].relevance));
}

#[test]
fn test_incoming_entities_and_name_lookup() {
    let (client, _graph) = seeded();
    let incoming = client.get_incoming_entities("s1", None, None);
    assert_eq!(incoming.len(), 1);
    assert_eq!(incoming[0].entity.id, "f1");
    assert_eq!(incoming[0].relation_type.as_str(), "treats");

    let relations = client.get_entity_relations("s1");
    assert_eq!(relations.outgoing.len(), 2);
    assert_eq!(relations.incoming.len(), 1);

    let found = client.get_entity_by_name("Fatigue", Some(EntityType::Symptom));
    assert_eq!(found.map(|e| e.id), Some("y1".to_string()));
    assert!(client.get_entity_by_name("Fatigue", Some(EntityType::Herb)).is_none());
}

// ============================================================================
// End-to-end scenarios
// ============================================================================

#[test]
fn test_related_lookup_after_creating_causes_edge() {
    let graph = MemoryGraph::new();
    let client = client_for(&graph);
    assert!(client.create_entity(&Entity::new("e1", "Qi Deficiency", EntityType::Syndrome)));
    assert!(client.create_entity(&Entity::new("e2", "Fatigue", EntityType::Symptom)));
    assert!(client.create_relation(&Relation::new("e1", "e2", rel("causes"))));

    let related = client.get_related_entities("e1", None, None);
    assert_eq!(related.len(), 1);
    assert_eq!(related[0].entity.id, "e2");
    assert_eq!(related[0].relation_type.as_str(), "causes");
}

#[test]
fn test_shortest_path_without_direct_edge_at_depth_one() {
    let graph = MemoryGraph::new();
    let client = client_for(&graph);
    for (id, name) in [("e1", "Qi Deficiency"), ("e2", "Fatigue"), ("e3", "Pale Tongue")] {
        assert!(client.create_entity(&Entity::new(id, name, EntityType::Symptom)));
    }
    assert!(client.create_relation(&Relation::new("e1", "e2", rel("causes"))));
    assert!(client.create_relation(&Relation::new("e2", "e3", rel("causes"))));

    assert!(client.get_shortest_path("e1", "e3", Some(1)).is_empty());
    assert_eq!(client.get_shortest_path("e1", "e3", Some(2)).len(), 3);
}

// ============================================================================
// Writes and record mapping
// ============================================================================

#[test]
fn test_recreate_updates_in_place() {
    let (client, graph) = seeded();
    let before = graph.node_count();

    let updated = Entity::new("h1", "Ren Shen", EntityType::Herb).with_attribute("taste", "sweet");
    assert!(client.create_entity(&updated));
    assert_eq!(graph.node_count(), before);

    let stored = client.get_entity_by_id("h1").unwrap();
    assert_eq!(stored.name, "Ren Shen");
    assert_eq!(stored.attributes.get("nature"), Some(&json!("warm")));
    assert_eq!(stored.attributes.get("taste"), Some(&json!("sweet")));
}

#[test]
fn test_relation_to_missing_endpoint() {
    let (client, graph) = seeded();
    let edges = graph.edge_count();
    assert!(!client.create_relation(&Relation::new("h1", "ghost", rel("treats"))));
    assert_eq!(graph.edge_count(), edges);
}

#[test]
fn test_delete_entity_detaches_relations() {
    let (client, graph) = seeded();
    assert!(client.delete_entity("s1"));
    assert_eq!(graph.edge_count(), 1);
    assert!(client.get_related_entities("f1", Some(&rel("treats")), None).is_empty());
}

#[test]
fn test_multi_label_node_takes_first_known_label() {
    let (client, graph) = seeded();
    let mut props = Map::new();
    props.insert("name".to_string(), Value::from("Night Sweats"));
    graph.insert_raw_node("x1", &["Syndrome", "Symptom", "Imported"], props);

    let entity = client.get_entity_by_id("x1").unwrap();
    assert_eq!(entity.entity_type, EntityType::Symptom);
}

#[test]
fn test_unlabelled_node_is_skipped() {
    let (client, graph) = seeded();
    let mut props = Map::new();
    props.insert("name".to_string(), Value::from("Qi Legacy"));
    graph.insert_raw_node("z1", &["Legacy"], props);

    assert!(client.get_entity_by_id("z1").is_none());
    let hits = client.search_entities("Qi", None);
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, "s1");
}

#[test]
fn test_hostile_values_stay_in_parameters() {
    let (client, graph) = seeded();
    let keyword = "\"}) DETACH DELETE n //";
    assert!(client.search_entities(keyword, None).is_empty());
    assert_eq!(graph.node_count(), 5);

    let statement = GraphStatement::new(Operation::Search {
        keyword: keyword.to_string(),
        entity_types: vec![EntityType::Herb],
        limit: 10,
    });
    assert!(!statement.cypher.text.contains("DETACH"));
    assert!(!statement.cypher.text.contains("Herb"));
    assert_eq!(statement.cypher.params.get("keyword"), Some(&json!(keyword)));
}

// ============================================================================
// Degradation and retries
// ============================================================================

#[test]
fn test_offline_graph_degrades_every_operation() {
    let (client, graph) = seeded();
    graph.set_offline(true);

    assert!(!client.health_check());
    assert!(!client.create_entity(&Entity::new("n1", "New", EntityType::Herb)));
    assert!(!client.update_entity("h1", &lingshu::models::Attributes::new()));
    assert!(!client.delete_entity("h1"));
    assert!(!client.create_relation(&Relation::new("h1", "s1", rel("treats"))));
    assert_eq!(client.delete_relation("f1", "s1", &rel("treats")), 0);
    assert!(client.get_entity_by_id("h1").is_none());
    assert!(client.get_related_entities("s1", None, None).is_empty());
    assert!(client.search_entities("Qi", None).is_empty());
    assert!(client.get_shortest_path("h1", "y1", None).is_empty());
    assert!(client.get_subgraph("s1", 2, None).is_empty());

    graph.set_offline(false);
    assert!(client.health_check());
    assert!(client.get_entity_by_id("h1").is_some());
}

#[test]
fn test_transient_failures_are_retried() {
    let (client, graph) = seeded();
    let before = graph.executions();
    graph.inject_failures(2);
    assert!(client.get_entity_by_id("h1").is_some());
    assert_eq!(graph.executions() - before, 3);
}

#[test]
fn test_retries_stop_at_max_attempts() {
    let (client, graph) = seeded();
    let before = graph.executions();
    graph.inject_failures(10);
    assert!(client.search_entities("Qi", None).is_empty());
    assert_eq!(graph.executions() - before, 3);
}

#[test]
fn test_relation_creation_never_retried() {
    let (client, graph) = seeded();
    let edges = graph.edge_count();
    let before = graph.executions();
    graph.inject_failures(1);
    assert!(!client.create_relation(&Relation::new("h1", "s1", rel("treats"))));
    assert_eq!(graph.executions() - before, 1);
    assert_eq!(graph.edge_count(), edges);
}

// ============================================================================
// Caching
// ============================================================================

fn cached_client(graph: &MemoryGraph) -> (Client, Arc<CacheManager>) {
    let cache = Arc::new(
        CacheManager::new(Arc::new(MemoryCacheBackend::new(100))).with_namespace("tcm").unwrap(),
    );
    let client = client_for(graph).with_cache(Arc::clone(&cache), Some(Duration::from_secs(60)));
    (client, cache)
}

#[test]
fn test_reads_are_served_from_cache() {
    let graph = MemoryGraph::new();
    let (client, cache) = cached_client(&graph);
    assert!(client.create_entity(&Entity::new("h1", "Ginseng", EntityType::Herb)));

    assert!(client.get_entity_by_id("h1").is_some());
    let after_first = graph.executions();
    assert!(client.get_entity_by_id("h1").is_some());
    assert_eq!(graph.executions(), after_first);
    assert!(cache.stats().hits >= 1);
}

#[test]
fn test_writes_invalidate_cache() {
    let graph = MemoryGraph::new();
    let (client, _cache) = cached_client(&graph);
    assert!(client.create_entity(&Entity::new("h1", "Ginseng", EntityType::Herb)));
    assert_eq!(client.search_entities("Gin", None).len(), 1);

    assert!(client.create_entity(&Entity::new("h2", "Ginger", EntityType::Herb)));
    assert_eq!(client.search_entities("Gin", None).len(), 2);
}

#[test]
fn test_degraded_results_not_cached() {
    let graph = MemoryGraph::new();
    let (client, _cache) = cached_client(&graph);
    assert!(client.create_entity(&Entity::new("h1", "Ginseng", EntityType::Herb)));

    graph.set_offline(true);
    assert!(client.get_entity_by_id("h1").is_none());
    graph.set_offline(false);
    assert!(client.get_entity_by_id("h1").is_some());
}

/// Blocks the first `set` until released, so a test can run a write
/// between a fill's read and its store.
struct GatedBackend {
    inner: MemoryCacheBackend,
    armed: AtomicBool,
    entered: Mutex<mpsc::Sender<()>>,
    release: Mutex<mpsc::Receiver<()>>,
}

impl CacheBackend for GatedBackend {
    fn get(&self, key: &str) -> Result<Option<CacheValue>> {
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: CacheValue, ttl: Option<Duration>) -> Result<()> {
        if self.armed.swap(false, Ordering::SeqCst) {
            self.entered.lock().unwrap().send(()).unwrap();
            self.release.lock().unwrap().recv().unwrap();
        }
        self.inner.set(key, value, ttl)
    }

    fn delete(&self, key: &str) -> Result<bool> {
        self.inner.delete(key)
    }

    fn exists(&self, key: &str) -> Result<bool> {
        self.inner.exists(key)
    }

    fn clear(&self, pattern: Option<&str>) -> Result<usize> {
        self.inner.clear(pattern)
    }

    fn backend_name(&self) -> &'static str {
        "gated"
    }
}

#[test]
fn test_fill_racing_update_is_not_cached() {
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let backend = Arc::new(GatedBackend {
        inner: MemoryCacheBackend::new(100),
        armed: AtomicBool::new(false),
        entered: Mutex::new(entered_tx),
        release: Mutex::new(release_rx),
    });
    let cache = Arc::new(CacheManager::new(backend.clone()).with_namespace("tcm").unwrap());
    let graph = MemoryGraph::new();
    let client = Arc::new(client_for(&graph).with_cache(cache, Some(Duration::from_secs(3600))));
    let herb = Entity::new("h1", "Ginseng", EntityType::Herb).with_attribute("nature", "warm");
    assert!(client.create_entity(&herb));

    backend.armed.store(true, Ordering::SeqCst);
    let reader = {
        let client = Arc::clone(&client);
        thread::spawn(move || client.get_entity_by_id("h1"))
    };
    // The reader has loaded the warm row and is about to store it.
    entered_rx.recv().unwrap();

    let mut attributes = Attributes::new();
    attributes.insert("nature".to_string(), json!("cold"));
    assert!(client.update_entity("h1", &attributes));
    release_tx.send(()).unwrap();

    let raced = reader.join().unwrap().unwrap();
    assert_eq!(raced.attributes.get("nature"), Some(&json!("warm")));

    let fresh = client.get_entity_by_id("h1").unwrap();
    assert_eq!(fresh.attributes.get("nature"), Some(&json!("cold")));
}
