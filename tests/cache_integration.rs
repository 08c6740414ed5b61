//! Cache manager integration tests.
//!
//! Covers TTL expiry under a simulated clock, namespace isolation, eviction,
//! and single-flight `get_or_set` under concurrency.

// Integration tests use expect/unwrap for simplicity - panics are acceptable in tests
#![allow(clippy::expect_used, clippy::unwrap_used)]

use lingshu::services::{CacheKey, CacheManager};
use lingshu::storage::{CacheBackend, CacheValue, ManualClock, MemoryCacheBackend};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

fn clocked(max_size: usize) -> (Arc<MemoryCacheBackend>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(1_000));
    let backend = Arc::new(MemoryCacheBackend::with_clock(max_size, clock.clone()));
    (backend, clock)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Prescription {
    formula: String,
    herbs: Vec<String>,
}

#[test]
fn test_ttl_boundary_is_inclusive() {
    let (backend, clock) = clocked(100);
    let cache = CacheManager::new(backend).with_namespace("tcm").unwrap();

    assert!(cache.set("k", json!("v").into(), Some(Duration::from_secs(10))));
    clock.advance(Duration::from_secs(10));
    assert!(cache.get("k").is_some());

    clock.advance(Duration::from_millis(1));
    assert!(cache.get("k").is_none());
    assert!(!cache.exists("k"));
}

#[test]
fn test_default_ttl_applies() {
    let (backend, clock) = clocked(100);
    let cache = CacheManager::new(backend.clone()).with_default_ttl(Some(Duration::from_secs(5)));

    assert!(cache.set("short", json!(1).into(), None));
    assert!(cache.set("long", json!(2).into(), Some(Duration::from_secs(60))));
    clock.advance(Duration::from_secs(6));

    assert!(cache.get("short").is_none());
    assert!(cache.get("long").is_some());
    assert_eq!(backend.stats().expirations, 1);
}

#[test]
fn test_namespaces_are_isolated() {
    let backend: Arc<dyn CacheBackend> = Arc::new(MemoryCacheBackend::new(100));
    let tcm = CacheManager::new(Arc::clone(&backend)).with_namespace("tcm").unwrap();
    let diet = CacheManager::new(Arc::clone(&backend)).with_namespace("diet").unwrap();

    assert!(tcm.set("herb:1", json!("ginseng").into(), None));
    assert!(diet.set("herb:1", json!("ginger").into(), None));
    assert_eq!(tcm.get("herb:1").and_then(CacheValue::into_json), Some(json!("ginseng")));

    assert_eq!(tcm.clear(None), 1);
    assert!(tcm.get("herb:1").is_none());
    assert_eq!(diet.get("herb:1").and_then(CacheValue::into_json), Some(json!("ginger")));
    assert!(backend.exists("diet:herb:1").unwrap());
}

#[test]
fn test_pattern_clear_within_namespace() {
    let cache = CacheManager::new(Arc::new(MemoryCacheBackend::new(100))).with_namespace("tcm").unwrap();
    for key in ["herb:1", "herb:2", "formula:1"] {
        assert!(cache.set(key, json!(key).into(), None));
    }
    assert_eq!(cache.clear(Some("herb:*")), 2);
    assert!(cache.exists("formula:1"));
}

#[test]
fn test_eviction_removes_oldest() {
    let (backend, clock) = clocked(2);
    let cache = CacheManager::new(backend.clone());

    assert!(cache.set("a", json!(1).into(), None));
    clock.advance(Duration::from_millis(1));
    assert!(cache.set("b", json!(2).into(), None));
    clock.advance(Duration::from_millis(1));
    assert!(cache.set("c", json!(3).into(), None));

    assert!(cache.get("a").is_none());
    assert!(cache.get("b").is_some());
    assert!(cache.get("c").is_some());
    assert_eq!(backend.stats().evictions, 1);
}

#[test]
fn test_typed_round_trip() {
    let cache = CacheManager::new(Arc::new(MemoryCacheBackend::new(10)));
    let value = Prescription {
        formula: "Si Jun Zi Tang".to_string(),
        herbs: vec!["Ginseng".to_string(), "Licorice".to_string()],
    };
    assert!(cache.set_json("rx", &value, None));
    assert_eq!(cache.get_json::<Prescription>("rx"), Some(value));
    assert_eq!(cache.get_json::<u32>("rx"), None);
}

#[test]
fn test_binary_values() {
    let cache = CacheManager::new(Arc::new(MemoryCacheBackend::new(10)));
    assert!(cache.set("blob", CacheValue::Bytes(vec![0, 159, 146, 150]), None));
    assert_eq!(cache.get("blob"), Some(CacheValue::Bytes(vec![0, 159, 146, 150])));
}

#[test]
fn test_concurrent_get_or_set_runs_factory_once() {
    const THREADS: usize = 8;

    let cache = Arc::new(CacheManager::new(Arc::new(MemoryCacheBackend::new(100))));
    let calls = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let cache = Arc::clone(&cache);
            let calls = Arc::clone(&calls);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                cache.get_or_set(
                    "slow",
                    || {
                        calls.fetch_add(1, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(50));
                        Ok(vec!["ginseng".to_string()])
                    },
                    None,
                )
            })
        })
        .collect();

    let results: Vec<Vec<String>> = handles
        .into_iter()
        .map(|h| h.join().unwrap().unwrap())
        .collect();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(results.iter().all(|r| r == &["ginseng".to_string()]));
}

#[test]
fn test_get_or_set_error_stores_nothing() {
    let cache = CacheManager::new(Arc::new(MemoryCacheBackend::new(10)));
    let result: lingshu::Result<i32> = cache.get_or_set(
        "k",
        || {
            Err(lingshu::Error::OperationFailed {
                operation: "load".to_string(),
                cause: "backend down".to_string(),
            })
        },
        None,
    );
    assert!(result.is_err());
    assert!(!cache.exists("k"));

    let retried = cache.get_or_set("k", || Ok(7), None);
    assert_eq!(retried.ok(), Some(7));
}

#[test]
fn test_cache_keys_ignore_kwarg_order() {
    let a = CacheKey::new()
        .arg("get_related_entities")
        .kwarg("relation_type", &"treats")
        .kwarg("limit", &100)
        .build();
    let b = CacheKey::new()
        .arg("get_related_entities")
        .kwarg("limit", &100)
        .kwarg("relation_type", &"treats")
        .build();
    assert_eq!(a, b);
    assert_eq!(a.len(), 64);

    let c = CacheKey::new().arg("get_related_entities").kwarg("limit", &101).build();
    assert_ne!(a, c);
}

#[test]
fn test_batch_operations_strip_namespace() {
    let cache = CacheManager::new(Arc::new(MemoryCacheBackend::new(10))).with_namespace("tcm").unwrap();
    assert!(cache.set_many(
        vec![
            ("a".to_string(), json!(1).into()),
            ("b".to_string(), json!(2).into()),
        ],
        None,
    ));
    let found = cache.get_many(&["a", "b", "c"]);
    assert_eq!(found.len(), 2);
    assert!(found.contains_key("a"));
    assert!(!found.contains_key("tcm:a"));
}

#[test]
fn test_json_entry_expires_after_ttl() {
    let (backend, clock) = clocked(100);
    let cache = CacheManager::new(backend).with_namespace("tcm").unwrap();

    assert!(cache.set("k", json!({"a": 1}).into(), Some(Duration::from_secs(60))));
    assert_eq!(cache.get_json::<serde_json::Value>("k"), Some(json!({"a": 1})));

    clock.advance(Duration::from_secs(61));
    assert!(cache.get("k").is_none());
}

#[test]
fn test_cleanup_expired_sweeps_unread_entries() {
    let (backend, clock) = clocked(100);
    let cache = CacheManager::new(backend.clone()).with_namespace("tcm").unwrap();
    for key in ["a", "b", "c"] {
        assert!(cache.set(key, json!(key).into(), Some(Duration::from_secs(5))));
    }
    assert!(cache.set("kept", json!(0).into(), None));

    clock.advance(Duration::from_secs(6));
    assert_eq!(cache.cleanup_expired(), 3);
    assert_eq!(backend.len(), 1);
    assert_eq!(cache.cleanup_expired(), 0);
}
