//! Join algorithm selection is per execution and never touches the local plan
//! cache entry.

use qplan::catalog::IndexSpec;
use qplan::core::shape::{LookupSpec, Pipeline, Predicate, Stage};
use qplan::core::types::{Document, Value};
use qplan::planner::{CacheFilter, JoinAlgorithm};
use qplan::{Engine, EngineConfig, ErrorCode, ExecError, QueryOptions};

fn engine_with(config: EngineConfig) -> Engine {
    let engine = Engine::new(config).expect("engine");
    let local = (0..50i64)
        .map(|i| Document::new().with("a", i % 5).with("n", i))
        .collect();
    engine.insert_many("test.local", local).expect("local");
    engine
        .create_index("test.local", IndexSpec::new("a_1", &["a"]))
        .expect("a_1");
    let foreign = (0..30i64)
        .map(|i| Document::new().with("k", i % 6).with("v", format!("f{i}")))
        .collect();
    engine.insert_many("test.foreign", foreign).expect("foreign");
    engine
        .create_index("test.foreign", IndexSpec::new("k_1", &["k"]))
        .expect("k_1");
    engine
}

fn pipeline() -> Pipeline {
    Pipeline::new(vec![
        Stage::Match(vec![Predicate::eq("a", 3i64)]),
        Stage::Lookup(LookupSpec {
            from: "test.foreign".into(),
            local_field: "a".into(),
            foreign_field: "k".into(),
            as_field: "joined".into(),
        }),
    ])
}

fn joined_len(doc: &Document) -> usize {
    match doc.get("joined") {
        Some(Value::Array(items)) => items.len(),
        other => panic!("expected joined array, got {other:?}"),
    }
}

#[test]
fn test_foreign_side_changes_only_the_join_algorithm() {
    let engine = engine_with(EngineConfig::default());
    let disk = QueryOptions::allow_disk_use(true);

    for _ in 0..2 {
        engine.aggregate("test.local", &pipeline(), disk).expect("warm");
    }
    let indexed = engine.aggregate("test.local", &pipeline(), disk).expect("indexed");
    assert!(!indexed.meta.from_multi_planner);
    assert_eq!(indexed.meta.join_algorithm, Some(JoinAlgorithm::IndexedLoopJoin));
    assert_eq!(indexed.docs.len(), 10);
    assert!(indexed.docs.iter().all(|d| joined_len(d) == 5));

    engine.drop_index("test.foreign", "k_1").expect("drop k_1");
    let hashed = engine.aggregate("test.local", &pipeline(), disk).expect("hash");
    assert!(!hashed.meta.from_multi_planner);
    assert_eq!(hashed.meta.join_algorithm, Some(JoinAlgorithm::HashJoin));
    assert_eq!(hashed.meta.plan_cache_key, indexed.meta.plan_cache_key);
    assert_eq!(hashed.docs, indexed.docs);

    let nested = engine
        .aggregate("test.local", &pipeline(), QueryOptions::default())
        .expect("nlj");
    assert!(!nested.meta.from_multi_planner);
    assert_eq!(nested.meta.join_algorithm, Some(JoinAlgorithm::NestedLoopJoin));
    assert_eq!(nested.meta.plan_cache_key, indexed.meta.plan_cache_key);
    assert_eq!(nested.docs, indexed.docs);

    let entries = engine.list_cache_entries(&CacheFilter::namespace("test.local"));
    assert_eq!(entries.len(), 1);
    assert!(entries[0].is_active);
}

#[test]
fn test_dropped_foreign_collection_short_circuits() {
    let engine = engine_with(EngineConfig::default());
    for _ in 0..3 {
        engine
            .aggregate("test.local", &pipeline(), QueryOptions::default())
            .expect("warm");
    }
    assert!(engine.drop_collection("test.foreign"));

    let out = engine
        .aggregate("test.local", &pipeline(), QueryOptions::default())
        .expect("empty foreign");
    assert!(!out.meta.from_multi_planner);
    assert_eq!(
        out.meta.join_algorithm,
        Some(JoinAlgorithm::NonExistentForeignCollection)
    );
    assert_eq!(out.docs.len(), 10);
    assert!(out.docs.iter().all(|d| joined_len(d) == 0));

    let plan = engine
        .explain("test.local", &pipeline(), QueryOptions::default())
        .expect("explain");
    assert_eq!(
        plan.join_algorithm,
        Some(JoinAlgorithm::NonExistentForeignCollection)
    );
    assert!(plan.cache_entry.map_or(false, |e| e.is_active));
}

#[test]
fn test_hash_join_needs_disk_use_and_a_small_foreign_side() {
    let config = EngineConfig {
        hash_join_max_foreign_docs: 10,
        ..EngineConfig::default()
    };
    let engine = engine_with(config);
    engine.drop_index("test.foreign", "k_1").expect("drop k_1");
    let out = engine
        .aggregate("test.local", &pipeline(), QueryOptions::allow_disk_use(true))
        .expect("too large for hash join");
    assert_eq!(out.meta.join_algorithm, Some(JoinAlgorithm::NestedLoopJoin));
}

#[test]
fn test_nested_loop_buffer_limit() {
    let config = EngineConfig {
        nlj_buffer_cap_bytes: 64,
        hash_join_mem_bytes: 64,
        ..EngineConfig::default()
    };
    let engine = engine_with(config);
    engine.drop_index("test.foreign", "k_1").expect("drop k_1");

    let err = engine
        .aggregate("test.local", &pipeline(), QueryOptions::default())
        .expect_err("buffer cap exceeded");
    assert_eq!(err.code(), ErrorCode::ResourceLimitExceeded);
    assert_eq!(err.code().code(), 146);
    assert!(matches!(err, ExecError::ResourceLimitExceeded(ref msg) if msg.contains("allowDiskUse")));

    // Disk use lets the hash join spill instead.
    let out = engine
        .aggregate("test.local", &pipeline(), QueryOptions::allow_disk_use(true))
        .expect("spilling hash join");
    assert_eq!(out.meta.join_algorithm, Some(JoinAlgorithm::HashJoin));
    assert!(out.docs.iter().all(|d| joined_len(d) == 5));
    assert!(engine.latest_profile().map_or(false, |p| p.foreign_examined > 0));
}

#[test]
fn test_missing_and_array_local_keys() {
    let engine = engine_with(EngineConfig::default());
    engine
        .insert_many(
            "test.arrays",
            vec![
                Document::new().with("x", 1i64),
                Document::new()
                    .with("x", 2i64)
                    .with("a", Value::Array(vec![Value::Int(1), Value::Int(2)])),
                Document::new()
                    .with("x", 3i64)
                    .with("a", Value::Array(Vec::new())),
            ],
        )
        .expect("arrays");
    engine
        .insert_many(
            "test.foreign",
            vec![Document::new().with("v", "no-k"), Document::new().with("k", Value::Null)],
        )
        .expect("null foreign keys");

    let lookup = Pipeline::new(vec![Stage::Lookup(LookupSpec {
        from: "test.foreign".into(),
        local_field: "a".into(),
        foreign_field: "k".into(),
        as_field: "joined".into(),
    })]);
    let pushed = engine
        .aggregate("test.arrays", &lookup, QueryOptions::default())
        .expect("pushed");
    assert_eq!(pushed.meta.join_algorithm, Some(JoinAlgorithm::IndexedLoopJoin));
    // Missing local value matches missing and null foreign values.
    assert_eq!(joined_len(&pushed.docs[0]), 2);
    // Arrays match element-wise.
    assert_eq!(joined_len(&pushed.docs[1]), 10);
    // An empty array matches nothing.
    assert_eq!(joined_len(&pushed.docs[2]), 0);

    engine
        .set_parameter("disableLookupPushdown", "true")
        .expect("knob");
    let classic = engine
        .aggregate("test.arrays", &lookup, QueryOptions::default())
        .expect("classic");
    assert_eq!(classic.meta.join_algorithm, None);
    assert_eq!(classic.docs, pushed.docs);
}
