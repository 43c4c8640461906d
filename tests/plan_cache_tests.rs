//! Plan cache lifecycle through the engine: promotion, invalidation, knobs,
//! capacity and concurrent access.

use qplan::catalog::IndexSpec;
use qplan::core::shape::{Accumulator, AccumulatorOp, GroupSpec, LookupSpec, Pipeline, Predicate, Stage};
use qplan::core::types::Document;
use qplan::planner::CacheFilter;
use qplan::{Engine, EngineConfig, QueryOptions};
use std::sync::Arc;
use std::thread;

fn engine_with(config: EngineConfig) -> Engine {
    let engine = Engine::new(config).expect("engine");
    let docs = (0..100i64)
        .map(|i| Document::new().with("a", i % 10).with("b", i))
        .collect();
    engine.insert_many("test.local", docs).expect("insert local");
    engine
        .create_index("test.local", IndexSpec::new("a_1", &["a"]))
        .expect("index a_1");
    let foreign = (0..20i64)
        .map(|i| Document::new().with("k", i % 10).with("v", format!("f{i}")))
        .collect();
    engine.insert_many("test.foreign", foreign).expect("insert foreign");
    engine
}

fn engine() -> Engine {
    engine_with(EngineConfig::default())
}

fn match_a(a: i64) -> Pipeline {
    Pipeline::new(vec![Stage::Match(vec![Predicate::eq("a", a)])])
}

fn lookup_and_group(a: i64) -> Pipeline {
    Pipeline::new(vec![
        Stage::Match(vec![Predicate::eq("a", a)]),
        Stage::Lookup(LookupSpec {
            from: "test.foreign".into(),
            local_field: "a".into(),
            foreign_field: "k".into(),
            as_field: "joined".into(),
        }),
        Stage::Group(GroupSpec {
            key: Some("a".into()),
            accumulators: vec![Accumulator {
                name: "n".into(),
                op: AccumulatorOp::SumConst(1),
            }],
        }),
    ])
}

fn entries(engine: &Engine, ns: &str) -> Vec<qplan::planner::PlanCacheEntry> {
    engine.list_cache_entries(&CacheFilter::namespace(ns))
}

#[test]
fn test_promotion_law() {
    let engine = engine();

    let run1 = engine
        .aggregate("test.local", &match_a(3), QueryOptions::default())
        .expect("run 1");
    assert!(run1.meta.from_multi_planner);
    let after1 = entries(&engine, "test.local");
    assert_eq!(after1.len(), 1);
    assert!(!after1[0].is_active);

    let run2 = engine
        .aggregate("test.local", &match_a(3), QueryOptions::default())
        .expect("run 2");
    assert!(run2.meta.from_multi_planner);
    assert!(entries(&engine, "test.local")[0].is_active);

    let run3 = engine
        .aggregate("test.local", &match_a(3), QueryOptions::default())
        .expect("run 3");
    assert!(!run3.meta.from_multi_planner);

    assert_eq!(run1.meta.query_hash, run3.meta.query_hash);
    assert_eq!(run1.meta.plan_cache_key, run3.meta.plan_cache_key);
    assert_eq!(run1.docs, run3.docs);
    assert_eq!(run3.docs.len(), 10);
}

#[test]
fn test_literals_share_one_entry() {
    let engine = engine();
    for a in [1, 2, 3] {
        engine
            .aggregate("test.local", &match_a(a), QueryOptions::default())
            .expect("query");
    }
    let all = entries(&engine, "test.local");
    assert_eq!(all.len(), 1);
    assert!(all[0].is_active);
}

#[test]
fn test_longer_promotion_streak() {
    let config = EngineConfig {
        promotion_streak: 3,
        ..EngineConfig::default()
    };
    let engine = engine_with(config);
    let mut flags = Vec::new();
    for _ in 0..5 {
        let out = engine
            .aggregate("test.local", &match_a(4), QueryOptions::default())
            .expect("query");
        flags.push(out.meta.from_multi_planner);
    }
    assert_eq!(flags, vec![true, true, true, true, false]);
}

#[test]
fn test_pushdown_knobs_do_not_evict() {
    let engine = engine();
    let pipeline = lookup_and_group(2);
    let mut last = None;
    for _ in 0..3 {
        last = Some(
            engine
                .aggregate("test.local", &pipeline, QueryOptions::default())
                .expect("warm"),
        );
    }
    let warm = last.expect("ran");
    assert!(!warm.meta.from_multi_planner);

    let before = engine
        .explain("test.local", &pipeline, QueryOptions::default())
        .expect("explain");
    assert_eq!(before.pushed_stages, vec!["EQ_LOOKUP".to_string(), "GROUP".to_string()]);

    engine
        .set_parameter("disableLookupPushdown", "true")
        .expect("knob");
    let classic = engine
        .aggregate("test.local", &pipeline, QueryOptions::default())
        .expect("classic lookup");
    assert!(!classic.meta.from_multi_planner);
    assert_eq!(classic.meta.plan_cache_key, warm.meta.plan_cache_key);
    assert_eq!(classic.meta.join_algorithm, None);
    assert_eq!(classic.docs, warm.docs);

    let after = engine
        .explain("test.local", &pipeline, QueryOptions::default())
        .expect("explain");
    assert!(after.pushed_stages.is_empty());
    assert_eq!(after.classic_stages, vec!["$lookup".to_string(), "$group".to_string()]);

    engine
        .set_parameter("disableGroupPushdown", "true")
        .expect("knob");
    let grouped = engine
        .aggregate("test.local", &pipeline, QueryOptions::default())
        .expect("classic group");
    assert!(!grouped.meta.from_multi_planner);
    assert_eq!(grouped.docs, warm.docs);

    let all = entries(&engine, "test.local");
    assert_eq!(all.len(), 1);
    assert!(all[0].is_active);
}

#[test]
fn test_group_knob_alone_does_not_evict() {
    let engine = engine();
    let pipeline = Pipeline::new(vec![
        Stage::Match(vec![Predicate::eq("a", 3i64), Predicate::eq("b", 33i64)]),
        Stage::Group(GroupSpec {
            key: Some("a".into()),
            accumulators: vec![Accumulator {
                name: "out".into(),
                op: AccumulatorOp::SumConst(1),
            }],
        }),
    ]);
    let mut last = None;
    for _ in 0..3 {
        last = Some(
            engine
                .aggregate("test.local", &pipeline, QueryOptions::default())
                .expect("warm"),
        );
    }
    let warm = last.expect("ran");
    assert!(!warm.meta.from_multi_planner);
    assert_eq!(warm.docs.len(), 1);
    let before = engine
        .explain("test.local", &pipeline, QueryOptions::default())
        .expect("explain");
    assert_eq!(before.pushed_stages, vec!["GROUP".to_string()]);
    assert!(before.classic_stages.is_empty());

    engine
        .set_parameter("disableGroupPushdown", "true")
        .expect("knob");
    let classic = engine
        .aggregate("test.local", &pipeline, QueryOptions::default())
        .expect("classic group");
    assert!(!classic.meta.from_multi_planner);
    assert_eq!(classic.meta.plan_cache_key, warm.meta.plan_cache_key);
    assert_eq!(classic.docs, warm.docs);

    let after = engine
        .explain("test.local", &pipeline, QueryOptions::default())
        .expect("explain");
    assert!(after.pushed_stages.is_empty());
    assert_eq!(after.classic_stages, vec!["$group".to_string()]);
    let all = entries(&engine, "test.local");
    assert_eq!(all.len(), 1);
    assert!(all[0].is_active);
}

#[test]
fn test_ddl_invalidates_only_its_namespace() {
    let engine = engine();
    engine
        .insert_many("test.other", vec![Document::new().with("a", 1i64)])
        .expect("insert other");
    for _ in 0..2 {
        engine
            .aggregate("test.local", &match_a(1), QueryOptions::default())
            .expect("local");
        engine
            .aggregate("test.other", &match_a(1), QueryOptions::default())
            .expect("other");
    }
    assert_eq!(engine.list_cache_entries(&CacheFilter::default()).len(), 2);

    // Foreign-side DDL never reaches local entries.
    engine
        .create_index("test.foreign", IndexSpec::new("k_1", &["k"]))
        .expect("foreign index");
    assert_eq!(engine.list_cache_entries(&CacheFilter::default()).len(), 2);

    engine
        .create_index("test.other", IndexSpec::new("a_1", &["a"]))
        .expect("other index");
    assert!(entries(&engine, "test.other").is_empty());
    assert_eq!(entries(&engine, "test.local").len(), 1);

    assert!(engine.drop_collection("test.local"));
    assert!(engine.list_cache_entries(&CacheFilter::default()).is_empty());
}

#[test]
fn test_new_index_changes_plan_cache_key() {
    let engine = engine();
    let before = engine
        .aggregate("test.local", &match_a(5), QueryOptions::default())
        .expect("before");
    engine
        .create_index("test.local", IndexSpec::new("a_1_b_1", &["a", "b"]))
        .expect("a_1_b_1");
    let after = engine
        .aggregate("test.local", &match_a(5), QueryOptions::default())
        .expect("after");
    assert_eq!(before.meta.query_hash, after.meta.query_hash);
    assert_ne!(before.meta.plan_cache_key, after.meta.plan_cache_key);
    assert!(after.meta.from_multi_planner);

    // Indexes the filter cannot use leave the key alone.
    engine
        .create_index("test.local", IndexSpec::new("b_1", &["b"]))
        .expect("b_1");
    let unrelated = engine
        .aggregate("test.local", &match_a(5), QueryOptions::default())
        .expect("unrelated");
    assert_eq!(unrelated.meta.plan_cache_key, after.meta.plan_cache_key);
}

#[test]
fn test_cache_capacity_evicts_least_recently_used() {
    let config = EngineConfig {
        max_cache_entries: 2,
        ..EngineConfig::default()
    };
    let engine = engine_with(config);
    let shapes = [
        match_a(1),
        Pipeline::new(vec![Stage::Match(vec![Predicate::eq("b", 1i64)])]),
        Pipeline::find(vec![Predicate::eq("a", 1i64)], Some(3)),
    ];
    for p in &shapes {
        engine
            .aggregate("test.local", p, QueryOptions::default())
            .expect("query");
    }
    let all = entries(&engine, "test.local");
    assert_eq!(all.len(), 2);
    let first_key = engine
        .explain("test.local", &shapes[0], QueryOptions::default())
        .expect("explain")
        .plan_cache_key;
    assert!(all.iter().all(|e| e.plan_cache_key != first_key));
}

#[test]
fn test_concurrent_queries_and_clear() {
    let engine = Arc::new(engine());
    let mut handles = Vec::new();
    for t in 0..4i64 {
        let engine = Arc::clone(&engine);
        handles.push(thread::spawn(move || {
            for i in 0..50i64 {
                let out = engine
                    .aggregate("test.local", &match_a((t + i) % 10), QueryOptions::default())
                    .expect("query");
                assert_eq!(out.docs.len(), 10);
            }
        }));
    }
    let clearer = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || {
            for _ in 0..50 {
                engine.clear_cache();
                thread::yield_now();
            }
        })
    };
    for h in handles {
        h.join().expect("query thread");
    }
    clearer.join().expect("clear thread");

    assert!(entries(&engine, "test.local").len() <= 1);
    assert_eq!(engine.profile(Some("test.local")).len(), 200);
}
