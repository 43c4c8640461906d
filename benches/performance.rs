use criterion::{criterion_group, criterion_main, Criterion};
use qplan::catalog::{Collection, CollectionOptions, IndexSpec};
use qplan::core::config::{EngineConfig, PushdownKnobs, QueryOptions};
use qplan::core::shape::{LookupSpec, Pipeline, Predicate, Stage};
use qplan::core::types::Document;
use qplan::exec::join::{hash, nested_loop};
use qplan::mem::SpillManager;
use qplan::planner::{CacheFilter, JoinStrategySelector};
use qplan::Engine;

fn foreign(rows: i64) -> Collection {
    let mut coll = Collection::new("bench.foreign", CollectionOptions::default());
    for i in 0..rows {
        let _ = coll.insert(Document::new().with("k", i % 64).with("v", format!("row-{i}")));
    }
    coll
}

fn local(rows: i64) -> Vec<Document> {
    (0..rows).map(|i| Document::new().with("a", i % 80)).collect()
}

fn spec() -> LookupSpec {
    LookupSpec {
        from: "bench.foreign".into(),
        local_field: "a".into(),
        foreign_field: "k".into(),
        as_field: "joined".into(),
    }
}

fn bench_joins(c: &mut Criterion) {
    let foreign = foreign(2_048);
    let local = local(512);
    let spill = SpillManager::in_memory("bench");
    c.bench_function("nested_loop_join", |b| {
        b.iter(|| nested_loop::join(&spec(), local.clone(), &foreign, usize::MAX).unwrap())
    });
    c.bench_function("hash_join_in_memory", |b| {
        b.iter(|| hash::join(&spec(), local.clone(), &foreign, usize::MAX, &spill).unwrap())
    });
    c.bench_function("hash_join_spilled", |b| {
        b.iter(|| hash::join(&spec(), local.clone(), &foreign, 0, &spill).unwrap())
    });
}

fn bench_join_selection(c: &mut Criterion) {
    let mut indexed = foreign(1_024);
    let _ = indexed.add_index(IndexSpec::new("k_1", &["k"]));
    let selector = JoinStrategySelector::from_config(&EngineConfig::default());
    c.bench_function("join_strategy_select", |b| {
        b.iter(|| {
            selector.select(
                &spec(),
                Some(&indexed),
                PushdownKnobs::default(),
                QueryOptions::allow_disk_use(true),
            )
        })
    });
}

fn bench_cached_query(c: &mut Criterion) {
    let engine = Engine::new(EngineConfig::default()).unwrap();
    let docs = (0..4_096i64)
        .map(|i| Document::new().with("a", i % 128).with("b", i))
        .collect();
    engine.insert_many("bench.local", docs).unwrap();
    engine
        .create_index("bench.local", IndexSpec::new("a_1", &["a"]))
        .unwrap();
    let pipeline = Pipeline::new(vec![Stage::Match(vec![Predicate::eq("a", 7i64)])]);
    // Warm until the entry is active so the loop measures the cached path.
    for _ in 0..3 {
        engine
            .aggregate("bench.local", &pipeline, QueryOptions::default())
            .unwrap();
    }
    assert_eq!(engine.list_cache_entries(&CacheFilter::default()).len(), 1);
    c.bench_function("cached_query", |b| {
        b.iter(|| {
            engine
                .aggregate("bench.local", &pipeline, QueryOptions::default())
                .unwrap()
        })
    });
}

criterion_group!(benches, bench_joins, bench_join_selection, bench_cached_query);
criterion_main!(benches);
