//! YAML scenarios: a sequence of DDL, loads, queries and writes run against
//! one engine.
//!
//! ```yaml
//! config:
//!   promotion_streak: 1
//! steps:
//!   - createCollection: { ns: test.local }
//!   - createIndex: { ns: test.local, name: a_1, key: [a] }
//!   - insert: { ns: test.local, docs: [{ a: 1 }, { a: 2 }] }
//!   - aggregate:
//!       ns: test.local
//!       pipeline:
//!         - $match: { a: 1 }
//!         - $lookup: { from: test.foreign, localField: a, foreignField: k, as: j }
//!   - setParameter: { name: disableLookupPushdown, value: true }
//!   - write: { ns: test.local, statements: [{ insert: { a: 3 } }] }
//!   - listCacheEntries: { ns: test.local }
//!   - clearCache
//! ```

use serde::Deserialize;
use serde_json::{json, Value as J};

use qplan_catalog::{CollectionOptions, IndexSpec, TimeseriesOptions};
use qplan_core::config::{EngineConfig, QueryOptions};
use qplan_core::shape::Pipeline;
use qplan_core::types::Document;
use qplan_exec::{Engine, ExecError, WriteBatch, WriteStatement};
use qplan_planner::{parse_filter, parse_pipeline_json, CacheFilter};

pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Scenario {
    /// Replaces the environment-derived configuration when present.
    #[serde(default)]
    pub config: Option<EngineConfig>,
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Step {
    CreateCollection {
        ns: String,
        #[serde(default)]
        timeseries: Option<TimeseriesOptions>,
    },
    DropCollection {
        ns: String,
    },
    CreateIndex {
        ns: String,
        name: String,
        key: Vec<String>,
        #[serde(default)]
        sparse: bool,
        #[serde(default, rename = "partialFilter")]
        partial_filter: Option<J>,
    },
    DropIndex {
        ns: String,
        name: String,
    },
    Insert {
        ns: String,
        docs: Vec<J>,
    },
    Aggregate {
        ns: String,
        pipeline: J,
        #[serde(default, rename = "allowDiskUse")]
        allow_disk_use: bool,
    },
    Explain {
        ns: String,
        pipeline: J,
        #[serde(default, rename = "allowDiskUse")]
        allow_disk_use: bool,
    },
    SetParameter {
        name: String,
        value: J,
    },
    Write {
        ns: String,
        statements: Vec<J>,
    },
    ListCacheEntries {
        #[serde(default)]
        ns: Option<String>,
    },
    Profile {
        #[serde(default)]
        ns: Option<String>,
    },
    ClearCache,
}

impl Step {
    pub fn name(&self) -> &'static str {
        match self {
            Step::CreateCollection { .. } => "createCollection",
            Step::DropCollection { .. } => "dropCollection",
            Step::CreateIndex { .. } => "createIndex",
            Step::DropIndex { .. } => "dropIndex",
            Step::Insert { .. } => "insert",
            Step::Aggregate { .. } => "aggregate",
            Step::Explain { .. } => "explain",
            Step::SetParameter { .. } => "setParameter",
            Step::Write { .. } => "write",
            Step::ListCacheEntries { .. } => "listCacheEntries",
            Step::Profile { .. } => "profile",
            Step::ClearCache => "clearCache",
        }
    }

    /// The pipeline of an aggregate or explain step.
    pub fn pipeline(&self) -> Option<(&str, &J, QueryOptions)> {
        match self {
            Step::Aggregate {
                ns,
                pipeline,
                allow_disk_use,
            }
            | Step::Explain {
                ns,
                pipeline,
                allow_disk_use,
            } => Some((ns.as_str(), pipeline, QueryOptions::allow_disk_use(*allow_disk_use))),
            _ => None,
        }
    }
}

pub fn parse_scenario(text: &str) -> Result<Scenario> {
    Ok(serde_yaml::from_str(text)?)
}

/// Check that every pipeline, filter, document and statement in the scenario
/// parses, without running anything.
pub fn validate(scenario: &Scenario) -> Result<()> {
    if let Some(cfg) = &scenario.config {
        cfg.validate()?;
    }
    for (i, step) in scenario.steps.iter().enumerate() {
        prepare(step).map_err(|e| format!("step {i} ({}): {e}", step.name()))?;
    }
    Ok(())
}

/// Parsed payload of one step.
enum Prepared {
    None,
    Index(IndexSpec),
    Docs(Vec<Document>),
    Pipeline(Pipeline),
    Batch(WriteBatch),
}

fn prepare(step: &Step) -> Result<Prepared> {
    Ok(match step {
        Step::CreateIndex {
            name,
            key,
            sparse,
            partial_filter,
            ..
        } => Prepared::Index(IndexSpec {
            name: name.clone(),
            key: key.clone(),
            sparse: *sparse,
            partial_filter: partial_filter.as_ref().map(parse_filter).transpose()?,
        }),
        Step::Insert { docs, .. } => Prepared::Docs(
            docs.iter()
                .map(|d| Document::from_json(d.clone()).ok_or("documents must be objects"))
                .collect::<std::result::Result<_, _>>()?,
        ),
        Step::Aggregate { pipeline, .. } | Step::Explain { pipeline, .. } => {
            Prepared::Pipeline(parse_pipeline_json(pipeline)?)
        }
        Step::Write { ns, statements } => Prepared::Batch(WriteBatch::new(
            ns.clone(),
            statements
                .iter()
                .map(WriteStatement::from_json)
                .collect::<qplan_exec::Result<_>>()?,
        )),
        _ => Prepared::None,
    })
}

/// Run one step. Engine errors become `{ok: 0, code, ...}` results so later
/// steps still run; malformed steps abort the scenario.
pub fn run_step(engine: &Engine, step: &Step) -> Result<J> {
    let prepared = prepare(step)?;
    let outcome: std::result::Result<J, ExecError> = match (step, prepared) {
        (Step::CreateCollection { ns, timeseries }, _) => engine
            .create_collection(
                ns,
                CollectionOptions {
                    timeseries: timeseries.clone(),
                },
            )
            .map(|()| json!({"ok": 1})),
        (Step::DropCollection { ns }, _) => Ok(json!({"ok": 1, "dropped": engine.drop_collection(ns)})),
        (Step::CreateIndex { ns, .. }, Prepared::Index(spec)) => engine
            .create_index(ns, spec)
            .map(|created| json!({"ok": 1, "created": created})),
        (Step::DropIndex { ns, name }, _) => engine.drop_index(ns, name).map(|()| json!({"ok": 1})),
        (Step::Insert { ns, .. }, Prepared::Docs(docs)) => engine
            .insert_many(ns, docs)
            .map(|n| json!({"ok": 1, "nInserted": n})),
        (Step::Aggregate { ns, allow_disk_use, .. }, Prepared::Pipeline(p)) => engine
            .aggregate(ns, &p, QueryOptions::allow_disk_use(*allow_disk_use))
            .map(|out| out.to_json()),
        (Step::Explain { ns, allow_disk_use, .. }, Prepared::Pipeline(p)) => engine
            .explain(ns, &p, QueryOptions::allow_disk_use(*allow_disk_use))
            .map(|plan| plan.to_json()),
        (Step::SetParameter { name, value }, _) => {
            let value = match value {
                J::String(s) => s.clone(),
                other => other.to_string(),
            };
            engine.set_parameter(name, &value).map(|()| json!({"ok": 1}))
        }
        (Step::Write { .. }, Prepared::Batch(batch)) => engine
            .write(&batch)
            .map(|summary| serde_json::to_value(summary).unwrap_or(J::Null)),
        (Step::ListCacheEntries { ns }, _) => {
            let filter = CacheFilter {
                namespace: ns.clone(),
                ..CacheFilter::default()
            };
            Ok(serde_json::to_value(engine.list_cache_entries(&filter))?)
        }
        (Step::Profile { ns }, _) => Ok(serde_json::to_value(engine.profile(ns.as_deref()))?),
        (Step::ClearCache, _) => Ok(json!({"ok": 1, "removed": engine.clear_cache()})),
        (step, _) => return Err(format!("step '{}' could not be prepared", step.name()).into()),
    };
    Ok(outcome.unwrap_or_else(|e| e.to_json()))
}

/// Run every step in order, returning one result per step.
pub fn run(engine: &Engine, scenario: &Scenario) -> Result<Vec<J>> {
    let mut results = Vec::with_capacity(scenario.steps.len());
    for (i, step) in scenario.steps.iter().enumerate() {
        let result = run_step(engine, step)?;
        tracing::debug!(step = i, op = step.name(), "scenario step done");
        results.push(json!({"step": i, "op": step.name(), "result": result}));
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCENARIO: &str = r#"
steps:
  - createCollection: { ns: test.local }
  - createIndex: { ns: test.local, name: a_1, key: [a] }
  - insert:
      ns: test.local
      docs: [{ a: 1, b: 1 }, { a: 1, b: 2 }, { a: 2, b: 3 }]
  - insert:
      ns: test.foreign
      docs: [{ k: 1, v: x }, { k: 2, v: y }]
  - aggregate:
      ns: test.local
      pipeline:
        - $match: { a: 1 }
        - $lookup: { from: test.foreign, localField: a, foreignField: k, as: j }
  - explain:
      ns: test.local
      pipeline: [{ $match: { a: 1 } }]
  - setParameter: { name: disableLookupPushdown, value: true }
  - write: { ns: test.local, statements: [{ delete: { q: { a: 2 } } }] }
  - listCacheEntries: { ns: test.local }
  - dropCollection: { ns: test.nothing }
  - clearCache
"#;

    #[test]
    fn runs_a_scenario_end_to_end() {
        let scenario = parse_scenario(SCENARIO).unwrap();
        validate(&scenario).unwrap();
        let engine = Engine::new(EngineConfig::default()).unwrap();
        let results = run(&engine, &scenario).unwrap();
        assert_eq!(results.len(), 11);

        let agg = &results[4]["result"];
        assert_eq!(agg["fromMultiPlanner"], json!(true));
        assert_eq!(agg["joinAlgorithm"], json!("NestedLoopJoin"));
        assert_eq!(agg["docs"].as_array().map(Vec::len), Some(2));

        assert_eq!(results[7]["result"]["nDeleted"], json!(1));
        assert_eq!(results[8]["result"].as_array().map(Vec::len), Some(1));
        assert_eq!(results[9]["result"]["dropped"], json!(false));
        assert_eq!(results[10]["result"]["removed"], json!(1));
    }

    #[test]
    fn engine_errors_become_results() {
        let scenario = parse_scenario(
            "steps:\n  - setParameter: { name: noSuchKnob, value: 1 }\n",
        )
        .unwrap();
        let engine = Engine::new(EngineConfig::default()).unwrap();
        let results = run(&engine, &scenario).unwrap();
        assert_eq!(results[0]["result"]["ok"], json!(0));
    }

    #[test]
    fn validate_reports_the_bad_step() {
        let scenario = parse_scenario(
            "steps:\n  - aggregate: { ns: t.c, pipeline: [{ $sort: { a: 1 } }] }\n",
        )
        .unwrap();
        let err = validate(&scenario).unwrap_err().to_string();
        assert!(err.starts_with("step 0 (aggregate)"), "{err}");
    }
}
