//! Per-execution join algorithm selection for `$lookup`.
//!
//! Selection is a pure function of the lookup, the foreign collection as it is
//! right now, the pushdown knobs and the call's disk-use policy. It never
//! consults or influences the plan cache.

use std::fmt;

use serde::Serialize;

use qplan_catalog::{Collection, IndexSpec};
use qplan_core::config::{EngineConfig, PushdownKnobs, QueryOptions};
use qplan_core::shape::LookupSpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum JoinAlgorithm {
    NestedLoopJoin,
    IndexedLoopJoin,
    HashJoin,
    NonExistentForeignCollection,
}

impl fmt::Display for JoinAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JoinAlgorithm::NestedLoopJoin => "NestedLoopJoin",
            JoinAlgorithm::IndexedLoopJoin => "IndexedLoopJoin",
            JoinAlgorithm::HashJoin => "HashJoin",
            JoinAlgorithm::NonExistentForeignCollection => "NonExistentForeignCollection",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinPlanDescriptor {
    pub algorithm: JoinAlgorithm,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub foreign_index_used: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinStrategy {
    /// Lookup pushdown disabled: row-at-a-time evaluation, no descriptor.
    Classic,
    Pushed(JoinPlanDescriptor),
}

impl JoinStrategy {
    pub fn descriptor(&self) -> Option<&JoinPlanDescriptor> {
        match self {
            JoinStrategy::Classic => None,
            JoinStrategy::Pushed(d) => Some(d),
        }
    }

    pub fn algorithm(&self) -> Option<JoinAlgorithm> {
        self.descriptor().map(|d| d.algorithm)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct JoinStrategySelector {
    max_foreign_docs: usize,
    max_foreign_bytes: usize,
}

impl JoinStrategySelector {
    pub fn new(max_foreign_docs: usize, max_foreign_bytes: usize) -> Self {
        Self {
            max_foreign_docs,
            max_foreign_bytes,
        }
    }

    pub fn from_config(cfg: &EngineConfig) -> Self {
        Self::new(cfg.hash_join_max_foreign_docs, cfg.hash_join_max_foreign_bytes)
    }

    pub fn select(
        &self,
        lookup: &LookupSpec,
        foreign: Option<&Collection>,
        knobs: PushdownKnobs,
        options: QueryOptions,
    ) -> JoinStrategy {
        if knobs.disable_lookup_pushdown {
            return JoinStrategy::Classic;
        }
        let Some(foreign) = foreign else {
            return pushed(JoinAlgorithm::NonExistentForeignCollection, None);
        };
        if let Some(index) = eligible_index(foreign, &lookup.foreign_field) {
            return pushed(JoinAlgorithm::IndexedLoopJoin, Some(index.name.clone()));
        }
        if options.allow_disk_use && self.hash_join_eligible(foreign) {
            return pushed(JoinAlgorithm::HashJoin, None);
        }
        pushed(JoinAlgorithm::NestedLoopJoin, None)
    }

    pub fn hash_join_eligible(&self, foreign: &Collection) -> bool {
        foreign.len() <= self.max_foreign_docs && foreign.approx_bytes() <= self.max_foreign_bytes
    }
}

fn pushed(algorithm: JoinAlgorithm, foreign_index_used: Option<String>) -> JoinStrategy {
    JoinStrategy::Pushed(JoinPlanDescriptor {
        algorithm,
        foreign_index_used,
    })
}

/// Indexes whose leading field is the join field and which cover every
/// document (not sparse, not partial). Ties resolve on key length, then key
/// pattern.
fn eligible_index<'a>(foreign: &'a Collection, foreign_field: &str) -> Option<&'a IndexSpec> {
    foreign
        .indexes()
        .filter(|ix| {
            ix.leading_field() == foreign_field && !ix.sparse && ix.partial_filter.is_none()
        })
        .min_by(|a, b| {
            a.key
                .len()
                .cmp(&b.key.len())
                .then_with(|| a.key_pattern().cmp(&b.key_pattern()))
        })
}
