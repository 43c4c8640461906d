//! `$lookup` operators.
//!
//! Every operator attaches, to each local document, the array of foreign
//! documents whose `foreignField` meets one of the local document's lookup
//! keys, in the foreign collection's natural order. The algorithms differ only
//! in how they find those documents, so swapping one for another never changes
//! a result.

pub mod hash;
pub mod indexed;
pub mod nested_loop;

use std::sync::Arc;

use qplan_catalog::Collection;
use qplan_core::config::EngineConfig;
use qplan_core::shape::{lookup_matches, LookupSpec};
use qplan_core::types::{lookup_keys, Document, Value};
use qplan_mem::SpillManager;
use qplan_planner::{JoinAlgorithm, JoinStrategy};

use crate::error::{ExecError, Result};

/// What a lookup needs beyond its inputs.
pub struct JoinContext<'a> {
    /// Foreign collection as seen when the strategy was selected.
    pub foreign: Option<Arc<Collection>>,
    pub config: &'a EngineConfig,
    pub spill: &'a SpillManager,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JoinStats {
    /// Foreign documents read (scanned, fetched or buffered).
    pub foreign_examined: u64,
    pub spilled_segments: u64,
}

impl JoinStats {
    pub fn merge(&mut self, other: JoinStats) {
        self.foreign_examined += other.foreign_examined;
        self.spilled_segments += other.spilled_segments;
    }
}

/// Run one lookup with the chosen strategy.
pub fn run_lookup(
    strategy: &JoinStrategy,
    spec: &LookupSpec,
    local: Vec<Document>,
    ctx: &JoinContext<'_>,
) -> Result<(Vec<Document>, JoinStats)> {
    let Some(descriptor) = strategy.descriptor() else {
        return classic(spec, local, ctx.foreign.as_deref());
    };
    match (descriptor.algorithm, ctx.foreign.as_deref()) {
        (JoinAlgorithm::NonExistentForeignCollection, _) | (_, None) => {
            Ok((non_existent(spec, local)?, JoinStats::default()))
        }
        (JoinAlgorithm::NestedLoopJoin, Some(foreign)) => {
            nested_loop::join(spec, local, foreign, ctx.config.nlj_buffer_cap_bytes)
        }
        (JoinAlgorithm::IndexedLoopJoin, Some(foreign)) => {
            let index = descriptor.foreign_index_used.as_deref().ok_or_else(|| {
                ExecError::PlanningInconsistency("indexed loop join without an index".into())
            })?;
            indexed::join(spec, local, foreign, index)
        }
        (JoinAlgorithm::HashJoin, Some(foreign)) => {
            hash::join(spec, local, foreign, ctx.config.hash_join_mem_bytes, ctx.spill)
        }
    }
}

/// Empty arrays for every local document.
fn non_existent(spec: &LookupSpec, local: Vec<Document>) -> Result<Vec<Document>> {
    local
        .into_iter()
        .map(|doc| attach(doc, &spec.as_field, Vec::new()))
        .collect()
}

/// Row-at-a-time evaluation used when lookup pushdown is disabled: every
/// local document rescans the foreign collection.
fn classic(
    spec: &LookupSpec,
    local: Vec<Document>,
    foreign: Option<&Collection>,
) -> Result<(Vec<Document>, JoinStats)> {
    let Some(foreign) = foreign else {
        return Ok((non_existent(spec, local)?, JoinStats::default()));
    };
    let mut stats = JoinStats::default();
    let out = local
        .into_iter()
        .map(|doc| {
            let keys = lookup_keys(&doc, &spec.local_field);
            let mut matches = Vec::new();
            for (_, fdoc) in foreign.iter() {
                stats.foreign_examined += 1;
                if lookup_matches(&keys, fdoc, &spec.foreign_field) {
                    matches.push(fdoc.clone());
                }
            }
            attach(doc, &spec.as_field, matches)
        })
        .collect::<Result<_>>()?;
    Ok((out, stats))
}

/// Store `matches` under `as_field`, replacing whatever was there. A scalar
/// at the top of a dotted `as_field` is replaced; one deeper down is an error.
pub(crate) fn attach(mut doc: Document, as_field: &str, matches: Vec<Document>) -> Result<Document> {
    if let Some((head, _)) = as_field.split_once('.') {
        if !matches!(doc.get(head), None | Some(Value::Doc(_))) {
            doc.remove(head);
        }
    }
    let value = Value::Array(matches.into_iter().map(Value::Doc).collect());
    if !doc.set_path(as_field, value) {
        return Err(ExecError::BadValue(format!(
            "cannot attach lookup results at '{as_field}' inside a non-document"
        )));
    }
    Ok(doc)
}
