//! Indexed loop join: one equality seek into a foreign index per local key.

use qplan_catalog::{Collection, RecordId};
use qplan_core::shape::LookupSpec;
use qplan_core::types::{lookup_keys, Document};

use super::{attach, JoinStats};
use crate::error::{ExecError, Result};

pub fn join(
    spec: &LookupSpec,
    local: Vec<Document>,
    foreign: &Collection,
    index: &str,
) -> Result<(Vec<Document>, JoinStats)> {
    let data = foreign.index(index).ok_or_else(|| {
        ExecError::PlanningInconsistency(format!(
            "foreign index '{index}' vanished from {}",
            foreign.name
        ))
    })?;
    let mut stats = JoinStats::default();
    let mut out = Vec::with_capacity(local.len());
    for doc in local {
        let mut ids: Vec<RecordId> = lookup_keys(&doc, &spec.local_field)
            .iter()
            .flat_map(|key| data.seek_eq(key).iter().copied())
            .collect();
        // Natural order, each foreign document once even when several keys hit it.
        ids.sort_unstable();
        ids.dedup();
        stats.foreign_examined += ids.len() as u64;
        let matches = ids
            .into_iter()
            .filter_map(|id| foreign.get(id).cloned())
            .collect();
        out.push(attach(doc, &spec.as_field, matches)?);
    }
    Ok((out, stats))
}
