//! Nested loop join: buffer the foreign side once, then scan the buffer for
//! every local document. The buffer is capped; overflowing it fails the query
//! with `ResourceLimitExceeded` instead of degrading silently.

use qplan_catalog::Collection;
use qplan_core::shape::{lookup_matches, LookupSpec};
use qplan_core::types::{lookup_keys, Document};
use qplan_mem::BufferBudget;

use super::{attach, JoinStats};
use crate::error::{ExecError, Result};

pub fn join(
    spec: &LookupSpec,
    local: Vec<Document>,
    foreign: &Collection,
    buffer_cap_bytes: usize,
) -> Result<(Vec<Document>, JoinStats)> {
    let budget = BufferBudget::new(buffer_cap_bytes);
    let mut guard = budget.acquire(0, "nested_loop_join")?;
    let mut buffered: Vec<&Document> = Vec::with_capacity(foreign.len());
    for (_, doc) in foreign.iter() {
        if guard.grow(doc.approx_size()).is_err() {
            return Err(ExecError::ResourceLimitExceeded(format!(
                "nested loop join buffered {} of {} documents from {} before exceeding \
                 {buffer_cap_bytes} bytes; retry with allowDiskUse",
                buffered.len(),
                foreign.len(),
                foreign.name
            )));
        }
        buffered.push(doc);
    }

    #[cfg(feature = "tracing")]
    tracing::trace!(
        foreign = %foreign.name,
        docs = buffered.len(),
        bytes = budget.peak_bytes(),
        "nested loop join buffered foreign side"
    );

    let stats = JoinStats {
        foreign_examined: buffered.len() as u64,
        spilled_segments: 0,
    };
    let out = local
        .into_iter()
        .map(|doc| {
            let keys = lookup_keys(&doc, &spec.local_field);
            let matches = buffered
                .iter()
                .filter(|f| lookup_matches(&keys, f, &spec.foreign_field))
                .map(|f| (*f).clone())
                .collect();
            attach(doc, &spec.as_field, matches)
        })
        .collect::<Result<_>>()?;
    Ok((out, stats))
}
