//! Tracing hooks for executions and write batches.
//!
//! Without the `tracing` feature these compile to nothing. Exporters belong in
//! the binary layer.

use crate::profile::ProfileEntry;
use crate::write::WriteSummary;

#[cfg(feature = "tracing")]
pub fn record_query(entry: &ProfileEntry) {
    let span = tracing::span!(tracing::Level::DEBUG, "query", namespace = %entry.namespace);
    let _enter = span.enter();
    tracing::debug!(
        query_hash = %entry.query_hash,
        plan_cache_key = %entry.plan_cache_key,
        from_multi_planner = entry.from_multi_planner,
        replanned = entry.replanned,
        plan = %entry.plan_summary,
        join_algorithm = ?entry.join_algorithm,
        works = entry.works,
        docs_examined = entry.docs_examined,
        n_returned = entry.n_returned,
        "query executed"
    );
}

#[cfg(not(feature = "tracing"))]
pub fn record_query(_entry: &ProfileEntry) {}

#[cfg(feature = "tracing")]
pub fn record_write(namespace: &str, summary: &WriteSummary) {
    tracing::debug!(
        namespace,
        inserted = summary.n_inserted,
        matched = summary.n_matched,
        modified = summary.n_modified,
        deleted = summary.n_deleted,
        checkpoints = summary.checkpoints,
        "write batch committed"
    );
}

#[cfg(not(feature = "tracing"))]
pub fn record_write(_namespace: &str, _summary: &WriteSummary) {}
