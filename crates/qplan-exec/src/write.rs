//! Guarded multi-statement write batches.
//!
//! A batch captures the namespace's catalog generation when it starts. Before
//! each statement it calls the checkpoint hook, re-validates the generation
//! and checks the statement against the collection it saw. After one last
//! validation under the catalog write lock, all statements are staged over
//! the live collection and published together. A batch that fails anywhere
//! writes nothing.

use serde::Serialize;
use serde_json::Value as J;

use qplan_catalog::{
    Catalog, CatalogError, CatalogGenerationGuard, CheckpointHook, Collection, RecordId, Staged,
};
use qplan_core::shape::Predicate;
use qplan_core::types::{Document, Value};
use qplan_planner::parse_filter;

use crate::error::{ExecError, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum WriteStatement {
    Insert(Document),
    Update {
        filter: Vec<Predicate>,
        set: Vec<(String, Value)>,
        unset: Vec<String>,
        multi: bool,
    },
    Delete {
        filter: Vec<Predicate>,
        multi: bool,
    },
}

impl WriteStatement {
    /// `{insert: {...}}`, `{update: {q, u: {$set, $unset}, multi}}` or
    /// `{delete: {q, multi}}`.
    pub fn from_json(stmt: &J) -> Result<Self> {
        let obj = stmt
            .as_object()
            .filter(|o| o.len() == 1)
            .ok_or_else(|| bad("a write statement is an object with one key"))?;
        let Some((kind, body)) = obj.iter().next() else {
            return Err(bad("empty write statement"));
        };
        let multi = body.get("multi").and_then(J::as_bool).unwrap_or(false);
        let filter = || -> Result<Vec<Predicate>> {
            match body.get("q") {
                Some(q) => Ok(parse_filter(q)?),
                None => Ok(Vec::new()),
            }
        };
        match kind.as_str() {
            "insert" => Document::from_json(body.clone())
                .map(WriteStatement::Insert)
                .ok_or_else(|| bad("insert takes a document")),
            "update" => {
                let u = body
                    .get("u")
                    .and_then(J::as_object)
                    .ok_or_else(|| bad("update requires an update document 'u'"))?;
                let mut set = Vec::new();
                let mut unset = Vec::new();
                for (op, fields) in u {
                    let fields = fields
                        .as_object()
                        .ok_or_else(|| bad(format!("{op} takes an object")))?;
                    match op.as_str() {
                        "$set" => set.extend(fields.iter().map(|(k, v)| (k.clone(), Value::from(v.clone())))),
                        "$unset" => unset.extend(fields.keys().cloned()),
                        other => return Err(bad(format!("unsupported update operator '{other}'"))),
                    }
                }
                Ok(WriteStatement::Update {
                    filter: filter()?,
                    set,
                    unset,
                    multi,
                })
            }
            "delete" => Ok(WriteStatement::Delete {
                filter: filter()?,
                multi,
            }),
            other => Err(bad(format!("unsupported write statement '{other}'"))),
        }
    }

    fn touched_paths(&self) -> impl Iterator<Item = &str> {
        let (set, unset): (&[(String, Value)], &[String]) = match self {
            WriteStatement::Update { set, unset, .. } => (set.as_slice(), unset.as_slice()),
            _ => (&[], &[]),
        };
        set.iter()
            .map(|(p, _)| p.as_str())
            .chain(unset.iter().map(String::as_str))
    }
}

#[derive(Debug, Clone)]
pub struct WriteBatch {
    pub namespace: String,
    pub statements: Vec<WriteStatement>,
}

impl WriteBatch {
    pub fn new(namespace: impl Into<String>, statements: Vec<WriteStatement>) -> Self {
        Self {
            namespace: namespace.into(),
            statements,
        }
    }

    fn has_inserts(&self) -> bool {
        self.statements
            .iter()
            .any(|s| matches!(s, WriteStatement::Insert(_)))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteSummary {
    pub n_inserted: u64,
    pub n_matched: u64,
    pub n_modified: u64,
    pub n_deleted: u64,
    pub checkpoints: u64,
}

/// Whether `stmt` may run against `current`.
///
/// Updates to a time-series collection may only touch its meta field.
pub fn check_statement(stmt: &WriteStatement, current: Option<&Collection>) -> qplan_catalog::Result<()> {
    for path in stmt.touched_paths() {
        if path == "_id" || path.starts_with("_id.") {
            return Err(CatalogError::BadValue("_id cannot be modified".into()));
        }
    }
    let Some(ts) = current.and_then(Collection::timeseries) else {
        return Ok(());
    };
    for path in stmt.touched_paths() {
        let allowed = ts.meta_field.as_deref().is_some_and(|meta| {
            path == meta || path.strip_prefix(meta).is_some_and(|rest| rest.starts_with('.'))
        });
        if !allowed {
            let reason = match &ts.meta_field {
                Some(meta) => format!("time-series updates may only modify the meta field '{meta}'"),
                None => "time-series collection has no meta field to update".to_string(),
            };
            return Err(CatalogError::invalid_options(path, reason));
        }
    }
    Ok(())
}

fn matching_ids(coll: &Staged<'_>, filter: &[Predicate], multi: bool) -> Vec<RecordId> {
    let hits = coll
        .iter()
        .filter(|(_, doc)| filter.iter().all(|p| p.matches(doc)))
        .map(|(id, _)| id);
    if multi {
        hits.collect()
    } else {
        hits.take(1).collect()
    }
}

/// Stage every statement over `coll`, in order.
pub fn apply_statements(
    coll: &mut Staged<'_>,
    statements: &[WriteStatement],
) -> qplan_catalog::Result<WriteSummary> {
    let mut summary = WriteSummary::default();
    for stmt in statements {
        check_statement(stmt, Some(coll.base()))?;
        match stmt {
            WriteStatement::Insert(doc) => {
                coll.insert(doc.clone())?;
                summary.n_inserted += 1;
            }
            WriteStatement::Update {
                filter,
                set,
                unset,
                multi,
            } => {
                for id in matching_ids(coll, filter, *multi) {
                    let Some(before) = coll.get(id) else { continue };
                    let mut after = before.clone();
                    for (path, value) in set {
                        if !after.set_path(path, value.clone()) {
                            return Err(CatalogError::BadValue(format!(
                                "cannot create field '{path}' inside a non-document"
                            )));
                        }
                    }
                    for path in unset {
                        after.unset_path(path);
                    }
                    summary.n_matched += 1;
                    if &after != before {
                        coll.replace(id, after)?;
                        summary.n_modified += 1;
                    }
                }
            }
            WriteStatement::Delete { filter, multi } => {
                for id in matching_ids(coll, filter, *multi) {
                    if coll.remove(id) {
                        summary.n_deleted += 1;
                    }
                }
            }
        }
    }
    Ok(summary)
}

/// Run `batch` against `catalog`, consulting `hook` before every checkpoint.
pub fn execute(catalog: &Catalog, hook: &dyn CheckpointHook, batch: &WriteBatch) -> Result<WriteSummary> {
    let ns = batch.namespace.as_str();
    let mut guard = CatalogGenerationGuard::start(catalog, ns);
    let mut seen_collection = false;
    for (i, stmt) in batch.statements.iter().enumerate() {
        hook.before_checkpoint(ns, i);
        let current = guard.checkpoint(catalog)?;
        if let Err(e) = check_statement(stmt, current.as_deref()) {
            guard.abort();
            return Err(e.into());
        }
        seen_collection = current.is_some();
    }

    crate::fail_point!("write_batch_before_commit");

    if !seen_collection && !batch.has_inserts() {
        // Nothing to update or delete in a namespace that does not exist.
        guard.complete()?;
        return Ok(WriteSummary {
            checkpoints: guard.checkpoints(),
            ..WriteSummary::default()
        });
    }

    let mut summary = catalog
        .commit_guarded(&mut guard, |coll| apply_statements(coll, &batch.statements))?;
    summary.checkpoints = guard.checkpoints();
    crate::metrics::record_write(ns, &summary);
    Ok(summary)
}

fn bad(msg: impl Into<String>) -> ExecError {
    ExecError::BadValue(msg.into())
}
