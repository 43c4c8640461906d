//! Local access path stages.
//!
//! Each call to `step` is one unit of work: a collection scan examines one
//! record, an index scan fetches one record id from its equality bound. Both
//! apply the whole leading filter to what they examine, so every candidate of
//! a query returns the same documents.

use std::sync::Arc;

use qplan_catalog::{Collection, RecordId};
use qplan_core::hash::Hash256;
use qplan_core::shape::Predicate;
use qplan_core::types::Document;
use qplan_planner::{AccessPath, CandidatePlan, TrialCandidate, TrialStep};

use crate::error::{ExecError, Result};

enum Cursor {
    /// Last record id examined.
    Scan(Option<RecordId>),
    /// Record ids under the bound key and the position of the next one.
    Seek { ids: Vec<RecordId>, pos: usize },
    /// The collection does not exist.
    Empty,
}

pub struct AccessStage {
    plan: CandidatePlan,
    collection: Option<Arc<Collection>>,
    filter: Vec<Predicate>,
    semantics: Hash256,
    cursor: Cursor,
    works: u64,
    examined: u64,
}

impl AccessStage {
    /// Bind `plan` to a collection snapshot and the filter's literals.
    pub fn build(
        plan: CandidatePlan,
        collection: Option<Arc<Collection>>,
        filter: &[Predicate],
        semantics: Hash256,
    ) -> Result<Self> {
        let cursor = match (&plan.access, collection.as_deref()) {
            (_, None) => Cursor::Empty,
            (AccessPath::CollScan, Some(_)) => Cursor::Scan(None),
            (AccessPath::IndexScan { index, .. }, Some(coll)) => {
                let data = coll.index(index).ok_or_else(|| {
                    ExecError::PlanningInconsistency(format!(
                        "plan uses index '{index}' which {} does not have",
                        coll.name
                    ))
                })?;
                let key = plan.bound_key(filter).ok_or_else(|| {
                    ExecError::PlanningInconsistency(format!(
                        "no equality predicate binds index '{index}'"
                    ))
                })?;
                Cursor::Seek {
                    ids: data.seek_eq(key).to_vec(),
                    pos: 0,
                }
            }
        };
        Ok(Self {
            plan,
            collection,
            filter: filter.to_vec(),
            semantics,
            cursor,
            works: 0,
            examined: 0,
        })
    }

    pub fn docs_examined(&self) -> u64 {
        self.examined
    }

    fn passes(&self, doc: &Document) -> bool {
        self.filter.iter().all(|p| p.matches(doc))
    }
}

impl TrialCandidate for AccessStage {
    fn plan(&self) -> &CandidatePlan {
        &self.plan
    }

    fn semantics(&self) -> Hash256 {
        self.semantics
    }

    fn step(&mut self) -> TrialStep {
        let Some(coll) = self.collection.clone() else {
            return TrialStep::Eof;
        };
        let doc = match &mut self.cursor {
            Cursor::Empty => return TrialStep::Eof,
            Cursor::Scan(last) => match coll.next_after(*last) {
                Some((id, doc)) => {
                    *last = Some(id);
                    doc
                }
                None => return TrialStep::Eof,
            },
            Cursor::Seek { ids, pos } => {
                let Some(id) = ids.get(*pos).copied() else {
                    return TrialStep::Eof;
                };
                *pos += 1;
                match coll.get(id) {
                    Some(doc) => doc,
                    None => {
                        self.works += 1;
                        return TrialStep::NeedTime;
                    }
                }
            }
        };
        self.works += 1;
        self.examined += 1;
        if self.passes(doc) {
            TrialStep::Advanced(doc.clone())
        } else {
            TrialStep::NeedTime
        }
    }

    fn works(&self) -> u64 {
        self.works
    }
}

/// Documents an access stage produced, plus how much work it took.
#[derive(Debug, Clone, Default)]
pub struct AccessRun {
    pub docs: Vec<Document>,
    pub works: u64,
    /// Works spent until EOF or until `window` documents were produced; this
    /// is what replanning compares against the cached works.
    pub trial_works: u64,
    pub examined: u64,
}

/// Run `stage` to completion, starting from documents it already produced.
/// `trial_works` is measured up to the `window`-th result; a zero window
/// measures nothing.
pub fn drain(
    stage: &mut AccessStage,
    mut docs: Vec<Document>,
    window: usize,
) -> AccessRun {
    let mut trial_works = (docs.len() >= window).then(|| stage.works());
    loop {
        match stage.step() {
            TrialStep::Advanced(doc) => {
                docs.push(doc);
                if trial_works.is_none() && docs.len() >= window {
                    trial_works = Some(stage.works());
                }
            }
            TrialStep::NeedTime => {}
            TrialStep::Eof => break,
        }
    }
    AccessRun {
        docs,
        works: stage.works(),
        trial_works: trial_works.unwrap_or(stage.works()),
        examined: stage.docs_examined(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qplan_catalog::{CollectionOptions, IndexSpec};
    use qplan_core::hash::hash_str;
    use qplan_core::id::CandidateId;
    use qplan_planner::enumerate_candidates;

    fn collection() -> Arc<Collection> {
        let mut c = Collection::new("t.c", CollectionOptions::default());
        c.add_index(IndexSpec::new("a_1", &["a"])).unwrap();
        for i in 0..20i64 {
            c.insert(Document::new().with("a", i % 4).with("b", i)).unwrap();
        }
        Arc::new(c)
    }

    #[test]
    fn scan_and_seek_return_the_same_documents() {
        let coll = collection();
        let filter = vec![Predicate::eq("a", 1i64)];
        let cands = enumerate_candidates(&filter, Some(&*coll));
        assert_eq!(cands.len(), 1);

        let mut ix = AccessStage::build(cands[0].clone(), Some(coll.clone()), &filter, hash_str("s")).unwrap();
        let scan_plan = CandidatePlan {
            id: CandidateId::new(1),
            access: AccessPath::CollScan,
        };
        let mut scan = AccessStage::build(scan_plan, Some(coll), &filter, hash_str("s")).unwrap();

        let by_index = drain(&mut ix, Vec::new(), 101);
        let by_scan = drain(&mut scan, Vec::new(), 101);
        assert_eq!(by_index.docs, by_scan.docs);
        assert_eq!(by_index.docs.len(), 5);
        assert_eq!(by_index.works, 5);
        assert_eq!(by_scan.works, 20);
        assert_eq!(by_scan.examined, 20);
    }

    #[test]
    fn trial_window_caps_measured_works() {
        let coll = collection();
        let plan = CandidatePlan {
            id: CandidateId::new(0),
            access: AccessPath::CollScan,
        };
        let mut scan = AccessStage::build(plan, Some(coll), &[], hash_str("s")).unwrap();
        let run = drain(&mut scan, Vec::new(), 3);
        assert_eq!(run.docs.len(), 20);
        assert_eq!(run.trial_works, 3);
        assert_eq!(run.works, 20);

        let plan = CandidatePlan {
            id: CandidateId::new(0),
            access: AccessPath::CollScan,
        };
        let mut scan = AccessStage::build(plan, Some(collection()), &[], hash_str("s")).unwrap();
        let run = drain(&mut scan, Vec::new(), 0);
        assert_eq!(run.docs.len(), 20);
        assert_eq!(run.trial_works, 0);
    }

    #[test]
    fn missing_collection_is_immediately_exhausted() {
        let plan = CandidatePlan {
            id: CandidateId::new(0),
            access: AccessPath::CollScan,
        };
        let mut stage = AccessStage::build(plan, None, &[], hash_str("s")).unwrap();
        assert_eq!(stage.step(), TrialStep::Eof);
        assert_eq!(stage.works(), 0);
    }
}
