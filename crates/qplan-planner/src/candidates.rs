//! Local access path enumeration.

use std::fmt;

use serde::{Deserialize, Serialize};

use qplan_catalog::{Collection, IndexSpec};
use qplan_core::id::CandidateId;
use qplan_core::shape::{CmpOp, Predicate};
use qplan_core::types::Value;

/// How the local collection is read. Literals are bound at execution time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "stage")]
pub enum AccessPath {
    #[serde(rename = "COLLSCAN")]
    CollScan,
    #[serde(rename = "IXSCAN")]
    IndexScan {
        index: String,
        #[serde(rename = "keyPattern")]
        key_pattern: String,
        field: String,
    },
}

impl fmt::Display for AccessPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessPath::CollScan => write!(f, "COLLSCAN"),
            AccessPath::IndexScan { key_pattern, .. } => write!(f, "FETCH <- IXSCAN {key_pattern}"),
        }
    }
}

/// A candidate for the local side of a query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidatePlan {
    pub id: CandidateId,
    pub access: AccessPath,
}

impl CandidatePlan {
    /// Identity used to decide whether two races picked "the same plan".
    pub fn same_plan(&self, other: &CandidatePlan) -> bool {
        self.access == other.access
    }

    pub fn index_name(&self) -> Option<&str> {
        match &self.access {
            AccessPath::IndexScan { index, .. } => Some(index),
            AccessPath::CollScan => None,
        }
    }

    /// Bind the equality literal this plan seeks on, taken from `filter`.
    pub fn bound_key<'a>(&self, filter: &'a [Predicate]) -> Option<&'a Value> {
        match &self.access {
            AccessPath::IndexScan { field, .. } => filter
                .iter()
                .find(|p| p.op == CmpOp::Eq && &p.field == field)
                .map(|p| &p.value),
            AccessPath::CollScan => None,
        }
    }
}

/// Whether `index` can answer an equality on `pred` without missing documents.
fn usable_for(index: &IndexSpec, pred: &Predicate) -> bool {
    if pred.op != CmpOp::Eq || index.leading_field() != pred.field {
        return false;
    }
    if index.partial_filter.is_some() {
        return false;
    }
    match &pred.value {
        Value::Array(_) => false,
        Value::Null => !index.sparse,
        _ => true,
    }
}

/// One index scan per usable local index in creation order; a collection scan
/// only when no index applies (or the collection does not exist).
pub fn enumerate_candidates(filter: &[Predicate], local: Option<&Collection>) -> Vec<CandidatePlan> {
    let mut out = Vec::new();
    if let Some(coll) = local {
        for index in coll.indexes() {
            if filter.iter().any(|p| usable_for(index, p)) {
                out.push(CandidatePlan {
                    id: CandidateId::new(out.len() as u64),
                    access: AccessPath::IndexScan {
                        index: index.name.clone(),
                        key_pattern: index.key_pattern(),
                        field: index.leading_field().to_string(),
                    },
                });
            }
        }
    }
    if out.is_empty() {
        out.push(CandidatePlan {
            id: CandidateId::new(0),
            access: AccessPath::CollScan,
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use qplan_catalog::CollectionOptions;

    #[test]
    fn one_candidate_per_usable_index_in_creation_order() {
        let mut c = Collection::new("t.c", CollectionOptions::default());
        c.add_index(IndexSpec::new("b_1", &["b"])).unwrap();
        c.add_index(IndexSpec::new("a_1", &["a"])).unwrap();
        c.add_index(IndexSpec::new("z_1", &["z"])).unwrap();
        c.add_index(IndexSpec::new("a_sparse", &["a"]).sparse()).unwrap();

        let filter = vec![Predicate::eq("a", 1i64), Predicate::eq("b", 2i64)];
        let cands = enumerate_candidates(&filter, Some(&c));
        let names: Vec<_> = cands.iter().filter_map(|c| c.index_name()).collect();
        assert_eq!(names, vec!["b_1", "a_1", "a_sparse"]);
        assert_eq!(cands[1].bound_key(&filter), Some(&Value::Int(1)));

        let null_filter = vec![Predicate::eq("a", Value::Null)];
        let names: Vec<_> = enumerate_candidates(&null_filter, Some(&c))
            .iter()
            .filter_map(|c| c.index_name().map(str::to_string))
            .collect();
        assert_eq!(names, vec!["a_1"]);
    }

    #[test]
    fn falls_back_to_collection_scan() {
        let c = Collection::new("t.c", CollectionOptions::default());
        let cands = enumerate_candidates(&[Predicate::new("a", CmpOp::Gt, 1i64)], Some(&c));
        assert_eq!(cands.len(), 1);
        assert_eq!(cands[0].access, AccessPath::CollScan);
        assert_eq!(enumerate_candidates(&[], None)[0].access, AccessPath::CollScan);
    }
}
