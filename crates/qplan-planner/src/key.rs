//! Plan cache keys.
//!
//! A key is the query shape hash combined with the local index context: the
//! indexes on the local collection whose leading field the filter references.
//! Foreign collections, disk-use policy and pushdown knobs never contribute.

use std::fmt;

use serde::Serialize;

use qplan_catalog::Collection;
use qplan_core::hash::{hash_serde, Hash256};
use qplan_core::shape::{Pipeline, QueryShape};

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PlanCacheKey {
    pub namespace: String,
    pub shape_hash: Hash256,
    pub index_context: Hash256,
}

#[derive(Serialize)]
struct IndexContext<'a> {
    name: &'a str,
    key: &'a [String],
    sparse: bool,
    partial: bool,
}

impl PlanCacheKey {
    pub fn derive(namespace: &str, pipeline: &Pipeline, local: Option<&Collection>) -> Result<Self> {
        let shape_hash = QueryShape::of(namespace, pipeline).shape_hash()?;

        let filter = pipeline.leading_filter();
        let mut relevant: Vec<IndexContext<'_>> = local
            .map(|c| {
                c.indexes()
                    .filter(|ix| filter.iter().any(|p| p.field == ix.leading_field()))
                    .map(|ix| IndexContext {
                        name: &ix.name,
                        key: &ix.key,
                        sparse: ix.sparse,
                        partial: ix.partial_filter.is_some(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        relevant.sort_by(|a, b| a.name.cmp(b.name));
        let index_context = hash_serde(&relevant)?;

        Ok(Self {
            namespace: namespace.to_string(),
            shape_hash,
            index_context,
        })
    }

    /// `queryHash`: 8 uppercase hex digits of the shape hash.
    pub fn query_hash(&self) -> String {
        self.shape_hash.short()
    }

    /// `planCacheKey`: 8 uppercase hex digits of shape + index context.
    pub fn plan_cache_key(&self) -> String {
        self.shape_hash.combine(&self.index_context).short()
    }
}

impl fmt::Display for PlanCacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.query_hash(), self.plan_cache_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qplan_catalog::{CollectionOptions, IndexSpec};
    use qplan_core::shape::{LookupSpec, Predicate, Stage};

    fn lookup_pipeline(a: i64) -> Pipeline {
        Pipeline::new(vec![
            Stage::Match(vec![Predicate::eq("a", a)]),
            Stage::Lookup(LookupSpec {
                from: "t.f".into(),
                local_field: "a".into(),
                foreign_field: "k".into(),
                as_field: "out".into(),
            }),
        ])
    }

    #[test]
    fn literals_do_not_change_the_key() {
        let k1 = PlanCacheKey::derive("t.c", &lookup_pipeline(1), None).unwrap();
        let k2 = PlanCacheKey::derive("t.c", &lookup_pipeline(2), None).unwrap();
        assert_eq!(k1, k2);
        assert_eq!(k1.query_hash().len(), 8);
        assert_eq!(k1.plan_cache_key().len(), 8);
    }

    #[test]
    fn relevant_local_indexes_change_the_key_irrelevant_ones_do_not() {
        let mut c = Collection::new("t.c", CollectionOptions::default());
        let bare = PlanCacheKey::derive("t.c", &lookup_pipeline(1), Some(&c)).unwrap();

        c.add_index(IndexSpec::new("z_1", &["z"])).unwrap();
        let with_irrelevant = PlanCacheKey::derive("t.c", &lookup_pipeline(1), Some(&c)).unwrap();
        assert_eq!(bare, with_irrelevant);

        c.add_index(IndexSpec::new("a_1", &["a"])).unwrap();
        let with_relevant = PlanCacheKey::derive("t.c", &lookup_pipeline(1), Some(&c)).unwrap();
        assert_ne!(bare, with_relevant);
        assert_eq!(bare.query_hash(), with_relevant.query_hash());
        assert_ne!(bare.plan_cache_key(), with_relevant.plan_cache_key());
    }
}
