//! Collections, their options and secondary indexes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use qplan_core::id::CollectionUuid;
use qplan_core::shape::Predicate;
use qplan_core::types::{lookup_keys, Document, Value};

use crate::error::{CatalogError, Result};

pub type RecordId = u64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeseriesOptions {
    pub time_field: String,
    #[serde(default)]
    pub meta_field: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionOptions {
    #[serde(default)]
    pub timeseries: Option<TimeseriesOptions>,
}

impl CollectionOptions {
    pub fn timeseries(time_field: impl Into<String>, meta_field: Option<&str>) -> Self {
        Self {
            timeseries: Some(TimeseriesOptions {
                time_field: time_field.into(),
                meta_field: meta_field.map(str::to_string),
            }),
        }
    }
}

/// Ascending single or compound index definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexSpec {
    pub name: String,
    pub key: Vec<String>,
    #[serde(default)]
    pub sparse: bool,
    #[serde(default)]
    pub partial_filter: Option<Vec<Predicate>>,
}

impl IndexSpec {
    pub fn new(name: impl Into<String>, key: &[&str]) -> Self {
        Self {
            name: name.into(),
            key: key.iter().map(|k| k.to_string()).collect(),
            sparse: false,
            partial_filter: None,
        }
    }

    pub fn sparse(mut self) -> Self {
        self.sparse = true;
        self
    }

    pub fn partial(mut self, filter: Vec<Predicate>) -> Self {
        self.partial_filter = Some(filter);
        self
    }

    pub fn leading_field(&self) -> &str {
        self.key.first().map(String::as_str).unwrap_or("")
    }

    /// `{a: 1, b: 1}` rendering used in explain output and for ordering.
    pub fn key_pattern(&self) -> String {
        let fields: Vec<String> = self.key.iter().map(|k| format!("{k}: 1")).collect();
        format!("{{{}}}", fields.join(", "))
    }

    fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(CatalogError::BadValue("index name must not be empty".into()));
        }
        if self.key.is_empty() || self.key.iter().any(|k| k.is_empty()) {
            return Err(CatalogError::BadValue(format!(
                "index '{}' needs at least one non-empty key field",
                self.name
            )));
        }
        Ok(())
    }

    /// Keys this index stores for `doc` (on its leading field). Empty when the
    /// document is excluded by sparseness or the partial filter.
    fn keys_for(&self, doc: &Document) -> Vec<Value> {
        if self.sparse && doc.get_path(self.leading_field()).is_none() {
            return Vec::new();
        }
        if let Some(filter) = &self.partial_filter {
            if !filter.iter().all(|p| p.matches(doc)) {
                return Vec::new();
            }
        }
        let mut keys = lookup_keys(doc, self.leading_field());
        keys.sort();
        keys.dedup();
        keys
    }
}

/// An index definition plus its entries, keyed on the leading field.
#[derive(Debug, Clone)]
pub struct IndexData {
    pub spec: IndexSpec,
    entries: BTreeMap<Value, Vec<RecordId>>,
}

impl IndexData {
    fn new(spec: IndexSpec) -> Self {
        Self {
            spec,
            entries: BTreeMap::new(),
        }
    }

    fn add(&mut self, id: RecordId, doc: &Document) {
        for key in self.spec.keys_for(doc) {
            let ids = self.entries.entry(key).or_default();
            if let Err(pos) = ids.binary_search(&id) {
                ids.insert(pos, id);
            }
        }
    }

    fn remove(&mut self, id: RecordId, doc: &Document) {
        for key in self.spec.keys_for(doc) {
            let now_empty = match self.entries.get_mut(&key) {
                Some(ids) => {
                    if let Ok(pos) = ids.binary_search(&id) {
                        ids.remove(pos);
                    }
                    ids.is_empty()
                }
                None => false,
            };
            if now_empty {
                self.entries.remove(&key);
            }
        }
    }

    /// Record ids whose leading key equals `key`, in record order.
    pub fn seek_eq(&self, key: &Value) -> &[RecordId] {
        self.entries.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn distinct_keys(&self) -> usize {
        self.entries.len()
    }
}

#[derive(Debug, Clone)]
pub struct Collection {
    pub name: String,
    pub uuid: CollectionUuid,
    pub options: CollectionOptions,
    indexes: Vec<IndexData>,
    records: BTreeMap<RecordId, Document>,
    next_record: RecordId,
    approx_bytes: usize,
}

impl Collection {
    pub fn new(name: impl Into<String>, options: CollectionOptions) -> Self {
        Self {
            name: name.into(),
            uuid: CollectionUuid::generate(),
            options,
            indexes: Vec::new(),
            records: BTreeMap::new(),
            next_record: 1,
            approx_bytes: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn approx_bytes(&self) -> usize {
        self.approx_bytes
    }

    pub fn timeseries(&self) -> Option<&TimeseriesOptions> {
        self.options.timeseries.as_ref()
    }

    pub fn get(&self, id: RecordId) -> Option<&Document> {
        self.records.get(&id)
    }

    /// First record with an id strictly greater than `after`.
    pub fn next_after(&self, after: Option<RecordId>) -> Option<(RecordId, &Document)> {
        use std::ops::Bound::{Excluded, Unbounded};
        let lower = match after {
            Some(id) => Excluded(id),
            None => Unbounded,
        };
        self.records
            .range((lower, Unbounded))
            .next()
            .map(|(id, doc)| (*id, doc))
    }

    pub fn iter(&self) -> impl Iterator<Item = (RecordId, &Document)> {
        self.records.iter().map(|(id, d)| (*id, d))
    }

    pub fn indexes(&self) -> impl Iterator<Item = &IndexSpec> {
        self.indexes.iter().map(|i| &i.spec)
    }

    pub fn index(&self, name: &str) -> Option<&IndexData> {
        self.indexes.iter().find(|i| i.spec.name == name)
    }

    fn check_insert(&self, doc: &Document) -> Result<()> {
        if let Some(ts) = &self.options.timeseries {
            if doc.get_path(&ts.time_field).is_none() {
                return Err(CatalogError::BadValue(format!(
                    "time-series document is missing time field '{}'",
                    ts.time_field
                )));
            }
        }
        Ok(())
    }

    /// Insert a document, assigning `_id` from the record id when absent.
    pub fn insert(&mut self, mut doc: Document) -> Result<RecordId> {
        self.check_insert(&doc)?;
        let id = self.next_record;
        self.next_record += 1;
        if doc.get("_id").is_none() {
            doc.insert("_id", Value::Int(id as i64));
        }
        for index in &mut self.indexes {
            index.add(id, &doc);
        }
        self.approx_bytes += doc.approx_size();
        self.records.insert(id, doc);
        Ok(id)
    }

    pub fn replace(&mut self, id: RecordId, doc: Document) -> Result<()> {
        let old = self
            .records
            .remove(&id)
            .ok_or_else(|| CatalogError::BadValue(format!("record {id} does not exist")))?;
        for index in &mut self.indexes {
            index.remove(id, &old);
            index.add(id, &doc);
        }
        self.approx_bytes = self.approx_bytes.saturating_sub(old.approx_size()) + doc.approx_size();
        self.records.insert(id, doc);
        Ok(())
    }

    /// Store `doc` under `id`, replacing any record already there.
    fn put(&mut self, id: RecordId, doc: Document) {
        if let Some(old) = self.records.remove(&id) {
            for index in &mut self.indexes {
                index.remove(id, &old);
            }
            self.approx_bytes = self.approx_bytes.saturating_sub(old.approx_size());
        }
        for index in &mut self.indexes {
            index.add(id, &doc);
        }
        self.approx_bytes += doc.approx_size();
        self.records.insert(id, doc);
        self.next_record = self.next_record.max(id + 1);
    }

    pub fn remove(&mut self, id: RecordId) -> Option<Document> {
        let old = self.records.remove(&id)?;
        for index in &mut self.indexes {
            index.remove(id, &old);
        }
        self.approx_bytes = self.approx_bytes.saturating_sub(old.approx_size());
        Some(old)
    }

    /// Returns false when an identical index already exists.
    pub fn add_index(&mut self, spec: IndexSpec) -> Result<bool> {
        spec.validate()?;
        if let Some(existing) = self.indexes.iter().find(|i| i.spec.name == spec.name) {
            if existing.spec == spec {
                return Ok(false);
            }
            return Err(CatalogError::IndexConflict(spec.name));
        }
        let mut data = IndexData::new(spec);
        for (id, doc) in &self.records {
            data.add(*id, doc);
        }
        self.indexes.push(data);
        Ok(true)
    }

    pub fn drop_index(&mut self, name: &str) -> Result<IndexSpec> {
        let pos = self
            .indexes
            .iter()
            .position(|i| i.spec.name == name)
            .ok_or_else(|| CatalogError::IndexNotFound(name.to_string()))?;
        Ok(self.indexes.remove(pos).spec)
    }
}

/// Writes staged over a collection that stays untouched until the staged
/// changes are applied. Reads through `Staged` see the staged state.
#[derive(Debug)]
pub struct Staged<'a> {
    base: &'a Collection,
    changes: BTreeMap<RecordId, Option<Document>>,
    next_record: RecordId,
}

impl<'a> Staged<'a> {
    pub fn new(base: &'a Collection) -> Self {
        Self {
            base,
            changes: BTreeMap::new(),
            next_record: base.next_record,
        }
    }

    pub fn base(&self) -> &'a Collection {
        self.base
    }

    pub fn get(&self, id: RecordId) -> Option<&Document> {
        match self.changes.get(&id) {
            Some(change) => change.as_ref(),
            None => self.base.get(id),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (RecordId, &Document)> + '_ {
        let existing = self
            .base
            .records
            .iter()
            .filter_map(move |(id, doc)| match self.changes.get(id) {
                Some(change) => change.as_ref().map(|d| (*id, d)),
                None => Some((*id, doc)),
            });
        let added = self
            .changes
            .range(self.base.next_record..)
            .filter_map(|(id, change)| change.as_ref().map(|d| (*id, d)));
        existing.chain(added)
    }

    pub fn insert(&mut self, mut doc: Document) -> Result<RecordId> {
        self.base.check_insert(&doc)?;
        let id = self.next_record;
        self.next_record += 1;
        if doc.get("_id").is_none() {
            doc.insert("_id", Value::Int(id as i64));
        }
        self.changes.insert(id, Some(doc));
        Ok(id)
    }

    pub fn replace(&mut self, id: RecordId, doc: Document) -> Result<()> {
        if self.get(id).is_none() {
            return Err(CatalogError::BadValue(format!("record {id} does not exist")));
        }
        self.changes.insert(id, Some(doc));
        Ok(())
    }

    /// Returns whether a record was there to remove.
    pub fn remove(&mut self, id: RecordId) -> bool {
        let existed = self.get(id).is_some();
        if existed {
            self.changes.insert(id, None);
        }
        existed
    }

    pub fn into_changes(self) -> ChangeSet {
        ChangeSet {
            changes: self.changes,
            next_record: self.next_record,
        }
    }
}

/// Staged writes detached from the collection they were staged against.
#[derive(Debug, Default)]
pub struct ChangeSet {
    changes: BTreeMap<RecordId, Option<Document>>,
    next_record: RecordId,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub(crate) fn apply(self, coll: &mut Collection) {
        for (id, change) in self.changes {
            match change {
                Some(doc) => coll.put(id, doc),
                None => {
                    coll.remove(id);
                }
            }
        }
        coll.next_record = coll.next_record.max(self.next_record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(v: serde_json::Value) -> Document {
        Document::from_json(v).unwrap()
    }

    #[test]
    fn indexes_track_inserts_replacements_and_removals() {
        let mut c = Collection::new("t.c", CollectionOptions::default());
        c.add_index(IndexSpec::new("a_1", &["a"])).unwrap();
        let r1 = c.insert(doc(json!({"a": 1}))).unwrap();
        let r2 = c.insert(doc(json!({"a": [1, 2]}))).unwrap();
        c.insert(doc(json!({"b": 1}))).unwrap();

        let idx = c.index("a_1").unwrap();
        assert_eq!(idx.seek_eq(&Value::Int(1)), &[r1, r2]);
        assert_eq!(idx.seek_eq(&Value::Null).len(), 1);

        c.replace(r1, doc(json!({"a": 2}))).unwrap();
        assert_eq!(c.index("a_1").unwrap().seek_eq(&Value::Int(2)), &[r1, r2]);
        c.remove(r2);
        assert_eq!(c.index("a_1").unwrap().seek_eq(&Value::Int(1)), &[] as &[RecordId]);
        assert_eq!(c.get(r1).unwrap().get("_id"), Some(&Value::Int(r1 as i64)));
    }

    #[test]
    fn sparse_and_partial_indexes_skip_documents() {
        let mut c = Collection::new("t.c", CollectionOptions::default());
        c.insert(doc(json!({"x": 1}))).unwrap();
        c.insert(doc(json!({"a": 5, "keep": true}))).unwrap();
        c.add_index(IndexSpec::new("a_sparse", &["a"]).sparse()).unwrap();
        c.add_index(IndexSpec::new("a_partial", &["a"]).partial(vec![Predicate::eq("keep", false)]))
            .unwrap();
        assert_eq!(c.index("a_sparse").unwrap().distinct_keys(), 1);
        assert_eq!(c.index("a_partial").unwrap().distinct_keys(), 0);
    }

    #[test]
    fn conflicting_index_definitions_are_rejected() {
        let mut c = Collection::new("t.c", CollectionOptions::default());
        assert!(c.add_index(IndexSpec::new("i", &["a"])).unwrap());
        assert!(!c.add_index(IndexSpec::new("i", &["a"])).unwrap());
        assert_eq!(
            c.add_index(IndexSpec::new("i", &["b"])),
            Err(CatalogError::IndexConflict("i".into()))
        );
        assert!(matches!(c.drop_index("nope"), Err(CatalogError::IndexNotFound(_))));
    }

    #[test]
    fn timeseries_inserts_require_the_time_field() {
        let mut c = Collection::new("t.ts", CollectionOptions::timeseries("time", Some("tag")));
        assert!(c.insert(doc(json!({"tag": "a"}))).is_err());
        c.insert(doc(json!({"time": {"$date": 0}, "tag": "a"}))).unwrap();
        assert_eq!(c.len(), 1);
    }

    #[test]
    fn staged_writes_leave_the_base_untouched_until_applied() {
        let mut c = Collection::new("t.c", CollectionOptions::default());
        c.add_index(IndexSpec::new("a_1", &["a"])).unwrap();
        let r1 = c.insert(doc(json!({"a": 1}))).unwrap();
        let r2 = c.insert(doc(json!({"a": 2}))).unwrap();

        let mut staged = Staged::new(&c);
        let r3 = staged.insert(doc(json!({"a": 3}))).unwrap();
        staged.replace(r1, doc(json!({"_id": 1, "a": 2}))).unwrap();
        assert!(staged.remove(r2));
        assert!(!staged.remove(r2));
        assert!(staged.replace(r2, doc(json!({"a": 9}))).is_err());
        let seen: Vec<RecordId> = staged.iter().map(|(id, _)| id).collect();
        assert_eq!(seen, vec![r1, r3]);
        assert_eq!(staged.get(r3).unwrap().get("_id"), Some(&Value::Int(r3 as i64)));
        let changes = staged.into_changes();
        assert_eq!(c.len(), 2);
        assert_eq!(c.index("a_1").unwrap().seek_eq(&Value::Int(2)), &[r2]);

        changes.apply(&mut c);
        assert_eq!(c.len(), 2);
        assert_eq!(c.index("a_1").unwrap().seek_eq(&Value::Int(2)), &[r1]);
        assert_eq!(c.index("a_1").unwrap().seek_eq(&Value::Int(3)), &[r3]);
        assert_eq!(c.insert(doc(json!({"a": 4}))).unwrap(), r3 + 1);
    }

    #[test]
    fn staged_timeseries_inserts_require_the_time_field() {
        let c = Collection::new("t.ts", CollectionOptions::timeseries("time", None));
        let mut staged = Staged::new(&c);
        assert!(staged.insert(doc(json!({"v": 1}))).is_err());
        assert!(staged.into_changes().is_empty());
    }
}
