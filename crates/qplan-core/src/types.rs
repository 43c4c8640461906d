//! Lightweight document values.
//!
//! Enough of a document model to evaluate predicates, join keys and group
//! keys. Comparison is total (numbers compare across int/float) so values can
//! be used as index and hash-table keys.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// Milliseconds since the Unix epoch.
    Date(i64),
    Array(Vec<Value>),
    Doc(Document),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Rough in-memory footprint, used for buffering budgets.
    pub fn approx_size(&self) -> usize {
        match self {
            Value::Null | Value::Bool(_) => 1,
            Value::Int(_) | Value::Float(_) | Value::Date(_) => 8,
            Value::Str(s) => s.len() + 4,
            Value::Array(items) => 4 + items.iter().map(Value::approx_size).sum::<usize>(),
            Value::Doc(d) => d.approx_size(),
        }
    }

    /// Render as plain JSON. Dates become `{"$date": millis}`.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as J;
        match self {
            Value::Null => J::Null,
            Value::Bool(b) => J::Bool(*b),
            Value::Int(i) => J::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(J::Number)
                .unwrap_or(J::Null),
            Value::Str(s) => J::String(s.clone()),
            Value::Date(ms) => {
                let mut m = serde_json::Map::new();
                m.insert("$date".to_string(), J::from(*ms));
                J::Object(m)
            }
            Value::Array(items) => J::Array(items.iter().map(Value::to_json).collect()),
            Value::Doc(d) => d.to_json(),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        value_cmp(self, other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        value_cmp(self, other)
    }
}

impl std::hash::Hash for Value {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        let mut h = blake3::Hasher::new();
        hash_value(self, &mut h);
        state.write(&h.finalize().as_bytes()[..8]);
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        use serde_json::Value as J;
        match v {
            J::Null => Value::Null,
            J::Bool(b) => Value::Bool(b),
            J::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            J::String(s) => Value::Str(s),
            J::Array(items) => Value::Array(items.into_iter().map(Value::from).collect()),
            J::Object(map) => {
                if map.len() == 1 {
                    if let Some(ms) = map.get("$date").and_then(|d| d.as_i64()) {
                        return Value::Date(ms);
                    }
                }
                Value::Doc(Document::from_json_map(map))
            }
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<Document> for Value {
    fn from(v: Document) -> Self {
        Value::Doc(v)
    }
}

/// A document: an ordered map of field name to value.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document {
    fields: BTreeMap<String, Value>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(v: serde_json::Value) -> Option<Self> {
        match v {
            serde_json::Value::Object(map) => Some(Self::from_json_map(map)),
            _ => None,
        }
    }

    fn from_json_map(map: serde_json::Map<String, serde_json::Value>) -> Self {
        let fields = map.into_iter().map(|(k, v)| (k, Value::from(v))).collect();
        Self { fields }
    }

    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(field, value);
        self
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(field.into(), value.into());
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.fields.remove(field)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }

    /// Resolve a dotted path through nested documents.
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let first = parts.next()?;
        let mut cur = self.fields.get(first)?;
        for part in parts {
            match cur {
                Value::Doc(d) => cur = d.fields.get(part)?,
                _ => return None,
            }
        }
        Some(cur)
    }

    /// Set a dotted path, creating intermediate documents. Returns false when
    /// an intermediate component exists and is not a document.
    pub fn set_path(&mut self, path: &str, value: Value) -> bool {
        match path.split_once('.') {
            None => {
                self.fields.insert(path.to_string(), value);
                true
            }
            Some((head, rest)) => {
                let slot = self
                    .fields
                    .entry(head.to_string())
                    .or_insert_with(|| Value::Doc(Document::new()));
                match slot {
                    Value::Doc(d) => d.set_path(rest, value),
                    _ => false,
                }
            }
        }
    }

    pub fn unset_path(&mut self, path: &str) -> Option<Value> {
        match path.split_once('.') {
            None => self.fields.remove(path),
            Some((head, rest)) => match self.fields.get_mut(head) {
                Some(Value::Doc(d)) => d.unset_path(rest),
                _ => None,
            },
        }
    }

    pub fn approx_size(&self) -> usize {
        4 + self
            .fields
            .iter()
            .map(|(k, v)| k.len() + 1 + v.approx_size())
            .sum::<usize>()
    }

    pub fn to_json(&self) -> serde_json::Value {
        let map = self
            .fields
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect();
        serde_json::Value::Object(map)
    }
}

/// Join/lookup keys of `doc` at `path`: a missing or null field yields a
/// single `Null` key, an array yields its elements, anything else itself.
pub fn lookup_keys(doc: &Document, path: &str) -> Vec<Value> {
    match doc.get_path(path) {
        None | Some(Value::Null) => vec![Value::Null],
        Some(Value::Array(items)) => items.clone(),
        Some(v) => vec![v.clone()],
    }
}

/// Total order over values. Numbers compare by magnitude across int/float;
/// otherwise by type bracket first.
pub fn value_cmp(a: &Value, b: &Value) -> Ordering {
    use Value::*;
    match (a, b) {
        (Null, Null) => Ordering::Equal,
        (Bool(x), Bool(y)) => x.cmp(y),
        (Int(x), Int(y)) => x.cmp(y),
        (Int(_) | Float(_), Int(_) | Float(_)) => {
            let (x, y) = (a.as_f64().unwrap_or(0.0), b.as_f64().unwrap_or(0.0));
            if x.is_nan() && y.is_nan() {
                Ordering::Equal
            } else if x.is_nan() {
                Ordering::Less
            } else if y.is_nan() {
                Ordering::Greater
            } else {
                x.partial_cmp(&y).unwrap_or(Ordering::Equal)
            }
        }
        (Str(x), Str(y)) => x.cmp(y),
        (Date(x), Date(y)) => x.cmp(y),
        (Array(x), Array(y)) => {
            for (l, r) in x.iter().zip(y.iter()) {
                match value_cmp(l, r) {
                    Ordering::Equal => continue,
                    other => return other,
                }
            }
            x.len().cmp(&y.len())
        }
        (Doc(x), Doc(y)) => {
            for ((lk, lv), (rk, rv)) in x.iter().zip(y.iter()) {
                match lk.cmp(rk).then_with(|| value_cmp(lv, rv)) {
                    Ordering::Equal => continue,
                    other => return other,
                }
            }
            x.len().cmp(&y.len())
        }
        _ => type_order(a).cmp(&type_order(b)),
    }
}

/// Whether two values fall in the same comparison bracket (range predicates
/// only match within a bracket).
pub fn same_type_bracket(a: &Value, b: &Value) -> bool {
    type_order(a) == type_order(b)
}

fn type_order(v: &Value) -> u8 {
    use Value::*;
    match v {
        Null => 0,
        Int(_) | Float(_) => 1,
        Str(_) => 2,
        Doc(_) => 3,
        Array(_) => 4,
        Bool(_) => 5,
        Date(_) => 6,
    }
}

/// Hash a value consistently with `value_cmp`: values that compare equal
/// hash equal (integral floats hash as integers).
pub fn hash_value(v: &Value, hasher: &mut blake3::Hasher) {
    use Value::*;
    hasher.update(&[type_order(v)]);
    match v {
        Null => {}
        Bool(b) => {
            hasher.update(&[*b as u8]);
        }
        Int(i) => {
            hasher.update(&i.to_le_bytes());
        }
        Float(f) => {
            if f.fract() == 0.0 && *f >= i64::MIN as f64 && *f < i64::MAX as f64 {
                hasher.update(&(*f as i64).to_le_bytes());
            } else if f.is_nan() {
                hasher.update(&f64::NAN.to_bits().to_le_bytes());
            } else {
                hasher.update(&f.to_bits().to_le_bytes());
            }
        }
        Str(s) => {
            hasher.update(&(s.len() as u64).to_le_bytes());
            hasher.update(s.as_bytes());
        }
        Date(ms) => {
            hasher.update(&ms.to_le_bytes());
        }
        Array(items) => {
            hasher.update(&(items.len() as u64).to_le_bytes());
            for item in items {
                hash_value(item, hasher);
            }
        }
        Doc(d) => {
            hasher.update(&(d.len() as u64).to_le_bytes());
            for (k, item) in d.iter() {
                hasher.update(&(k.len() as u64).to_le_bytes());
                hasher.update(k.as_bytes());
                hash_value(item, hasher);
            }
        }
    }
}
