//! `$group` and `$count`.
//!
//! The pushed path hashes documents into groups; the classic path sorts by
//! the group key and folds runs. Both emit groups ordered by key and share the
//! accumulator state below, so their output is identical.

use std::collections::HashMap;

use qplan_core::shape::{AccumulatorOp, GroupSpec};
use qplan_core::types::{value_cmp, Document, Value};

#[derive(Debug, Clone)]
enum State {
    Sum { int: i64, float: f64, saw_float: bool },
    Avg { total: f64, n: u64 },
    Min(Option<Value>),
    Max(Option<Value>),
    Count(i64),
}

impl State {
    fn new(op: &AccumulatorOp) -> Self {
        match op {
            AccumulatorOp::SumConst(_) | AccumulatorOp::SumField(_) => State::Sum {
                int: 0,
                float: 0.0,
                saw_float: false,
            },
            AccumulatorOp::Avg(_) => State::Avg { total: 0.0, n: 0 },
            AccumulatorOp::Min(_) => State::Min(None),
            AccumulatorOp::Max(_) => State::Max(None),
            AccumulatorOp::Count => State::Count(0),
        }
    }

    fn add(&mut self, op: &AccumulatorOp, doc: &Document) {
        let field = |f: &str| doc.get_path(f).filter(|v| !v.is_null());
        match (self, op) {
            (State::Sum { int, .. }, AccumulatorOp::SumConst(n)) => *int = int.wrapping_add(*n),
            (State::Sum { int, float, saw_float }, AccumulatorOp::SumField(f)) => match field(f) {
                Some(Value::Int(v)) => *int = int.wrapping_add(*v),
                Some(Value::Float(v)) => {
                    *float += v;
                    *saw_float = true;
                }
                _ => {}
            },
            (State::Avg { total, n }, AccumulatorOp::Avg(f)) => {
                if let Some(v) = field(f).and_then(Value::as_f64) {
                    *total += v;
                    *n += 1;
                }
            }
            (State::Min(cur), AccumulatorOp::Min(f)) => {
                if let Some(v) = field(f) {
                    if cur.as_ref().map_or(true, |c| value_cmp(v, c).is_lt()) {
                        *cur = Some(v.clone());
                    }
                }
            }
            (State::Max(cur), AccumulatorOp::Max(f)) => {
                if let Some(v) = field(f) {
                    if cur.as_ref().map_or(true, |c| value_cmp(v, c).is_gt()) {
                        *cur = Some(v.clone());
                    }
                }
            }
            (State::Count(n), AccumulatorOp::Count) => *n += 1,
            _ => {}
        }
    }

    fn finish(self) -> Value {
        match self {
            State::Sum { int, float, saw_float } => {
                if saw_float {
                    Value::Float(int as f64 + float)
                } else {
                    Value::Int(int)
                }
            }
            State::Avg { total, n } => {
                if n == 0 {
                    Value::Null
                } else {
                    Value::Float(total / n as f64)
                }
            }
            State::Min(v) | State::Max(v) => v.unwrap_or(Value::Null),
            State::Count(n) => Value::Int(n),
        }
    }
}

fn group_key(spec: &GroupSpec, doc: &Document) -> Value {
    spec.key
        .as_deref()
        .and_then(|k| doc.get_path(k))
        .cloned()
        .unwrap_or(Value::Null)
}

fn fresh(spec: &GroupSpec) -> Vec<State> {
    spec.accumulators.iter().map(|a| State::new(&a.op)).collect()
}

fn accumulate(spec: &GroupSpec, states: &mut [State], doc: &Document) {
    for (state, acc) in states.iter_mut().zip(&spec.accumulators) {
        state.add(&acc.op, doc);
    }
}

fn emit(spec: &GroupSpec, key: Value, states: Vec<State>) -> Document {
    let mut out = Document::new().with("_id", key);
    for (state, acc) in states.into_iter().zip(&spec.accumulators) {
        out.insert(acc.name.clone(), state.finish());
    }
    out
}

/// Hash aggregation.
pub fn hash_group(spec: &GroupSpec, docs: &[Document]) -> Vec<Document> {
    let mut groups: HashMap<Value, Vec<State>> = HashMap::new();
    for doc in docs {
        let states = groups
            .entry(group_key(spec, doc))
            .or_insert_with(|| fresh(spec));
        accumulate(spec, states, doc);
    }
    let mut groups: Vec<(Value, Vec<State>)> = groups.into_iter().collect();
    groups.sort_by(|a, b| value_cmp(&a.0, &b.0));
    groups
        .into_iter()
        .map(|(key, states)| emit(spec, key, states))
        .collect()
}

/// Sort-based aggregation.
pub fn sort_group(spec: &GroupSpec, docs: &[Document]) -> Vec<Document> {
    let mut keyed: Vec<(Value, &Document)> = docs.iter().map(|d| (group_key(spec, d), d)).collect();
    keyed.sort_by(|a, b| value_cmp(&a.0, &b.0));

    let mut out = Vec::new();
    let mut current: Option<(Value, Vec<State>)> = None;
    for (key, doc) in keyed {
        if let Some((k, states)) = current.as_mut() {
            if value_cmp(k, &key).is_eq() {
                accumulate(spec, states, doc);
                continue;
            }
        }
        if let Some((k, states)) = current.take() {
            out.push(emit(spec, k, states));
        }
        let mut states = fresh(spec);
        accumulate(spec, &mut states, doc);
        current = Some((key, states));
    }
    if let Some((k, states)) = current {
        out.push(emit(spec, k, states));
    }
    out
}

/// `$count`: one document when there is any input, none otherwise.
pub fn count(field: &str, docs: &[Document]) -> Vec<Document> {
    if docs.is_empty() {
        return Vec::new();
    }
    vec![Document::new().with(field, docs.len() as i64)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use qplan_core::shape::Accumulator;
    use serde_json::json;

    fn docs() -> Vec<Document> {
        [
            json!({"g": "b", "x": 1}),
            json!({"g": "a", "x": 2.5}),
            json!({"g": "b", "x": 3}),
            json!({"x": 4}),
            json!({"g": "a"}),
        ]
        .into_iter()
        .filter_map(Document::from_json)
        .collect()
    }

    fn spec() -> GroupSpec {
        let acc = |name: &str, op| Accumulator {
            name: name.to_string(),
            op,
        };
        GroupSpec {
            key: Some("g".into()),
            accumulators: vec![
                acc("n", AccumulatorOp::SumConst(1)),
                acc("total", AccumulatorOp::SumField("x".into())),
                acc("avg", AccumulatorOp::Avg("x".into())),
                acc("lo", AccumulatorOp::Min("x".into())),
                acc("hi", AccumulatorOp::Max("x".into())),
                acc("c", AccumulatorOp::Count),
            ],
        }
    }

    #[test]
    fn hash_and_sort_paths_agree() {
        let hashed = hash_group(&spec(), &docs());
        let sorted = sort_group(&spec(), &docs());
        assert_eq!(hashed, sorted);
        assert_eq!(hashed.len(), 3);

        // Missing keys group under null, which sorts first.
        assert_eq!(hashed[0].get("_id"), Some(&Value::Null));
        assert_eq!(hashed[0].get("total"), Some(&Value::Int(4)));

        let a = &hashed[1];
        assert_eq!(a.get("_id"), Some(&Value::from("a")));
        assert_eq!(a.get("n"), Some(&Value::Int(2)));
        assert_eq!(a.get("total"), Some(&Value::Float(2.5)));
        assert_eq!(a.get("avg"), Some(&Value::Float(2.5)));

        let b = &hashed[2];
        assert_eq!(b.get("total"), Some(&Value::Int(4)));
        assert_eq!(b.get("lo"), Some(&Value::Int(1)));
        assert_eq!(b.get("hi"), Some(&Value::Int(3)));
        assert_eq!(b.get("c"), Some(&Value::Int(2)));
    }

    #[test]
    fn count_of_nothing_is_nothing() {
        assert!(count("n", &[]).is_empty());
        assert_eq!(count("n", &docs())[0].get("n"), Some(&Value::Int(5)));
    }
}
