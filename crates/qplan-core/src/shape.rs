//! Pipelines and their literal-free shapes.
//!
//! A `Pipeline` is what a caller submits. A `QueryShape` is the same structure
//! with every literal removed; two pipelines that differ only in constants
//! share a shape and therefore a `queryHash`.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::hash::{hash_serde, Hash256};
use crate::types::{lookup_keys, same_type_bracket, value_cmp, Document, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CmpOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl CmpOp {
    pub fn parse(op: &str) -> Option<Self> {
        Some(match op {
            "$eq" | "eq" => CmpOp::Eq,
            "$ne" | "ne" => CmpOp::Ne,
            "$gt" | "gt" => CmpOp::Gt,
            "$gte" | "gte" => CmpOp::Gte,
            "$lt" | "lt" => CmpOp::Lt,
            "$lte" | "lte" => CmpOp::Lte,
            _ => return None,
        })
    }
}

/// `field op literal`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    pub field: String,
    pub op: CmpOp,
    pub value: Value,
}

impl Predicate {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            op: CmpOp::Eq,
            value: value.into(),
        }
    }

    pub fn new(field: impl Into<String>, op: CmpOp, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    /// Document-database matching: a missing field behaves as null, and an
    /// array field matches when any element (or the array itself) matches.
    pub fn matches(&self, doc: &Document) -> bool {
        let field = doc.get_path(&self.field).unwrap_or(&Value::Null);
        match self.op {
            CmpOp::Ne => !self.matches_positive(field, CmpOp::Eq),
            op => self.matches_positive(field, op),
        }
    }

    fn matches_positive(&self, field: &Value, op: CmpOp) -> bool {
        if self.compare_one(field, op) {
            return true;
        }
        match field {
            Value::Array(items) => items.iter().any(|v| self.compare_one(v, op)),
            _ => false,
        }
    }

    fn compare_one(&self, v: &Value, op: CmpOp) -> bool {
        use std::cmp::Ordering::*;
        if op == CmpOp::Eq {
            return value_cmp(v, &self.value) == Equal;
        }
        if !same_type_bracket(v, &self.value) {
            return false;
        }
        let ord = value_cmp(v, &self.value);
        match op {
            CmpOp::Gt => ord == Greater,
            CmpOp::Gte => ord != Less,
            CmpOp::Lt => ord == Less,
            CmpOp::Lte => ord != Greater,
            CmpOp::Eq | CmpOp::Ne => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupSpec {
    pub from: String,
    pub local_field: String,
    pub foreign_field: String,
    pub as_field: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AccumulatorOp {
    /// `$sum` of a constant per document (`{$sum: 1}` counts).
    SumConst(i64),
    /// `$sum` of a field; non-numeric values are ignored.
    SumField(String),
    Avg(String),
    Min(String),
    Max(String),
    /// `{$count: {}}`.
    Count,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Accumulator {
    pub name: String,
    pub op: AccumulatorOp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupSpec {
    /// Group key field path; `None` groups everything into one `_id: null` group.
    pub key: Option<String>,
    pub accumulators: Vec<Accumulator>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Stage {
    Match(Vec<Predicate>),
    Lookup(LookupSpec),
    Group(GroupSpec),
    /// `$count: <field>`.
    Count(String),
    Limit(usize),
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Match(_) => "$match",
            Stage::Lookup(_) => "$lookup",
            Stage::Group(_) => "$group",
            Stage::Count(_) => "$count",
            Stage::Limit(_) => "$limit",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    pub stages: Vec<Stage>,
}

impl Pipeline {
    pub fn new(stages: Vec<Stage>) -> Self {
        Self { stages }
    }

    /// A find is a pipeline of one `$match` and an optional `$limit`.
    pub fn find(filter: Vec<Predicate>, limit: Option<usize>) -> Self {
        let mut stages = vec![Stage::Match(filter)];
        if let Some(n) = limit {
            stages.push(Stage::Limit(n));
        }
        Self { stages }
    }

    /// Predicates of the leading run of `$match` stages; these are what the
    /// local access path answers.
    pub fn leading_filter(&self) -> Vec<Predicate> {
        self.stages
            .iter()
            .take_while(|s| matches!(s, Stage::Match(_)))
            .flat_map(|s| match s {
                Stage::Match(preds) => preds.clone(),
                _ => Vec::new(),
            })
            .collect()
    }

    /// Stages after the leading `$match` run.
    pub fn tail(&self) -> &[Stage] {
        let n = self
            .stages
            .iter()
            .take_while(|s| matches!(s, Stage::Match(_)))
            .count();
        &self.stages[n..]
    }

    /// Reject pipelines that cannot be executed.
    pub fn validate(&self) -> Result<()> {
        for stage in &self.stages {
            match stage {
                Stage::Lookup(l) => {
                    if l.from.is_empty() || l.as_field.is_empty() {
                        return Err(Error::BadQuery(
                            "$lookup requires 'from' and 'as'".to_string(),
                        ));
                    }
                    if l.local_field.is_empty() || l.foreign_field.is_empty() {
                        return Err(Error::BadQuery(
                            "$lookup requires 'localField' and 'foreignField'".to_string(),
                        ));
                    }
                }
                Stage::Count(field) => {
                    if field.is_empty() || field.starts_with('$') || field.contains('.') {
                        return Err(Error::BadQuery(format!(
                            "invalid $count field name '{field}'"
                        )));
                    }
                }
                Stage::Group(g) => {
                    let mut seen = std::collections::BTreeSet::new();
                    for acc in &g.accumulators {
                        if acc.name == "_id" || !seen.insert(acc.name.as_str()) {
                            return Err(Error::BadQuery(format!(
                                "duplicate or reserved $group output '{}'",
                                acc.name
                            )));
                        }
                    }
                }
                Stage::Match(_) | Stage::Limit(_) => {}
            }
        }
        Ok(())
    }

    /// Foreign collections this pipeline reads.
    pub fn foreign_namespaces(&self) -> Vec<&str> {
        self.stages
            .iter()
            .filter_map(|s| match s {
                Stage::Lookup(l) => Some(l.from.as_str()),
                _ => None,
            })
            .collect()
    }
}

/// Literal-free rendition of a stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "stage", rename_all = "camelCase")]
pub enum ShapeStage {
    Match { predicates: Vec<(String, CmpOp)> },
    Lookup { from: String, local: String, foreign: String, r#as: String },
    Group { key: Option<String>, accumulators: Vec<(String, String)> },
    Count { field: String },
    Limit,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryShape {
    pub namespace: String,
    pub stages: Vec<ShapeStage>,
}

impl QueryShape {
    pub fn of(namespace: &str, pipeline: &Pipeline) -> Self {
        let stages = pipeline.stages.iter().map(shape_stage).collect();
        Self {
            namespace: namespace.to_string(),
            stages,
        }
    }

    /// Stable digest of the shape; independent of every literal.
    pub fn shape_hash(&self) -> Result<Hash256> {
        hash_serde(self)
    }
}

fn shape_stage(stage: &Stage) -> ShapeStage {
    match stage {
        Stage::Match(preds) => {
            let mut predicates: Vec<(String, CmpOp)> =
                preds.iter().map(|p| (p.field.clone(), p.op)).collect();
            predicates.sort();
            ShapeStage::Match { predicates }
        }
        Stage::Lookup(l) => ShapeStage::Lookup {
            from: l.from.clone(),
            local: l.local_field.clone(),
            foreign: l.foreign_field.clone(),
            r#as: l.as_field.clone(),
        },
        Stage::Group(g) => ShapeStage::Group {
            key: g.key.clone(),
            accumulators: g
                .accumulators
                .iter()
                .map(|a| (a.name.clone(), accumulator_shape(&a.op)))
                .collect(),
        },
        Stage::Count(field) => ShapeStage::Count {
            field: field.clone(),
        },
        Stage::Limit(_) => ShapeStage::Limit,
    }
}

fn accumulator_shape(op: &AccumulatorOp) -> String {
    match op {
        AccumulatorOp::SumConst(_) => "$sum:?".to_string(),
        AccumulatorOp::SumField(f) => format!("$sum:${f}"),
        AccumulatorOp::Avg(f) => format!("$avg:${f}"),
        AccumulatorOp::Min(f) => format!("$min:${f}"),
        AccumulatorOp::Max(f) => format!("$max:${f}"),
        AccumulatorOp::Count => "$count".to_string(),
    }
}

/// Fingerprint of a filter's result semantics, literals included and
/// predicate order ignored. Every candidate plan for one query must carry the
/// same fingerprint.
pub fn filter_semantics(namespace: &str, filter: &[Predicate]) -> Result<Hash256> {
    let mut parts: Vec<(String, CmpOp, String)> = filter
        .iter()
        .map(|p| {
            let mut h = blake3::Hasher::new();
            crate::types::hash_value(&p.value, &mut h);
            (p.field.clone(), p.op, h.finalize().to_hex().to_string())
        })
        .collect();
    parts.sort();
    hash_serde(&(namespace, parts))
}

/// Whether any lookup key of the local document meets a key of `foreign`.
pub fn lookup_matches(local_keys: &[Value], foreign: &Document, foreign_field: &str) -> bool {
    let foreign_keys = lookup_keys(foreign, foreign_field);
    local_keys
        .iter()
        .any(|k| foreign_keys.iter().any(|f| value_cmp(k, f).is_eq()))
}
