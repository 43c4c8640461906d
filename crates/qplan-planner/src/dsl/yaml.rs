//! Document-style pipeline parsing (YAML or JSON).
//!
//! Example:
//! ```yaml
//! - $match: { a: 1, b: { $gte: 10 } }
//! - $lookup: { from: test.foreign, localField: a, foreignField: k, as: joined }
//! - $group: { _id: "$a", n: { $sum: 1 }, total: { $sum: "$b" } }
//! - $count: groups
//! - $limit: 5
//! ```

use serde_json::{Map, Value as J};

use qplan_core::shape::{
    Accumulator, AccumulatorOp, CmpOp, GroupSpec, LookupSpec, Pipeline, Predicate, Stage,
};
use qplan_core::types::Value;

use crate::error::{PlanError, Result};

/// Parse a YAML sequence of stages.
pub fn parse_yaml_pipeline(text: &str) -> Result<Pipeline> {
    let doc: J = serde_yaml::from_str(text)?;
    parse_pipeline_json(&doc)
}

/// Parse a JSON array of stages (each a single-key object).
pub fn parse_pipeline_json(doc: &J) -> Result<Pipeline> {
    let stages = doc
        .as_array()
        .ok_or_else(|| dsl("a pipeline must be a list of stages"))?;
    let mut out = Vec::with_capacity(stages.len());
    for stage in stages {
        out.push(parse_stage(stage)?);
    }
    let pipeline = Pipeline::new(out);
    pipeline.validate()?;
    Ok(pipeline)
}

fn parse_stage(stage: &J) -> Result<Stage> {
    let obj = stage
        .as_object()
        .filter(|o| o.len() == 1)
        .ok_or_else(|| dsl("each stage must be an object with exactly one key"))?;
    let (name, spec) = obj
        .iter()
        .next()
        .ok_or_else(|| dsl("empty stage"))?;
    match name.as_str() {
        "$match" => Ok(Stage::Match(parse_filter(spec)?)),
        "$lookup" => parse_lookup(spec),
        "$group" => parse_group(spec),
        "$count" => {
            let field = spec
                .as_str()
                .ok_or_else(|| dsl("$count takes a field name"))?;
            Ok(Stage::Count(field.to_string()))
        }
        "$limit" => {
            let n = spec
                .as_u64()
                .filter(|n| *n > 0)
                .ok_or_else(|| dsl("$limit must be a positive integer"))?;
            Ok(Stage::Limit(n as usize))
        }
        other => Err(dsl(format!("unsupported stage '{other}'"))),
    }
}

/// Parse a filter document: `{field: literal}` or `{field: {$op: literal, ...}}`.
pub fn parse_filter(spec: &J) -> Result<Vec<Predicate>> {
    let obj = spec
        .as_object()
        .ok_or_else(|| dsl("a filter must be an object"))?;
    let mut preds = Vec::new();
    for (field, cond) in obj {
        if field.starts_with('$') {
            return Err(dsl(format!("unsupported top-level operator '{field}'")));
        }
        match operator_object(cond) {
            Some(ops) => {
                for (op, literal) in ops {
                    let op = CmpOp::parse(op)
                        .ok_or_else(|| dsl(format!("unsupported operator '{op}' on '{field}'")))?;
                    preds.push(Predicate::new(field.clone(), op, Value::from(literal.clone())));
                }
            }
            None => preds.push(Predicate::eq(field.clone(), Value::from(cond.clone()))),
        }
    }
    Ok(preds)
}

/// An object whose keys are all `$`-operators (but not a `$date` literal).
fn operator_object(cond: &J) -> Option<&Map<String, J>> {
    let obj = cond.as_object()?;
    let all_ops = !obj.is_empty() && obj.keys().all(|k| k.starts_with('$'));
    (all_ops && !obj.contains_key("$date")).then_some(obj)
}

fn parse_lookup(spec: &J) -> Result<Stage> {
    let field = |name: &str| -> Result<String> {
        spec.get(name)
            .and_then(J::as_str)
            .map(str::to_string)
            .ok_or_else(|| dsl(format!("$lookup requires string '{name}'")))
    };
    Ok(Stage::Lookup(LookupSpec {
        from: field("from")?,
        local_field: field("localField")?,
        foreign_field: field("foreignField")?,
        as_field: field("as")?,
    }))
}

fn parse_group(spec: &J) -> Result<Stage> {
    let obj = spec
        .as_object()
        .ok_or_else(|| dsl("$group takes an object"))?;
    let key = match obj.get("_id") {
        None => return Err(dsl("$group requires '_id'")),
        Some(J::Null) => None,
        Some(J::String(s)) => Some(field_ref(s)?),
        Some(_) => return Err(dsl("$group _id must be null or a \"$field\" reference")),
    };
    let mut accumulators = Vec::new();
    for (name, acc) in obj.iter().filter(|(k, _)| k.as_str() != "_id") {
        let acc_obj = acc
            .as_object()
            .filter(|o| o.len() == 1)
            .ok_or_else(|| dsl(format!("accumulator '{name}' must have exactly one operator")))?;
        let Some((op, arg)) = acc_obj.iter().next() else {
            continue;
        };
        let op = match (op.as_str(), arg) {
            ("$sum", J::Number(n)) => AccumulatorOp::SumConst(
                n.as_i64()
                    .ok_or_else(|| dsl(format!("$sum constant on '{name}' must be an integer")))?,
            ),
            ("$sum", J::String(s)) => AccumulatorOp::SumField(field_ref(s)?),
            ("$avg", J::String(s)) => AccumulatorOp::Avg(field_ref(s)?),
            ("$min", J::String(s)) => AccumulatorOp::Min(field_ref(s)?),
            ("$max", J::String(s)) => AccumulatorOp::Max(field_ref(s)?),
            ("$count", J::Object(o)) if o.is_empty() => AccumulatorOp::Count,
            (op, _) => return Err(dsl(format!("unsupported accumulator {op} on '{name}'"))),
        };
        accumulators.push(Accumulator {
            name: name.clone(),
            op,
        });
    }
    Ok(Stage::Group(GroupSpec { key, accumulators }))
}

fn field_ref(s: &str) -> Result<String> {
    s.strip_prefix('$')
        .filter(|f| !f.is_empty())
        .map(str::to_string)
        .ok_or_else(|| dsl(format!("expected a \"$field\" reference, got '{s}'")))
}

fn dsl(msg: impl Into<String>) -> PlanError {
    PlanError::Dsl(msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_the_documented_example() {
        let p = parse_yaml_pipeline(
            r#"
- $match: { a: 1, b: { $gte: 10, $lt: 20 } }
- $lookup: { from: test.foreign, localField: a, foreignField: k, as: joined }
- $group: { _id: "$a", n: { $sum: 1 }, total: { $sum: "$b" }, c: { $count: {} } }
- $count: groups
- $limit: 5
"#,
        )
        .unwrap();
        assert_eq!(p.stages.len(), 5);
        assert_eq!(p.leading_filter().len(), 3);
        match &p.stages[2] {
            Stage::Group(g) => {
                assert_eq!(g.key.as_deref(), Some("a"));
                assert_eq!(g.accumulators.len(), 3);
            }
            other => panic!("unexpected stage {other:?}"),
        }
        assert_eq!(p.stages[4], Stage::Limit(5));
    }

    #[test]
    fn rejects_malformed_stages() {
        assert!(parse_yaml_pipeline("- $sort: { a: 1 }").is_err());
        assert!(parse_yaml_pipeline("- $limit: 0").is_err());
        assert!(parse_yaml_pipeline("- $group: { n: { $sum: 1 } }").is_err());
        assert!(parse_yaml_pipeline("- $match: { a: { $regex: x } }").is_err());
        assert!(parse_yaml_pipeline("{ $match: {} }").is_err());
        assert!(parse_yaml_pipeline("- $lookup: { from: f, as: x }").is_err());
    }

    #[test]
    fn date_literals_are_values_not_operators() {
        let preds = parse_filter(&serde_json::json!({"t": {"$date": 5}})).unwrap();
        assert_eq!(preds, vec![Predicate::eq("t", Value::Date(5))]);
    }
}
