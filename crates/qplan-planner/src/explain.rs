//! Explain output.
//!
//! Deterministic: the same catalog state, cache state and knobs always render
//! the same text and JSON.

use std::fmt;

use serde::Serialize;

use crate::candidates::AccessPath;
use crate::join::{JoinAlgorithm, JoinPlanDescriptor};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LookupExplain {
    pub from: String,
    /// `None` when the lookup runs on the classic path.
    pub strategy: Option<JoinPlanDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntrySummary {
    pub is_active: bool,
    pub works: u64,
    pub times_used: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExplainPlan {
    pub namespace: String,
    pub query_hash: String,
    pub plan_cache_key: String,
    pub winning_plan: AccessPath,
    pub rejected_plans: Vec<AccessPath>,
    pub pushed_stages: Vec<String>,
    pub classic_stages: Vec<String>,
    /// Algorithm of the first pushed lookup, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub join_algorithm: Option<JoinAlgorithm>,
    pub lookups: Vec<LookupExplain>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_entry: Option<CacheEntrySummary>,
}

impl ExplainPlan {
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

impl fmt::Display for ExplainPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== EXPLAIN {} ===", self.namespace)?;
        writeln!(f, "queryHash: {}", self.query_hash)?;
        writeln!(f, "planCacheKey: {}", self.plan_cache_key)?;
        writeln!(f, "Winning plan: {}", self.winning_plan)?;
        for rejected in &self.rejected_plans {
            writeln!(f, "Rejected: {}", rejected)?;
        }
        if !self.pushed_stages.is_empty() {
            writeln!(f, "Pushed: {}", self.pushed_stages.join(" -> "))?;
        }
        if !self.classic_stages.is_empty() {
            writeln!(f, "Classic: {}", self.classic_stages.join(" -> "))?;
        }
        for lookup in &self.lookups {
            match &lookup.strategy {
                Some(d) => match &d.foreign_index_used {
                    Some(ix) => writeln!(f, "Lookup {}: {} (index {})", lookup.from, d.algorithm, ix)?,
                    None => writeln!(f, "Lookup {}: {}", lookup.from, d.algorithm)?,
                },
                None => writeln!(f, "Lookup {}: classic", lookup.from)?,
            }
        }
        if let Some(entry) = &self.cache_entry {
            writeln!(
                f,
                "Cache entry: {} works={} timesUsed={}",
                if entry.is_active { "active" } else { "inactive" },
                entry.works,
                entry.times_used
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_join_and_cache_state() {
        let plan = ExplainPlan {
            namespace: "t.c".into(),
            query_hash: "0A1B2C3D".into(),
            plan_cache_key: "DEADBEEF".into(),
            winning_plan: AccessPath::IndexScan {
                index: "a_1".into(),
                key_pattern: "{a: 1}".into(),
                field: "a".into(),
            },
            rejected_plans: vec![AccessPath::CollScan],
            pushed_stages: vec!["EQ_LOOKUP".into()],
            classic_stages: vec![],
            join_algorithm: Some(JoinAlgorithm::IndexedLoopJoin),
            lookups: vec![LookupExplain {
                from: "t.f".into(),
                strategy: Some(JoinPlanDescriptor {
                    algorithm: JoinAlgorithm::IndexedLoopJoin,
                    foreign_index_used: Some("k_1".into()),
                }),
            }],
            cache_entry: Some(CacheEntrySummary {
                is_active: true,
                works: 4,
                times_used: 2,
            }),
        };
        let text = plan.to_string();
        assert!(text.contains("FETCH <- IXSCAN {a: 1}"));
        assert!(text.contains("Lookup t.f: IndexedLoopJoin (index k_1)"));
        assert!(text.contains("Cache entry: active"));

        let json = plan.to_json();
        assert_eq!(json["joinAlgorithm"], "IndexedLoopJoin");
        assert_eq!(json["winningPlan"]["stage"], "IXSCAN");
        assert_eq!(json["lookups"][0]["strategy"]["foreignIndexUsed"], "k_1");
    }
}
