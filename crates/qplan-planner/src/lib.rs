#![forbid(unsafe_code)]
//! qplan-planner: choosing and remembering local access paths.
//!
//! - `key`: plan cache keys (shape hash + relevant local indexes)
//! - `cache`: the two-level plan cache with active/inactive entries
//! - `candidates`: local access path enumeration
//! - `multi`: round-robin trial races between candidates
//! - `replan`: regression detection for active entries
//! - `join`: per-execution join algorithm selection
//! - `rules` / `physical`: pushdown lowering of pipeline tails
//! - `explain`: operator-facing plan descriptions
//! - `dsl::yaml`: document-style pipeline parsing
//!
//! Nothing here executes documents; `qplan-exec` drives candidates through
//! the `TrialCandidate` trait.

pub mod cache;
pub mod candidates;
pub mod dsl;
pub mod error;
pub mod explain;
pub mod join;
pub mod key;
pub mod multi;
pub mod physical;
pub mod replan;
pub mod rules;

pub use cache::{CacheFilter, PlanCache, PlanCacheEntry, PromotionDecision};
pub use candidates::{enumerate_candidates, AccessPath, CandidatePlan};
pub use dsl::yaml::{parse_filter, parse_pipeline_json, parse_yaml_pipeline};
pub use error::{PlanError, Result};
pub use explain::ExplainPlan;
pub use join::{JoinAlgorithm, JoinPlanDescriptor, JoinStrategy, JoinStrategySelector};
pub use key::PlanCacheKey;
pub use multi::{
    CandidateScore, MultiPlanner, PlanDecision, RaceOutcome, TrialCandidate, TrialConfig, TrialStep,
};
pub use physical::PhysicalPipeline;
pub use replan::{EntryHealth, ReplanSignal, ReplanningMonitor};
pub use rules::lower_pipeline;
