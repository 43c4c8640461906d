//! Pushdown lowering.
//!
//! Tail stages are pushed into the executor in order until the first stage
//! whose pushdown is disabled; that stage and everything after it run on the
//! classic path. Knobs only move stages between the two lists; they never
//! affect the local access path or the cache key.

use qplan_core::config::PushdownKnobs;
use qplan_core::shape::{Pipeline, Stage};

use crate::physical::PhysicalPipeline;

pub fn lower_pipeline(pipeline: &Pipeline, knobs: PushdownKnobs) -> PhysicalPipeline {
    let mut out = PhysicalPipeline::default();
    let mut pushing = true;
    for stage in pipeline.tail() {
        let pushable = match stage {
            Stage::Lookup(_) => !knobs.disable_lookup_pushdown,
            Stage::Group(_) | Stage::Count(_) => !knobs.disable_group_pushdown,
            Stage::Match(_) | Stage::Limit(_) => true,
        };
        pushing &= pushable;
        if pushing {
            out.pushed.push(stage.clone());
        } else {
            out.classic.push(stage.clone());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use qplan_core::shape::{Accumulator, AccumulatorOp, GroupSpec, LookupSpec, Predicate};

    fn pipeline() -> Pipeline {
        Pipeline::new(vec![
            Stage::Match(vec![Predicate::eq("a", 1i64)]),
            Stage::Lookup(LookupSpec {
                from: "t.f".into(),
                local_field: "a".into(),
                foreign_field: "k".into(),
                as_field: "out".into(),
            }),
            Stage::Group(GroupSpec {
                key: Some("a".into()),
                accumulators: vec![Accumulator {
                    name: "n".into(),
                    op: AccumulatorOp::SumConst(1),
                }],
            }),
            Stage::Limit(3),
        ])
    }

    #[test]
    fn everything_pushes_by_default() {
        let p = lower_pipeline(&pipeline(), PushdownKnobs::default());
        assert_eq!(p.pushed_names(), vec!["EQ_LOOKUP", "GROUP", "LIMIT"]);
        assert!(p.classic.is_empty());
    }

    #[test]
    fn disabled_stage_and_its_suffix_run_classic() {
        let group_off = PushdownKnobs {
            disable_group_pushdown: true,
            ..PushdownKnobs::default()
        };
        let p = lower_pipeline(&pipeline(), group_off);
        assert_eq!(p.pushed_names(), vec!["EQ_LOOKUP"]);
        assert_eq!(p.classic_names(), vec!["$group", "$limit"]);

        let lookup_off = PushdownKnobs {
            disable_lookup_pushdown: true,
            ..PushdownKnobs::default()
        };
        let p = lower_pipeline(&pipeline(), lookup_off);
        assert!(p.pushed.is_empty());
        assert!(!p.has_pushed_lookup());
        assert_eq!(p.classic.len(), 3);
    }
}
