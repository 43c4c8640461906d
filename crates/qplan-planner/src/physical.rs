//! Physical pipeline: the local access path plus the tail stages, split into
//! the prefix that runs inside the pushed-down executor and the remainder that
//! runs row-at-a-time.

use qplan_core::shape::Stage;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PhysicalPipeline {
    pub pushed: Vec<Stage>,
    pub classic: Vec<Stage>,
}

impl PhysicalPipeline {
    pub fn pushed_names(&self) -> Vec<&'static str> {
        self.pushed.iter().map(pushed_name).collect()
    }

    pub fn classic_names(&self) -> Vec<&'static str> {
        self.classic.iter().map(Stage::name).collect()
    }

    pub fn has_pushed_lookup(&self) -> bool {
        self.pushed.iter().any(|s| matches!(s, Stage::Lookup(_)))
    }

    pub fn has_pushed_group(&self) -> bool {
        self.pushed
            .iter()
            .any(|s| matches!(s, Stage::Group(_) | Stage::Count(_)))
    }
}

fn pushed_name(stage: &Stage) -> &'static str {
    match stage {
        Stage::Match(_) => "FILTER",
        Stage::Lookup(_) => "EQ_LOOKUP",
        Stage::Group(_) => "GROUP",
        Stage::Count(_) => "COUNT",
        Stage::Limit(_) => "LIMIT",
    }
}
