use thiserror::Error;

pub type Result<T> = std::result::Result<T, PlanError>;

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("candidate plans disagree on result semantics: {0}")]
    PlanningInconsistency(String),

    #[error("no candidate plans to race")]
    NoCandidates,

    #[error("plan cache already holds an active entry for {0}")]
    ActiveEntryExists(String),

    #[error("pipeline parse error: {0}")]
    Dsl(String),

    #[error(transparent)]
    Core(#[from] qplan_core::error::Error),
}

impl From<serde_yaml::Error> for PlanError {
    fn from(e: serde_yaml::Error) -> Self {
        PlanError::Dsl(e.to_string())
    }
}
