//! Convenient re-exports for downstream crates.

pub use crate::budget::{BudgetGuard, MemoryBudget};
pub use crate::config::{EngineConfig, PushdownKnobs, QueryOptions};
pub use crate::error::{Error, Result};
pub use crate::hash::Hash256;
pub use crate::id::{CandidateId, CollectionUuid, Epoch, OpId};
pub use crate::shape::{
    Accumulator, AccumulatorOp, CmpOp, GroupSpec, LookupSpec, Pipeline, Predicate, QueryShape,
    Stage,
};
pub use crate::types::{Document, Value};
