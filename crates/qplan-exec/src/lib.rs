#![forbid(unsafe_code)]
//! qplan-exec: executing planned queries and guarded write batches.
//!
//! - `stage`: local access path stages raced by the multi-planner
//! - `join`: nested-loop, indexed-loop and hash `$lookup` operators
//! - `group`: hash and sort based `$group`, plus `$count`
//! - `write`: multi-statement batches checked against a catalog generation
//! - `runtime`: the `Engine` tying plan cache, races and replanning together
//! - `profile` / `metrics`: per-execution records and tracing events
//!
//! Errors surface as `ExecError`, each with a stable numeric `ErrorCode`.

pub mod error;
pub mod failpoints;
pub mod group;
pub mod join;
pub mod metrics;
pub mod profile;
pub mod runtime;
pub mod stage;
pub mod write;

pub use error::{ErrorCode, ExecError, Result};
pub use failpoints::PausePoint;
pub use profile::{ProfileEntry, ProfileLog};
pub use runtime::{Engine, QueryMetadata, QueryOutput};
pub use write::{WriteBatch, WriteStatement, WriteSummary};
