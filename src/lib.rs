#![forbid(unsafe_code)]
//! qplan: adaptive plan caching for a document query engine.
//!
//! Facade over the workspace crates so integration tests and embedders can
//! depend on one package:
//! - `core`: values, documents, pipelines, configuration
//! - `catalog`: collections, indexes, catalog generations
//! - `planner`: plan cache, multi-planner, replanning, join selection
//! - `exec`: the `Engine`, join operators and write batches
//! - `mem`: buffering budgets and spill segments

pub use qplan_catalog as catalog;
pub use qplan_core as core;
pub use qplan_exec as exec;
pub use qplan_mem as mem;
pub use qplan_planner as planner;

pub use qplan_core::config::{EngineConfig, QueryOptions};
pub use qplan_exec::{Engine, ErrorCode, ExecError, QueryOutput};
