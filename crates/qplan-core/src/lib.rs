#![forbid(unsafe_code)]
//! qplan-core: values, documents, query shapes, identifiers, configuration and
//! stable hashing shared by every other qplan crate.
//!
//! Nothing here locks, allocates against a budget, or touches a catalog. The
//! planner, catalog and exec crates build on these types.

pub mod budget;
pub mod config;
pub mod error;
pub mod hash;
pub mod id;
pub mod prelude;
pub mod shape;
pub mod types;

/// Engine version string reported by explain output.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
