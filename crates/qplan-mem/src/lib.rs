#![forbid(unsafe_code)]
//! qplan-mem: buffering budgets and spill segments.
//!
//! Concrete implementations of the `qplan-core::budget` traits. Join operators
//! reserve bytes through a `BufferBudget` before buffering foreign documents;
//! hash joins that outgrow their budget write build partitions through the
//! `SpillManager`.

pub mod error;
pub mod guard;
pub mod spill;
pub mod tracking;

pub use error::{Error, Result};
pub use guard::{BufferBudget, BufferGuard};
pub use spill::{FsSpillStore, MemorySpillStore, SegmentMeta, SpillManager, SpillStore};
pub use tracking::PeakGauge;
