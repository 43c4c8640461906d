#![forbid(unsafe_code)]
//! qplan-catalog: collections, indexes and catalog generations.
//!
//! The catalog is copy-on-write: readers take `Arc<Collection>` snapshots,
//! and writers update the live value in place under the catalog write lock,
//! copying it only while a snapshot is still held. A `CatalogGeneration` captures what a collection looked like
//! when an operation started; `CatalogGenerationGuard` compares the live
//! collection against it at every checkpoint.

pub mod catalog;
pub mod collection;
pub mod error;
pub mod generation;
pub mod guard;
pub mod hook;

pub use catalog::{Catalog, DdlEvent};
pub use collection::{
    ChangeSet, Collection, CollectionOptions, IndexData, IndexSpec, RecordId, Staged, TimeseriesOptions,
};
pub use error::{CatalogError, Result};
pub use generation::CatalogGeneration;
pub use guard::{CatalogGenerationGuard, GuardState};
pub use hook::{CheckpointHook, NoopHook};
