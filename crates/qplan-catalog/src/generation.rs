//! Immutable snapshot of a collection's identity and options.

use qplan_core::id::CollectionUuid;

use crate::catalog::Catalog;
use crate::collection::{Collection, CollectionOptions};

/// What a namespace looked like when an operation started. Compared by value,
/// never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogGeneration {
    pub namespace: String,
    pub uuid: Option<CollectionUuid>,
    pub options: Option<CollectionOptions>,
}

impl CatalogGeneration {
    pub fn capture(catalog: &Catalog, namespace: &str) -> Self {
        let snapshot = catalog.snapshot(namespace);
        Self::of(namespace, snapshot.as_deref())
    }

    pub fn of(namespace: &str, collection: Option<&Collection>) -> Self {
        Self {
            namespace: namespace.to_string(),
            uuid: collection.map(|c| c.uuid),
            options: collection.map(|c| c.options.clone()),
        }
    }

    pub fn exists(&self) -> bool {
        self.uuid.is_some()
    }

    pub fn is_timeseries(&self) -> bool {
        self.options
            .as_ref()
            .map(|o| o.timeseries.is_some())
            .unwrap_or(false)
    }
}
