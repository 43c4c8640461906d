//! The namespace -> collection map.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use qplan_core::id::CollectionUuid;
use qplan_core::types::Document;

use crate::collection::{ChangeSet, Collection, CollectionOptions, IndexSpec, RecordId, Staged};
use crate::error::{CatalogError, Result};
use crate::guard::CatalogGenerationGuard;

/// Catalog changes observers care about (plan cache invalidation).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DdlEvent {
    CollectionCreated { namespace: String },
    CollectionDropped { namespace: String },
    IndexCreated { namespace: String, index: String },
    IndexDropped { namespace: String, index: String },
}

impl DdlEvent {
    pub fn namespace(&self) -> &str {
        match self {
            DdlEvent::CollectionCreated { namespace }
            | DdlEvent::CollectionDropped { namespace }
            | DdlEvent::IndexCreated { namespace, .. }
            | DdlEvent::IndexDropped { namespace, .. } => namespace,
        }
    }
}

type Listener = Arc<dyn Fn(&DdlEvent) + Send + Sync>;

#[derive(Default)]
pub struct Catalog {
    collections: RwLock<BTreeMap<String, Arc<Collection>>>,
    listeners: RwLock<Vec<Listener>>,
}

impl std::fmt::Debug for Catalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Catalog")
            .field("collections", &self.list_collections())
            .finish()
    }
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a DDL observer. Observers run after the catalog lock is released.
    pub fn subscribe(&self, listener: impl Fn(&DdlEvent) + Send + Sync + 'static) {
        self.listeners.write().push(Arc::new(listener));
    }

    fn emit(&self, event: DdlEvent) {
        #[cfg(feature = "tracing")]
        tracing::debug!(?event, "catalog ddl");
        let listeners: Vec<Listener> = self.listeners.read().clone();
        for listener in listeners {
            listener(&event);
        }
    }

    pub fn snapshot(&self, namespace: &str) -> Option<Arc<Collection>> {
        self.collections.read().get(namespace).cloned()
    }

    pub fn list_collections(&self) -> Vec<String> {
        self.collections.read().keys().cloned().collect()
    }

    pub fn create_collection(
        &self,
        namespace: &str,
        options: CollectionOptions,
    ) -> Result<CollectionUuid> {
        if let Some(ts) = &options.timeseries {
            if ts.time_field.is_empty() {
                return Err(CatalogError::invalid_options("timeField", "must not be empty"));
            }
            if ts.meta_field.as_deref() == Some(ts.time_field.as_str()) {
                return Err(CatalogError::invalid_options(
                    "metaField",
                    "must differ from the time field",
                ));
            }
        }
        let uuid = {
            let mut map = self.collections.write();
            if map.contains_key(namespace) {
                return Err(CatalogError::NamespaceExists(namespace.to_string()));
            }
            let coll = Collection::new(namespace, options);
            let uuid = coll.uuid;
            map.insert(namespace.to_string(), Arc::new(coll));
            uuid
        };
        self.emit(DdlEvent::CollectionCreated {
            namespace: namespace.to_string(),
        });
        Ok(uuid)
    }

    /// Returns whether a collection was dropped.
    pub fn drop_collection(&self, namespace: &str) -> bool {
        let dropped = self.collections.write().remove(namespace).is_some();
        if dropped {
            self.emit(DdlEvent::CollectionDropped {
                namespace: namespace.to_string(),
            });
        }
        dropped
    }

    /// Creates the collection implicitly when missing. Returns false when an
    /// identical index already existed.
    pub fn create_index(&self, namespace: &str, spec: IndexSpec) -> Result<bool> {
        let name = spec.name.clone();
        let (created_collection, created_index) = {
            let mut map = self.collections.write();
            let created_collection = !map.contains_key(namespace);
            let created_index = match map.get_mut(namespace) {
                Some(slot) => Arc::make_mut(slot).add_index(spec)?,
                None => {
                    let mut next = Collection::new(namespace, CollectionOptions::default());
                    let created = next.add_index(spec)?;
                    map.insert(namespace.to_string(), Arc::new(next));
                    created
                }
            };
            (created_collection, created_index)
        };
        if created_collection {
            self.emit(DdlEvent::CollectionCreated {
                namespace: namespace.to_string(),
            });
        }
        if created_index {
            self.emit(DdlEvent::IndexCreated {
                namespace: namespace.to_string(),
                index: name,
            });
        }
        Ok(created_index)
    }

    pub fn drop_index(&self, namespace: &str, index: &str) -> Result<()> {
        {
            let mut map = self.collections.write();
            let slot = map
                .get_mut(namespace)
                .ok_or_else(|| CatalogError::NamespaceMissing(namespace.to_string()))?;
            Arc::make_mut(slot).drop_index(index)?;
        }
        self.emit(DdlEvent::IndexDropped {
            namespace: namespace.to_string(),
            index: index.to_string(),
        });
        Ok(())
    }

    /// Insert documents atomically, creating the collection when missing.
    pub fn insert_many(&self, namespace: &str, docs: Vec<Document>) -> Result<Vec<RecordId>> {
        let (ids, created) = {
            let mut map = self.collections.write();
            let current = map.get(namespace).map(Arc::as_ref);
            let created = current.is_none();
            let fresh;
            let base = match current {
                Some(existing) => existing,
                None => {
                    fresh = Collection::new(namespace, CollectionOptions::default());
                    &fresh
                }
            };
            let mut staged = Staged::new(base);
            let ids = docs
                .into_iter()
                .map(|doc| staged.insert(doc))
                .collect::<Result<Vec<_>>>()?;
            let changes = staged.into_changes();
            publish(&mut map, namespace, changes);
            (ids, created)
        };
        if created {
            self.emit(DdlEvent::CollectionCreated {
                namespace: namespace.to_string(),
            });
        }
        Ok(ids)
    }

    /// Validate `guard`, stage `apply` over the live collection and publish
    /// the staged writes, all under the catalog write lock. Nothing is
    /// published when either step fails.
    ///
    /// A namespace the guard captured as absent is created (default options)
    /// on commit.
    pub fn commit_guarded<T>(
        &self,
        guard: &mut CatalogGenerationGuard,
        apply: impl FnOnce(&mut Staged<'_>) -> Result<T>,
    ) -> Result<T> {
        let namespace = guard.generation().namespace.clone();
        let (out, created) = {
            let mut map = self.collections.write();
            let current = map.get(&namespace).map(Arc::as_ref);
            guard.check(current)?;

            let created = current.is_none();
            let fresh;
            let base = match current {
                Some(existing) => existing,
                None => {
                    fresh = Collection::new(namespace.as_str(), CollectionOptions::default());
                    &fresh
                }
            };
            let mut staged = Staged::new(base);
            let out = match apply(&mut staged) {
                Ok(out) => out,
                Err(e) => {
                    guard.abort();
                    return Err(e);
                }
            };
            let changes = staged.into_changes();
            publish(&mut map, &namespace, changes);
            guard.complete()?;
            (out, created)
        };
        if created {
            self.emit(DdlEvent::CollectionCreated { namespace });
        }
        Ok(out)
    }
}

/// Apply `changes` to the live collection, copying it only while a reader
/// still holds a snapshot of it.
fn publish(map: &mut BTreeMap<String, Arc<Collection>>, namespace: &str, changes: ChangeSet) {
    let slot = map
        .entry(namespace.to_string())
        .or_insert_with(|| Arc::new(Collection::new(namespace, CollectionOptions::default())));
    changes.apply(Arc::make_mut(slot));
}
