//! Checkpoint validation for long-running write batches.
//!
//! `Started -> Executing -> Completed | Aborted`. Every checkpoint re-reads the
//! namespace and compares it with the captured generation; the first mismatch
//! aborts the guard and every later call fails.

use std::sync::Arc;

use crate::catalog::Catalog;
use crate::collection::Collection;
use crate::error::{CatalogError, Result};
use crate::generation::CatalogGeneration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardState {
    Started,
    Executing,
    Completed,
    Aborted,
}

impl GuardState {
    fn name(self) -> &'static str {
        match self {
            GuardState::Started => "started",
            GuardState::Executing => "executing",
            GuardState::Completed => "completed",
            GuardState::Aborted => "aborted",
        }
    }
}

/// Outcome of a successful comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Unchanged,
    /// Same options under a new identity (dropped and recreated compatibly).
    Recreated,
}

#[derive(Debug)]
pub struct CatalogGenerationGuard {
    captured: CatalogGeneration,
    state: GuardState,
    checkpoints: u64,
}

impl CatalogGenerationGuard {
    pub fn start(catalog: &Catalog, namespace: &str) -> Self {
        Self::from_generation(CatalogGeneration::capture(catalog, namespace))
    }

    pub fn from_generation(captured: CatalogGeneration) -> Self {
        Self {
            captured,
            state: GuardState::Started,
            checkpoints: 0,
        }
    }

    pub fn generation(&self) -> &CatalogGeneration {
        &self.captured
    }

    pub fn state(&self) -> GuardState {
        self.state
    }

    pub fn checkpoints(&self) -> u64 {
        self.checkpoints
    }

    /// Re-read the namespace and compare. Returns the snapshot that passed.
    pub fn checkpoint(&mut self, catalog: &Catalog) -> Result<Option<Arc<Collection>>> {
        let current = catalog.snapshot(&self.captured.namespace);
        self.check(current.as_deref())?;
        Ok(current)
    }

    /// Compare against a collection the caller already holds (e.g. under the
    /// catalog write lock at commit).
    pub fn check(&mut self, current: Option<&Collection>) -> Result<Verdict> {
        match self.state {
            GuardState::Started | GuardState::Executing => {}
            other => {
                return Err(CatalogError::GuardState {
                    state: other.name(),
                    action: "checkpoint",
                })
            }
        }
        self.state = GuardState::Executing;
        self.checkpoints += 1;

        match compare(&self.captured, current) {
            Ok(verdict) => {
                #[cfg(feature = "tracing")]
                if verdict == Verdict::Recreated {
                    tracing::debug!(
                        namespace = %self.captured.namespace,
                        checkpoint = self.checkpoints,
                        "collection recreated with compatible options; continuing"
                    );
                }
                Ok(verdict)
            }
            Err(e) => {
                self.state = GuardState::Aborted;
                #[cfg(feature = "tracing")]
                tracing::info!(
                    namespace = %self.captured.namespace,
                    checkpoint = self.checkpoints,
                    error = %e,
                    "catalog generation changed; aborting batch"
                );
                Err(e)
            }
        }
    }

    pub fn complete(&mut self) -> Result<()> {
        if self.state == GuardState::Aborted {
            return Err(CatalogError::GuardState {
                state: self.state.name(),
                action: "complete",
            });
        }
        self.state = GuardState::Completed;
        Ok(())
    }

    pub fn abort(&mut self) {
        if self.state != GuardState::Completed {
            self.state = GuardState::Aborted;
        }
    }
}

/// Pure comparison of a captured generation with the live collection.
pub fn compare(captured: &CatalogGeneration, current: Option<&Collection>) -> Result<Verdict> {
    let ns = &captured.namespace;
    let current_ts = current.and_then(|c| c.timeseries());

    if !captured.exists() {
        return match (current, current_ts) {
            (None, _) => Ok(Verdict::Unchanged),
            (Some(_), Some(_)) => Err(CatalogError::invalid_options(
                "timeseries",
                format!("{ns} was created as a time-series collection during the operation"),
            )),
            (Some(_), None) => Ok(Verdict::Recreated),
        };
    }

    let current = current.ok_or_else(|| CatalogError::NamespaceMissing(ns.clone()))?;
    let captured_ts = captured.options.as_ref().and_then(|o| o.timeseries.as_ref());

    match (captured_ts, current_ts) {
        (Some(_), None) => return Err(CatalogError::NamespaceMissing(ns.clone())),
        (None, Some(_)) => {
            return Err(CatalogError::invalid_options(
                "timeseries",
                format!("{ns} was recreated as a time-series collection"),
            ))
        }
        (Some(was), Some(now)) => {
            if was.time_field != now.time_field {
                return Err(CatalogError::invalid_options(
                    "timeField",
                    format!(
                        "time field changed from '{}' to '{}'",
                        was.time_field, now.time_field
                    ),
                ));
            }
            if was.meta_field != now.meta_field {
                return Err(CatalogError::invalid_options(
                    "metaField",
                    format!(
                        "meta field changed from {:?} to {:?}",
                        was.meta_field, now.meta_field
                    ),
                ));
            }
        }
        (None, None) => {}
    }

    if Some(current.uuid) == captured.uuid {
        Ok(Verdict::Unchanged)
    } else {
        Ok(Verdict::Recreated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::CollectionOptions;

    fn ts(meta: Option<&str>) -> CollectionOptions {
        CollectionOptions::timeseries("time", meta)
    }

    #[test]
    fn drop_is_namespace_missing_and_aborts() {
        let catalog = Catalog::new();
        catalog.create_collection("t.ts", ts(Some("tag"))).unwrap();
        let mut guard = CatalogGenerationGuard::start(&catalog, "t.ts");
        assert!(guard.checkpoint(&catalog).unwrap().is_some());
        assert_eq!(guard.state(), GuardState::Executing);

        catalog.drop_collection("t.ts");
        assert_eq!(
            guard.checkpoint(&catalog).unwrap_err(),
            CatalogError::NamespaceMissing("t.ts".into())
        );
        assert_eq!(guard.state(), GuardState::Aborted);
        assert!(matches!(
            guard.checkpoint(&catalog),
            Err(CatalogError::GuardState { .. })
        ));
        assert!(guard.complete().is_err());
    }

    #[test]
    fn recreate_as_regular_collection_is_namespace_missing() {
        let catalog = Catalog::new();
        catalog.create_collection("t.ts", ts(Some("tag"))).unwrap();
        let mut guard = CatalogGenerationGuard::start(&catalog, "t.ts");
        catalog.drop_collection("t.ts");
        catalog
            .create_collection("t.ts", CollectionOptions::default())
            .unwrap();
        assert!(matches!(
            guard.checkpoint(&catalog),
            Err(CatalogError::NamespaceMissing(_))
        ));
    }

    #[test]
    fn different_meta_field_is_invalid_options_naming_it() {
        let catalog = Catalog::new();
        catalog.create_collection("t.ts", ts(Some("tag"))).unwrap();
        let mut guard = CatalogGenerationGuard::start(&catalog, "t.ts");
        catalog.drop_collection("t.ts");
        catalog.create_collection("t.ts", ts(Some("other"))).unwrap();
        match guard.checkpoint(&catalog) {
            Err(CatalogError::InvalidOptions { field, .. }) => assert_eq!(field, "metaField"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn compatible_recreate_continues() {
        let catalog = Catalog::new();
        catalog.create_collection("t.ts", ts(Some("tag"))).unwrap();
        let mut guard = CatalogGenerationGuard::start(&catalog, "t.ts");
        catalog.drop_collection("t.ts");
        catalog.create_collection("t.ts", ts(Some("tag"))).unwrap();
        let snap = guard.checkpoint(&catalog).unwrap().unwrap();
        assert_ne!(Some(snap.uuid), guard.generation().uuid);
        guard.complete().unwrap();
        assert_eq!(guard.state(), GuardState::Completed);
    }

    #[test]
    fn regular_to_timeseries_names_the_option() {
        let catalog = Catalog::new();
        catalog
            .create_collection("t.c", CollectionOptions::default())
            .unwrap();
        let captured = CatalogGeneration::capture(&catalog, "t.c");
        catalog.drop_collection("t.c");
        catalog.create_collection("t.c", ts(None)).unwrap();
        let current = catalog.snapshot("t.c");
        match compare(&captured, current.as_deref()) {
            Err(CatalogError::InvalidOptions { field, .. }) => assert_eq!(field, "timeseries"),
            other => panic!("unexpected {other:?}"),
        }
    }
}
