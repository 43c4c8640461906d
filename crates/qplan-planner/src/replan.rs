//! Regression detection for active cache entries.
//!
//! After an active entry runs, the monitor compares the works the execution
//! needed to finish its trial window against the works recorded when the
//! entry won its race. Exceeding `ratio * cached` marks the entry `Suspect`
//! and deactivates it; the next execution with the same key re-races.

use serde::Serialize;

use crate::cache::PlanCache;
use crate::key::PlanCacheKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EntryHealth {
    Trusted,
    Suspect,
    /// Transient: one execution is re-racing the entry's shape.
    Replanning,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReplanSignal {
    Healthy,
    Degraded {
        observed: u64,
        cached: u64,
        threshold: f64,
    },
}

impl ReplanSignal {
    pub fn is_degraded(&self) -> bool {
        matches!(self, ReplanSignal::Degraded { .. })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ReplanningMonitor {
    ratio: f64,
}

impl ReplanningMonitor {
    pub fn new(ratio: f64) -> Self {
        Self { ratio }
    }

    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    /// Pure check; a cached works of zero is treated as one.
    pub fn evaluate(&self, cached_works: u64, observed_works: u64) -> ReplanSignal {
        let threshold = self.ratio * cached_works.max(1) as f64;
        if observed_works as f64 > threshold {
            ReplanSignal::Degraded {
                observed: observed_works,
                cached: cached_works,
                threshold,
            }
        } else {
            ReplanSignal::Healthy
        }
    }

    /// Evaluate an execution of the active entry under `key` and mark the entry
    /// suspect when it regressed. Entries that are missing or no longer active
    /// are left alone.
    pub fn observe(&self, cache: &PlanCache, key: &PlanCacheKey, observed_works: u64) -> ReplanSignal {
        let Some(entry) = cache.lookup(key) else {
            return ReplanSignal::Healthy;
        };
        if !entry.is_active || entry.health != EntryHealth::Trusted {
            return ReplanSignal::Healthy;
        }
        let signal = self.evaluate(entry.works, observed_works);
        if signal.is_degraded() && cache.mark_suspect(key) {
            #[cfg(feature = "tracing")]
            tracing::info!(
                query_hash = %key.query_hash(),
                plan_cache_key = %key.plan_cache_key(),
                observed_works,
                cached_works = entry.works,
                "active plan regressed; marked for replanning"
            );
        }
        signal
    }

    /// Claim a suspect entry for re-racing. Only one caller wins.
    pub fn begin_replan(&self, cache: &PlanCache, key: &PlanCacheKey) -> bool {
        cache.transition_health(key, EntryHealth::Suspect, EntryHealth::Replanning)
    }
}
