//! The plan cache.
//!
//! Two levels: a map from stable `PlanCacheKey` to a per-entry mutex holding
//! the mutable scored payload. Lookups take the map's shared lock and then the
//! entry's own lock; updates to a single entry lock only that entry. Inserting
//! a new key, invalidation and `clear()` take the map's exclusive lock.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use qplan_core::id::{Counter, Epoch};

use crate::candidates::CandidatePlan;
use crate::error::{PlanError, Result};
use crate::key::PlanCacheKey;
use crate::multi::{CandidateScore, PlanDecision};
use crate::replan::EntryHealth;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanCacheEntry {
    #[serde(skip)]
    pub key: PlanCacheKey,
    pub namespace: String,
    pub query_hash: String,
    pub plan_cache_key: String,
    pub plan: CandidatePlan,
    pub works: u64,
    /// Results `works` was measured over; active executions are measured over
    /// the same window.
    pub trial_window: usize,
    pub is_active: bool,
    pub times_used: u64,
    pub reuse_streak: u32,
    pub health: EntryHealth,
    pub creation_epoch: Epoch,
    pub last_used_epoch: Epoch,
    /// Per-candidate scores of the race that produced this entry.
    pub decision: Vec<CandidateScore>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromotionDecision {
    Promoted,
    StillInactive { streak: u32, required: u32 },
    AlreadyActive,
}

/// Filter for `PlanCache::list`. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct CacheFilter {
    pub namespace: Option<String>,
    pub query_hash: Option<String>,
    pub plan_cache_key: Option<String>,
    pub is_active: Option<bool>,
}

impl CacheFilter {
    pub fn namespace(ns: impl Into<String>) -> Self {
        Self {
            namespace: Some(ns.into()),
            ..Self::default()
        }
    }

    fn matches(&self, e: &PlanCacheEntry) -> bool {
        self.namespace.as_deref().map_or(true, |ns| e.namespace == ns)
            && self.query_hash.as_deref().map_or(true, |q| e.query_hash == q)
            && self
                .plan_cache_key
                .as_deref()
                .map_or(true, |k| e.plan_cache_key == k)
            && self.is_active.map_or(true, |a| e.is_active == a)
    }
}

type Slot = Arc<Mutex<PlanCacheEntry>>;

pub struct PlanCache {
    entries: RwLock<HashMap<PlanCacheKey, Slot>>,
    clock: Counter,
    max_entries: usize,
}

impl std::fmt::Debug for PlanCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanCache")
            .field("entries", &self.len())
            .field("max_entries", &self.max_entries)
            .finish()
    }
}

impl PlanCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            clock: Counter::new(),
            max_entries: max_entries.max(1),
        }
    }

    fn tick(&self) -> Epoch {
        Epoch::new(self.clock.next())
    }

    fn slot(&self, key: &PlanCacheKey) -> Option<Slot> {
        self.entries.read().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the entry under `key`. Refreshes recency for eviction but
    /// never touches `times_used`.
    pub fn lookup(&self, key: &PlanCacheKey) -> Option<PlanCacheEntry> {
        let slot = self.slot(key)?;
        let mut entry = slot.lock();
        entry.last_used_epoch = self.tick();
        Some(entry.clone())
    }

    /// Like `lookup`, but leaves recency alone (explain, listing).
    pub fn peek(&self, key: &PlanCacheKey) -> Option<PlanCacheEntry> {
        let slot = self.slot(key)?;
        let entry = slot.lock();
        Some(entry.clone())
    }

    /// Store a race winner as an inactive entry. Overwrites an inactive entry
    /// (restarting its streak); refuses to overwrite an active one.
    pub fn insert_inactive(
        &self,
        key: &PlanCacheKey,
        plan: CandidatePlan,
        decision: PlanDecision,
    ) -> Result<()> {
        if let Some(slot) = self.slot(key) {
            let mut entry = slot.lock();
            if entry.is_active {
                return Err(PlanError::ActiveEntryExists(key.to_string()));
            }
            self.reset_entry(&mut entry, plan, decision);
            return Ok(());
        }

        let mut map = self.entries.write();
        if let Some(slot) = map.get(key).cloned() {
            // Lost a race with another inserter.
            let mut entry = slot.lock();
            if entry.is_active {
                return Err(PlanError::ActiveEntryExists(key.to_string()));
            }
            self.reset_entry(&mut entry, plan, decision);
            return Ok(());
        }
        if map.len() >= self.max_entries {
            evict_lru(&mut map);
        }
        let now = self.tick();
        let entry = PlanCacheEntry {
            key: key.clone(),
            namespace: key.namespace.clone(),
            query_hash: key.query_hash(),
            plan_cache_key: key.plan_cache_key(),
            plan,
            works: decision.works,
            trial_window: decision.window,
            is_active: false,
            times_used: 0,
            reuse_streak: 0,
            health: EntryHealth::Trusted,
            creation_epoch: now,
            last_used_epoch: now,
            decision: decision.scores,
        };
        map.insert(key.clone(), Arc::new(Mutex::new(entry)));
        Ok(())
    }

    /// Overwrite a stale entry with the winner of a forced replan. The new
    /// entry starts inactive with a fresh streak.
    pub fn replace_after_replan(
        &self,
        key: &PlanCacheKey,
        plan: CandidatePlan,
        decision: PlanDecision,
    ) -> Result<()> {
        match self.slot(key) {
            Some(slot) => {
                let mut entry = slot.lock();
                self.reset_entry(&mut entry, plan, decision);
                Ok(())
            }
            None => self.insert_inactive(key, plan, decision),
        }
    }

    fn reset_entry(
        &self,
        entry: &mut PlanCacheEntry,
        plan: CandidatePlan,
        decision: PlanDecision,
    ) {
        let now = self.tick();
        entry.plan = plan;
        entry.works = decision.works;
        entry.trial_window = decision.window;
        entry.is_active = false;
        entry.reuse_streak = 0;
        entry.health = EntryHealth::Trusted;
        entry.creation_epoch = now;
        entry.last_used_epoch = now;
        entry.decision = decision.scores;
    }

    /// Count a use of the entry. An inactive entry counts a consistent reuse
    /// and turns active once `promotion_streak` reuses accumulate.
    pub fn record_use(&self, key: &PlanCacheKey, promotion_streak: u32) -> Option<PromotionDecision> {
        let slot = self.slot(key)?;
        let mut entry = slot.lock();
        entry.times_used += 1;
        entry.last_used_epoch = self.tick();
        if entry.is_active {
            return Some(PromotionDecision::AlreadyActive);
        }
        entry.reuse_streak += 1;
        let required = promotion_streak.max(1);
        if entry.reuse_streak >= required {
            entry.is_active = true;
            entry.health = EntryHealth::Trusted;
            #[cfg(feature = "tracing")]
            tracing::debug!(
                query_hash = %entry.query_hash,
                plan_cache_key = %entry.plan_cache_key,
                plan = %entry.plan.access,
                "plan cache entry promoted to active"
            );
            Some(PromotionDecision::Promoted)
        } else {
            Some(PromotionDecision::StillInactive {
                streak: entry.reuse_streak,
                required,
            })
        }
    }

    /// Deactivate an entry whose plan regressed. Returns false when the entry
    /// is gone or was not trusted.
    pub fn mark_suspect(&self, key: &PlanCacheKey) -> bool {
        let Some(slot) = self.slot(key) else {
            return false;
        };
        let mut entry = slot.lock();
        if entry.health != EntryHealth::Trusted {
            return false;
        }
        entry.health = EntryHealth::Suspect;
        entry.is_active = false;
        entry.reuse_streak = 0;
        true
    }

    /// Compare-and-set on an entry's health.
    pub fn transition_health(&self, key: &PlanCacheKey, from: EntryHealth, to: EntryHealth) -> bool {
        let Some(slot) = self.slot(key) else {
            return false;
        };
        let mut entry = slot.lock();
        if entry.health != from {
            return false;
        }
        entry.health = to;
        true
    }

    /// Remove entries matching `pred`; returns how many were removed.
    pub fn invalidate(&self, pred: impl Fn(&PlanCacheEntry) -> bool) -> usize {
        let mut map = self.entries.write();
        let before = map.len();
        map.retain(|_, slot| !pred(&*slot.lock()));
        before - map.len()
    }

    pub fn invalidate_namespace(&self, namespace: &str) -> usize {
        let removed = self.invalidate(|e| e.namespace == namespace);
        #[cfg(feature = "tracing")]
        if removed > 0 {
            tracing::debug!(namespace, removed, "plan cache entries invalidated");
        }
        removed
    }

    pub fn clear(&self) -> usize {
        let mut map = self.entries.write();
        let n = map.len();
        map.clear();
        n
    }

    /// Snapshots of matching entries, ordered by namespace then `queryHash`.
    pub fn list(&self, filter: &CacheFilter) -> Vec<PlanCacheEntry> {
        let slots: Vec<Slot> = self.entries.read().values().cloned().collect();
        let mut out: Vec<PlanCacheEntry> = slots
            .iter()
            .map(|s| s.lock().clone())
            .filter(|e| filter.matches(e))
            .collect();
        out.sort_by(|a, b| {
            a.namespace
                .cmp(&b.namespace)
                .then_with(|| a.query_hash.cmp(&b.query_hash))
                .then_with(|| a.plan_cache_key.cmp(&b.plan_cache_key))
        });
        out
    }
}

fn evict_lru(map: &mut HashMap<PlanCacheKey, Slot>) {
    let victim = map
        .iter()
        .min_by_key(|(_, slot)| slot.lock().last_used_epoch)
        .map(|(k, _)| k.clone());
    if let Some(key) = victim {
        map.remove(&key);
        #[cfg(feature = "tracing")]
        tracing::debug!(plan_cache_key = %key, "evicted least recently used plan cache entry");
    }
}
