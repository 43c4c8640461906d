//! Engine configuration that downstream crates can serialize/deserialize.
//!
//! Configuration is passed explicitly: the engine owns one `EngineConfig`
//! (knobs adjustable through `set_parameter`) and each call carries its own
//! `QueryOptions`.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Pushdown switches. Flipping either never evicts cache entries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PushdownKnobs {
    /// Run `$lookup` through the classic row-at-a-time path instead of a pushed join.
    pub disable_lookup_pushdown: bool,
    /// Run `$group`/`$count` through the classic path instead of a pushed stage.
    pub disable_group_pushdown: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Consistent reuses of an inactive entry required before it turns active.
    pub promotion_streak: u32,

    /// An active entry is suspect once observed works exceed `ratio * cached works`.
    pub replan_ratio: f64,

    /// Lower bound on the per-candidate trial budget (works).
    pub trial_works_floor: u64,

    /// Trial budget as a fraction of the local collection size.
    pub trial_works_fraction: f64,

    /// A candidate producing this many results ends the trial early.
    pub trial_max_results: usize,

    /// Plan cache capacity; the least recently used entry is evicted beyond it.
    pub max_cache_entries: usize,

    /// Foreign-side buffering cap for nested loop joins.
    pub nlj_buffer_cap_bytes: usize,

    /// In-memory hash table budget before build partitions spill.
    pub hash_join_mem_bytes: usize,

    /// Hash joins are only considered for foreign collections at or below these sizes.
    pub hash_join_max_foreign_docs: usize,
    pub hash_join_max_foreign_bytes: usize,

    /// Directory for hash join spill segments. `None` keeps segments in memory.
    pub spill_dir: Option<String>,

    /// Capacity of the per-engine execution profile log.
    pub profile_capacity: usize,

    pub knobs: PushdownKnobs,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            promotion_streak: 1,
            replan_ratio: 2.0,
            trial_works_floor: 10_000,
            trial_works_fraction: 0.29,
            trial_max_results: 101,
            max_cache_entries: 5_000,
            nlj_buffer_cap_bytes: 100 * 1024 * 1024, // 100 MiB
            hash_join_mem_bytes: 100 * 1024 * 1024,
            hash_join_max_foreign_docs: 10_000,
            hash_join_max_foreign_bytes: 100 * 1024 * 1024,
            spill_dir: None,
            profile_capacity: 1_024,
            knobs: PushdownKnobs::default(),
        }
    }
}

/// Per-call options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct QueryOptions {
    pub allow_disk_use: bool,
}

impl QueryOptions {
    pub fn allow_disk_use(allow: bool) -> Self {
        Self {
            allow_disk_use: allow,
        }
    }
}

impl EngineConfig {
    /// Create a config from environment variables, falling back to defaults.
    ///
    /// Environment variables:
    /// - `QPLAN_PROMOTION_STREAK`
    /// - `QPLAN_REPLAN_RATIO`
    /// - `QPLAN_TRIAL_WORKS_FLOOR`, `QPLAN_TRIAL_WORKS_FRACTION`, `QPLAN_TRIAL_MAX_RESULTS`
    /// - `QPLAN_MAX_CACHE_ENTRIES`
    /// - `QPLAN_NLJ_BUFFER_CAP_BYTES`
    /// - `QPLAN_HASH_JOIN_MEM_BYTES`, `QPLAN_HASH_JOIN_MAX_FOREIGN_DOCS`,
    ///   `QPLAN_HASH_JOIN_MAX_FOREIGN_BYTES`
    /// - `QPLAN_SPILL_DIR`, `QPLAN_PROFILE_CAPACITY`
    /// - `QPLAN_DISABLE_LOOKUP_PUSHDOWN`, `QPLAN_DISABLE_GROUP_PUSHDOWN` (`true`/`false`/`1`/`0`)
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Some(v) = env_parse::<u32>("QPLAN_PROMOTION_STREAK") {
            cfg.promotion_streak = v;
        }
        if let Some(v) = env_parse::<f64>("QPLAN_REPLAN_RATIO") {
            cfg.replan_ratio = v;
        }
        if let Some(v) = env_parse::<u64>("QPLAN_TRIAL_WORKS_FLOOR") {
            cfg.trial_works_floor = v;
        }
        if let Some(v) = env_parse::<f64>("QPLAN_TRIAL_WORKS_FRACTION") {
            cfg.trial_works_fraction = v;
        }
        if let Some(v) = env_parse::<usize>("QPLAN_TRIAL_MAX_RESULTS") {
            cfg.trial_max_results = v;
        }
        if let Some(v) = env_parse::<usize>("QPLAN_MAX_CACHE_ENTRIES") {
            cfg.max_cache_entries = v;
        }
        if let Some(v) = env_parse::<usize>("QPLAN_NLJ_BUFFER_CAP_BYTES") {
            cfg.nlj_buffer_cap_bytes = v;
        }
        if let Some(v) = env_parse::<usize>("QPLAN_HASH_JOIN_MEM_BYTES") {
            cfg.hash_join_mem_bytes = v;
        }
        if let Some(v) = env_parse::<usize>("QPLAN_HASH_JOIN_MAX_FOREIGN_DOCS") {
            cfg.hash_join_max_foreign_docs = v;
        }
        if let Some(v) = env_parse::<usize>("QPLAN_HASH_JOIN_MAX_FOREIGN_BYTES") {
            cfg.hash_join_max_foreign_bytes = v;
        }
        if let Ok(s) = std::env::var("QPLAN_SPILL_DIR") {
            cfg.spill_dir = Some(s);
        }
        if let Some(v) = env_parse::<usize>("QPLAN_PROFILE_CAPACITY") {
            cfg.profile_capacity = v;
        }
        if let Some(v) = env_bool("QPLAN_DISABLE_LOOKUP_PUSHDOWN") {
            cfg.knobs.disable_lookup_pushdown = v;
        }
        if let Some(v) = env_bool("QPLAN_DISABLE_GROUP_PUSHDOWN") {
            cfg.knobs.disable_group_pushdown = v;
        }

        cfg
    }

    /// Reject values the planner cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.promotion_streak == 0 {
            return Err(Error::Config("promotion_streak must be at least 1".into()));
        }
        if !(self.replan_ratio.is_finite() && self.replan_ratio >= 1.0) {
            return Err(Error::Config(format!(
                "replan_ratio must be a finite value >= 1.0, got {}",
                self.replan_ratio
            )));
        }
        if !(0.0..=1.0).contains(&self.trial_works_fraction) {
            return Err(Error::Config(format!(
                "trial_works_fraction must be within [0, 1], got {}",
                self.trial_works_fraction
            )));
        }
        if self.trial_max_results == 0 {
            return Err(Error::Config("trial_max_results must be positive".into()));
        }
        if self.max_cache_entries == 0 {
            return Err(Error::Config("max_cache_entries must be positive".into()));
        }
        Ok(())
    }

    /// Trial budget (works per candidate) for a collection of `collection_docs`.
    pub fn trial_budget(&self, collection_docs: usize) -> u64 {
        let scaled = (collection_docs as f64 * self.trial_works_fraction) as u64;
        scaled.max(self.trial_works_floor)
    }

    /// Apply a named runtime parameter. Only the pushdown knobs and the
    /// replanning tunables are settable.
    pub fn set_parameter(&mut self, name: &str, value: &str) -> Result<()> {
        let mut next = self.clone();
        match name {
            "disableLookupPushdown" | "disable_lookup_pushdown" => {
                next.knobs.disable_lookup_pushdown = parse_bool(value)
                    .ok_or_else(|| Error::Config(format!("{name}: expected a boolean")))?;
            }
            "disableGroupPushdown" | "disable_group_pushdown" => {
                next.knobs.disable_group_pushdown = parse_bool(value)
                    .ok_or_else(|| Error::Config(format!("{name}: expected a boolean")))?;
            }
            "replanRatio" | "replan_ratio" => {
                next.replan_ratio = value
                    .parse()
                    .map_err(|_| Error::Config(format!("{name}: expected a number")))?;
            }
            "promotionStreak" | "promotion_streak" => {
                next.promotion_streak = value
                    .parse()
                    .map_err(|_| Error::Config(format!("{name}: expected an integer")))?;
            }
            other => return Err(Error::Config(format!("unknown parameter '{other}'"))),
        }
        next.validate()?;
        *self = next;
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse::<T>().ok())
}

fn env_bool(key: &str) -> Option<bool> {
    std::env::var(key).ok().and_then(|s| parse_bool(&s))
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
