//! The engine: plan cache lookup, multi-planner races, replanning, pushdown
//! lowering, join selection and guarded writes over one catalog.
//!
//! Per query:
//! - derive the `PlanCacheKey` from the pipeline and the local collection;
//! - an active entry runs its cached access path directly, then the
//!   `ReplanningMonitor` compares the works it needed to reach the entry's
//!   trial window with the cached works;
//! - otherwise candidates race; the winner is stored inactive, counted as a
//!   consistent reuse, or replaces a suspect entry;
//! - the tail stages run pushed or classic, and every `$lookup` selects its
//!   join algorithm against the foreign collection as it is right now.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

use qplan_catalog::{
    Catalog, CheckpointHook, Collection, CollectionOptions, IndexSpec, NoopHook,
};
use qplan_core::config::{EngineConfig, QueryOptions};
use qplan_core::id::{Counter, OpId};
use qplan_core::shape::{filter_semantics, Pipeline, Predicate, Stage};
use qplan_core::types::Document;
use qplan_mem::{FsSpillStore, SpillManager};
use qplan_planner::explain::{CacheEntrySummary, LookupExplain};
use qplan_planner::{
    enumerate_candidates, lower_pipeline, CacheFilter, CandidatePlan, EntryHealth, ExplainPlan,
    JoinAlgorithm, JoinStrategy, JoinStrategySelector, MultiPlanner, PhysicalPipeline, PlanCache,
    PlanCacheEntry, PlanCacheKey, PlanDecision, PlanError, ReplanningMonitor, TrialConfig,
};

use crate::error::{ExecError, Result};
use crate::group;
use crate::join::{self, JoinContext, JoinStats};
use crate::metrics;
use crate::profile::{ProfileEntry, ProfileLog};
use crate::stage::{drain, AccessRun, AccessStage};
use crate::write::{self, WriteBatch, WriteSummary};

/// Metadata every successful aggregate/find reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryMetadata {
    pub query_hash: String,
    pub plan_cache_key: String,
    pub from_multi_planner: bool,
    /// This execution re-raced a suspect entry and replaced it.
    pub replanned: bool,
    /// Algorithm of the first pushed `$lookup`, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub join_algorithm: Option<JoinAlgorithm>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryOutput {
    pub docs: Vec<Document>,
    pub meta: QueryMetadata,
}

impl QueryOutput {
    pub fn to_json(&self) -> serde_json::Value {
        let mut out = serde_json::to_value(&self.meta).unwrap_or_else(|_| serde_json::json!({}));
        out["docs"] = serde_json::Value::Array(self.docs.iter().map(Document::to_json).collect());
        out
    }
}

/// The local side of one execution.
struct LocalRun {
    run: AccessRun,
    plan: CandidatePlan,
    from_multi_planner: bool,
    replanned: bool,
}

pub struct Engine {
    catalog: Arc<Catalog>,
    cache: Arc<PlanCache>,
    config: RwLock<EngineConfig>,
    spill: SpillManager,
    profile: ProfileLog,
    hook: Arc<dyn CheckpointHook>,
    ops: Counter,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("collections", &self.catalog.list_collections())
            .field("cache_entries", &self.cache.len())
            .field("config", &*self.config.read())
            .finish_non_exhaustive()
    }
}

impl Engine {
    pub fn new(config: EngineConfig) -> Result<Self> {
        Self::with_catalog(config, Arc::new(Catalog::new()))
    }

    /// Build an engine over an existing catalog. The engine subscribes to the
    /// catalog's DDL events to invalidate plan cache entries per namespace.
    pub fn with_catalog(config: EngineConfig, catalog: Arc<Catalog>) -> Result<Self> {
        config.validate()?;
        let cache = Arc::new(PlanCache::new(config.max_cache_entries));
        let weak = Arc::downgrade(&cache);
        catalog.subscribe(move |event| {
            if let Some(cache) = weak.upgrade() {
                cache.invalidate_namespace(event.namespace());
            }
        });
        let spill = match &config.spill_dir {
            Some(dir) => SpillManager::new(Box::new(FsSpillStore::new(dir)?), "hash-join"),
            None => SpillManager::in_memory("hash-join"),
        };
        Ok(Self {
            catalog,
            cache,
            profile: ProfileLog::new(config.profile_capacity),
            config: RwLock::new(config),
            spill,
            hook: Arc::new(NoopHook),
            ops: Counter::new(),
        })
    }

    /// Install the hook consulted before every write-batch checkpoint.
    pub fn with_checkpoint_hook(mut self, hook: Arc<dyn CheckpointHook>) -> Self {
        self.hook = hook;
        self
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn config(&self) -> EngineConfig {
        self.config.read().clone()
    }

    /// Runtime parameter change. Never touches the plan cache.
    pub fn set_parameter(&self, name: &str, value: &str) -> Result<()> {
        self.config.write().set_parameter(name, value)?;
        #[cfg(feature = "tracing")]
        tracing::info!(name, value, "parameter changed");
        Ok(())
    }

    // DDL and loading.

    pub fn create_collection(&self, namespace: &str, options: CollectionOptions) -> Result<()> {
        self.catalog.create_collection(namespace, options)?;
        Ok(())
    }

    pub fn drop_collection(&self, namespace: &str) -> bool {
        self.catalog.drop_collection(namespace)
    }

    pub fn create_index(&self, namespace: &str, spec: IndexSpec) -> Result<bool> {
        Ok(self.catalog.create_index(namespace, spec)?)
    }

    pub fn drop_index(&self, namespace: &str, index: &str) -> Result<()> {
        Ok(self.catalog.drop_index(namespace, index)?)
    }

    pub fn insert_many(&self, namespace: &str, docs: Vec<Document>) -> Result<usize> {
        Ok(self.catalog.insert_many(namespace, docs)?.len())
    }

    // Plan cache surface.

    pub fn list_cache_entries(&self, filter: &CacheFilter) -> Vec<PlanCacheEntry> {
        self.cache.list(filter)
    }

    pub fn clear_cache(&self) -> usize {
        let removed = self.cache.clear();
        #[cfg(feature = "tracing")]
        tracing::debug!(removed, "plan cache cleared");
        removed
    }

    /// Executions recorded for `namespace` (or all), oldest first.
    pub fn profile(&self, namespace: Option<&str>) -> Vec<ProfileEntry> {
        self.profile.entries(namespace)
    }

    pub fn latest_profile(&self) -> Option<ProfileEntry> {
        self.profile.latest()
    }

    // Queries.

    pub fn find(
        &self,
        namespace: &str,
        filter: Vec<Predicate>,
        limit: Option<usize>,
        options: QueryOptions,
    ) -> Result<QueryOutput> {
        self.aggregate(namespace, &Pipeline::find(filter, limit), options)
    }

    pub fn aggregate(
        &self,
        namespace: &str,
        pipeline: &Pipeline,
        options: QueryOptions,
    ) -> Result<QueryOutput> {
        pipeline.validate()?;
        let cfg = self.config();
        let op = OpId::new(self.ops.next());
        let local = self.catalog.snapshot(namespace);
        let key = PlanCacheKey::derive(namespace, pipeline, local.as_deref())?;
        let filter = pipeline.leading_filter();

        let mut local_run = self.run_local(namespace, &key, &filter, local, &cfg)?;
        let physical = lower_pipeline(pipeline, cfg.knobs);
        let mut stats = JoinStats::default();
        let (docs, lookups) = self.run_tail(
            std::mem::take(&mut local_run.run.docs),
            &physical,
            &cfg,
            options,
            &mut stats,
        )?;

        let meta = QueryMetadata {
            query_hash: key.query_hash(),
            plan_cache_key: key.plan_cache_key(),
            from_multi_planner: local_run.from_multi_planner,
            replanned: local_run.replanned,
            join_algorithm: first_pushed_algorithm(&lookups),
        };
        let entry = ProfileEntry {
            op,
            namespace: namespace.to_string(),
            query_hash: meta.query_hash.clone(),
            plan_cache_key: meta.plan_cache_key.clone(),
            from_multi_planner: meta.from_multi_planner,
            replanned: meta.replanned,
            plan_summary: local_run.plan.access.to_string(),
            join_algorithm: meta.join_algorithm,
            works: local_run.run.works,
            docs_examined: local_run.run.examined,
            foreign_examined: stats.foreign_examined,
            n_returned: docs.len(),
        };
        metrics::record_query(&entry);
        self.profile.record(entry);
        Ok(QueryOutput { docs, meta })
    }

    /// Describe how `pipeline` would run now. Leaves the plan cache untouched.
    pub fn explain(
        &self,
        namespace: &str,
        pipeline: &Pipeline,
        options: QueryOptions,
    ) -> Result<ExplainPlan> {
        pipeline.validate()?;
        let cfg = self.config();
        let local = self.catalog.snapshot(namespace);
        let key = PlanCacheKey::derive(namespace, pipeline, local.as_deref())?;
        let filter = pipeline.leading_filter();
        let candidates = enumerate_candidates(&filter, local.as_deref());
        let entry = self.cache.peek(&key);

        let winning = match &entry {
            Some(e) if e.is_active => e.plan.clone(),
            _ => {
                let outcome = self
                    .trial_planner(&cfg, local.as_deref())
                    .race(self.build_stages(namespace, &filter, local.clone(), candidates.clone())?)?;
                outcome.winner_plan().clone()
            }
        };
        let rejected_plans = candidates
            .iter()
            .filter(|c| !c.same_plan(&winning))
            .map(|c| c.access.clone())
            .collect();

        let physical = lower_pipeline(pipeline, cfg.knobs);
        let lookups = self.describe_lookups(&physical, &cfg, options);
        Ok(ExplainPlan {
            namespace: namespace.to_string(),
            query_hash: key.query_hash(),
            plan_cache_key: key.plan_cache_key(),
            winning_plan: winning.access,
            rejected_plans,
            pushed_stages: physical.pushed_names().into_iter().map(String::from).collect(),
            classic_stages: physical.classic_names().into_iter().map(String::from).collect(),
            join_algorithm: first_pushed_algorithm(&lookups),
            lookups,
            cache_entry: entry.map(|e| CacheEntrySummary {
                is_active: e.is_active,
                works: e.works,
                times_used: e.times_used,
            }),
        })
    }

    // Writes.

    pub fn write(&self, batch: &WriteBatch) -> Result<WriteSummary> {
        write::execute(&self.catalog, self.hook.as_ref(), batch)
    }

    // Internals.

    fn trial_planner(&self, cfg: &EngineConfig, local: Option<&Collection>) -> MultiPlanner {
        let docs = local.map_or(0, Collection::len);
        MultiPlanner::new(TrialConfig {
            max_works: cfg.trial_budget(docs),
            max_results: cfg.trial_max_results,
        })
    }

    fn build_stages(
        &self,
        namespace: &str,
        filter: &[Predicate],
        local: Option<Arc<Collection>>,
        candidates: Vec<CandidatePlan>,
    ) -> Result<Vec<AccessStage>> {
        let semantics = filter_semantics(namespace, filter)?;
        candidates
            .into_iter()
            .map(|plan| AccessStage::build(plan, local.clone(), filter, semantics))
            .collect()
    }

    fn run_local(
        &self,
        namespace: &str,
        key: &PlanCacheKey,
        filter: &[Predicate],
        local: Option<Arc<Collection>>,
        cfg: &EngineConfig,
    ) -> Result<LocalRun> {
        let monitor = ReplanningMonitor::new(cfg.replan_ratio);
        let cached = self.cache.lookup(key);

        if let Some(entry) = cached.as_ref().filter(|e| e.is_active) {
            let semantics = filter_semantics(namespace, filter)?;
            let mut stage = AccessStage::build(entry.plan.clone(), local, filter, semantics)?;
            let run = drain(&mut stage, Vec::new(), entry.trial_window);
            self.cache.record_use(key, cfg.promotion_streak);
            monitor.observe(&self.cache, key, run.trial_works);
            return Ok(LocalRun {
                run,
                plan: entry.plan.clone(),
                from_multi_planner: false,
                replanned: false,
            });
        }

        let candidates = enumerate_candidates(filter, local.as_deref());
        let planner = self.trial_planner(cfg, local.as_deref());
        let outcome = planner.race(self.build_stages(namespace, filter, local, candidates)?)?;
        let plan = outcome.winner_plan().clone();
        let decision = outcome.decision();

        let mut replanned = false;
        match cached {
            Some(entry) if entry.health == EntryHealth::Suspect => {
                if monitor.begin_replan(&self.cache, key) {
                    self.cache.replace_after_replan(key, plan.clone(), decision)?;
                    replanned = true;
                    #[cfg(feature = "tracing")]
                    tracing::info!(
                        query_hash = %key.query_hash(),
                        plan_cache_key = %key.plan_cache_key(),
                        previous = %entry.plan.access,
                        winner = %plan.access,
                        works = outcome.winner_works(),
                        "replanned suspect cache entry"
                    );
                }
            }
            // Another execution is re-racing this shape.
            Some(entry) if entry.health == EntryHealth::Replanning => {}
            Some(entry) if entry.plan.same_plan(&plan) => {
                self.cache.record_use(key, cfg.promotion_streak);
            }
            _ => self.store_inactive(key, plan.clone(), decision)?,
        }

        let (mut stage, buffered) = outcome.into_winner();
        let run = drain(&mut stage, buffered, cfg.trial_max_results);
        Ok(LocalRun {
            run,
            plan,
            from_multi_planner: true,
            replanned,
        })
    }

    fn store_inactive(
        &self,
        key: &PlanCacheKey,
        plan: CandidatePlan,
        decision: PlanDecision,
    ) -> Result<()> {
        match self.cache.insert_inactive(key, plan, decision) {
            // A concurrent execution promoted the entry first.
            Err(PlanError::ActiveEntryExists(_)) => Ok(()),
            other => Ok(other?),
        }
    }

    fn lookup_strategy(
        &self,
        stage: &Stage,
        pushed: bool,
        cfg: &EngineConfig,
        options: QueryOptions,
    ) -> Option<(JoinStrategy, Option<Arc<Collection>>)> {
        let Stage::Lookup(spec) = stage else {
            return None;
        };
        let foreign = self.catalog.snapshot(&spec.from);
        let strategy = if pushed {
            JoinStrategySelector::from_config(cfg).select(spec, foreign.as_deref(), cfg.knobs, options)
        } else {
            JoinStrategy::Classic
        };
        Some((strategy, foreign))
    }

    fn describe_lookups(
        &self,
        physical: &PhysicalPipeline,
        cfg: &EngineConfig,
        options: QueryOptions,
    ) -> Vec<LookupExplain> {
        let pushed = physical.pushed.iter().map(|s| (s, true));
        let classic = physical.classic.iter().map(|s| (s, false));
        pushed
            .chain(classic)
            .filter_map(|(stage, is_pushed)| {
                let (strategy, _) = self.lookup_strategy(stage, is_pushed, cfg, options)?;
                let Stage::Lookup(spec) = stage else {
                    return None;
                };
                Some(LookupExplain {
                    from: spec.from.clone(),
                    strategy: strategy.descriptor().cloned(),
                })
            })
            .collect()
    }

    fn run_tail(
        &self,
        mut docs: Vec<Document>,
        physical: &PhysicalPipeline,
        cfg: &EngineConfig,
        options: QueryOptions,
        stats: &mut JoinStats,
    ) -> Result<(Vec<Document>, Vec<LookupExplain>)> {
        let mut lookups = Vec::new();
        let pushed = physical.pushed.iter().map(|s| (s, true));
        let classic = physical.classic.iter().map(|s| (s, false));
        for (stage, is_pushed) in pushed.chain(classic) {
            docs = match stage {
                Stage::Match(preds) => {
                    docs.retain(|d| preds.iter().all(|p| p.matches(d)));
                    docs
                }
                Stage::Lookup(spec) => {
                    let Some((strategy, foreign)) = self.lookup_strategy(stage, is_pushed, cfg, options)
                    else {
                        return Err(ExecError::Internal("lookup stage without a strategy".into()));
                    };
                    #[cfg(feature = "tracing")]
                    tracing::debug!(
                        from = %spec.from,
                        algorithm = ?strategy.algorithm(),
                        allow_disk_use = options.allow_disk_use,
                        "join strategy selected"
                    );
                    lookups.push(LookupExplain {
                        from: spec.from.clone(),
                        strategy: strategy.descriptor().cloned(),
                    });
                    let ctx = JoinContext {
                        foreign,
                        config: cfg,
                        spill: &self.spill,
                    };
                    let (out, s) = join::run_lookup(&strategy, spec, docs, &ctx)?;
                    stats.merge(s);
                    out
                }
                Stage::Group(spec) if is_pushed => group::hash_group(spec, &docs),
                Stage::Group(spec) => group::sort_group(spec, &docs),
                Stage::Count(field) => group::count(field, &docs),
                Stage::Limit(n) => {
                    docs.truncate(*n);
                    docs
                }
            };
        }
        Ok((docs, lookups))
    }
}

fn first_pushed_algorithm(lookups: &[LookupExplain]) -> Option<JoinAlgorithm> {
    lookups
        .iter()
        .find_map(|l| l.strategy.as_ref().map(|d| d.algorithm))
}
