//! Per-engine execution profile: the latest executions, oldest first, queryable
//! the way a profiler collection would be.

use std::collections::VecDeque;

use parking_lot::Mutex;
use serde::Serialize;

use qplan_core::id::OpId;
use qplan_planner::JoinAlgorithm;

/// A queue that keeps at most `cap` items, dropping the oldest on overflow.
#[derive(Debug)]
pub struct BoundedQueue<T> {
    cap: usize,
    q: VecDeque<T>,
}

impl<T> BoundedQueue<T> {
    pub fn with_capacity(cap: usize) -> Self {
        Self {
            cap: cap.max(1),
            q: VecDeque::new(),
        }
    }

    /// Push `v`, returning the item it displaced, if any.
    pub fn push_evicting(&mut self, v: T) -> Option<T> {
        let evicted = if self.q.len() >= self.cap {
            self.q.pop_front()
        } else {
            None
        };
        self.q.push_back(v);
        evicted
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.q.iter()
    }

    pub fn len(&self) -> usize {
        self.q.len()
    }

    pub fn is_empty(&self) -> bool {
        self.q.is_empty()
    }

    pub fn clear(&mut self) {
        self.q.clear();
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileEntry {
    pub op: OpId,
    pub namespace: String,
    pub query_hash: String,
    pub plan_cache_key: String,
    pub from_multi_planner: bool,
    pub replanned: bool,
    pub plan_summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub join_algorithm: Option<JoinAlgorithm>,
    pub works: u64,
    pub docs_examined: u64,
    pub foreign_examined: u64,
    pub n_returned: usize,
}

#[derive(Debug)]
pub struct ProfileLog {
    entries: Mutex<BoundedQueue<ProfileEntry>>,
}

impl ProfileLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(BoundedQueue::with_capacity(capacity)),
        }
    }

    pub fn record(&self, entry: ProfileEntry) {
        self.entries.lock().push_evicting(entry);
    }

    /// Entries for `namespace` (or all), oldest first.
    pub fn entries(&self, namespace: Option<&str>) -> Vec<ProfileEntry> {
        self.entries
            .lock()
            .iter()
            .filter(|e| namespace.map_or(true, |ns| e.namespace == ns))
            .cloned()
            .collect()
    }

    pub fn latest(&self) -> Option<ProfileEntry> {
        self.entries.lock().iter().last().cloned()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}
