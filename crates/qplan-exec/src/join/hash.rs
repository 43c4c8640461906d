//! Hash join with partitioned spilling.
//!
//! The foreign side is hashed on its lookup keys while the build stays within
//! `mem_bytes`. Once the budget is exhausted the remaining foreign documents
//! are routed to one of `PARTITIONS` partitions per key and written out as
//! spill segments; probing then re-reads one partition at a time.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use qplan_catalog::{Collection, RecordId};
use qplan_core::shape::LookupSpec;
use qplan_core::types::{lookup_keys, Document, Value};
use qplan_mem::{BufferBudget, SegmentMeta, SpillManager};

use super::{attach, JoinStats};
use crate::error::Result;

const PARTITIONS: usize = 8;

/// Rows buffered per partition before they are written as a segment.
const SPILL_BATCH: usize = 256;

type SpilledRow = (RecordId, Document);

fn distinct_keys(doc: &Document, path: &str) -> Vec<Value> {
    let mut keys = lookup_keys(doc, path);
    keys.sort();
    keys.dedup();
    keys
}

fn partition_of(key: &Value) -> usize {
    let mut h = DefaultHasher::new();
    key.hash(&mut h);
    (h.finish() % PARTITIONS as u64) as usize
}

struct Partitions<'a> {
    spill: &'a SpillManager,
    pending: Vec<Vec<SpilledRow>>,
    segments: Vec<Vec<SegmentMeta>>,
}

impl<'a> Partitions<'a> {
    fn new(spill: &'a SpillManager) -> Self {
        Self {
            spill,
            pending: (0..PARTITIONS).map(|_| Vec::new()).collect(),
            segments: (0..PARTITIONS).map(|_| Vec::new()).collect(),
        }
    }

    fn push(&mut self, id: RecordId, doc: &Document, keys: &[Value]) -> Result<()> {
        let mut targets: Vec<usize> = keys.iter().map(partition_of).collect();
        targets.sort_unstable();
        targets.dedup();
        for p in targets {
            self.pending[p].push((id, doc.clone()));
            if self.pending[p].len() >= SPILL_BATCH {
                self.flush(p)?;
            }
        }
        Ok(())
    }

    fn flush(&mut self, p: usize) -> Result<()> {
        if self.pending[p].is_empty() {
            return Ok(());
        }
        let rows = std::mem::take(&mut self.pending[p]);
        let meta = self.spill.write_segment(&rows)?;
        self.segments[p].push(meta);
        Ok(())
    }

    fn finish(&mut self) -> Result<u64> {
        for p in 0..PARTITIONS {
            self.flush(p)?;
        }
        Ok(self.segments.iter().map(|s| s.len() as u64).sum())
    }

    /// Read back every segment of partition `p`, deleting each once read.
    /// Segments not yet read stay listed for `Drop`.
    fn load(&mut self, p: usize) -> Result<Vec<SpilledRow>> {
        let mut rows = Vec::new();
        while let Some(meta) = self.segments[p].first() {
            rows.extend(self.spill.read_segment::<SpilledRow>(meta)?);
            self.spill.delete_segment(meta)?;
            self.segments[p].remove(0);
        }
        Ok(rows)
    }
}

impl Drop for Partitions<'_> {
    fn drop(&mut self) {
        for meta in self.segments.iter().flatten() {
            if let Err(_err) = self.spill.delete_segment(meta) {
                #[cfg(feature = "tracing")]
                tracing::warn!(segment = %meta.name, error = %_err, "failed to delete spill segment");
            }
        }
    }
}

pub fn join(
    spec: &LookupSpec,
    local: Vec<Document>,
    foreign: &Collection,
    mem_bytes: usize,
    spill: &SpillManager,
) -> Result<(Vec<Document>, JoinStats)> {
    let budget = BufferBudget::new(mem_bytes);
    let mut guard = budget.acquire(0, "hash_join_build")?;
    let mut table: HashMap<Value, Vec<RecordId>> = HashMap::new();
    let mut partitions = Partitions::new(spill);
    let mut spilling = false;

    for (id, doc) in foreign.iter() {
        let keys = distinct_keys(doc, &spec.foreign_field);
        if !spilling && guard.grow(doc.approx_size()).is_ok() {
            for key in keys {
                table.entry(key).or_default().push(id);
            }
            continue;
        }
        if !spilling {
            spilling = true;
            #[cfg(feature = "tracing")]
            tracing::debug!(
                foreign = %foreign.name,
                in_memory_keys = table.len(),
                mem_bytes,
                "hash join build exceeded memory; spilling remaining partitions"
            );
        }
        partitions.push(id, doc, &keys)?;
    }
    let spilled_segments = partitions.finish()?;

    let local_keys: Vec<Vec<Value>> = local
        .iter()
        .map(|d| distinct_keys(d, &spec.local_field))
        .collect();
    let mut hits: Vec<Vec<SpilledRow>> = local_keys
        .iter()
        .map(|keys| {
            keys.iter()
                .filter_map(|k| table.get(k))
                .flatten()
                .filter_map(|id| foreign.get(*id).map(|d| (*id, d.clone())))
                .collect()
        })
        .collect();

    if spilled_segments > 0 {
        for p in 0..PARTITIONS {
            let rows = partitions.load(p)?;
            if rows.is_empty() {
                continue;
            }
            let mut by_key: HashMap<Value, Vec<usize>> = HashMap::new();
            for (pos, (_, doc)) in rows.iter().enumerate() {
                for key in distinct_keys(doc, &spec.foreign_field) {
                    if partition_of(&key) == p {
                        by_key.entry(key).or_default().push(pos);
                    }
                }
            }
            for (keys, out) in local_keys.iter().zip(hits.iter_mut()) {
                for key in keys.iter().filter(|k| partition_of(k) == p) {
                    if let Some(positions) = by_key.get(key) {
                        out.extend(positions.iter().map(|&i| rows[i].clone()));
                    }
                }
            }
        }
    }

    let out = local
        .into_iter()
        .zip(hits)
        .map(|(doc, mut matched)| {
            matched.sort_by_key(|(id, _)| *id);
            matched.dedup_by_key(|(id, _)| *id);
            attach(doc, &spec.as_field, matched.into_iter().map(|(_, d)| d).collect())
        })
        .collect::<Result<_>>()?;

    Ok((
        out,
        JoinStats {
            foreign_examined: foreign.len() as u64,
            spilled_segments,
        },
    ))
}
