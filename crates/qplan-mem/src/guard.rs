//! Buffer budget + RAII guard.
//!
//! Operators acquire a guard before buffering and grow it as they go. Dropping
//! the guard returns its bytes to the budget (panic-safe).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use qplan_core::budget::{BudgetGuard, MemoryBudget};

use crate::error::{Error, Result};
use crate::tracking::PeakGauge;

struct BudgetInner {
    capacity: usize,
    used: AtomicUsize,
    peak: PeakGauge,
}

impl BudgetInner {
    fn try_acquire(&self, bytes: usize) -> bool {
        loop {
            let cur = self.used.load(Ordering::Relaxed);
            let next = cur.saturating_add(bytes);
            if next > self.capacity {
                return false;
            }
            if self
                .used
                .compare_exchange(cur, next, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                self.peak.record(next);
                return true;
            }
        }
    }

    fn release(&self, bytes: usize) {
        self.used.fetch_sub(bytes, Ordering::AcqRel);
    }
}

/// A byte cap shared by every guard it hands out.
#[derive(Clone)]
pub struct BufferBudget {
    inner: Arc<BudgetInner>,
}

impl BufferBudget {
    pub fn new(capacity_bytes: usize) -> Self {
        Self {
            inner: Arc::new(BudgetInner {
                capacity: capacity_bytes,
                used: AtomicUsize::new(0),
                peak: PeakGauge::new(),
            }),
        }
    }

    /// Highest usage observed since the budget was created.
    pub fn peak_bytes(&self) -> usize {
        self.inner.peak.peak()
    }

    /// Like `try_acquire`, but reports the shortfall as an error.
    pub fn acquire(&self, bytes: usize, tag: &'static str) -> Result<BufferGuard> {
        self.try_acquire(bytes, tag).ok_or_else(|| Error::BudgetExceeded {
            tag,
            requested: bytes,
            capacity: self.capacity_bytes(),
            used: self.used_bytes(),
        })
    }
}

impl std::fmt::Debug for BufferBudget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferBudget")
            .field("capacity", &self.inner.capacity)
            .field("used", &self.inner.used.load(Ordering::Relaxed))
            .finish()
    }
}

/// RAII reservation against a `BufferBudget`.
pub struct BufferGuard {
    inner: Arc<BudgetInner>,
    bytes: usize,
    tag: &'static str,
}

impl BufferGuard {
    /// Grow by `delta` bytes, or report the shortfall.
    pub fn grow(&mut self, delta: usize) -> Result<()> {
        let target = self.bytes.saturating_add(delta);
        if self.try_resize(target) {
            Ok(())
        } else {
            Err(Error::BudgetExceeded {
                tag: self.tag,
                requested: delta,
                capacity: self.inner.capacity,
                used: self.inner.used.load(Ordering::Relaxed),
            })
        }
    }
}

impl Drop for BufferGuard {
    fn drop(&mut self) {
        if self.bytes > 0 {
            self.inner.release(self.bytes);
            self.bytes = 0;
        }
    }
}

impl BudgetGuard for BufferGuard {
    fn bytes(&self) -> usize {
        self.bytes
    }

    fn try_resize(&mut self, new_bytes: usize) -> bool {
        if new_bytes == self.bytes {
            return true;
        }
        if new_bytes < self.bytes {
            self.inner.release(self.bytes - new_bytes);
            self.bytes = new_bytes;
            true
        } else if self.inner.try_acquire(new_bytes - self.bytes) {
            self.bytes = new_bytes;
            true
        } else {
            false
        }
    }

    fn tag(&self) -> &'static str {
        self.tag
    }
}

impl MemoryBudget for BufferBudget {
    type Guard = BufferGuard;

    fn try_acquire(&self, bytes: usize, tag: &'static str) -> Option<Self::Guard> {
        if bytes > 0 && !self.inner.try_acquire(bytes) {
            return None;
        }
        Some(BufferGuard {
            inner: Arc::clone(&self.inner),
            bytes,
            tag,
        })
    }

    fn capacity_bytes(&self) -> usize {
        self.inner.capacity
    }

    fn used_bytes(&self) -> usize {
        self.inner.used.load(Ordering::Relaxed)
    }
}
