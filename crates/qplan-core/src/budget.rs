//! Abstract buffering budget interfaces.
//!
//! The concrete implementation lives in `qplan-mem`. Join operators only see
//! these traits so the planner and exec crates can be tested against any
//! accounting scheme.

/// Bytes held against a budget. Released on drop.
pub trait BudgetGuard: Send {
    /// Number of bytes currently accounted for by this guard.
    fn bytes(&self) -> usize;

    /// Grow or shrink the reservation. Returns false (and keeps the old size)
    /// when growing would exceed the budget.
    fn try_resize(&mut self, new_bytes: usize) -> bool;

    fn tag(&self) -> &'static str {
        "guard"
    }
}

/// A cap on buffered bytes shared by every guard it hands out.
pub trait MemoryBudget: Send + Sync + 'static {
    type Guard: BudgetGuard;

    /// Attempt to acquire `bytes`. `None` means the caller must spill or fail.
    fn try_acquire(&self, bytes: usize, tag: &'static str) -> Option<Self::Guard>;

    fn capacity_bytes(&self) -> usize;

    /// Advisory; not a correctness API.
    fn used_bytes(&self) -> usize;
}
