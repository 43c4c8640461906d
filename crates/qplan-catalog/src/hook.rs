//! Instrumentation point consulted before every write-batch checkpoint.

/// Called by write batches immediately before each statement's checkpoint.
///
/// Production engines use `NoopHook`; tests install a hook that blocks so a
/// concurrent DDL can land mid-batch.
pub trait CheckpointHook: Send + Sync {
    fn before_checkpoint(&self, namespace: &str, statement: usize);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHook;

impl CheckpointHook for NoopHook {
    fn before_checkpoint(&self, _namespace: &str, _statement: usize) {}
}
