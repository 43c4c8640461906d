//! Test instrumentation: failpoints and the pausable checkpoint hook.
//!
//! `fail_point!` expands to nothing unless the `failpoints` feature is
//! enabled. When enabled, a point panics if its name is listed in the
//! comma-separated `QPLAN_FAILPOINTS` environment variable.

use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use qplan_catalog::CheckpointHook;

#[cfg(feature = "failpoints")]
#[macro_export]
macro_rules! fail_point {
    ($name:expr) => {{
        let armed = std::env::var("QPLAN_FAILPOINTS").unwrap_or_default();
        if armed.split(',').any(|p| p.trim() == $name) {
            panic!("failpoint triggered: {}", $name);
        }
    }};
}

#[cfg(not(feature = "failpoints"))]
#[macro_export]
macro_rules! fail_point {
    ($name:expr) => {
        let _ = $name;
    };
}

#[derive(Debug, Default)]
struct PauseState {
    armed: bool,
    paused: bool,
    released: bool,
}

/// A `CheckpointHook` that blocks one write batch right before the checkpoint
/// of a chosen statement, until `resume` is called. It fires once.
#[derive(Debug)]
pub struct PausePoint {
    namespace: String,
    statement: usize,
    state: Mutex<PauseState>,
    cv: Condvar,
}

impl PausePoint {
    pub fn new(namespace: impl Into<String>, statement: usize) -> Self {
        Self {
            namespace: namespace.into(),
            statement,
            state: Mutex::new(PauseState {
                armed: true,
                ..PauseState::default()
            }),
            cv: Condvar::new(),
        }
    }

    /// Block until a batch is parked at the point, or `timeout` elapses.
    pub fn wait_until_paused(&self, timeout: Duration) -> bool {
        let mut st = self.state.lock();
        if !st.paused {
            let _ = self.cv.wait_while_for(&mut st, |s| !s.paused, timeout);
        }
        st.paused
    }

    /// Let the parked batch continue.
    pub fn resume(&self) {
        let mut st = self.state.lock();
        st.released = true;
        self.cv.notify_all();
    }

    pub fn is_paused(&self) -> bool {
        let st = self.state.lock();
        st.paused && !st.released
    }
}

impl CheckpointHook for PausePoint {
    fn before_checkpoint(&self, namespace: &str, statement: usize) {
        if namespace != self.namespace || statement != self.statement {
            return;
        }
        let mut st = self.state.lock();
        if !st.armed {
            return;
        }
        st.armed = false;
        st.paused = true;
        self.cv.notify_all();
        while !st.released {
            self.cv.wait(&mut st);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn parks_once_until_resumed() {
        let point = Arc::new(PausePoint::new("t.c", 1));
        let hook = Arc::clone(&point);
        let worker = thread::spawn(move || {
            hook.before_checkpoint("t.c", 0);
            hook.before_checkpoint("t.c", 1);
            hook.before_checkpoint("t.c", 1);
        });
        assert!(point.wait_until_paused(Duration::from_secs(10)));
        assert!(point.is_paused());
        point.resume();
        worker.join().unwrap();
        assert!(!point.is_paused());
    }

    #[test]
    fn other_namespaces_pass_through() {
        let point = PausePoint::new("t.c", 0);
        point.before_checkpoint("t.other", 0);
        assert!(!point.wait_until_paused(Duration::from_millis(10)));
    }
}
