//! Fatal-error reporting
//!
//! The kernel never recovers from an invariant break itself. It hands a
//! [`FatalError`] and a dump of the task table to an injected [`FatalHook`].

use tracing::error;

use crate::error::FatalError;
use crate::task::TaskSnapshot;

/// Consumer of unrecoverable conditions
pub trait FatalHook: Send + Sync {
    fn report(&self, error: &FatalError, tasks: &[TaskSnapshot]);
}

/// Default hook: dumps the task table and the error through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct LogHook;

impl FatalHook for LogHook {
    fn report(&self, err: &FatalError, tasks: &[TaskSnapshot]) {
        error!("kernel exception: task state table");
        for t in tasks {
            error!(
                task = t.id.0,
                name = t.name.as_deref().unwrap_or("-"),
                state = ?t.state,
                pending = %t.pending,
                "task"
            );
        }
        error!(code = err.code, message = %err.message, "kernel exception");
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use parking_lot::Mutex;

    use super::*;

    /// Hook that records every report
    #[derive(Default)]
    pub struct RecordingHook {
        pub reports: Mutex<Vec<(FatalError, usize)>>,
    }

    impl FatalHook for RecordingHook {
        fn report(&self, err: &FatalError, tasks: &[TaskSnapshot]) {
            self.reports.lock().push((err.clone(), tasks.len()));
        }
    }
}
