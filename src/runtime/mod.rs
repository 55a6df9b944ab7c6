//! Execution modes for test bodies.
//!
//! The runner never decides on its own where a test body runs. It hands a
//! [`Task`] to an [`ExecutionMode`], which must invoke it exactly once,
//! eventually. Completion handles, timeouts and failures then flow back
//! through the test context from whatever thread they happen on.
//!
//! # Modes
//!
//! - [`Inline`] - on the calling thread
//! - [`DedicatedThread`] - on a fresh, named OS thread per test
//! - `TokioMode` - spawned onto a tokio runtime (with `tokio` feature)
//! - `AsyncStdMode` - spawned onto async-std (with `async-std` feature)
//! - `SmolMode` - spawned onto smol's global executor (with `smol` feature)
//!
//! # Example
//!
//! ```rust
//! use testkit_unit::runtime::{DedicatedThread, ExecutionMode};
//!
//! let (tx, rx) = std::sync::mpsc::channel();
//! DedicatedThread::new().execute(Box::new(move || tx.send(42).unwrap()));
//! assert_eq!(rx.recv().unwrap(), 42);
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// A unit of work handed to an execution mode.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Decides where a test body runs.
///
/// Implementations must invoke each task exactly once. They may do so
/// before `execute` returns.
pub trait ExecutionMode: Send + Sync {
    /// Schedules `task`.
    fn execute(&self, task: Task);

    /// Returns `true` for modes that schedule work on a host event loop.
    fn is_host(&self) -> bool {
        false
    }

    /// A short name for logs.
    fn name(&self) -> &'static str;
}

impl fmt::Debug for dyn ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionMode")
            .field("name", &self.name())
            .field("host", &self.is_host())
            .finish()
    }
}

/// Runs tasks on the calling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct Inline;

impl ExecutionMode for Inline {
    fn execute(&self, task: Task) {
        task();
    }

    fn name(&self) -> &'static str {
        "inline"
    }
}

/// Runs every task on a new OS thread.
///
/// If the thread cannot be spawned the task runs inline, so it is never
/// lost.
#[derive(Debug, Clone)]
pub struct DedicatedThread {
    prefix: String,
    stack_size: Option<usize>,
}

impl DedicatedThread {
    /// Creates a mode naming its threads `testkit-unit-<n>`.
    #[must_use]
    pub fn new() -> Self {
        Self::with_prefix("testkit-unit")
    }

    /// Creates a mode naming its threads `<prefix>-<n>`.
    #[must_use]
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            stack_size: None,
        }
    }

    /// Sets the stack size of spawned threads.
    #[must_use]
    pub fn stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }
}

impl Default for DedicatedThread {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionMode for DedicatedThread {
    fn execute(&self, task: Task) {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);

        let mut builder = std::thread::Builder::new().name(format!("{}-{n}", self.prefix));
        if let Some(bytes) = self.stack_size {
            builder = builder.stack_size(bytes);
        }

        // The closure is only consumed on success, so keep a way back to it.
        let slot = std::sync::Arc::new(parking_lot::Mutex::new(Some(task)));
        let spawned = {
            let slot = std::sync::Arc::clone(&slot);
            builder.spawn(move || {
                if let Some(task) = slot.lock().take() {
                    task();
                }
            })
        };
        if let Err(err) = spawned {
            tracing::warn!(error = %err, "failed to spawn test thread, running inline");
            if let Some(task) = slot.lock().take() {
                task();
            }
        }
    }

    fn name(&self) -> &'static str {
        "thread"
    }
}

#[cfg(feature = "tokio")]
pub mod tokio;

#[cfg(feature = "async-std")]
pub mod async_std;

#[cfg(feature = "smol")]
pub mod smol;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn test_inline_runs_before_returning() {
        let (tx, rx) = mpsc::channel();
        Inline.execute(Box::new(move || tx.send(std::thread::current().id()).unwrap()));

        assert_eq!(rx.try_recv().unwrap(), std::thread::current().id());
        assert!(!Inline.is_host());
        assert_eq!(Inline.name(), "inline");
    }

    #[test]
    fn test_dedicated_thread_names_threads() {
        let (tx, rx) = mpsc::channel();
        let mode = DedicatedThread::with_prefix("suite").stack_size(256 * 1024);

        mode.execute(Box::new(move || {
            let name = std::thread::current().name().map(str::to_string);
            tx.send(name).unwrap();
        }));

        let name = rx.recv_timeout(Duration::from_secs(5)).unwrap().unwrap();
        assert!(name.starts_with("suite-"));
        assert!(!mode.is_host());
    }

    #[test]
    fn test_dedicated_thread_runs_each_task_once() {
        let (tx, rx) = mpsc::channel();
        let mode = DedicatedThread::new();
        for i in 0..4 {
            let tx = tx.clone();
            mode.execute(Box::new(move || tx.send(i).unwrap()));
        }
        drop(tx);

        let mut seen: Vec<_> = rx.iter().collect();
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_debug_for_trait_object() {
        let mode: Box<dyn ExecutionMode> = Box::new(Inline);
        assert!(format!("{mode:?}").contains("inline"));
    }
}
