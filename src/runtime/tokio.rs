//! Tokio execution mode.
//!
//! Test bodies are spawned as tasks onto a tokio runtime, the way code under
//! test expecting to live on the runtime would run. The body itself is
//! synchronous; it talks to the runtime through the handle it can grab with
//! `tokio::runtime::Handle::current()`.
//!
//! # Example
//!
//! ```rust,ignore
//! use testkit_unit::runtime::tokio::TokioMode;
//!
//! #[tokio::test(flavor = "multi_thread")]
//! async fn runs_on_the_runtime() {
//!     let mode = TokioMode::current().unwrap();
//!     // hand `mode` to a SequentialRunner
//! }
//! ```

use ::tokio::runtime::Handle;

use super::{ExecutionMode, Task};
use crate::error::{Error, Result};

/// Spawns test bodies onto a tokio runtime.
#[derive(Debug, Clone)]
pub struct TokioMode {
    handle: Handle,
}

impl TokioMode {
    /// Uses the runtime behind `handle`.
    #[must_use]
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Uses the runtime the caller is running on.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::State`] outside a tokio runtime.
    pub fn current() -> Result<Self> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|err| Error::state(format!("No tokio runtime: {err}")))
    }

    /// Returns the runtime handle.
    #[must_use]
    pub fn handle(&self) -> &Handle {
        &self.handle
    }
}

impl ExecutionMode for TokioMode {
    fn execute(&self, task: Task) {
        // Dropping the join handle detaches the task.
        drop(self.handle.spawn(async move { task() }));
    }

    fn is_host(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "tokio"
    }
}
