//! async-std execution mode.

use super::{ExecutionMode, Task};

/// Spawns test bodies onto the async-std executor.
#[derive(Debug, Clone, Copy, Default)]
pub struct AsyncStdMode;

impl AsyncStdMode {
    /// Creates the mode.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl ExecutionMode for AsyncStdMode {
    fn execute(&self, task: Task) {
        drop(::async_std::task::spawn(async move { task() }));
    }

    fn is_host(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "async-std"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_executes_on_executor() {
        let (tx, rx) = std::sync::mpsc::channel();
        AsyncStdMode::new().execute(Box::new(move || tx.send("ran").unwrap()));

        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "ran");
    }
}
