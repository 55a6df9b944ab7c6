//! smol execution mode.
//!
//! Test bodies are spawned onto smol's global executor and detached.

use super::{ExecutionMode, Task};

/// Spawns test bodies onto smol's global executor.
#[derive(Debug, Clone, Copy, Default)]
pub struct SmolMode;

impl SmolMode {
    /// Creates the mode.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl ExecutionMode for SmolMode {
    fn execute(&self, task: Task) {
        ::smol::spawn(async move { task() }).detach();
    }

    fn is_host(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "smol"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_executes_on_global_executor() {
        let (tx, rx) = std::sync::mpsc::channel();
        SmolMode::new().execute(Box::new(move || tx.send(7).unwrap()));

        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 7);
        assert!(SmolMode.is_host());
    }
}
