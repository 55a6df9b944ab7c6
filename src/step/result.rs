//! The outcome of one test execution.

use std::fmt;
use std::time::Duration;

use crate::error::Failure;

/// How long a test ran and why it failed, if it did.
#[derive(Debug, Clone)]
pub struct TestResult {
    elapsed: Duration,
    failure: Option<Failure>,
}

impl TestResult {
    /// Creates a result.
    #[must_use]
    pub fn new(elapsed: Duration, failure: Option<Failure>) -> Self {
        Self { elapsed, failure }
    }

    /// Returns the time between the test's start and its end.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Returns the elapsed time in whole milliseconds.
    #[must_use]
    pub fn elapsed_millis(&self) -> u64 {
        u64::try_from(self.elapsed.as_millis()).unwrap_or(u64::MAX)
    }

    /// Returns the failure, if the test failed.
    #[must_use]
    pub fn failure(&self) -> Option<&Failure> {
        self.failure.as_ref()
    }

    /// Returns `true` if the test passed.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }

    /// Returns `true` if the test failed.
    #[must_use]
    pub fn failed(&self) -> bool {
        self.failure.is_some()
    }

    /// Consumes the result, returning the failure if any.
    #[must_use]
    pub fn into_failure(self) -> Option<Failure> {
        self.failure
    }
}

impl fmt::Display for TestResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.failure {
            None => write!(f, "passed in {}ms", self.elapsed_millis()),
            Some(failure) => write!(f, "failed in {}ms: {failure}", self.elapsed_millis()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_success() {
        let result = TestResult::new(Duration::from_millis(12), None);

        assert!(result.succeeded());
        assert!(!result.failed());
        assert_eq!(result.elapsed_millis(), 12);
        assert_eq!(result.to_string(), "passed in 12ms");
    }

    #[test]
    fn test_result_failure() {
        let result = TestResult::new(
            Duration::from_millis(3),
            Some(Failure::assertion("Expected true")),
        );

        assert!(result.failed());
        assert_eq!(result.to_string(), "failed in 3ms: Expected true");
        assert!(result.into_failure().unwrap().is_assertion());
    }
}
