//! Test execution options.

use std::time::Duration;

/// Timeout applied when none is configured explicitly.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2 * 60);

/// Options controlling how tests are executed.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use testkit_unit::options::TestOptions;
///
/// let options = TestOptions::new()
///     .with_timeout(Duration::from_millis(500))
///     .use_event_loop(false);
///
/// assert_eq!(options.timeout_millis(), 500);
/// assert_eq!(options.use_event_loop, Some(false));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestOptions {
    /// Deadline for each test. `Duration::ZERO` disables the watchdog.
    pub timeout: Duration,
    /// Whether tests must run on a host execution mode.
    ///
    /// `None` uses the host mode when one was supplied and runs inline
    /// otherwise.
    pub use_event_loop: Option<bool>,
}

impl Default for TestOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            use_event_loop: None,
        }
    }
}

impl TestOptions {
    /// Create the default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the per-test timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the per-test timeout in milliseconds, `0` meaning no timeout.
    #[must_use]
    pub fn with_timeout_millis(self, millis: u64) -> Self {
        self.with_timeout(Duration::from_millis(millis))
    }

    /// Disable the timeout watchdog.
    #[must_use]
    pub fn no_timeout(self) -> Self {
        self.with_timeout(Duration::ZERO)
    }

    /// Require (or refuse) the host execution mode.
    #[must_use]
    pub fn use_event_loop(mut self, use_event_loop: bool) -> Self {
        self.use_event_loop = Some(use_event_loop);
        self
    }

    /// Returns the timeout in milliseconds.
    #[must_use]
    pub fn timeout_millis(&self) -> u64 {
        u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX)
    }

    /// Returns `true` if a watchdog should be armed.
    #[must_use]
    pub fn has_timeout(&self) -> bool {
        !self.timeout.is_zero()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_default() {
        let options = TestOptions::default();

        assert_eq!(options.timeout, DEFAULT_TIMEOUT);
        assert_eq!(options.timeout_millis(), 120_000);
        assert_eq!(options.use_event_loop, None);
        assert!(options.has_timeout());
    }

    #[test]
    fn test_options_builder() {
        let options = TestOptions::new()
            .with_timeout_millis(50)
            .use_event_loop(true);

        assert_eq!(options.timeout, Duration::from_millis(50));
        assert_eq!(options.use_event_loop, Some(true));
    }

    #[test]
    fn test_options_no_timeout() {
        let options = TestOptions::new().no_timeout();

        assert!(!options.has_timeout());
        assert_eq!(options.timeout_millis(), 0);
    }
}
