//! Error definitions
//!
//! Two families live here:
//!
//! - [`Error`] is misuse of the engine (asking for a completion handle after
//!   the test ended, completing a handle twice, ...). It is returned to the
//!   offending caller and never recorded as a test outcome on its own.
//! - [`Failure`] is why a test failed. It is what a [`TestResult`] carries and
//!   what assertions hand back so a test body can unwind with `?`.
//!
//! [`TestResult`]: crate::step::TestResult

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Misuse of the test engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The operation is not allowed in the current state.
    #[error("{0}")]
    State(String),

    /// An argument was out of range.
    #[error("{0}")]
    InvalidArgument(String),
}

impl Error {
    /// Create a state error.
    #[must_use]
    pub fn state(message: impl Into<String>) -> Self {
        Self::State(message.into())
    }

    /// Create an invalid argument error.
    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Returns `true` for [`Error::State`].
    #[must_use]
    pub fn is_state(&self) -> bool {
        matches!(self, Self::State(_))
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// The cause behind a failed test.
#[derive(Error, Debug)]
pub enum FailureKind {
    /// A violated assertion.
    #[error("{0}")]
    Assertion(String),

    /// The test did not finish within its deadline.
    #[error("Timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// The test body, or a callback run on its behalf, panicked.
    #[error("Test panicked: {0}")]
    Panic(String),

    /// Misuse of the engine propagated out of a test body.
    #[error(transparent)]
    Usage(#[from] Error),

    /// Any other error raised by the code under test.
    #[error("{0}")]
    Cause(Box<dyn std::error::Error + Send + Sync>),
}

/// Why a test failed.
///
/// Clones share identity: once a failure has been reported to a test (or to
/// the unhandled-failure handler), reporting it or any clone again is a
/// no-op. This is what lets an assertion report itself and still be
/// returned to the test body for `?` propagation.
#[derive(Clone)]
pub struct Failure {
    kind: Arc<FailureKind>,
    reported: Arc<AtomicBool>,
}

impl Failure {
    fn new(kind: FailureKind) -> Self {
        Self {
            kind: Arc::new(kind),
            reported: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Create an assertion failure.
    #[must_use]
    pub fn assertion(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Assertion(message.into()))
    }

    /// Create a timeout failure.
    #[must_use]
    pub fn timeout(after: Duration) -> Self {
        Self::new(FailureKind::Timeout(after))
    }

    /// Wrap an arbitrary error.
    #[must_use]
    pub fn cause<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::new(FailureKind::Cause(Box::new(error)))
    }

    /// Build a failure from a panic payload.
    #[must_use]
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "Box<dyn Any>".to_string()
        };
        Self::new(FailureKind::Panic(message))
    }

    /// Returns what kind of failure this is.
    #[must_use]
    pub fn kind(&self) -> &FailureKind {
        &self.kind
    }

    /// Returns `true` for a violated assertion.
    #[must_use]
    pub fn is_assertion(&self) -> bool {
        matches!(*self.kind, FailureKind::Assertion(_))
    }

    /// Returns `true` if the test exceeded its deadline.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(*self.kind, FailureKind::Timeout(_))
    }

    /// Returns `true` if the failure came from a panic.
    #[must_use]
    pub fn is_panic(&self) -> bool {
        matches!(*self.kind, FailureKind::Panic(_))
    }

    /// Returns the failure message.
    #[must_use]
    pub fn message(&self) -> String {
        self.kind.to_string()
    }

    /// Returns `true` if `other` is this failure or a clone of it.
    #[must_use]
    pub fn same_as(&self, other: &Failure) -> bool {
        Arc::ptr_eq(&self.kind, &other.kind)
    }

    /// Marks the failure reported, returning `false` if it already was.
    pub(crate) fn mark_reported(&self) -> bool {
        !self.reported.swap(true, Ordering::AcqRel)
    }
}

impl fmt::Debug for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.kind, f)
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.kind, f)
    }
}

impl std::error::Error for Failure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.kind.source()
    }
}

impl From<Error> for Failure {
    fn from(error: Error) -> Self {
        Self::new(FailureKind::Usage(error))
    }
}

impl From<FailureKind> for Failure {
    fn from(kind: FailureKind) -> Self {
        Self::new(kind)
    }
}

/// Runs `f`, turning a panic into a [`Failure`].
pub(crate) fn catch_failure<F>(f: F) -> std::result::Result<(), Failure>
where
    F: FnOnce() -> std::result::Result<(), Failure>,
{
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(outcome) => outcome,
        Err(payload) => Err(Failure::from_panic(payload)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(Error::state("Test already completed").to_string(), "Test already completed");
        assert!(Error::state("x").is_state());
        assert!(!Error::invalid_argument("x").is_state());
    }

    #[test]
    fn test_failure_kinds() {
        assert!(Failure::assertion("boom").is_assertion());
        assert!(Failure::timeout(Duration::from_millis(50)).is_timeout());
        assert_eq!(
            Failure::timeout(Duration::from_millis(50)).to_string(),
            "Timed out after 50ms"
        );

        let usage: Failure = Error::state("Wrong status").into();
        assert_eq!(usage.message(), "Wrong status");
        assert!(matches!(usage.kind(), FailureKind::Usage(Error::State(_))));
    }

    #[test]
    fn test_failure_cause_keeps_source_message() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "connection reset");
        let failure = Failure::cause(io);
        assert_eq!(failure.message(), "connection reset");
    }

    #[test]
    fn test_clones_share_reported_flag() {
        let failure = Failure::assertion("once");
        let clone = failure.clone();

        assert!(failure.same_as(&clone));
        assert!(clone.mark_reported());
        assert!(!failure.mark_reported());
        assert!(!Failure::assertion("once").same_as(&failure));
    }

    #[test]
    fn test_catch_failure_converts_panics() {
        let failure = catch_failure(|| panic!("kaboom")).unwrap_err();
        assert!(failure.is_panic());
        assert_eq!(failure.message(), "Test panicked: kaboom");

        assert!(catch_failure(|| Ok(())).is_ok());
        assert!(catch_failure(|| Err(Failure::assertion("no")))
            .unwrap_err()
            .is_assertion());
    }
}
