//! Assertions and async-result adapters on [`TestContext`].
//!
//! A violated assertion is reported to the running test first and then
//! returned, so the body can unwind with `?`:
//!
//! ```rust,ignore
//! ctx.assert_true(connected)?;
//! ctx.assert_equals_msg(200, status, "status code")?;
//! ```
//!
//! When an assertion fails inside a callback on another thread the returned
//! failure can simply be dropped: the test already knows about it.
//!
//! Compared values are rendered with `Debug`, so `Option`s, thread ids and
//! other non-`Display` types can be compared. Strings therefore appear
//! quoted: `Not equals : "a" != "b"`.

use std::fmt::Debug;

use crate::context::TestContext;
use crate::error::{catch_failure, Failure, Result};

type Outcome = std::result::Result<(), Failure>;

fn format_message(provided: Option<&str>, default: &str) -> String {
    match provided {
        Some(message) => format!("{message}. {default}"),
        None => default.to_string(),
    }
}

impl TestContext {
    fn check<D>(&self, holds: bool, message: Option<&str>, describe: D) -> Outcome
    where
        D: FnOnce() -> String,
    {
        if holds {
            Ok(())
        } else {
            Err(self.report_assertion(format_message(message, &describe())))
        }
    }

    fn report_assertion(&self, message: String) -> Failure {
        let failure = Failure::assertion(message);
        self.failed(failure.clone());
        failure
    }

    /// Asserts that `value` is `None`.
    pub fn assert_none<T>(&self, value: &Option<T>) -> Outcome {
        self.check(value.is_none(), None, || "Expected None".to_string())
    }

    /// Asserts that `value` is `None`, prefixing the failure with `message`.
    pub fn assert_none_msg<T>(&self, value: &Option<T>, message: &str) -> Outcome {
        self.check(value.is_none(), Some(message), || "Expected None".to_string())
    }

    /// Asserts that `value` is `Some`.
    pub fn assert_some<T>(&self, value: &Option<T>) -> Outcome {
        self.check(value.is_some(), None, || "Expected Some".to_string())
    }

    /// Asserts that `value` is `Some`, prefixing the failure with `message`.
    pub fn assert_some_msg<T>(&self, value: &Option<T>, message: &str) -> Outcome {
        self.check(value.is_some(), Some(message), || "Expected Some".to_string())
    }

    /// Asserts that `condition` holds.
    pub fn assert_true(&self, condition: bool) -> Outcome {
        self.check(condition, None, || "Expected true".to_string())
    }

    /// Asserts that `condition` holds, prefixing the failure with `message`.
    pub fn assert_true_msg(&self, condition: bool, message: &str) -> Outcome {
        self.check(condition, Some(message), || "Expected true".to_string())
    }

    /// Asserts that `condition` does not hold.
    pub fn assert_false(&self, condition: bool) -> Outcome {
        self.check(!condition, None, || "Expected false".to_string())
    }

    /// Asserts that `condition` does not hold, prefixing the failure with
    /// `message`.
    pub fn assert_false_msg(&self, condition: bool, message: &str) -> Outcome {
        self.check(!condition, Some(message), || "Expected false".to_string())
    }

    /// Asserts that `expected == actual`.
    ///
    /// The failure reads `Not equals : <expected> != <actual>`, both values
    /// formatted with `Debug`.
    pub fn assert_equals<T>(&self, expected: T, actual: T) -> Outcome
    where
        T: PartialEq + Debug,
    {
        self.equals(&expected, &actual, None)
    }

    /// Asserts that `expected == actual`, prefixing the failure with `message`.
    pub fn assert_equals_msg<T>(&self, expected: T, actual: T, message: &str) -> Outcome
    where
        T: PartialEq + Debug,
    {
        self.equals(&expected, &actual, Some(message))
    }

    fn equals<T>(&self, expected: &T, actual: &T, message: Option<&str>) -> Outcome
    where
        T: PartialEq + Debug,
    {
        self.check(expected == actual, message, || {
            format!("Not equals : {expected:?} != {actual:?}")
        })
    }

    /// Asserts that `first != second`.
    pub fn assert_not_equals<T>(&self, first: T, second: T) -> Outcome
    where
        T: PartialEq + Debug,
    {
        self.not_equals(&first, &second, None)
    }

    /// Asserts that `first != second`, prefixing the failure with `message`.
    pub fn assert_not_equals_msg<T>(&self, first: T, second: T, message: &str) -> Outcome
    where
        T: PartialEq + Debug,
    {
        self.not_equals(&first, &second, Some(message))
    }

    fn not_equals<T>(&self, first: &T, second: &T, message: Option<&str>) -> Outcome
    where
        T: PartialEq + Debug,
    {
        self.check(first != second, message, || {
            format!("Expected different values {first:?} != {second:?}")
        })
    }

    /// Asserts that `actual` lies within `delta` of `expected`.
    pub fn assert_in_range(&self, expected: f64, actual: f64, delta: f64) -> Outcome {
        self.in_range(expected, actual, delta, None)
    }

    /// Asserts that `actual` lies within `delta` of `expected`, prefixing the
    /// failure with `message`.
    pub fn assert_in_range_msg(
        &self,
        expected: f64,
        actual: f64,
        delta: f64,
        message: &str,
    ) -> Outcome {
        self.in_range(expected, actual, delta, Some(message))
    }

    fn in_range(&self, expected: f64, actual: f64, delta: f64, message: Option<&str>) -> Outcome {
        let holds = expected.total_cmp(&actual).is_eq() || (actual - expected).abs() <= delta;
        self.check(holds, message, || {
            format!(
                "Expected {actual:?} to belong to [{:?},{:?}]",
                expected - delta,
                expected + delta
            )
        })
    }

    /// Fails the running test.
    ///
    /// Returns the reported failure so the body can `return Err(ctx.fail())`.
    #[must_use = "return the failure to stop the test body"]
    pub fn fail(&self) -> Failure {
        self.report_assertion("Test failed".to_string())
    }

    /// Fails the running test with `message`.
    #[must_use = "return the failure to stop the test body"]
    pub fn fail_msg(&self, message: &str) -> Failure {
        self.report_assertion(message.to_string())
    }

    /// Fails the running test with `cause`.
    #[must_use = "return the failure to stop the test body"]
    pub fn fail_with(&self, cause: Failure) -> Failure {
        self.failed(cause.clone());
        cause
    }

    /// Runs `block`, reporting a returned failure or a panic against the
    /// running test.
    ///
    /// Handy in callbacks where a panicking `assert!` would otherwise be lost
    /// on a foreign thread.
    pub fn verify<F>(&self, block: F) -> Outcome
    where
        F: FnOnce() -> Outcome,
    {
        catch_failure(block).map_err(|failure| self.fail_with(failure))
    }

    /// Returns a callback expecting a successful result.
    ///
    /// Allocates one completion handle. The callback completes it on `Ok`
    /// and fails the test with the error on `Err`.
    ///
    /// # Errors
    ///
    /// Fails like [`async_handle`](TestContext::async_handle).
    pub fn async_assert_success<T, E>(
        &self,
    ) -> Result<impl FnOnce(std::result::Result<T, E>) + Send + 'static>
    where
        T: 'static,
        E: Into<Failure> + 'static,
    {
        self.async_assert_success_with(|_: T| Ok(()))
    }

    /// Returns a callback expecting a successful result, inspected by
    /// `inspector` before the handle completes.
    ///
    /// A failure returned by the inspector, or a panic inside it, fails the
    /// test instead of completing the handle.
    ///
    /// # Errors
    ///
    /// Fails like [`async_handle`](TestContext::async_handle).
    pub fn async_assert_success_with<T, E, F>(
        &self,
        inspector: F,
    ) -> Result<impl FnOnce(std::result::Result<T, E>) + Send + 'static>
    where
        T: 'static,
        E: Into<Failure> + 'static,
        F: FnOnce(T) -> Outcome + Send + 'static,
    {
        let handle = self.async_handle()?;
        let ctx = self.clone();
        Ok(move |outcome: std::result::Result<T, E>| match outcome {
            Ok(value) => match catch_failure(|| inspector(value)) {
                Ok(()) => {
                    if let Err(err) = handle.complete() {
                        ctx.report_for(&handle, err.into());
                    }
                }
                Err(failure) => ctx.report_for(&handle, failure),
            },
            Err(err) => ctx.report_for(&handle, err.into()),
        })
    }

    /// Returns a callback expecting a failed result.
    ///
    /// Allocates one completion handle. The callback completes it on `Err`
    /// and fails the test with an assertion failure on `Ok`.
    ///
    /// # Errors
    ///
    /// Fails like [`async_handle`](TestContext::async_handle).
    pub fn async_assert_failure<T, E>(
        &self,
    ) -> Result<impl FnOnce(std::result::Result<T, E>) + Send + 'static>
    where
        T: 'static,
        E: Into<Failure> + 'static,
    {
        self.async_assert_failure_with(|_| Ok(()))
    }

    /// Returns a callback expecting a failed result, whose cause is
    /// inspected by `inspector` before the handle completes.
    ///
    /// # Errors
    ///
    /// Fails like [`async_handle`](TestContext::async_handle).
    pub fn async_assert_failure_with<T, E, F>(
        &self,
        inspector: F,
    ) -> Result<impl FnOnce(std::result::Result<T, E>) + Send + 'static>
    where
        T: 'static,
        E: Into<Failure> + 'static,
        F: FnOnce(Failure) -> Outcome + Send + 'static,
    {
        let handle = self.async_handle()?;
        let ctx = self.clone();
        Ok(move |outcome: std::result::Result<T, E>| match outcome {
            Err(err) => match catch_failure(|| inspector(err.into())) {
                Ok(()) => {
                    if let Err(err) = handle.complete() {
                        ctx.report_for(&handle, err.into());
                    }
                }
                Err(failure) => ctx.report_for(&handle, failure),
            },
            Ok(_) => ctx.report_for(
                &handle,
                Failure::assertion("Was expecting a failure instead of a success"),
            ),
        })
    }
}
