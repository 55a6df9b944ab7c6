//! Sequential suite execution
//!
//! A [`TestSuite`] lists tests in declaration order. A [`SequentialRunner`]
//! runs them one at a time on a shared [`TestContext`], waiting for each
//! test's asynchronous work before starting the next, and pushes every
//! outcome to the handlers of the returned [`SuiteExec`].
//!
//! For a single test, [`run_test`] does all of this and blocks until the
//! result is in.
//!
//! ```rust
//! use testkit_unit::options::TestOptions;
//! use testkit_unit::runner::run_test;
//!
//! let result = run_test(TestOptions::new(), |ctx| {
//!     let handle = ctx.async_handle()?;
//!     std::thread::spawn(move || handle.complete().unwrap());
//!     Ok(())
//! });
//! assert!(result.succeeded());
//! ```

mod exec;
mod sequential;
mod suite;

pub use exec::{EndHandler, SuiteExec, SuiteResults, TestHandler, TestOutcome};
pub use sequential::SequentialRunner;
pub use suite::{Hook, TestBody, TestDesc, TestSuite};

use std::time::Duration;

use crate::context::TestContext;
use crate::error::Failure;
use crate::options::TestOptions;
use crate::runtime::ExecutionMode;
use crate::step::TestResult;

/// Runs one test inline and blocks until it produced its result.
///
/// A test that never completes and has no timeout blocks forever.
pub fn run_test<F>(options: TestOptions, body: F) -> TestResult
where
    F: FnOnce(&TestContext) -> Result<(), Failure> + Send + 'static,
{
    execute_single(SequentialRunner::new(single(body)).with_options(options))
}

/// Runs one test on `mode` and blocks until it produced its result.
pub fn run_test_with_mode<F, M>(options: TestOptions, mode: M, body: F) -> TestResult
where
    F: FnOnce(&TestContext) -> Result<(), Failure> + Send + 'static,
    M: ExecutionMode + 'static,
{
    execute_single(
        SequentialRunner::new(single(body))
            .with_options(options)
            .with_execution_mode(mode),
    )
}

fn single<F>(body: F) -> TestSuite
where
    F: FnOnce(&TestContext) -> Result<(), Failure> + Send + 'static,
{
    TestSuite::new("single").async_test("test", body)
}

fn execute_single(runner: SequentialRunner) -> TestResult {
    match runner.run() {
        Ok(exec) => exec
            .wait()
            .outcomes()
            .first()
            .map(|outcome| outcome.result().clone())
            .unwrap_or_else(|| TestResult::new(Duration::ZERO, None)),
        Err(err) => TestResult::new(Duration::ZERO, Some(err.into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::DedicatedThread;

    #[test]
    fn test_run_test_success() {
        let result = run_test(TestOptions::new(), |ctx| ctx.assert_true(true));
        assert!(result.succeeded());
    }

    #[test]
    fn test_run_test_timeout() {
        let result = run_test(TestOptions::new().with_timeout_millis(50), |ctx| {
            ctx.async_handle()?;
            Ok(())
        });

        let failure = result.into_failure().unwrap();
        assert!(failure.is_timeout());
        assert_eq!(failure.message(), "Timed out after 50ms");
    }

    #[test]
    fn test_run_test_on_dedicated_thread() {
        let caller = std::thread::current().id();
        let result = run_test_with_mode(TestOptions::new(), DedicatedThread::new(), move |ctx| {
            ctx.assert_not_equals(caller, std::thread::current().id())
        });
        assert!(result.succeeded());
    }

    #[test]
    fn test_run_test_rejected_options() {
        let result = run_test(TestOptions::new().use_event_loop(true), |_| Ok(()));
        assert!(result.failure().unwrap().message().contains("event loop"));
    }
}
