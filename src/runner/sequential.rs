//! Running a suite one test at a time.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::context::{Attributes, TestContext, UnhandledFailureHandler};
use crate::error::{catch_failure, Error, Failure, Result};
use crate::options::TestOptions;
use crate::runner::exec::{EndHandler, SuiteExec, TestHandler, TestOutcome};
use crate::runner::suite::{Hook, TestDesc, TestSuite};
use crate::runtime::{DedicatedThread, ExecutionMode, Inline};
use crate::step::{on_watchdog_thread, TestResult, Watchdog};

/// Runs the tests of a suite sequentially, in declaration order.
///
/// A test starts only once the previous one produced its result, which for
/// asynchronous tests means once its completion handles resolved (or it
/// failed, or timed out). Where test bodies run is up to the
/// [`ExecutionMode`]; `run` itself never blocks on asynchronous work.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use testkit_unit::options::TestOptions;
/// use testkit_unit::runner::{SequentialRunner, TestSuite};
///
/// let suite = TestSuite::new("example")
///     .test("sync", |ctx| ctx.assert_true(true))
///     .async_test("async", |ctx| {
///         let handle = ctx.async_count(2)?;
///         for _ in 0..2 {
///             let handle = handle.clone();
///             std::thread::spawn(move || handle.count_down().unwrap());
///         }
///         Ok(())
///     });
///
/// let exec = SequentialRunner::new(suite)
///     .with_options(TestOptions::new().with_timeout(Duration::from_secs(5)))
///     .run()
///     .unwrap();
///
/// let results = exec.wait();
/// assert!(results.is_success());
/// assert_eq!(results.len(), 2);
/// ```
pub struct SequentialRunner {
    suite: TestSuite,
    options: TestOptions,
    mode: Option<Arc<dyn ExecutionMode>>,
    attributes: Option<Attributes>,
    unhandled: Option<UnhandledFailureHandler>,
    watchdog: Option<Watchdog>,
    test_handler: Option<TestHandler>,
    end_handler: Option<EndHandler>,
}

impl SequentialRunner {
    /// Creates a runner with default options, running tests inline.
    #[must_use]
    pub fn new(suite: TestSuite) -> Self {
        Self {
            suite,
            options: TestOptions::default(),
            mode: None,
            attributes: None,
            unhandled: None,
            watchdog: None,
            test_handler: None,
            end_handler: None,
        }
    }

    /// Sets the options.
    #[must_use]
    pub fn with_options(mut self, options: TestOptions) -> Self {
        self.options = options;
        self
    }

    /// Sets where test bodies run.
    ///
    /// Combined with [`TestOptions::use_event_loop`], see
    /// [`run`](SequentialRunner::run).
    #[must_use]
    pub fn with_execution_mode<M>(mut self, mode: M) -> Self
    where
        M: ExecutionMode + 'static,
    {
        self.mode = Some(Arc::new(mode));
        self
    }

    /// Shares an attribute store with the tests.
    #[must_use]
    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = Some(attributes);
        self
    }

    /// Uses `watchdog` for test timeouts.
    #[must_use]
    pub fn with_watchdog(mut self, watchdog: Watchdog) -> Self {
        self.watchdog = Some(watchdog);
        self
    }

    /// Sets the handler for failures reported while no test is running,
    /// including failing teardown hooks.
    #[must_use]
    pub fn on_unhandled_failure<F>(mut self, handler: F) -> Self
    where
        F: Fn(Failure) + Send + Sync + 'static,
    {
        self.unhandled = Some(Arc::new(handler));
        self
    }

    /// Sets the per-test handler.
    #[must_use]
    pub fn on_test<F>(mut self, handler: F) -> Self
    where
        F: FnMut(&TestOutcome) + Send + 'static,
    {
        self.test_handler = Some(Box::new(handler));
        self
    }

    /// Sets the end-of-suite handler.
    #[must_use]
    pub fn on_end<F>(mut self, handler: F) -> Self
    where
        F: FnOnce(&crate::runner::SuiteResults) + Send + 'static,
    {
        self.end_handler = Some(Box::new(handler));
        self
    }

    /// Starts the suite.
    ///
    /// Runs the setup hooks on the calling thread, then launches the first
    /// test. With [`Inline`] execution and synchronous tests the whole suite
    /// may be over before this returns.
    ///
    /// The execution mode is picked from `use_event_loop`:
    ///
    /// | `use_event_loop` | supplied mode | runs on           |
    /// |------------------|---------------|-------------------|
    /// | `Some(true)`     | host          | the supplied mode |
    /// | `Some(true)`     | other or none | error             |
    /// | `Some(false)`    | host          | inline            |
    /// | `Some(false)`    | other         | the supplied mode |
    /// | `None`           | any           | the supplied mode |
    /// | `Some(false)`    | none          | inline            |
    /// | `None`           | none          | inline            |
    ///
    /// # Errors
    ///
    /// Fails with [`Error::State`] if the options require a host execution
    /// mode and none was supplied. No hook or test runs in that case.
    pub fn run(self) -> Result<SuiteExec> {
        let mode = select_mode(self.options.use_event_loop, self.mode)?;
        let (name, before_all, tests, after_all) = self.suite.into_parts();

        let mut builder = TestContext::builder();
        if let Some(attributes) = self.attributes {
            builder = builder.attributes(attributes);
        }
        if let Some(handler) = self.unhandled {
            builder = builder.unhandled_failure_handler_arc(handler);
        }
        if let Some(watchdog) = self.watchdog {
            builder = builder.watchdog(watchdog);
        }
        let context = builder.build();

        let exec = SuiteExec::new(name.clone());
        if let Some(handler) = self.test_handler {
            exec.set_test_handler(handler);
        }
        if let Some(handler) = self.end_handler {
            exec.set_end_handler(handler);
        }

        tracing::debug!(
            suite = %name,
            tests = tests.len(),
            mode = mode.name(),
            timeout_ms = self.options.timeout_millis(),
            "starting suite"
        );
        let setup_failure = run_setup(before_all);

        let driver = Arc::new(Driver {
            context,
            mode,
            timeout: self.options.timeout,
            setup_failure,
            queue: Mutex::new(tests.into()),
            after_all: Mutex::new(after_all),
            pump: Mutex::new(Pump::default()),
            exec: exec.clone(),
        });
        driver.advance();
        Ok(exec)
    }
}

impl fmt::Debug for SequentialRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SequentialRunner")
            .field("suite", &self.suite)
            .field("options", &self.options)
            .field("mode", &self.mode.as_ref().map(|m| m.name()))
            .finish_non_exhaustive()
    }
}

fn select_mode(
    use_event_loop: Option<bool>,
    supplied: Option<Arc<dyn ExecutionMode>>,
) -> Result<Arc<dyn ExecutionMode>> {
    let inline = || -> Arc<dyn ExecutionMode> { Arc::new(Inline) };
    match (use_event_loop, supplied) {
        (Some(true), Some(mode)) if mode.is_host() => Ok(mode),
        (Some(true), _) => Err(Error::state(
            "Tests require an event loop but no host execution mode was supplied",
        )),
        (Some(false), Some(mode)) if mode.is_host() => Ok(inline()),
        (_, Some(mode)) => Ok(mode),
        (_, None) => Ok(inline()),
    }
}

/// Runs every setup hook, stopping at the first failure.
fn run_setup(hooks: Vec<Hook>) -> Option<Failure> {
    for hook in hooks {
        if let Err(failure) = catch_failure(hook) {
            tracing::warn!(%failure, "before_all hook failed, failing every test");
            return Some(failure);
        }
    }
    None
}

#[derive(Default)]
struct Pump {
    /// Launches requested but not yet performed.
    pending: usize,
    /// Whether some thread is currently launching.
    draining: bool,
}

/// Moves a suite forward one test at a time.
///
/// Each finished test requests the next launch through `advance`. The first
/// caller to find nobody launching becomes the launcher and loops until no
/// request is left, so inline tests ending inside their own launch do not
/// recurse.
///
/// A test that ends on the watchdog thread (it timed out) hands the rest of
/// the suite to a fresh thread, so later bodies never hold up deadlines.
struct Driver {
    context: TestContext,
    mode: Arc<dyn ExecutionMode>,
    timeout: Duration,
    setup_failure: Option<Failure>,
    queue: Mutex<VecDeque<TestDesc>>,
    after_all: Mutex<Vec<Hook>>,
    pump: Mutex<Pump>,
    exec: SuiteExec,
}

impl Driver {
    fn advance(self: &Arc<Self>) {
        {
            let mut pump = self.pump.lock();
            pump.pending += 1;
            if pump.draining {
                return;
            }
            pump.draining = true;
        }
        loop {
            {
                let mut pump = self.pump.lock();
                if pump.pending == 0 {
                    pump.draining = false;
                    return;
                }
                pump.pending -= 1;
            }
            self.launch_next();
        }
    }

    fn launch_next(self: &Arc<Self>) {
        let next = self.queue.lock().pop_front();
        match next {
            Some(test) => {
                let driver = Arc::clone(self);
                self.mode.execute(Box::new(move || driver.run_one(test)));
            }
            None => self.finish(),
        }
    }

    fn run_one(self: Arc<Self>, test: TestDesc) {
        let (description, is_async, body) = test.into_parts();
        tracing::debug!(test = %description, is_async, "running test");

        let driver = Arc::clone(&self);
        let reported = description.clone();
        let started = self.context.run(
            self.setup_failure.clone(),
            self.timeout,
            body,
            move |result| {
                let outcome = TestOutcome::new(reported, is_async, result);
                if on_watchdog_thread() {
                    DedicatedThread::with_prefix("testkit-unit-suite")
                        .execute(Box::new(move || driver.resume(outcome)));
                } else {
                    driver.resume(outcome);
                }
            },
        );
        if let Err(err) = started {
            tracing::error!(test = %description, error = %err, "test could not start");
            let result = TestResult::new(Duration::ZERO, Some(err.into()));
            self.resume(TestOutcome::new(description, is_async, result));
        }
    }

    fn resume(self: &Arc<Self>, outcome: TestOutcome) {
        self.exec.record(outcome);
        self.advance();
    }

    fn finish(&self) {
        let hooks = std::mem::take(&mut *self.after_all.lock());
        for hook in hooks {
            if let Err(failure) = catch_failure(hook) {
                tracing::debug!(%failure, "after_all hook failed");
                self.context.failed(failure);
            }
        }
        self.exec.finish();
    }
}
