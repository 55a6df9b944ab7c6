//! Observing a running suite.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::step::TestResult;

/// Receives each test outcome as it is produced.
pub type TestHandler = Box<dyn FnMut(&TestOutcome) + Send + 'static>;

/// Receives the aggregated results once the suite is over.
pub type EndHandler = Box<dyn FnOnce(&SuiteResults) + Send + 'static>;

/// The outcome of one test of a suite.
#[derive(Debug, Clone)]
pub struct TestOutcome {
    description: String,
    is_async: bool,
    result: TestResult,
}

impl TestOutcome {
    pub(crate) fn new(description: String, is_async: bool, result: TestResult) -> Self {
        Self {
            description,
            is_async,
            result,
        }
    }

    /// Returns the test description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Returns `true` if the test was declared asynchronous.
    #[must_use]
    pub fn is_async(&self) -> bool {
        self.is_async
    }

    /// Returns the test result.
    #[must_use]
    pub fn result(&self) -> &TestResult {
        &self.result
    }
}

impl fmt::Display for TestOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.description, self.result)
    }
}

/// The outcomes of a suite, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct SuiteResults {
    name: String,
    outcomes: Vec<TestOutcome>,
}

impl SuiteResults {
    fn new(name: String) -> Self {
        Self {
            name,
            outcomes: Vec::new(),
        }
    }

    /// Returns the suite name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns every outcome.
    #[must_use]
    pub fn outcomes(&self) -> &[TestOutcome] {
        &self.outcomes
    }

    /// Returns the outcomes of passed tests.
    pub fn passed(&self) -> impl Iterator<Item = &TestOutcome> {
        self.outcomes.iter().filter(|o| o.result.succeeded())
    }

    /// Returns the outcomes of failed tests.
    pub fn failed(&self) -> impl Iterator<Item = &TestOutcome> {
        self.outcomes.iter().filter(|o| o.result.failed())
    }

    /// Returns the number of finished tests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    /// Returns `true` if no test has finished.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Returns `true` if every finished test passed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed().next().is_none()
    }
}

/// A handle on a running suite.
///
/// Outcomes are pushed to the test handler one by one, in declaration
/// order, then the end handler fires once. Either handler can be replaced
/// while the suite runs; outcomes already delivered stay delivered.
///
/// Clones observe the same suite.
#[derive(Clone)]
pub struct SuiteExec {
    inner: Arc<ExecInner>,
}

struct ExecInner {
    state: Mutex<ExecState>,
    done: Condvar,
}

struct ExecState {
    results: SuiteResults,
    test_handler: Option<TestHandler>,
    end_handler: Option<EndHandler>,
    /// Set once the last outcome was recorded.
    finished: bool,
    /// Set once the end handler returned.
    done: bool,
}

impl SuiteExec {
    pub(crate) fn new(name: String) -> Self {
        Self {
            inner: Arc::new(ExecInner {
                state: Mutex::new(ExecState {
                    results: SuiteResults::new(name),
                    test_handler: None,
                    end_handler: None,
                    finished: false,
                    done: false,
                }),
                done: Condvar::new(),
            }),
        }
    }

    /// Replaces the per-test handler.
    ///
    /// The new handler only sees outcomes produced from now on.
    pub fn set_test_handler<F>(&self, handler: F)
    where
        F: FnMut(&TestOutcome) + Send + 'static,
    {
        self.inner.state.lock().test_handler = Some(Box::new(handler));
    }

    /// Replaces the end-of-suite handler.
    ///
    /// If the suite is already over the handler is invoked at once.
    pub fn set_end_handler<F>(&self, handler: F)
    where
        F: FnOnce(&SuiteResults) + Send + 'static,
    {
        let results = {
            let mut state = self.inner.state.lock();
            if !state.finished {
                state.end_handler = Some(Box::new(handler));
                return;
            }
            state.results.clone()
        };
        handler(&results);
    }

    pub(crate) fn record(&self, outcome: TestOutcome) {
        tracing::debug!(
            test = %outcome.description,
            elapsed_ms = outcome.result.elapsed_millis(),
            failed = outcome.result.failed(),
            "test finished"
        );
        let handler = {
            let mut state = self.inner.state.lock();
            state.results.outcomes.push(outcome.clone());
            state.test_handler.take()
        };
        if let Some(mut handler) = handler {
            handler(&outcome);
            let mut state = self.inner.state.lock();
            // Keep a handler installed while this one ran.
            if state.test_handler.is_none() {
                state.test_handler = Some(handler);
            }
        }
    }

    pub(crate) fn finish(&self) {
        let (handler, results) = {
            let mut state = self.inner.state.lock();
            if state.finished {
                return;
            }
            state.finished = true;
            (state.end_handler.take(), state.results.clone())
        };
        tracing::debug!(
            suite = %results.name,
            tests = results.len(),
            failed = results.failed().count(),
            "suite finished"
        );
        if let Some(handler) = handler {
            handler(&results);
        }
        self.inner.state.lock().done = true;
        self.inner.done.notify_all();
    }

    /// Returns `true` once every test ran and the end handler returned.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.inner.state.lock().done
    }

    /// Returns a snapshot of the outcomes recorded so far.
    #[must_use]
    pub fn results(&self) -> SuiteResults {
        self.inner.state.lock().results.clone()
    }

    /// Blocks until the suite is done.
    ///
    /// A test that never completes and has no timeout blocks forever.
    #[must_use]
    pub fn wait(&self) -> SuiteResults {
        let mut state = self.inner.state.lock();
        while !state.done {
            self.inner.done.wait(&mut state);
        }
        state.results.clone()
    }

    /// Blocks until the suite is done or `timeout` elapsed.
    ///
    /// Returns `None` on timeout.
    #[must_use]
    pub fn wait_timeout(&self, timeout: Duration) -> Option<SuiteResults> {
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.state.lock();
        while !state.done {
            if self.inner.done.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        state.done.then(|| state.results.clone())
    }
}

impl fmt::Debug for SuiteExec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("SuiteExec")
            .field("suite", &state.results.name)
            .field("finished_tests", &state.results.len())
            .field("done", &state.done)
            .finish_non_exhaustive()
    }
}
