//! The `TestContext` implementation.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::completion::Async;
use crate::context::attributes::{Attribute, Attributes};
use crate::error::{catch_failure, Error, Failure, Result};
use crate::step::{Step, StepPhase, TestResult, Watchdog};

/// Receives failures that no running test could absorb.
pub type UnhandledFailureHandler = Arc<dyn Fn(Failure) + Send + Sync>;

/// The object a running test body talks to.
///
/// A context binds one test at a time (see [`run`](TestContext::run)).
/// While a test is bound, the context hands out completion handles,
/// records assertion failures against it, and exposes an attribute store
/// shared by every test the context runs.
///
/// Contexts are cheap to clone; clones refer to the same context, so a
/// clone can be moved into a callback running on another thread.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use testkit_unit::context::TestContext;
///
/// let ctx = TestContext::new();
/// let (tx, rx) = std::sync::mpsc::channel();
///
/// ctx.run(None, Duration::ZERO, |ctx| {
///     ctx.assert_equals(1, 2)?;
///     Ok(())
/// }, move |result| tx.send(result).unwrap()).unwrap();
///
/// let result = rx.recv().unwrap();
/// assert_eq!(result.failure().unwrap().message(), "Not equals : 1 != 2");
/// ```
#[derive(Clone)]
pub struct TestContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    attributes: Attributes,
    current: Mutex<Option<Arc<Step>>>,
    unhandled: Option<UnhandledFailureHandler>,
    watchdog: Watchdog,
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}

impl TestContext {
    /// Creates a context with an empty attribute store.
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Creates a builder for a customized context.
    #[must_use]
    pub fn builder() -> TestContextBuilder {
        TestContextBuilder::default()
    }

    /// Runs one test on this context.
    ///
    /// Binds a new step seeded with `initial_failure`, arms the watchdog when
    /// `timeout` is non-zero, and invokes `body` on the calling thread. A
    /// failure returned by the body, or a panic, fails the test. `on_end` is
    /// invoked exactly once with the result, possibly on another thread and
    /// possibly before `run` returns.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::State`] if a test is already running on this
    /// context. The body is not invoked in that case.
    pub fn run<B, E>(
        &self,
        initial_failure: Option<Failure>,
        timeout: Duration,
        body: B,
        on_end: E,
    ) -> Result<()>
    where
        B: FnOnce(&TestContext) -> std::result::Result<(), Failure>,
        E: FnOnce(TestResult) + Send + 'static,
    {
        let step = {
            let mut current = self.inner.current.lock();
            if current.is_some() {
                return Err(Error::state("Wrong status: a test is already running"));
            }
            let inner = Arc::clone(&self.inner);
            let step = Step::new(
                initial_failure,
                Box::new(move |result| {
                    // Only the bound step can end, so unbinding is unconditional.
                    inner.current.lock().take();
                    on_end(result);
                }),
            );
            *current = Some(Arc::clone(&step));
            step
        };

        if !timeout.is_zero() {
            tracing::debug!(step = step.id(), timeout_ms = %timeout.as_millis(), "arming test timeout");
            if let Err(err) = step.arm_timeout(&self.inner.watchdog, timeout) {
                self.report_to(&step, err.into());
            }
        }

        if let Err(failure) = catch_failure(|| body(self)) {
            self.report_to(&step, failure);
        }
        step.finish_running();
        Ok(())
    }

    /// Reports a failure against the running test.
    ///
    /// The first failure of a test is the one it fails with; later ones are
    /// dropped. With no test running, the failure goes to the unhandled
    /// failure handler. Reporting the same failure twice has no effect.
    pub fn failed(&self, failure: Failure) {
        if !failure.mark_reported() {
            return;
        }
        let step = self.inner.current.lock().clone();
        let accepted = step.is_some_and(|step| step.failed(failure.clone()));
        if !accepted {
            self.inner.unhandled(failure);
        }
    }

    /// Reports a failure against a specific step, bypassing whichever test
    /// is currently bound.
    pub(crate) fn report_to(&self, step: &Step, failure: Failure) {
        if failure.mark_reported() && !step.failed(failure.clone()) {
            self.inner.unhandled(failure);
        }
    }

    /// Reports a failure against the test that created `handle`.
    pub(crate) fn report_for(&self, handle: &Async, failure: Failure) {
        match handle.owning_step() {
            Some(step) => self.report_to(&step, failure),
            None => {
                if failure.mark_reported() {
                    self.inner.unhandled(failure);
                }
            }
        }
    }

    /// Creates a completion handle with a count of one.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::State`] if no test is running or the running test
    /// already completed.
    pub fn async_handle(&self) -> Result<Async> {
        self.async_with(1, false)
    }

    /// Creates a completion handle resolving after `count` countdowns.
    ///
    /// # Errors
    ///
    /// See [`async_with`](TestContext::async_with).
    pub fn async_count(&self, count: usize) -> Result<Async> {
        self.async_with(count, false)
    }

    /// Creates a completion handle.
    ///
    /// A strict handle rejects countdowns past zero.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::InvalidArgument`] if `count` is zero and with
    /// [`Error::State`] if no test is running or it already completed.
    pub fn async_with(&self, count: usize, strict: bool) -> Result<Async> {
        if count < 1 {
            return Err(Error::invalid_argument("Async completion count must be > 0"));
        }
        let step = self
            .inner
            .current
            .lock()
            .clone()
            .ok_or_else(|| Error::state("No test is running"))?;
        step.create_handle(count, strict)
    }

    /// Returns the phase of the bound test, if any.
    #[must_use]
    pub fn phase(&self) -> Option<StepPhase> {
        self.inner.current.lock().as_ref().map(|step| step.phase())
    }

    /// Returns `true` while a test is bound to this context.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.current.lock().is_some()
    }

    /// Returns a handler routing failures to [`failed`](TestContext::failed).
    ///
    /// Useful as an error callback for code that reports errors out of band.
    pub fn exception_handler(&self) -> impl Fn(Failure) + Send + Sync + 'static {
        let ctx = self.clone();
        move |failure| ctx.failed(failure)
    }

    /// Returns the shared attribute store.
    #[must_use]
    pub fn attributes(&self) -> &Attributes {
        &self.inner.attributes
    }

    /// Returns the attribute under `key` if it has type `T`.
    #[must_use]
    pub fn get<T>(&self, key: &str) -> Option<Arc<T>>
    where
        T: std::any::Any + Send + Sync,
    {
        self.inner.attributes.get(key)
    }

    /// Stores an attribute, `None` removing it. Returns the previous value.
    pub fn put<T>(&self, key: impl Into<String>, value: Option<T>) -> Option<Attribute>
    where
        T: std::any::Any + Send + Sync,
    {
        self.inner.attributes.put(key, value)
    }

    /// Removes an attribute, returning its value.
    pub fn remove(&self, key: &str) -> Option<Attribute> {
        self.inner.attributes.remove(key)
    }
}

impl fmt::Debug for TestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestContext")
            .field("attributes", &self.inner.attributes)
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}

impl ContextInner {
    fn unhandled(&self, failure: Failure) {
        match &self.unhandled {
            Some(handler) => handler(failure),
            None => tracing::warn!(%failure, "unhandled test failure"),
        }
    }
}

/// Builder for [`TestContext`].
#[derive(Default)]
pub struct TestContextBuilder {
    attributes: Option<Attributes>,
    unhandled: Option<UnhandledFailureHandler>,
    watchdog: Option<Watchdog>,
}

impl TestContextBuilder {
    /// Shares an existing attribute store.
    #[must_use]
    pub fn attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = Some(attributes);
        self
    }

    /// Sets the handler for failures that reach no running test.
    ///
    /// Without one, such failures are logged at `warn` level.
    #[must_use]
    pub fn unhandled_failure_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(Failure) + Send + Sync + 'static,
    {
        self.unhandled = Some(Arc::new(handler));
        self
    }

    /// Sets a shared handler for failures that reach no running test.
    #[must_use]
    pub fn unhandled_failure_handler_arc(mut self, handler: UnhandledFailureHandler) -> Self {
        self.unhandled = Some(handler);
        self
    }

    /// Uses `watchdog` for test timeouts instead of a private one.
    #[must_use]
    pub fn watchdog(mut self, watchdog: Watchdog) -> Self {
        self.watchdog = Some(watchdog);
        self
    }

    /// Builds the context.
    #[must_use]
    pub fn build(self) -> TestContext {
        TestContext {
            inner: Arc::new(ContextInner {
                attributes: self.attributes.unwrap_or_default(),
                current: Mutex::new(None),
                unhandled: self.unhandled,
                watchdog: self.watchdog.unwrap_or_default(),
            }),
        }
    }
}
