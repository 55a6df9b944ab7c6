//! Test descriptors and suites.

use std::fmt;

use crate::context::TestContext;
use crate::error::Failure;

/// A test body.
pub type TestBody = Box<dyn FnOnce(&TestContext) -> Result<(), Failure> + Send + 'static>;

/// A suite-level setup or teardown hook.
pub type Hook = Box<dyn FnOnce() -> Result<(), Failure> + Send + 'static>;

/// One test of a suite.
pub struct TestDesc {
    description: String,
    is_async: bool,
    body: TestBody,
}

impl TestDesc {
    /// Creates a descriptor.
    pub fn new<F>(description: impl Into<String>, is_async: bool, body: F) -> Self
    where
        F: FnOnce(&TestContext) -> Result<(), Failure> + Send + 'static,
    {
        Self {
            description: description.into(),
            is_async,
            body: Box::new(body),
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

    pub(crate) fn into_parts(self) -> (String, bool, TestBody) {
        (self.description, self.is_async, self.body)
    }
}

impl fmt::Debug for TestDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestDesc")
            .field("description", &self.description)
            .field("is_async", &self.is_async)
            .finish_non_exhaustive()
    }
}

/// An ordered collection of tests with optional setup and teardown hooks.
///
/// # Example
///
/// ```rust
/// use testkit_unit::runner::TestSuite;
///
/// let suite = TestSuite::new("arithmetic")
///     .before_all(|| Ok(()))
///     .test("addition", |ctx| ctx.assert_equals(4, 2 + 2))
///     .async_test("deferred", |ctx| {
///         let done = ctx.async_handle()?;
///         std::thread::spawn(move || done.complete().unwrap());
///         Ok(())
///     });
///
/// assert_eq!(suite.len(), 2);
/// ```
pub struct TestSuite {
    name: String,
    before_all: Vec<Hook>,
    after_all: Vec<Hook>,
    tests: Vec<TestDesc>,
}

impl TestSuite {
    /// Creates an empty suite.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            before_all: Vec::new(),
            after_all: Vec::new(),
            tests: Vec::new(),
        }
    }

    /// Adds a hook run once before the first test.
    ///
    /// A failing hook fails every test of the suite.
    #[must_use]
    pub fn before_all<F>(mut self, hook: F) -> Self
    where
        F: FnOnce() -> Result<(), Failure> + Send + 'static,
    {
        self.before_all.push(Box::new(hook));
        self
    }

    /// Adds a hook run once after the last test.
    #[must_use]
    pub fn after_all<F>(mut self, hook: F) -> Self
    where
        F: FnOnce() -> Result<(), Failure> + Send + 'static,
    {
        self.after_all.push(Box::new(hook));
        self
    }

    /// Adds a synchronous test.
    #[must_use]
    pub fn test<F>(self, description: impl Into<String>, body: F) -> Self
    where
        F: FnOnce(&TestContext) -> Result<(), Failure> + Send + 'static,
    {
        self.add(TestDesc::new(description, false, body))
    }

    /// Adds a test that completes through completion handles.
    #[must_use]
    pub fn async_test<F>(self, description: impl Into<String>, body: F) -> Self
    where
        F: FnOnce(&TestContext) -> Result<(), Failure> + Send + 'static,
    {
        self.add(TestDesc::new(description, true, body))
    }

    /// Adds a prepared descriptor.
    #[must_use]
    pub fn add(mut self, test: TestDesc) -> Self {
        self.tests.push(test);
        self
    }

    /// Returns the suite name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of tests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tests.len()
    }

    /// Returns `true` if the suite has no tests.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }

    /// Returns the tests in declaration order.
    #[must_use]
    pub fn tests(&self) -> &[TestDesc] {
        &self.tests
    }

    pub(crate) fn into_parts(self) -> (String, Vec<Hook>, Vec<TestDesc>, Vec<Hook>) {
        (self.name, self.before_all, self.tests, self.after_all)
    }
}

impl fmt::Debug for TestSuite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestSuite")
            .field("name", &self.name)
            .field("tests", &self.tests)
            .field("before_all", &self.before_all.len())
            .field("after_all", &self.after_all.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suite_keeps_declaration_order() {
        let suite = TestSuite::new("order")
            .test("first", |_| Ok(()))
            .async_test("second", |_| Ok(()))
            .add(TestDesc::new("third", false, |_| Ok(())));

        let names: Vec<_> = suite.tests().iter().map(TestDesc::description).collect();
        assert_eq!(names, ["first", "second", "third"]);
        assert!(!suite.tests()[0].is_async());
        assert!(suite.tests()[1].is_async());
    }

    #[test]
    fn test_empty_suite() {
        let suite = TestSuite::new("empty").before_all(|| Ok(())).after_all(|| Ok(()));
        assert!(suite.is_empty());
        assert_eq!(suite.name(), "empty");

        let (name, before, tests, after) = suite.into_parts();
        assert_eq!(name, "empty");
        assert_eq!((before.len(), tests.len(), after.len()), (1, 0, 1));
    }

    #[test]
    fn test_debug_omits_bodies() {
        let suite = TestSuite::new("dbg").test("one", |_| Ok(()));
        let debug = format!("{suite:?}");
        assert!(debug.contains("one"));
        assert!(debug.contains("dbg"));
    }
}
