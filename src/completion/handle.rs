//! The user-facing countdown handle.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use crate::completion::release::{Release, ReleaseOutcome, ReleaseSignal};
use crate::error::{Error, Result};
use crate::step::Step;

/// Unique identifier for a completion handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HandleId(u64);

impl HandleId {
    pub(crate) fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw ID value.
    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Async({})", self.0)
    }
}

/// One unit of outstanding asynchronous work in a running test.
///
/// A handle starts with a count and resolves when the count reaches zero,
/// either through [`count_down`](Async::count_down) calls or a single
/// [`complete`](Async::complete). The test cannot pass while any of its
/// handles is unresolved.
///
/// Handles are cheap to clone and can be moved to any thread; clones share
/// the same counter.
///
/// # Example
///
/// ```rust
/// use testkit_unit::context::TestContext;
/// use std::time::Duration;
///
/// let ctx = TestContext::new();
/// let (tx, rx) = std::sync::mpsc::channel();
///
/// ctx.run(None, Duration::ZERO, |ctx| {
///     let handle = ctx.async_count(2)?;
///     for _ in 0..2 {
///         let handle = handle.clone();
///         std::thread::spawn(move || handle.count_down().unwrap());
///     }
///     Ok(())
/// }, move |result| tx.send(result).unwrap()).unwrap();
///
/// assert!(rx.recv().unwrap().succeeded());
/// ```
#[derive(Clone)]
pub struct Async {
    inner: Arc<Countdown>,
}

struct Countdown {
    id: HandleId,
    initial: usize,
    remaining: AtomicUsize,
    strict: bool,
    step: Weak<Step>,
    signal: Arc<ReleaseSignal>,
}

impl Async {
    pub(crate) fn new(
        id: HandleId,
        count: usize,
        strict: bool,
        step: Weak<Step>,
        signal: Arc<ReleaseSignal>,
    ) -> Self {
        Self {
            inner: Arc::new(Countdown {
                id,
                initial: count,
                remaining: AtomicUsize::new(count),
                strict,
                step,
                signal,
            }),
        }
    }

    /// Returns this handle's identifier.
    #[must_use]
    pub fn id(&self) -> HandleId {
        self.inner.id
    }

    /// Returns the current count. Under concurrent countdowns this is only a
    /// snapshot.
    #[must_use]
    pub fn count(&self) -> usize {
        self.inner.remaining.load(Ordering::Acquire)
    }

    /// Returns the count the handle was created with.
    #[must_use]
    pub fn initial_count(&self) -> usize {
        self.inner.initial
    }

    /// Returns `true` if counting down past zero is an error.
    #[must_use]
    pub fn is_strict(&self) -> bool {
        self.inner.strict
    }

    /// Returns `true` once the count has reached zero.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.count() == 0
    }

    /// Decrements the count, resolving the handle when it reaches zero.
    ///
    /// # Errors
    ///
    /// Counting down an already resolved strict handle fails with
    /// [`Error::State`] while its test is still running. Non-strict handles
    /// ignore extra calls, and every call is ignored once the test has ended.
    pub fn count_down(&self) -> Result<()> {
        let mut current = self.inner.remaining.load(Ordering::Acquire);
        loop {
            if current == 0 {
                if self.inner.strict && !self.step_completed() {
                    return Err(Error::state(over_countdown_message(self.inner.initial)));
                }
                return Ok(());
            }
            match self.inner.remaining.compare_exchange_weak(
                current,
                current - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
        if current == 1 {
            self.resolve();
        }
        Ok(())
    }

    /// Resolves the handle at once, whatever its remaining count.
    ///
    /// # Errors
    ///
    /// Completing an already resolved handle fails with [`Error::State`]
    /// while its test is still running, strict or not.
    pub fn complete(&self) -> Result<()> {
        let previous = self.inner.remaining.swap(0, Ordering::AcqRel);
        if previous > 0 {
            self.resolve();
            Ok(())
        } else if self.step_completed() {
            Ok(())
        } else {
            Err(Error::state(format!(
                "The Async complete method has been called more than {} times, check your test.",
                self.inner.initial
            )))
        }
    }

    /// Returns a future resolving to the final outcome of the owning test.
    pub fn released(&self) -> Release {
        Release::new(Arc::clone(&self.inner.signal))
    }

    /// Returns the outcome delivered to this handle, if it was released.
    #[must_use]
    pub fn outcome(&self) -> Option<ReleaseOutcome> {
        self.inner.signal.outcome()
    }

    pub(crate) fn owning_step(&self) -> Option<Arc<Step>> {
        self.inner.step.upgrade()
    }

    fn step_completed(&self) -> bool {
        self.inner.step.upgrade().map_or(true, |step| step.is_complete())
    }

    fn resolve(&self) {
        tracing::trace!(handle = %self.inner.id, "completion handle resolved");
        if let Some(step) = self.inner.step.upgrade() {
            step.handle_resolved(self.inner.id, &self.inner.signal);
        }
    }
}

impl fmt::Debug for Async {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Async")
            .field("id", &self.inner.id)
            .field("initial", &self.inner.initial)
            .field("remaining", &self.count())
            .field("strict", &self.inner.strict)
            .finish_non_exhaustive()
    }
}

fn over_countdown_message(initial: usize) -> String {
    match initial {
        1 => "Countdown invoked more than once".to_string(),
        2 => "Countdown invoked more than twice".to_string(),
        n => format!("Countdown invoked more than {n} times"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detached(count: usize, strict: bool) -> Async {
        Async::new(
            HandleId::next(),
            count,
            strict,
            Weak::new(),
            Arc::new(ReleaseSignal::new()),
        )
    }

    #[test]
    fn test_handle_id_unique() {
        let id1 = HandleId::next();
        let id2 = HandleId::next();

        assert_ne!(id1, id2);
        assert!(id1 < id2);
        assert_eq!(id1.to_string(), format!("Async({})", id1.as_u64()));
    }

    #[test]
    fn test_over_countdown_messages() {
        assert_eq!(over_countdown_message(1), "Countdown invoked more than once");
        assert_eq!(over_countdown_message(2), "Countdown invoked more than twice");
        assert_eq!(over_countdown_message(5), "Countdown invoked more than 5 times");
    }

    #[test]
    fn test_count_down_reaches_zero() {
        let handle = detached(3, false);
        assert_eq!(handle.initial_count(), 3);

        handle.count_down().unwrap();
        handle.count_down().unwrap();
        assert_eq!(handle.count(), 1);
        assert!(!handle.is_completed());

        handle.count_down().unwrap();
        assert!(handle.is_completed());
    }

    #[test]
    fn test_detached_handle_ignores_protocol_errors() {
        // Without a live step there is nothing left to protect.
        let handle = detached(1, true);
        handle.complete().unwrap();
        handle.count_down().unwrap();
        handle.complete().unwrap();
    }

    #[test]
    fn test_concurrent_count_down_never_goes_below_zero() {
        let handle = detached(64, false);
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let handle = handle.clone();
                std::thread::spawn(move || {
                    for _ in 0..10 {
                        handle.count_down().unwrap();
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }
        assert_eq!(handle.count(), 0);
    }
}
