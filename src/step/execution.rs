//! One execution attempt of a test body.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::completion::{Async, HandleId, ReleaseSignal};
use crate::error::{Error, Failure, Result};
use crate::step::result::TestResult;
use crate::step::watchdog::{TimerGuard, Watchdog};

/// Receives the result once the step is over.
pub(crate) type EndCallback = Box<dyn FnOnce(TestResult) + Send>;

/// Where a step is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepPhase {
    /// The test body is still executing synchronously.
    Running,
    /// The body returned; completion handles are still pending.
    AwaitingAsync,
    /// The result has been produced.
    Complete,
}

impl fmt::Display for StepPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepPhase::Running => write!(f, "Running"),
            StepPhase::AwaitingAsync => write!(f, "AwaitingAsync"),
            StepPhase::Complete => write!(f, "Complete"),
        }
    }
}

/// Tracks a running test until it produces exactly one [`TestResult`].
///
/// The step is over once the body has returned and either every live
/// handle has resolved or a failure was recorded. All mutable state sits
/// behind one lock; callbacks never run while it is held.
pub(crate) struct Step {
    id: u64,
    started: Instant,
    state: Mutex<StepState>,
}

struct StepState {
    /// First failure wins.
    failure: Option<Failure>,
    running: bool,
    complete: bool,
    live: HashMap<HandleId, Arc<ReleaseSignal>>,
    /// Resolved handles waiting for the final outcome.
    unreleased: Vec<Arc<ReleaseSignal>>,
    on_end: Option<EndCallback>,
    timer: Option<TimerGuard>,
}

impl Step {
    pub(crate) fn new(initial_failure: Option<Failure>, on_end: EndCallback) -> Arc<Self> {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Arc::new(Self {
            id: COUNTER.fetch_add(1, Ordering::Relaxed),
            started: Instant::now(),
            state: Mutex::new(StepState {
                failure: initial_failure,
                running: true,
                complete: false,
                live: HashMap::new(),
                unreleased: Vec::new(),
                on_end: Some(on_end),
                timer: None,
            }),
        })
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// Fails the step with a timeout unless it completes within `timeout`.
    ///
    /// A timeout too large to be represented as a deadline never fires.
    pub(crate) fn arm_timeout(self: &Arc<Self>, watchdog: &Watchdog, timeout: Duration) -> Result<()> {
        let Some(deadline) = self.started.checked_add(timeout) else {
            tracing::trace!(step = self.id, "timeout out of range, not armed");
            return Ok(());
        };
        let step = Arc::downgrade(self);
        let guard = watchdog.arm(deadline, move || {
            if let Some(step) = step.upgrade() {
                step.time_out(timeout);
            }
        })?;
        let mut state = self.state.lock();
        if !state.complete {
            state.timer = Some(guard);
        }
        Ok(())
    }

    fn time_out(&self, timeout: Duration) {
        {
            let mut state = self.state.lock();
            if state.complete {
                return;
            }
            state.running = false;
        }
        tracing::debug!(step = self.id, timeout_ms = %timeout.as_millis(), "test timed out");
        self.failed(Failure::timeout(timeout));
    }

    /// Records `failure` unless one was recorded before.
    ///
    /// Returns `false` if the step is already complete, in which case the
    /// failure was not recorded anywhere.
    pub(crate) fn failed(&self, failure: Failure) -> bool {
        {
            let mut state = self.state.lock();
            if state.complete {
                return false;
            }
            if state.failure.is_none() {
                state.failure = Some(failure);
            }
        }
        self.try_end();
        true
    }

    /// Marks the synchronous body as returned.
    pub(crate) fn finish_running(&self) {
        self.state.lock().running = false;
        self.try_end();
    }

    pub(crate) fn create_handle(self: &Arc<Self>, count: usize, strict: bool) -> Result<Async> {
        if count < 1 {
            return Err(Error::invalid_argument("Async completion count must be > 0"));
        }
        let id = HandleId::next();
        let signal = Arc::new(ReleaseSignal::new());
        let failure = {
            let mut state = self.state.lock();
            if state.complete {
                return Err(Error::state("Test already completed"));
            }
            // A failed step does not wait for new work.
            if state.failure.is_none() {
                state.live.insert(id, Arc::clone(&signal));
            }
            state.failure.clone()
        };
        if failure.is_some() {
            signal.release(failure);
        }
        tracing::trace!(step = self.id, handle = %id, count, strict, "completion handle created");
        Ok(Async::new(id, count, strict, Arc::downgrade(self), signal))
    }

    pub(crate) fn handle_resolved(&self, id: HandleId, signal: &Arc<ReleaseSignal>) {
        let (removed, release_now) = {
            let mut state = self.state.lock();
            let removed = state.live.remove(&id).is_some();
            // A recorded failure is already final.
            let release_now = if state.complete || state.failure.is_some() {
                Some(state.failure.clone())
            } else {
                state.unreleased.push(Arc::clone(signal));
                None
            };
            (removed, release_now)
        };
        if removed {
            self.try_end();
        }
        if let Some(failure) = release_now {
            signal.release(failure);
        }
    }

    fn try_end(&self) {
        let (signals, failure, on_end, timer) = {
            let mut state = self.state.lock();
            let settled = state.live.is_empty() || state.failure.is_some();
            if state.complete || state.running || !settled {
                return;
            }
            state.complete = true;
            let mut signals: Vec<_> = state.live.drain().map(|(_, signal)| signal).collect();
            signals.append(&mut state.unreleased);
            (
                signals,
                state.failure.clone(),
                state.on_end.take(),
                state.timer.take(),
            )
        };
        drop(timer);

        for signal in signals {
            signal.release(failure.clone());
        }

        let result = TestResult::new(self.started.elapsed(), failure);
        tracing::debug!(
            step = self.id,
            elapsed_ms = result.elapsed_millis(),
            failed = result.failed(),
            "test step complete"
        );
        if let Some(on_end) = on_end {
            on_end(result);
        }
    }

    pub(crate) fn is_complete(&self) -> bool {
        self.state.lock().complete
    }

    pub(crate) fn phase(&self) -> StepPhase {
        let state = self.state.lock();
        if state.complete {
            StepPhase::Complete
        } else if state.running {
            StepPhase::Running
        } else {
            StepPhase::AwaitingAsync
        }
    }

    pub(crate) fn live_count(&self) -> usize {
        self.state.lock().live.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn step_with_channel(initial: Option<Failure>) -> (Arc<Step>, mpsc::Receiver<TestResult>) {
        let (tx, rx) = mpsc::channel();
        let step = Step::new(
            initial,
            Box::new(move |result| {
                tx.send(result).unwrap();
            }),
        );
        (step, rx)
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(StepPhase::Running.to_string(), "Running");
        assert_eq!(StepPhase::AwaitingAsync.to_string(), "AwaitingAsync");
        assert_eq!(StepPhase::Complete.to_string(), "Complete");
    }

    #[test]
    fn test_step_without_handles_ends_on_return() {
        let (step, rx) = step_with_channel(None);
        assert_eq!(step.phase(), StepPhase::Running);

        step.finish_running();

        assert_eq!(step.phase(), StepPhase::Complete);
        assert!(rx.try_recv().unwrap().succeeded());
    }

    #[test]
    fn test_step_waits_for_live_handles() {
        let (step, rx) = step_with_channel(None);
        let handle = step.create_handle(2, false).unwrap();
        step.finish_running();

        assert_eq!(step.phase(), StepPhase::AwaitingAsync);
        assert_eq!(step.live_count(), 1);
        assert!(rx.try_recv().is_err());

        handle.count_down().unwrap();
        assert!(rx.try_recv().is_err());
        handle.count_down().unwrap();

        assert!(rx.try_recv().unwrap().succeeded());
        assert_eq!(step.live_count(), 0);
        assert!(matches!(handle.outcome(), Some(Ok(()))));
    }

    #[test]
    fn test_failure_does_not_end_running_step() {
        let (step, rx) = step_with_channel(None);

        assert!(step.failed(Failure::assertion("early")));
        assert_eq!(step.phase(), StepPhase::Running);
        assert!(rx.try_recv().is_err());

        step.finish_running();
        assert_eq!(rx.try_recv().unwrap().failure().unwrap().message(), "early");
    }

    #[test]
    fn test_failure_ends_step_with_pending_handles() {
        let (step, rx) = step_with_channel(None);
        let handle = step.create_handle(1, false).unwrap();
        step.finish_running();

        assert!(step.failed(Failure::assertion("from callback")));

        let result = rx.try_recv().unwrap();
        assert_eq!(result.failure().unwrap().message(), "from callback");
        // The pending handle was released with the failure.
        let outcome = handle.outcome().unwrap();
        assert_eq!(outcome.unwrap_err().message(), "from callback");
    }

    #[test]
    fn test_first_failure_wins() {
        let (step, rx) = step_with_channel(None);

        step.failed(Failure::assertion("first"));
        step.failed(Failure::assertion("second"));
        step.finish_running();

        assert_eq!(rx.try_recv().unwrap().failure().unwrap().message(), "first");
        assert!(!step.failed(Failure::assertion("third")));
    }

    #[test]
    fn test_no_handles_after_completion() {
        let (step, _rx) = step_with_channel(None);
        step.finish_running();

        let err = step.create_handle(1, false).unwrap_err();
        assert_eq!(err, Error::state("Test already completed"));
    }

    #[test]
    fn test_invalid_count_rejected() {
        let (step, _rx) = step_with_channel(None);
        assert!(matches!(
            step.create_handle(0, false),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_initial_failure_is_kept() {
        let (step, rx) = step_with_channel(Some(Failure::assertion("setup failed")));
        let handle = step.create_handle(1, false).unwrap();

        // Handles created on a failed step are released immediately.
        assert_eq!(step.live_count(), 0);
        assert!(handle.outcome().unwrap().is_err());

        step.finish_running();
        assert_eq!(rx.try_recv().unwrap().failure().unwrap().message(), "setup failed");
    }

    #[test]
    fn test_resolved_handle_waits_for_final_outcome() {
        let (step, rx) = step_with_channel(None);
        let first = step.create_handle(1, false).unwrap();
        let second = step.create_handle(1, false).unwrap();
        step.finish_running();

        first.complete().unwrap();
        assert!(first.outcome().is_none());

        step.failed(Failure::assertion("later"));
        assert!(rx.try_recv().unwrap().failed());
        assert_eq!(first.outcome().unwrap().unwrap_err().message(), "later");
        assert_eq!(second.outcome().unwrap().unwrap_err().message(), "later");
    }

    #[test]
    fn test_strict_over_countdown_only_while_live() {
        let (step, rx) = step_with_channel(None);
        let strict = step.create_handle(1, true).unwrap();
        let other = step.create_handle(1, false).unwrap();

        strict.count_down().unwrap();
        assert_eq!(
            strict.count_down().unwrap_err(),
            Error::state("Countdown invoked more than once")
        );
        assert!(strict.complete().unwrap_err().is_state());

        step.finish_running();
        other.complete().unwrap();
        assert!(rx.try_recv().unwrap().succeeded());

        strict.count_down().unwrap();
        strict.complete().unwrap();
    }

    #[test]
    fn test_timeout_fails_step() {
        let watchdog = Watchdog::new();
        let (step, rx) = step_with_channel(None);
        let _handle = step.create_handle(1, false).unwrap();
        step.arm_timeout(&watchdog, Duration::from_millis(30)).unwrap();
        step.finish_running();

        let result = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(result.failure().unwrap().is_timeout());
        assert!(result.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_completion_disarms_timeout() {
        let watchdog = Watchdog::new();
        let (step, rx) = step_with_channel(None);
        step.arm_timeout(&watchdog, Duration::from_millis(20)).unwrap();
        assert_eq!(watchdog.pending_count(), 1);

        step.finish_running();

        assert!(rx.try_recv().unwrap().succeeded());
        assert_eq!(watchdog.pending_count(), 0);
        assert!(rx.recv_timeout(Duration::from_millis(60)).is_err());
    }

    #[test]
    fn test_unrepresentable_timeout_is_not_armed() {
        let watchdog = Watchdog::new();
        let (step, rx) = step_with_channel(None);
        step.arm_timeout(&watchdog, Duration::MAX).unwrap();
        assert_eq!(watchdog.pending_count(), 0);

        step.finish_running();
        assert!(rx.try_recv().unwrap().succeeded());
    }

    #[test]
    fn test_timeout_races_last_instant_completion() {
        let watchdog = Watchdog::new();
        for _ in 0..50 {
            let (step, rx) = step_with_channel(None);
            let handle = step.create_handle(1, false).unwrap();
            step.arm_timeout(&watchdog, Duration::from_millis(20)).unwrap();
            step.finish_running();

            let completer = std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                handle.complete().unwrap();
                handle
            });

            let result = rx.recv_timeout(Duration::from_secs(5)).unwrap();
            let handle = completer.join().unwrap();
            assert!(rx.recv_timeout(Duration::from_millis(30)).is_err());
            assert_eq!(step.phase(), StepPhase::Complete);

            // The handle was released with the same outcome the step ended with.
            match (result.failure(), handle.outcome().unwrap()) {
                (None, Ok(())) => {}
                (Some(failure), Err(released)) => {
                    assert!(failure.is_timeout());
                    assert!(released.is_timeout());
                }
                (failure, released) => {
                    panic!("inconsistent outcome: {failure:?} vs {released:?}")
                }
            }
        }
    }
}
