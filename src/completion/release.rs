//! Release signals: how a handle learns the final outcome of its test.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use futures::future::FusedFuture;
use parking_lot::Mutex;

use crate::error::Failure;

/// Outcome delivered to a released handle.
pub type ReleaseOutcome = std::result::Result<(), Failure>;

/// Per-handle bookkeeping record held in a step's live set.
#[derive(Default)]
pub(crate) struct ReleaseSignal {
    state: Mutex<ReleaseState>,
}

#[derive(Default)]
struct ReleaseState {
    outcome: Option<ReleaseOutcome>,
    wakers: Vec<Waker>,
}

impl ReleaseSignal {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Delivers the outcome. Only the first call has an effect.
    pub(crate) fn release(&self, failure: Option<Failure>) {
        let wakers = {
            let mut state = self.state.lock();
            if state.outcome.is_some() {
                return;
            }
            state.outcome = Some(failure.map_or(Ok(()), Err));
            std::mem::take(&mut state.wakers)
        };
        for waker in wakers {
            waker.wake();
        }
    }

    pub(crate) fn outcome(&self) -> Option<ReleaseOutcome> {
        self.state.lock().outcome.clone()
    }

    fn poll_outcome(&self, cx: &mut Context<'_>) -> Poll<ReleaseOutcome> {
        let mut state = self.state.lock();
        match &state.outcome {
            Some(outcome) => Poll::Ready(outcome.clone()),
            None => {
                if !state.wakers.iter().any(|w| w.will_wake(cx.waker())) {
                    state.wakers.push(cx.waker().clone());
                }
                Poll::Pending
            }
        }
    }
}

/// A future resolving once a handle has been released.
///
/// Resolves to `Ok(())` when the test passed, or to the test's failure. The
/// outcome is always the final one: a handle that finished while its test
/// was still undecided is released when the test ends.
///
/// Created by [`Async::released`](crate::completion::Async::released).
#[must_use = "futures do nothing unless polled"]
pub struct Release {
    signal: Arc<ReleaseSignal>,
    done: bool,
}

impl Release {
    pub(crate) fn new(signal: Arc<ReleaseSignal>) -> Self {
        Self {
            signal,
            done: false,
        }
    }
}

impl Future for Release {
    type Output = ReleaseOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let poll = self.signal.poll_outcome(cx);
        if poll.is_ready() {
            self.done = true;
        }
        poll
    }
}

impl FusedFuture for Release {
    fn is_terminated(&self) -> bool {
        self.done
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_release_signal_first_outcome_wins() {
        let signal = ReleaseSignal::new();
        assert!(signal.outcome().is_none());

        signal.release(Some(Failure::assertion("first")));
        signal.release(None);

        let failure = signal.outcome().unwrap().unwrap_err();
        assert_eq!(failure.message(), "first");
    }

    #[test]
    fn test_release_pending_until_released() {
        let signal = Arc::new(ReleaseSignal::new());
        let mut release = Release::new(Arc::clone(&signal));
        let waker = futures::task::noop_waker();
        let mut cx = Context::from_waker(&waker);

        assert!(Pin::new(&mut release).poll(&mut cx).is_pending());
        assert!(!release.is_terminated());

        signal.release(None);

        assert!(matches!(
            Pin::new(&mut release).poll(&mut cx),
            Poll::Ready(Ok(()))
        ));
        assert!(release.is_terminated());
    }

    #[test]
    fn test_release_wakes_from_other_thread() {
        let signal = Arc::new(ReleaseSignal::new());
        let release = Release::new(Arc::clone(&signal));

        let releaser = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(10));
            signal.release(Some(Failure::assertion("late")));
        });

        let outcome = futures::executor::block_on(release);
        releaser.join().unwrap();
        assert_eq!(outcome.unwrap_err().message(), "late");
    }
}
