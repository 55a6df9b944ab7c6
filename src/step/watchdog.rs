//! A shared timeout watchdog.
//!
//! One background thread serves every armed deadline, ordered in a min-heap.
//! Arming returns a [`TimerGuard`]; dropping the guard cancels the deadline.
//! Callbacks run on the watchdog thread, so anything long-running they
//! trigger must move elsewhere or later deadlines are held up.

use std::cell::Cell;
use std::collections::{BinaryHeap, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Instant;

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::error::{Error, Result};

type Callback = Box<dyn FnOnce() + Send>;

/// Cancelled entries tolerated in the heap beyond twice the live ones.
const COMPACT_SLACK: usize = 64;

thread_local! {
    static ON_WATCHDOG: Cell<bool> = const { Cell::new(false) };
}

/// Returns `true` when called from a watchdog callback.
pub(crate) fn on_watchdog_thread() -> bool {
    ON_WATCHDOG.with(Cell::get)
}

/// A pending deadline in the watchdog queue.
#[derive(Debug)]
struct TimerEntry {
    deadline: Instant,
    id: u64,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.id == other.id
    }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Reversed: earliest deadline on top of the max-heap.
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.id.cmp(&self.id))
    }
}

#[derive(Default)]
struct TimerState {
    pending: BinaryHeap<TimerEntry>,
    /// Cancelling removes the callback; the heap entry is dropped lazily.
    callbacks: HashMap<u64, Callback>,
    next_id: u64,
    started: bool,
    shutdown: bool,
}

#[derive(Default)]
struct Inner {
    state: Mutex<TimerState>,
    wakeup: Condvar,
}

struct Shared {
    inner: Arc<Inner>,
}

impl Drop for Shared {
    fn drop(&mut self) {
        self.inner.state.lock().shutdown = true;
        self.inner.wakeup.notify_all();
    }
}

/// Fires callbacks when deadlines pass.
///
/// The background thread is started lazily on the first [`arm`] and exits
/// once the last clone of the watchdog is dropped.
///
/// [`arm`]: Watchdog::arm
#[derive(Clone)]
pub struct Watchdog {
    shared: Arc<Shared>,
}

impl Default for Watchdog {
    fn default() -> Self {
        Self::new()
    }
}

impl Watchdog {
    /// Creates a watchdog. No thread is started until a deadline is armed.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                inner: Arc::new(Inner::default()),
            }),
        }
    }

    /// Runs `callback` on the watchdog thread once `deadline` has passed,
    /// unless the returned guard is dropped first.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::State`] if the watchdog thread cannot be started.
    pub fn arm<F>(&self, deadline: Instant, callback: F) -> Result<TimerGuard>
    where
        F: FnOnce() + Send + 'static,
    {
        let inner = &self.shared.inner;
        let mut state = inner.state.lock();
        if !state.started {
            let worker = Arc::clone(inner);
            thread::Builder::new()
                .name("testkit-unit-watchdog".to_string())
                .spawn(move || run(&worker))
                .map_err(|err| Error::state(format!("failed to start watchdog thread: {err}")))?;
            state.started = true;
        }

        let id = state.next_id;
        state.next_id += 1;
        state.pending.push(TimerEntry { deadline, id });
        state.callbacks.insert(id, Box::new(callback));
        drop(state);

        inner.wakeup.notify_one();
        Ok(TimerGuard {
            id,
            inner: Arc::downgrade(inner),
        })
    }

    /// Returns the number of armed, uncancelled deadlines.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.shared.inner.state.lock().callbacks.len()
    }
}

/// Cancels its deadline when dropped.
#[must_use = "dropping the guard cancels the deadline"]
pub struct TimerGuard {
    id: u64,
    inner: Weak<Inner>,
}

impl TimerGuard {
    /// Cancels the deadline. Has no effect if it already fired.
    pub fn cancel(self) {}
}

impl Drop for TimerGuard {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            let mut state = inner.state.lock();
            state.callbacks.remove(&self.id);
            if state.pending.len() > state.callbacks.len() * 2 + COMPACT_SLACK {
                let TimerState {
                    pending, callbacks, ..
                } = &mut *state;
                pending.retain(|entry| callbacks.contains_key(&entry.id));
            }
        }
    }
}

fn run(inner: &Inner) {
    ON_WATCHDOG.with(|flag| flag.set(true));
    let mut state = inner.state.lock();
    loop {
        if state.shutdown {
            return;
        }
        match state.pending.peek().map(|entry| (entry.deadline, entry.id)) {
            None => inner.wakeup.wait(&mut state),
            Some((_, id)) if !state.callbacks.contains_key(&id) => {
                state.pending.pop();
            }
            Some((deadline, _)) if deadline <= Instant::now() => {
                let fired = state
                    .pending
                    .pop()
                    .and_then(|entry| state.callbacks.remove(&entry.id));
                if let Some(callback) = fired {
                    MutexGuard::unlocked(&mut state, || fire(callback));
                }
            }
            Some((deadline, _)) => {
                inner.wakeup.wait_until(&mut state, deadline);
            }
        }
    }
}

fn fire(callback: Callback) {
    if panic::catch_unwind(AssertUnwindSafe(callback)).is_err() {
        tracing::error!("watchdog callback panicked");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn test_timer_entry_ordering() {
        let now = Instant::now();
        let mut heap = BinaryHeap::new();
        heap.push(TimerEntry {
            deadline: now + Duration::from_millis(30),
            id: 0,
        });
        heap.push(TimerEntry {
            deadline: now + Duration::from_millis(10),
            id: 1,
        });
        heap.push(TimerEntry {
            deadline: now + Duration::from_millis(20),
            id: 2,
        });

        assert_eq!(heap.pop().unwrap().id, 1);
        assert_eq!(heap.pop().unwrap().id, 2);
        assert_eq!(heap.pop().unwrap().id, 0);
    }

    #[test]
    fn test_watchdog_fires_after_deadline() {
        let watchdog = Watchdog::new();
        let (tx, rx) = mpsc::channel();
        let start = Instant::now();

        let _guard = watchdog
            .arm(start + Duration::from_millis(30), move || {
                tx.send(Instant::now()).unwrap();
            })
            .unwrap();

        let fired_at = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(fired_at.duration_since(start) >= Duration::from_millis(30));
        assert_eq!(watchdog.pending_count(), 0);
    }

    #[test]
    fn test_watchdog_fires_in_deadline_order() {
        let watchdog = Watchdog::new();
        let (tx, rx) = mpsc::channel();
        let now = Instant::now();

        let guards: Vec<_> = [40u64, 10, 25]
            .into_iter()
            .map(|millis| {
                let tx = tx.clone();
                watchdog
                    .arm(now + Duration::from_millis(millis), move || {
                        tx.send(millis).unwrap();
                    })
                    .unwrap()
            })
            .collect();

        let order: Vec<u64> = (0..3)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        assert_eq!(order, vec![10, 25, 40]);
        drop(guards);
    }

    #[test]
    fn test_dropped_guard_cancels_deadline() {
        let watchdog = Watchdog::new();
        let (tx, rx) = mpsc::channel::<()>();

        let guard = watchdog
            .arm(Instant::now() + Duration::from_millis(20), move || {
                tx.send(()).unwrap();
            })
            .unwrap();
        assert_eq!(watchdog.pending_count(), 1);

        guard.cancel();
        assert_eq!(watchdog.pending_count(), 0);

        // The sender was dropped with the callback, nothing was sent.
        assert!(matches!(
            rx.recv_timeout(Duration::from_millis(100)),
            Err(mpsc::RecvTimeoutError::Disconnected)
        ));
    }

    #[test]
    fn test_cancelled_deadlines_are_compacted() {
        let watchdog = Watchdog::new();
        let far = Instant::now() + Duration::from_secs(120);

        let _live = watchdog.arm(far, || {}).unwrap();
        for _ in 0..1_000 {
            drop(watchdog.arm(far, || {}).unwrap());
        }

        assert_eq!(watchdog.pending_count(), 1);
        let queued = watchdog.shared.inner.state.lock().pending.len();
        assert!(queued <= 2 + COMPACT_SLACK, "{queued} entries left queued");
    }

    #[test]
    fn test_callbacks_know_they_run_on_watchdog() {
        let watchdog = Watchdog::new();
        let (tx, rx) = mpsc::channel();

        let _guard = watchdog
            .arm(Instant::now(), move || tx.send(on_watchdog_thread()).unwrap())
            .unwrap();

        assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap());
        assert!(!on_watchdog_thread());
    }

    #[test]
    fn test_panicking_callback_keeps_watchdog_alive() {
        let watchdog = Watchdog::new();
        let (tx, rx) = mpsc::channel();
        let now = Instant::now();

        let _first = watchdog
            .arm(now + Duration::from_millis(5), || panic!("callback failure"))
            .unwrap();
        let _second = watchdog
            .arm(now + Duration::from_millis(15), move || tx.send(()).unwrap())
            .unwrap();

        assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());
    }
}
