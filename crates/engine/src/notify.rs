//! Idle wake-up for a single processor.
//!
//! A `Notifier` only reduces claim latency under low traffic. Wakes are not
//! counted: a `signal()` with nobody waiting is dropped, and a waiter that
//! misses one still re-polls when its timeout elapses.

use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

/// Why [`Notifier::wait`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeReason {
    Signalled,
    TimedOut,
    /// The notifier was closed; the waiter should stop.
    Closed,
}

#[derive(Debug, Default)]
struct WakeState {
    waiting: bool,
    woken: bool,
    closed: bool,
}

/// Condition-variable wake primitive with single-waiter semantics.
#[derive(Debug, Default)]
pub struct Notifier {
    state: Mutex<WakeState>,
    cond: Condvar,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, WakeState> {
        // Plain flags; a panic elsewhere cannot leave them inconsistent.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Block until signalled, closed, or `timeout` elapses.
    pub fn wait(&self, timeout: Duration) -> WakeReason {
        let mut state = self.lock();
        if state.closed {
            return WakeReason::Closed;
        }
        state.waiting = true;
        state.woken = false;

        let (mut state, _) = match self
            .cond
            .wait_timeout_while(state, timeout, |s| !s.woken && !s.closed)
        {
            Ok(result) => result,
            Err(poisoned) => poisoned.into_inner(),
        };

        state.waiting = false;
        if state.closed {
            WakeReason::Closed
        } else if std::mem::take(&mut state.woken) {
            WakeReason::Signalled
        } else {
            WakeReason::TimedOut
        }
    }

    /// Wake the waiter if there is one; otherwise a no-op.
    pub fn signal(&self) {
        let mut state = self.lock();
        if state.waiting && !state.woken {
            state.woken = true;
            self.cond.notify_one();
        }
    }

    /// Wake the waiter immediately and make every later `wait` return `Closed`.
    pub fn close(&self) {
        self.lock().closed = true;
        self.cond.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}
