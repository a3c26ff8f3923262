//! Interruptible waits shared between a coordinator and its drivers.

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// One-shot cancellation flag that wakes every sleeper when raised.
pub struct CancelSignal {
    cancelled: Mutex<bool>,
    raised: Condvar,
}

impl CancelSignal {
    /// Create a signal that has not been raised.
    pub fn new() -> Self {
        Self {
            cancelled: Mutex::new(false),
            raised: Condvar::new(),
        }
    }

    /// Raise the signal; idempotent.
    pub fn cancel(&self) {
        let mut guard = self.cancelled.lock().expect("cancel mutex poisoned");
        *guard = true;
        self.raised.notify_all();
    }

    /// Whether `cancel` has been called.
    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.lock().expect("cancel mutex poisoned")
    }

    /// Sleep for `duration` unless cancelled first.
    ///
    /// Returns true if the wait was interrupted by `cancel`.
    pub fn wait_timeout(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let mut guard = self.cancelled.lock().expect("cancel mutex poisoned");
        loop {
            if *guard {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            // Spurious wakeups loop back and re-check both conditions.
            let (next, _) = self
                .raised
                .wait_timeout(guard, deadline - now)
                .expect("condvar wait failed");
            guard = next;
        }
    }
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}
