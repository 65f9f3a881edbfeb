//! Cooperative cancellation shared between a stream and its consumer.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Cancellation flag that also interrupts pending sleeps.
///
/// Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct Cancellation {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    cancelled: Mutex<bool>,
    wakeup: Condvar,
}

impl Cancellation {
    /// Creates a new, not yet cancelled, handle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels, waking up every pending [`Cancellation::sleep`].
    pub fn cancel(&self) {
        *self.inner.cancelled.lock() = true;
        self.inner.wakeup.notify_all();
    }

    /// Returns true once cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.inner.cancelled.lock()
    }

    /// Sleeps for `duration`, returning early on cancellation.
    ///
    /// Returns true if the handle is cancelled.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let mut cancelled = self.inner.cancelled.lock();
        while !*cancelled {
            if self
                .inner
                .wakeup
                .wait_until(&mut cancelled, deadline)
                .timed_out()
            {
                break;
            }
        }
        *cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn sleep_runs_to_deadline_when_not_cancelled() {
        let cancellation = Cancellation::new();
        let started = Instant::now();
        assert!(!cancellation.sleep(Duration::from_millis(20)));
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn cancel_interrupts_sleep() {
        let cancellation = Cancellation::new();
        let remote = cancellation.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            remote.cancel();
        });

        let started = Instant::now();
        assert!(cancellation.sleep(Duration::from_secs(30)));
        assert!(started.elapsed() < Duration::from_secs(5));
        handle.join().unwrap();
    }

    #[test]
    fn sleep_after_cancel_returns_immediately() {
        let cancellation = Cancellation::new();
        cancellation.cancel();
        assert!(cancellation.is_cancelled());
        assert!(cancellation.sleep(Duration::from_secs(30)));
    }
}
