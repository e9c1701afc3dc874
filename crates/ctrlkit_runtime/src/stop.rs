//! Broadcast stop signal.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

struct Inner {
    stopped: Mutex<bool>,
    cond: Condvar,
}

/// A cloneable, one-shot stop signal shared by every thread of a controller.
///
/// Firing it wakes all current waiters; once fired it stays fired.
#[derive(Clone)]
pub struct StopSignal {
    inner: Arc<Inner>,
}

impl StopSignal {
    /// Creates an unfired signal.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                stopped: Mutex::new(false),
                cond: Condvar::new(),
            }),
        }
    }

    /// Fires the signal.
    pub fn stop(&self) {
        *self.inner.stopped.lock() = true;
        self.inner.cond.notify_all();
    }

    /// Returns true once the signal has fired.
    pub fn is_stopped(&self) -> bool {
        *self.inner.stopped.lock()
    }

    /// Blocks until the signal fires.
    pub fn wait(&self) {
        let mut stopped = self.inner.stopped.lock();
        while !*stopped {
            self.inner.cond.wait(&mut stopped);
        }
    }

    /// Blocks for at most `timeout`. Returns true if the signal fired.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut stopped = self.inner.stopped.lock();
        while !*stopped {
            if self.inner.cond.wait_until(&mut stopped, deadline).timed_out() {
                break;
            }
        }
        *stopped
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StopSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StopSignal")
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn wait_timeout_expires_when_not_stopped() {
        let stop = StopSignal::new();
        let start = Instant::now();
        assert!(!stop.wait_timeout(Duration::from_millis(20)));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn stop_wakes_every_waiter() {
        let stop = StopSignal::new();
        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let stop = stop.clone();
                thread::spawn(move || stop.wait())
            })
            .collect();

        thread::sleep(Duration::from_millis(20));
        stop.stop();
        for waiter in waiters {
            waiter.join().unwrap();
        }
        assert!(stop.is_stopped());
    }

    #[test]
    fn stays_fired() {
        let stop = StopSignal::new();
        stop.stop();
        assert!(stop.wait_timeout(Duration::from_secs(5)));
        stop.wait();
    }
}
