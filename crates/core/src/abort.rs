//! Cross-thread cancellation.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A cloneable cancellation flag.
///
/// All clones observe the same flag. Once aborted, a signal stays aborted.
/// [`AbortSignal::sleep`] is interruptible: `abort()` wakes every sleeper.
#[derive(Clone, Debug, Default)]
pub struct AbortSignal {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    aborted: Mutex<bool>,
    wake: Condvar,
}

impl AbortSignal {
    /// Create a signal that is not aborted.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation and wake all sleepers.
    pub fn abort(&self) {
        *self.inner.aborted.lock() = true;
        self.inner.wake.notify_all();
    }

    /// Whether cancellation has been requested.
    pub fn is_aborted(&self) -> bool {
        *self.inner.aborted.lock()
    }

    /// Sleep for `duration` unless aborted first.
    ///
    /// Returns `true` if the signal was aborted before or during the sleep.
    /// A duration too large to turn into a deadline sleeps until aborted.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now().checked_add(duration);
        let mut aborted = self.inner.aborted.lock();
        while !*aborted {
            match deadline {
                Some(deadline) => {
                    if self.inner.wake.wait_until(&mut aborted, deadline).timed_out() {
                        break;
                    }
                }
                None => self.inner.wake.wait(&mut aborted),
            }
        }
        *aborted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_sleep_runs_full_duration_when_not_aborted() {
        let signal = AbortSignal::new();
        let started = Instant::now();
        assert!(!signal.sleep(Duration::from_millis(15)));
        assert!(started.elapsed() >= Duration::from_millis(15));
    }

    #[test]
    fn test_abort_interrupts_sleep() {
        let signal = AbortSignal::new();
        let sleeper = {
            let signal = signal.clone();
            thread::spawn(move || {
                let started = Instant::now();
                (signal.sleep(Duration::from_secs(30)), started.elapsed())
            })
        };

        thread::sleep(Duration::from_millis(20));
        signal.abort();

        let (aborted, elapsed) = sleeper.join().unwrap();
        assert!(aborted);
        assert!(elapsed < Duration::from_secs(10));
    }

    #[test]
    fn test_unbounded_sleep_ends_on_abort() {
        let signal = AbortSignal::new();
        let sleeper = {
            let signal = signal.clone();
            thread::spawn(move || signal.sleep(Duration::MAX))
        };

        thread::sleep(Duration::from_millis(20));
        signal.abort();
        assert!(sleeper.join().unwrap());
    }

    #[test]
    fn test_already_aborted_returns_immediately() {
        let signal = AbortSignal::new();
        signal.abort();
        assert!(signal.is_aborted());
        assert!(signal.sleep(Duration::from_secs(30)));
    }
}
