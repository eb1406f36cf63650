//! Wall-clock and monotonic time sources with cancellable sleeps.
//!
//! Capture ordering and replay timing use the monotonic source; persisted
//! timestamps use the wall clock. `CancelToken` is the cooperative
//! cancellation primitive shared by the replay engine, the capture engine
//! and the scheduler.

use chrono::{DateTime, Utc};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// Outcome of a cancellable sleep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepOutcome {
    /// The full duration elapsed.
    Elapsed,
    /// The token was cancelled before the duration elapsed.
    Cancelled,
}

/// Shared boolean + condvar. Cancellation is advisory: holders observe it
/// at their next check point or mid-sleep.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the flag and wake every sleeper.
    pub fn cancel(&self) {
        let (lock, cvar) = &*self.inner;
        let mut cancelled = lock.lock().unwrap();
        *cancelled = true;
        cvar.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.0.lock().unwrap()
    }

    /// Block for up to `duration`, waking early on cancellation.
    pub fn wait(&self, duration: Duration) -> SleepOutcome {
        let (lock, cvar) = &*self.inner;
        let deadline = Instant::now() + duration;
        let mut cancelled = lock.lock().unwrap();
        loop {
            if *cancelled {
                return SleepOutcome::Cancelled;
            }
            let now = Instant::now();
            if now >= deadline {
                return SleepOutcome::Elapsed;
            }
            let (guard, timeout) = cvar.wait_timeout(cancelled, deadline - now).unwrap();
            cancelled = guard;
            if timeout.timed_out() && !*cancelled {
                return SleepOutcome::Elapsed;
            }
        }
    }
}

/// Time source abstraction so the replay engine and scheduler can be driven
/// by a manual clock in tests.
pub trait Clock: Send + Sync {
    /// Wall-clock time, UTC. Used for persisted timestamps and trigger
    /// evaluation.
    fn now_wall(&self) -> DateTime<Utc>;

    /// Monotonic instant. Used for intra-recording ordering and replay
    /// delay arithmetic.
    fn now_mono(&self) -> Instant;

    /// Sleep for `duration`, waking early if `token` is cancelled.
    fn sleep(&self, duration: Duration, token: &CancelToken) -> SleepOutcome;
}

/// The process clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_wall(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn now_mono(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration, token: &CancelToken) -> SleepOutcome {
        token.wait(duration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn sleep_elapses_without_cancellation() {
        let clock = SystemClock;
        let token = CancelToken::new();
        let started = Instant::now();
        let outcome = clock.sleep(Duration::from_millis(20), &token);
        assert_eq!(outcome, SleepOutcome::Elapsed);
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn cancel_wakes_sleeper_early() {
        let clock = SystemClock;
        let token = CancelToken::new();
        let sleeper_token = token.clone();
        let handle = thread::spawn(move || {
            let started = Instant::now();
            let outcome = clock.sleep(Duration::from_secs(10), &sleeper_token);
            (outcome, started.elapsed())
        });
        thread::sleep(Duration::from_millis(30));
        token.cancel();
        let (outcome, elapsed) = handle.join().unwrap();
        assert_eq!(outcome, SleepOutcome::Cancelled);
        assert!(elapsed < Duration::from_secs(5));
    }

    #[test]
    fn already_cancelled_token_returns_immediately() {
        let clock = SystemClock;
        let token = CancelToken::new();
        token.cancel();
        assert_eq!(
            clock.sleep(Duration::from_secs(10), &token),
            SleepOutcome::Cancelled
        );
    }
}
