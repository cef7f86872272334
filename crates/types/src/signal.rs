//! One-shot signals, completion counters, and cancellation tokens.
//!
//! These are the blocking primitives the chunk pipeline is built on: a
//! chunk's durability and pending-fetch states are each a [`Signal`], an
//! owner that wants to be told when its batch of writes has landed hands
//! the store a [`Completion`], and Get-style operations accept a
//! [`CancelToken`] so a caller can detach without tearing anything down.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// Granularity of cancellation checks while blocked on a condvar.
const CANCEL_POLL: Duration = Duration::from_millis(10);

/// Outcome of a cancellable, bounded wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The signal fired.
    Fired,
    /// The deadline passed first.
    TimedOut,
    /// The caller's token was cancelled first.
    Cancelled,
}

/// A one-shot signal observable by any number of waiters.
///
/// Transitions unset → fired exactly once; firing again is a no-op.
#[derive(Debug, Default)]
pub struct Signal {
    fired: Mutex<bool>,
    cond: Condvar,
}

impl Signal {
    /// Create an unfired signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the signal, waking all current and future waiters.
    pub fn fire(&self) {
        let mut fired = self.fired.lock().expect("signal lock poisoned");
        *fired = true;
        self.cond.notify_all();
    }

    /// Whether the signal has fired.
    pub fn is_fired(&self) -> bool {
        *self.fired.lock().expect("signal lock poisoned")
    }

    /// Block until the signal fires.
    pub fn wait(&self) {
        let mut fired = self.fired.lock().expect("signal lock poisoned");
        while !*fired {
            fired = self.cond.wait(fired).expect("signal lock poisoned");
        }
    }

    /// Block until the signal fires or `timeout` passes.
    /// Returns true if the signal fired.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.wait_cancellable(timeout, None) == WaitOutcome::Fired
    }

    /// Block until the signal fires, `timeout` passes, or `cancel` trips.
    pub fn wait_cancellable(&self, timeout: Duration, cancel: Option<&CancelToken>) -> WaitOutcome {
        let deadline = Instant::now() + timeout;
        let mut fired = self.fired.lock().expect("signal lock poisoned");
        loop {
            if *fired {
                return WaitOutcome::Fired;
            }
            if let Some(token) = cancel {
                if token.is_cancelled() {
                    return WaitOutcome::Cancelled;
                }
            }
            let now = Instant::now();
            if now >= deadline {
                return WaitOutcome::TimedOut;
            }
            // Short slices so a cancellation is noticed promptly even though
            // nothing notifies the condvar for it.
            let slice = if cancel.is_some() {
                CANCEL_POLL.min(deadline - now)
            } else {
                deadline - now
            };
            let (guard, _) = self
                .cond
                .wait_timeout(fired, slice)
                .expect("signal lock poisoned");
            fired = guard;
        }
    }
}

/// A set-once counter an owner uses to wait for outstanding duties.
///
/// The store increments it when it takes responsibility for a durable
/// write and decrements it when the write has completed; `wait` returns
/// once the count drains to zero.
#[derive(Debug, Default)]
pub struct Completion {
    count: Mutex<u64>,
    cond: Condvar,
}

impl Completion {
    /// Create a drained counter.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Add `n` outstanding duties.
    pub fn add(&self, n: u64) {
        let mut count = self.count.lock().expect("completion lock poisoned");
        *count += n;
    }

    /// Mark one duty complete.
    ///
    /// # Panics
    ///
    /// Panics if the counter is already at zero.
    pub fn done(&self) {
        let mut count = self.count.lock().expect("completion lock poisoned");
        assert!(*count > 0, "completion counter underflow");
        *count -= 1;
        if *count == 0 {
            self.cond.notify_all();
        }
    }

    /// Current outstanding count.
    pub fn pending(&self) -> u64 {
        *self.count.lock().expect("completion lock poisoned")
    }

    /// Block until the count drains to zero.
    pub fn wait(&self) {
        let mut count = self.count.lock().expect("completion lock poisoned");
        while *count > 0 {
            count = self.cond.wait(count).expect("completion lock poisoned");
        }
    }

    /// Block until drained or `timeout` passes. Returns true if drained.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut count = self.count.lock().expect("completion lock poisoned");
        while *count > 0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self
                .cond
                .wait_timeout(count, deadline - now)
                .expect("completion lock poisoned");
            count = guard;
        }
        true
    }
}

/// Cancellation token for Get-style operations.
///
/// Cancelling detaches waiters; it does not cancel in-flight peer
/// requests, which other waiters may still want.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create an untripped token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Trip the token.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Whether the token has been tripped.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_signal_wakes_all_waiters() {
        let signal = Arc::new(Signal::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let signal = signal.clone();
                thread::spawn(move || signal.wait())
            })
            .collect();
        thread::sleep(Duration::from_millis(20));
        signal.fire();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(signal.is_fired());
    }

    #[test]
    fn test_signal_fire_is_idempotent() {
        let signal = Signal::new();
        signal.fire();
        signal.fire();
        assert!(signal.wait_timeout(Duration::from_millis(1)));
    }

    #[test]
    fn test_wait_timeout_expires() {
        let signal = Signal::new();
        assert!(!signal.wait_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn test_wait_observes_cancellation() {
        let signal = Arc::new(Signal::new());
        let token = CancelToken::new();
        let waiter = {
            let signal = signal.clone();
            let token = token.clone();
            thread::spawn(move || signal.wait_cancellable(Duration::from_secs(5), Some(&token)))
        };
        token.cancel();
        assert_eq!(waiter.join().unwrap(), WaitOutcome::Cancelled);
    }

    #[test]
    fn test_completion_drains() {
        let completion = Completion::new();
        completion.add(2);
        let waiter = {
            let completion = completion.clone();
            thread::spawn(move || completion.wait())
        };
        completion.done();
        assert_eq!(completion.pending(), 1);
        completion.done();
        waiter.join().unwrap();
        assert_eq!(completion.pending(), 0);
    }

    #[test]
    fn test_completion_wait_timeout() {
        let completion = Completion::new();
        completion.add(1);
        assert!(!completion.wait_timeout(Duration::from_millis(10)));
        completion.done();
        assert!(completion.wait_timeout(Duration::from_millis(10)));
    }

    #[test]
    #[should_panic(expected = "underflow")]
    fn test_completion_underflow_panics() {
        Completion::new().done();
    }
}
