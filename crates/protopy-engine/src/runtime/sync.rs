//! Thread handles and locks exposed by the `_thread` module.

use std::time::Duration;

use crossbeam::channel::Receiver;
use parking_lot::{Condvar, Mutex};

use super::value::Value;

/// Outcome of a thread body: its return value or the exception it raised.
pub type ThreadOutcome = Result<Value, Value>;

/// A lock that is not tied to a guard's scope, so user code can acquire and
/// release it across calls.
#[derive(Debug, Default)]
pub struct UserLock {
    locked: Mutex<bool>,
    released: Condvar,
}

impl UserLock {
    /// Creates an unlocked lock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the lock. Without `blocking`, fails immediately when held;
    /// with a timeout, gives up after it elapses.
    pub fn acquire(&self, blocking: bool, timeout: Option<Duration>) -> bool {
        let mut locked = self.locked.lock();
        if !*locked {
            *locked = true;
            return true;
        }
        if !blocking {
            return false;
        }
        match timeout {
            Some(timeout) => {
                let deadline = std::time::Instant::now() + timeout;
                while *locked {
                    if self.released.wait_until(&mut locked, deadline).timed_out() {
                        return false;
                    }
                }
            }
            None => {
                while *locked {
                    self.released.wait(&mut locked);
                }
            }
        }
        *locked = true;
        true
    }

    /// Releases the lock. Returns false if it was not held.
    pub fn release(&self) -> bool {
        let mut locked = self.locked.lock();
        if !*locked {
            return false;
        }
        *locked = false;
        self.released.notify_one();
        true
    }

    /// Returns true while held.
    pub fn is_locked(&self) -> bool {
        *self.locked.lock()
    }
}

/// The joinable handle of a `_thread.start` thread.
#[derive(Debug)]
pub struct ThreadHandle {
    /// Delivers the outcome once
    pub receiver: Receiver<ThreadOutcome>,
    /// The outcome after the first join
    pub outcome: Option<ThreadOutcome>,
}

impl ThreadHandle {
    /// Creates a handle over `receiver`.
    pub fn new(receiver: Receiver<ThreadOutcome>) -> Self {
        Self { receiver, outcome: None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_lock_acquire_release() {
        let lock = UserLock::new();
        assert!(lock.acquire(true, None));
        assert!(lock.is_locked());
        assert!(!lock.acquire(false, None));
        assert!(!lock.acquire(true, Some(Duration::from_millis(5))));
        assert!(lock.release());
        assert!(!lock.release());
    }

    #[test]
    fn test_lock_hands_over_between_threads() {
        let lock = Arc::new(UserLock::new());
        assert!(lock.acquire(true, None));
        let other = Arc::clone(&lock);
        let waiter = std::thread::spawn(move || {
            let acquired = other.acquire(true, None);
            other.release();
            acquired
        });
        std::thread::sleep(Duration::from_millis(10));
        lock.release();
        assert!(waiter.join().unwrap());
    }
}
