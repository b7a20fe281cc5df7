//! Synchronization primitives.
//!
//! `Mutex` and `Condvar` are used directly from [`std::sync`] — a `MutexGuard`'s
//! `Drop` impl already is the "scoped acquisition that guarantees release on every
//! exit path" this crate needs, so nothing is gained by wrapping it again. The one
//! primitive the standard library doesn't provide is a counting semaphore, hand-rolled
//! here the same way the mechanism it's modeled on builds one atop a mutex and a
//! condition variable.

use std::sync::{Condvar, Mutex};

/// A counting semaphore: `wait` decrements-or-blocks, `post` increments and wakes
/// one waiter.
#[derive(Debug)]
pub struct Semaphore {
    count: Mutex<usize>,
    cond: Condvar,
}

impl Semaphore {
    /// Creates a semaphore with an initial count.
    pub fn new(initial: usize) -> Self {
        Semaphore {
            count: Mutex::new(initial),
            cond: Condvar::new(),
        }
    }

    /// Blocks until the count is positive, then decrements it.
    pub fn wait(&self) {
        let mut count = self.count.lock().unwrap_or_else(|e| e.into_inner());
        while *count == 0 {
            count = self.cond.wait(count).unwrap_or_else(|e| e.into_inner());
        }
        *count -= 1;
    }

    /// Increments the count and wakes one waiter.
    pub fn post(&self) {
        let mut count = self.count.lock().unwrap_or_else(|e| e.into_inner());
        *count += 1;
        self.cond.notify_one();
    }

    /// Current count, for diagnostics and tests. Not meant to be used for
    /// correctness decisions (it's stale the instant it's read).
    pub fn available(&self) -> usize {
        *self.count.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn wait_decrements_and_post_increments() {
        let sem = Semaphore::new(2);
        sem.wait();
        assert_eq!(sem.available(), 1);
        sem.wait();
        assert_eq!(sem.available(), 0);
        sem.post();
        assert_eq!(sem.available(), 1);
    }

    #[test]
    fn wait_blocks_until_post() {
        let sem = Arc::new(Semaphore::new(0));
        let sem2 = Arc::clone(&sem);
        let handle = thread::spawn(move || {
            sem2.wait();
        });
        thread::sleep(Duration::from_millis(50));
        assert!(!handle.is_finished());
        sem.post();
        handle.join().unwrap();
    }
}
