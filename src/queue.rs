//! Bounded blocking queue.
//!
//! Backed by a [`crossbeam_channel`] bounded channel, which already gives the
//! semantics this needs: [`BoundedQueue::push`] uses `try_send`, which fails
//! immediately without blocking when the channel is full; [`BoundedQueue::pop`]
//! uses the blocking `recv`, which parks the caller until an item is available
//! or every sender has been dropped. Producers never block; consumers always
//! block on empty.

use crossbeam_channel::{Receiver, Sender, TrySendError};

/// A fixed-capacity FIFO queue shared between producers and consumers.
#[derive(Debug, Clone)]
pub struct BoundedQueue<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
}

impl<T> BoundedQueue<T> {
    /// Creates a queue with the given fixed capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = crossbeam_channel::bounded(capacity);
        BoundedQueue { tx, rx }
    }

    /// Attempts to push an item. Returns `false` without blocking if the queue
    /// is full or if every receiver has been dropped.
    pub fn push(&self, item: T) -> bool {
        match self.tx.try_send(item) {
            Ok(()) => true,
            Err(TrySendError::Full(_) | TrySendError::Disconnected(_)) => false,
        }
    }

    /// Blocks until an item is available, or returns `None` once every sender
    /// has been dropped (the queue's shutdown signal).
    pub fn pop(&self) -> Option<T> {
        self.rx.recv().ok()
    }

    /// Current number of queued items.
    pub fn size(&self) -> usize {
        self.rx.len()
    }

    /// Configured capacity.
    pub fn capacity(&self) -> usize {
        self.tx.capacity().unwrap_or(0)
    }

    /// Drains all currently queued items without blocking.
    pub fn clear(&self) {
        while self.rx.try_recv().is_ok() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_succeeds_until_capacity_then_fails() {
        let q = BoundedQueue::new(2);
        assert!(q.push(1));
        assert!(q.push(2));
        assert!(!q.push(3));
        assert_eq!(q.size(), 2);
    }

    #[test]
    fn pop_returns_items_in_fifo_order() {
        let q = BoundedQueue::new(4);
        q.push("a");
        q.push("b");
        assert_eq!(q.pop(), Some("a"));
        assert_eq!(q.pop(), Some("b"));
    }

    #[test]
    fn clear_drains_without_blocking() {
        let q = BoundedQueue::new(4);
        q.push(1);
        q.push(2);
        q.clear();
        assert_eq!(q.size(), 0);
    }

    #[test]
    fn pop_returns_none_once_all_senders_dropped() {
        let q = BoundedQueue::<i32>::new(1);
        let rx = q.rx.clone();
        drop(q);
        assert_eq!(rx.recv().ok(), None);
    }
}
