//! Ascending doubly-linked idle-connection timer list.
//!
//! Insertion scans forward from the head and places a new timer before the first
//! strictly-greater expiry (ties break by insertion order); `adjust` is a no-op
//! unless the timer's successor now expires no later, in which case the timer is
//! unlinked and re-inserted; `tick` walks from the head while timers are expired,
//! invoking each one's callback before removing it. Rather than a pointer-linked
//! list, this is an arena of nodes addressed by a `slab`-issued key, with
//! `prev`/`next` stored as `Option<usize>` indices — the same arena crate used for
//! the connection table (§9).

use slab::Slab;

/// Opaque handle to one timer in the list.
pub type TimerKey = usize;

struct Node<T> {
    expire: u64,
    data: T,
    prev: Option<TimerKey>,
    next: Option<TimerKey>,
}

/// An ascending doubly-linked list of expirations, keyed by absolute expiry (seconds).
pub struct TimerList<T> {
    nodes: Slab<Node<T>>,
    head: Option<TimerKey>,
    tail: Option<TimerKey>,
}

impl<T> Default for TimerList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TimerList<T> {
    pub fn new() -> Self {
        TimerList { nodes: Slab::new(), head: None, tail: None }
    }

    /// Inserts a new timer expiring at `expire`, returning its key.
    pub fn add(&mut self, expire: u64, data: T) -> TimerKey {
        let key = self.nodes.insert(Node { expire, data, prev: None, next: None });
        self.link_from_head(key, expire);
        key
    }

    /// Places `key` (already present in `nodes`, unlinked) into the list starting the
    /// scan from the head.
    fn link_from_head(&mut self, key: TimerKey, expire: u64) {
        match self.head {
            None => {
                self.head = Some(key);
                self.tail = Some(key);
            }
            Some(head) if expire < self.nodes[head].expire => {
                self.nodes[key].next = Some(head);
                self.nodes[head].prev = Some(key);
                self.nodes[key].prev = None;
                self.head = Some(key);
            }
            Some(head) => self.splice_after(key, head, expire),
        }
    }

    /// Scans forward from `from` for the first node whose expiry is `>=` the new
    /// timer's, inserting immediately before it (or at the tail if none is found).
    fn splice_after(&mut self, key: TimerKey, from: TimerKey, expire: u64) {
        let mut prev = from;
        let mut cursor = self.nodes[from].next;

        while let Some(cur) = cursor {
            if expire < self.nodes[cur].expire {
                break;
            }
            prev = cur;
            cursor = self.nodes[cur].next;
        }

        self.nodes[prev].next = Some(key);
        self.nodes[key].prev = Some(prev);

        match cursor {
            Some(cur) => {
                self.nodes[key].next = Some(cur);
                self.nodes[cur].prev = Some(key);
            }
            None => {
                self.nodes[key].next = None;
                self.tail = Some(key);
            }
        }
    }

    fn unlink(&mut self, key: TimerKey) {
        let (prev, next) = (self.nodes[key].prev, self.nodes[key].next);
        match prev {
            Some(p) => self.nodes[p].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.nodes[n].prev = prev,
            None => self.tail = prev,
        }
    }

    /// Updates a timer's expiry, re-splicing it later in the list if needed. A no-op
    /// if the timer has no successor, or its successor's expiry is still
    /// greater-or-equal to the new one.
    pub fn adjust(&mut self, key: TimerKey, new_expire: u64) {
        if !self.nodes.contains(key) {
            return;
        }
        self.nodes[key].expire = new_expire;

        match self.nodes[key].next {
            Some(next) if new_expire <= self.nodes[next].expire => return,
            None => return,
            Some(_) => {}
        }

        self.unlink(key);
        self.nodes[key].prev = None;
        self.nodes[key].next = None;
        self.link_from_head(key, new_expire);
    }

    /// Removes and discards a timer. A no-op (returning `None`) if the key is stale.
    pub fn delete(&mut self, key: TimerKey) -> Option<T> {
        if !self.nodes.contains(key) {
            return None;
        }
        self.unlink(key);
        Some(self.nodes.remove(key).data)
    }

    /// Invokes `callback` for every timer whose expiry is `<= now`, removing each as
    /// it fires. Returns whether any timer fired.
    pub fn tick(&mut self, now: u64, mut callback: impl FnMut(T)) -> bool {
        let mut fired = false;
        while let Some(head) = self.head {
            if self.nodes[head].expire > now {
                break;
            }
            fired = true;
            let next = self.nodes[head].next;
            self.head = next;
            match next {
                Some(n) => self.nodes[n].prev = None,
                None => self.tail = None,
            }
            let data = self.nodes.remove(head).data;
            callback(data);
        }
        fired
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expiries<T>(list: &TimerList<T>) -> Vec<u64> {
        let mut out = Vec::new();
        let mut cur = list.head;
        while let Some(k) = cur {
            out.push(list.nodes[k].expire);
            cur = list.nodes[k].next;
        }
        out
    }

    #[test]
    fn add_keeps_ascending_order() {
        let mut list = TimerList::new();
        list.add(30, 'c');
        list.add(10, 'a');
        list.add(20, 'b');
        assert_eq!(expiries(&list), vec![10, 20, 30]);
    }

    #[test]
    fn ties_break_by_insertion_order() {
        let mut list = TimerList::new();
        let first = list.add(10, "first");
        let second = list.add(10, "second");
        assert_eq!(list.nodes[first].next, Some(second));
    }

    #[test]
    fn adjust_resplices_past_a_stale_successor() {
        let mut list = TimerList::new();
        let a = list.add(10, 'a');
        list.add(20, 'b');
        list.add(30, 'c');
        list.adjust(a, 25);
        assert_eq!(expiries(&list), vec![20, 25, 30]);
    }

    #[test]
    fn adjust_is_noop_when_successor_still_later() {
        let mut list = TimerList::new();
        let a = list.add(10, 'a');
        list.add(20, 'b');
        list.adjust(a, 15);
        assert_eq!(expiries(&list), vec![15, 20]);
    }

    #[test]
    fn adjust_is_noop_when_successor_expiry_ties() {
        let mut list = TimerList::new();
        let a = list.add(10, 'a');
        let b = list.add(20, 'b');
        list.adjust(a, 20);
        assert_eq!(expiries(&list), vec![20, 20]);
        assert_eq!(list.head, Some(a), "a tie with the successor must not resplice");
        assert_eq!(list.nodes[a].next, Some(b));
    }

    #[test]
    fn adjust_on_tail_is_noop() {
        let mut list = TimerList::new();
        list.add(10, 'a');
        let b = list.add(20, 'b');
        list.adjust(b, 999);
        assert_eq!(expiries(&list), vec![10, 999]);
    }

    #[test]
    fn tick_fires_and_removes_expired_in_order() {
        let mut list = TimerList::new();
        list.add(10, 1);
        list.add(20, 2);
        list.add(30, 3);
        let mut fired = Vec::new();
        let did_work = list.tick(20, |v| fired.push(v));
        assert!(did_work);
        assert_eq!(fired, vec![1, 2]);
        assert_eq!(expiries(&list), vec![30]);
    }

    #[test]
    fn tick_on_empty_list_reports_no_work() {
        let mut list: TimerList<i32> = TimerList::new();
        assert!(!list.tick(100, |_| {}));
    }

    #[test]
    fn delete_unlinks_interior_node() {
        let mut list = TimerList::new();
        list.add(10, 'a');
        let b = list.add(20, 'b');
        list.add(30, 'c');
        list.delete(b);
        assert_eq!(expiries(&list), vec![10, 30]);
    }

    #[test]
    fn delete_is_noop_for_a_stale_key() {
        let mut list = TimerList::new();
        let a = list.add(10, 'a');
        list.delete(a);
        assert_eq!(list.delete(a), None);
    }
}
