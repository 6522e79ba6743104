use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use crate::request::Request;

/// `(-priority_bid, arrival_time)` snapshotted at insertion. Never mutated
/// after the entry is pushed — priority aging, if ever wanted, is done by
/// re-pushing with a fresh key, not by rewriting this one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct QueueKey {
    neg_priority_bid: i64,
    arrival_bits: u64,
}

impl QueueKey {
    fn of(request: &Request) -> Self {
        Self {
            neg_priority_bid: -(request.priority_bid as i64),
            // arrival_time is always >= 0, so IEEE-754 bit order matches
            // numeric order here.
            arrival_bits: request.arrival_time.to_bits(),
        }
    }
}

impl PartialOrd for QueueKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.neg_priority_bid
            .cmp(&other.neg_priority_bid)
            .then_with(|| self.arrival_bits.cmp(&other.arrival_bits))
    }
}

#[derive(Debug, Clone)]
pub struct QueueEntry {
    key: QueueKey,
    pub request: Request,
}

impl QueueEntry {
    pub fn new(request: Request) -> Self {
        Self { key: QueueKey::of(&request), request }
    }
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}
impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; we want the smallest QueueKey (highest
        // bid, then oldest) to pop first, so the comparison is reversed.
        other.key.cmp(&self.key)
    }
}

/// Max-heap of admitted requests keyed by `(priority_bid desc, arrival_time
/// asc)`, mutex-guarded with a condvar signaled on push so the dispatcher
/// can block without busy-waiting.
pub struct PriorityQueue {
    inner: Mutex<BinaryHeap<QueueEntry>>,
    not_empty: Condvar,
}

impl PriorityQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(BinaryHeap::new()),
            not_empty: Condvar::new(),
        }
    }

    pub fn push(&self, entry: QueueEntry) {
        let mut heap = self.inner.lock().unwrap();
        heap.push(entry);
        self.not_empty.notify_one();
    }

    pub fn pop_max(&self) -> Option<QueueEntry> {
        self.inner.lock().unwrap().pop()
    }

    /// Blocks up to `timeout` for an entry to become available, returning
    /// `None` on timeout so the caller can re-check a shutdown flag.
    pub fn pop_max_blocking(&self, timeout: Duration) -> Option<QueueEntry> {
        let mut heap = self.inner.lock().unwrap();
        if heap.is_empty() {
            let (guard, _timed_out) = self
                .not_empty
                .wait_timeout_while(heap, timeout, |h| h.is_empty())
                .unwrap();
            heap = guard;
        }
        heap.pop()
    }

    /// Pops up to `max` further entries without blocking — used by the
    /// dispatcher's drain step after the batching window elapses.
    pub fn drain_up_to(&self, max: usize) -> Vec<QueueEntry> {
        let mut heap = self.inner.lock().unwrap();
        let mut drained = Vec::with_capacity(max.min(heap.len()));
        while drained.len() < max {
            match heap.pop() {
                Some(entry) => drained.push(entry),
                None => break,
            }
        }
        drained
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PriorityQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(tenant: &str, bid: u64, arrival: f64) -> Request {
        Request::new(None, tenant, 10, Some(50), Some(bid), arrival).unwrap()
    }

    #[test]
    fn higher_bid_pops_first() {
        let q = PriorityQueue::new();
        q.push(QueueEntry::new(req("low", 1, 0.0)));
        q.push(QueueEntry::new(req("high", 10, 1.0)));
        let first = q.pop_max().unwrap();
        assert_eq!(first.request.tenant_id, "high");
    }

    #[test]
    fn equal_bid_breaks_tie_by_arrival() {
        let q = PriorityQueue::new();
        q.push(QueueEntry::new(req("second", 5, 2.0)));
        q.push(QueueEntry::new(req("first", 5, 1.0)));
        assert_eq!(q.pop_max().unwrap().request.tenant_id, "first");
        assert_eq!(q.pop_max().unwrap().request.tenant_id, "second");
    }

    #[test]
    fn empty_queue_pop_is_none() {
        let q = PriorityQueue::new();
        assert!(q.pop_max().is_none());
    }

    #[test]
    fn drain_up_to_respects_cap_and_empties_gracefully() {
        let q = PriorityQueue::new();
        for i in 0..5 {
            q.push(QueueEntry::new(req("t", 1, i as f64)));
        }
        let drained = q.drain_up_to(3);
        assert_eq!(drained.len(), 3);
        assert_eq!(q.len(), 2);
        let rest = q.drain_up_to(10);
        assert_eq!(rest.len(), 2);
        assert!(q.is_empty());
    }
}
