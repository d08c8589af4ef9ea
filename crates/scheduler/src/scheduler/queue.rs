//! Ordering structure: the thread-safe container of not-yet-dispatched tasks.
//!
//! The scheduler only relies on the [`TaskQueue`] contract: `dequeue` yields
//! the numerically greatest priority, and among equal priorities the lowest
//! sequence number. [`PriorityQueue`] is the default binary-heap implementation.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::task::WorkItem;
use super::types::TaskHeader;

/// Contract for the ordering structure. All methods may be called
/// concurrently from any thread.
pub trait TaskQueue: Send + Sync {
    /// Insert an item. Its position is determined by its header.
    fn enqueue(&self, item: WorkItem);

    /// Remove and return the highest-priority, earliest-submitted item.
    fn dequeue(&self) -> Option<WorkItem>;

    /// Header of the item `dequeue` would return next, without removing it.
    fn peek(&self) -> Option<TaskHeader>;

    /// Remove every item, returning them so the caller can settle its accounting.
    fn clear(&self) -> Vec<WorkItem>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Heap entry ordered by `(priority desc, sequence asc)`.
struct Entry(WorkItem);

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap: greater priority first, then earlier sequence.
        // Adding 0.0 folds -0.0 into +0.0, which `total_cmp` would otherwise rank lower.
        (self.0.priority() + 0.0)
            .total_cmp(&(other.0.priority() + 0.0))
            .then_with(|| other.0.sequence().cmp(&self.0.sequence()))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Entry {}

/// Mutex-guarded binary heap.
#[derive(Default)]
pub struct PriorityQueue {
    heap: Mutex<BinaryHeap<Entry>>,
}

impl PriorityQueue {
    pub fn new() -> Self {
        Self::default()
    }

    // Heap operations never run caller code, so a poisoned lock still guards a valid heap.
    fn heap(&self) -> MutexGuard<'_, BinaryHeap<Entry>> {
        self.heap.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl TaskQueue for PriorityQueue {
    fn enqueue(&self, item: WorkItem) {
        self.heap().push(Entry(item));
    }

    fn dequeue(&self) -> Option<WorkItem> {
        self.heap().pop().map(|entry| entry.0)
    }

    fn peek(&self) -> Option<TaskHeader> {
        self.heap().peek().map(|entry| entry.0.header())
    }

    fn clear(&self) -> Vec<WorkItem> {
        self.heap().drain().map(|entry| entry.0).collect()
    }

    fn len(&self) -> usize {
        self.heap().len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;
    use crate::scheduler::task::work_item;

    fn drain_order(queue: &PriorityQueue) -> Vec<(f64, u64)> {
        std::iter::from_fn(|| queue.dequeue())
            .map(|item| (item.priority(), item.sequence()))
            .collect()
    }

    #[test]
    fn higher_priority_first_fifo_on_ties() {
        let queue = PriorityQueue::new();
        for (seq, priority) in [10.0, 5.0, 10.0, 1.0].into_iter().enumerate() {
            queue.enqueue(work_item(seq as u64, priority, 8.0));
        }

        assert_eq!(
            drain_order(&queue),
            vec![(10.0, 0), (10.0, 2), (5.0, 1), (1.0, 3)]
        );
        assert!(queue.dequeue().is_none());
    }

    #[test]
    fn fractional_and_negative_priorities() {
        let queue = PriorityQueue::new();
        queue.enqueue(work_item(0, -2.5, 0.0));
        queue.enqueue(work_item(1, 0.25, 0.0));
        queue.enqueue(work_item(2, 0.5, 0.0));
        queue.enqueue(work_item(3, -2.5, 0.0));

        assert_eq!(
            drain_order(&queue),
            vec![(0.5, 2), (0.25, 1), (-2.5, 0), (-2.5, 3)]
        );
    }

    #[test]
    fn signed_zeros_are_equal_priorities() {
        let queue = PriorityQueue::new();
        queue.enqueue(work_item(0, -0.0, 1.0));
        queue.enqueue(work_item(1, 0.0, 1.0));
        queue.enqueue(work_item(2, -0.0, 1.0));

        assert_eq!(queue.peek().unwrap().sequence, 0);
        let order: Vec<u64> = drain_order(&queue).into_iter().map(|(_, seq)| seq).collect();
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[test]
    fn peek_does_not_remove() {
        let queue = PriorityQueue::new();
        assert!(queue.peek().is_none());

        queue.enqueue(work_item(0, 1.0, 5.0));
        queue.enqueue(work_item(1, 7.0, 5.0));

        let head = queue.peek().unwrap();
        assert_eq!(head.sequence, 1);
        assert!(head.class.is_critical());
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.dequeue().unwrap().sequence(), 1);
    }

    #[test]
    fn clear_returns_everything() {
        let queue = PriorityQueue::new();
        for seq in 0..5 {
            queue.enqueue(work_item(seq, seq as f64, 3.0));
        }

        let drained = queue.clear();
        assert_eq!(drained.len(), 5);
        assert!(queue.is_empty());
        assert!(queue.clear().is_empty());
    }

    #[test]
    fn concurrent_enqueue_preserves_order() {
        let queue = Arc::new(PriorityQueue::new());
        let handles: Vec<_> = (0..4u64)
            .map(|t| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for i in 0..250u64 {
                        let seq = t * 1000 + i;
                        queue.enqueue(work_item(seq, (i % 7) as f64, 100.0));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let order = drain_order(&queue);
        assert_eq!(order.len(), 1000);
        for pair in order.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            assert!(a.0 > b.0 || (a.0 == b.0 && a.1 < b.1), "{a:?} before {b:?}");
        }
    }
}
