//! Lane Queues
//!
//! The queue a lane drains, plus the drain-and-reinsert search `wait` uses
//! to pull a pending item to the front. The search only goes through the
//! [`LaneQueue`] trait, so any queue that can push at both ends and pop
//! from the front can back a lane.

use std::collections::VecDeque;

use crossbeam_utils::Backoff;
use parking_lot::Mutex;

use crate::id::TaskId;
use crate::work::WorkItem;

/// Unbounded concurrent FIFO of work items
pub trait LaneQueue: Send + Sync {
    /// Append to the tail
    fn push_back(&self, item: WorkItem);

    /// Insert at the head, ahead of everything queued
    fn push_front(&self, item: WorkItem);

    /// Pop the head without blocking
    ///
    /// May return `None` while items remain if the queue is contended.
    /// Callers that need a definite answer retry or use [`LaneQueue::pop`].
    fn try_pop(&self) -> Option<WorkItem>;

    /// Pop the head; `None` means the queue was empty
    fn pop(&self) -> Option<WorkItem>;

    /// Whether an item with `id` is queued
    fn contains(&self, id: TaskId) -> bool;

    /// Remove every queued item, oldest first
    fn drain_all(&self) -> Vec<WorkItem>;

    /// Number of queued items
    fn len(&self) -> usize;

    /// Check if empty
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Mutex-guarded deque
#[derive(Default)]
pub struct MutexDeque {
    items: Mutex<VecDeque<WorkItem>>,
}

impl MutexDeque {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }
}

impl std::fmt::Debug for MutexDeque {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutexDeque")
            .field("len", &self.len())
            .finish()
    }
}

impl LaneQueue for MutexDeque {
    fn push_back(&self, item: WorkItem) {
        self.items.lock().push_back(item);
    }

    fn push_front(&self, item: WorkItem) {
        self.items.lock().push_front(item);
    }

    fn try_pop(&self) -> Option<WorkItem> {
        self.items.try_lock()?.pop_front()
    }

    fn pop(&self) -> Option<WorkItem> {
        self.items.lock().pop_front()
    }

    fn contains(&self, id: TaskId) -> bool {
        self.items.lock().iter().any(|item| item.id() == id)
    }

    fn drain_all(&self) -> Vec<WorkItem> {
        self.items.lock().drain(..).collect()
    }

    fn len(&self) -> usize {
        self.items.lock().len()
    }
}

/// Pop with up to `retries` attempts, backing off between them
fn pop_with_budget(queue: &dyn LaneQueue, retries: u32) -> Option<WorkItem> {
    let backoff = Backoff::new();
    for _ in 0..retries {
        if let Some(item) = queue.try_pop() {
            return Some(item);
        }
        backoff.spin();
    }
    None
}

/// Find `id` in `queue` and move it to the head
///
/// Items popped ahead of the match go back to the head in their original
/// order, with the match in front of them. Items behind the match are never
/// touched. If `id` is not found every drained item is restored in order
/// and `false` is returned.
pub fn promote(queue: &dyn LaneQueue, id: TaskId, retries: u32) -> bool {
    let mut skipped = Vec::new();
    let mut found = None;

    while let Some(item) = pop_with_budget(queue, retries) {
        if item.id() == id {
            found = Some(item);
            break;
        }
        skipped.push(item);
    }

    for item in skipped.into_iter().rev() {
        queue.push_front(item);
    }

    match found {
        Some(item) => {
            queue.push_front(item);
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn ids(queue: &dyn LaneQueue) -> Vec<TaskId> {
        let mut out = Vec::new();
        let mut items = Vec::new();
        while let Some(item) = queue.pop() {
            out.push(item.id());
            items.push(item);
        }
        for item in items {
            queue.push_back(item);
        }
        out
    }

    fn fill(queue: &dyn LaneQueue, n: usize) -> Vec<TaskId> {
        (0..n)
            .map(|_| {
                let item = WorkItem::new(|| {});
                let id = item.id();
                queue.push_back(item);
                id
            })
            .collect()
    }

    /// Fails every other `try_pop` to simulate contention
    #[derive(Default)]
    struct FlakyQueue {
        inner: MutexDeque,
        calls: AtomicU32,
    }

    impl LaneQueue for FlakyQueue {
        fn push_back(&self, item: WorkItem) {
            self.inner.push_back(item)
        }
        fn push_front(&self, item: WorkItem) {
            self.inner.push_front(item)
        }
        fn try_pop(&self) -> Option<WorkItem> {
            if self.calls.fetch_add(1, Ordering::Relaxed) % 2 == 0 {
                return None;
            }
            self.inner.try_pop()
        }
        fn pop(&self) -> Option<WorkItem> {
            self.inner.pop()
        }
        fn contains(&self, id: TaskId) -> bool {
            self.inner.contains(id)
        }
        fn drain_all(&self) -> Vec<WorkItem> {
            self.inner.drain_all()
        }
        fn len(&self) -> usize {
            self.inner.len()
        }
    }

    #[test]
    fn test_fifo_order() {
        let queue = MutexDeque::new();
        let expected = fill(&queue, 5);
        assert_eq!(ids(&queue), expected);
        assert_eq!(queue.len(), 5);
    }

    #[test]
    fn test_push_front() {
        let queue = MutexDeque::new();
        let tail = fill(&queue, 2);
        let head = WorkItem::new(|| {});
        let head_id = head.id();
        queue.push_front(head);
        assert_eq!(ids(&queue), vec![head_id, tail[0], tail[1]]);
    }

    #[test]
    fn test_promote_moves_match_to_front() {
        let queue = MutexDeque::new();
        let order = fill(&queue, 5);

        assert!(promote(&queue, order[3], 8));
        assert_eq!(
            ids(&queue),
            vec![order[3], order[0], order[1], order[2], order[4]]
        );
    }

    #[test]
    fn test_promote_head_is_noop() {
        let queue = MutexDeque::new();
        let order = fill(&queue, 3);

        assert!(promote(&queue, order[0], 8));
        assert_eq!(ids(&queue), order);
    }

    #[test]
    fn test_promote_missing_restores_order() {
        let queue = MutexDeque::new();
        let order = fill(&queue, 4);

        assert!(!promote(&queue, TaskId::from_raw(12345), 8));
        assert_eq!(ids(&queue), order);
    }

    #[test]
    fn test_promote_empty_queue() {
        let queue = MutexDeque::new();
        assert!(!promote(&queue, TaskId::from_raw(1), 8));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_promote_survives_transient_failures() {
        let queue = FlakyQueue::default();
        let order = fill(&queue, 6);

        assert!(promote(&queue, order[5], 4));
        assert_eq!(ids(&queue)[0], order[5]);
        assert_eq!(queue.len(), 6);
    }

    #[test]
    fn test_promote_with_single_retry_gives_up_early() {
        // With one attempt per pop the first spurious failure ends the
        // search, which reads as "not found" and loses nothing.
        let queue = FlakyQueue::default();
        let order = fill(&queue, 3);

        assert!(!promote(&queue, order[2], 1));
        assert_eq!(ids(&queue), order);
    }

    #[test]
    fn test_contains_and_drain_all() {
        let queue = MutexDeque::new();
        let order = fill(&queue, 3);

        assert!(queue.contains(order[1]));
        assert!(!queue.contains(TaskId::from_raw(99)));
        let drained: Vec<TaskId> = queue.drain_all().iter().map(WorkItem::id).collect();
        assert_eq!(drained, order);
        assert!(queue.is_empty());
        assert!(!queue.contains(order[1]));
    }
}
