//! Completion History
//!
//! Fixed ring of the most recently completed ids on a lane. Written only by
//! the lane thread, read by any thread.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::id::TaskId;

/// Number of completions remembered per lane
pub const HISTORY_LEN: usize = 8;

/// Ring of recently completed task ids
#[derive(Debug, Default)]
pub struct HistoryRing {
    slots: [AtomicU64; HISTORY_LEN],
    cursor: AtomicUsize,
}

impl HistoryRing {
    /// Create an empty ring
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a completion, overwriting the oldest slot
    ///
    /// Single writer only.
    pub fn push(&self, id: TaskId) {
        let cursor = self.cursor.load(Ordering::Relaxed);
        self.slots[cursor % HISTORY_LEN].store(id.get(), Ordering::Release);
        self.cursor.store(cursor.wrapping_add(1), Ordering::Release);
    }

    /// Whether `id` is among the last [`HISTORY_LEN`] completions
    pub fn contains(&self, id: TaskId) -> bool {
        if id.is_none() {
            return false;
        }
        self.slots
            .iter()
            .any(|slot| slot.load(Ordering::Acquire) == id.get())
    }

    /// Remembered ids, newest first
    pub fn recent(&self) -> Vec<TaskId> {
        let cursor = self.cursor.load(Ordering::Acquire);
        let count = cursor.min(HISTORY_LEN);
        (1..=count)
            .map(|back| {
                let slot = cursor.wrapping_sub(back) % HISTORY_LEN;
                TaskId::from_raw(self.slots[slot].load(Ordering::Acquire))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_ring() {
        let ring = HistoryRing::new();
        assert!(!ring.contains(TaskId::from_raw(1)));
        assert!(!ring.contains(TaskId::NONE));
        assert!(ring.recent().is_empty());
    }

    #[test]
    fn test_push_and_contains() {
        let ring = HistoryRing::new();
        ring.push(TaskId::from_raw(10));
        ring.push(TaskId::from_raw(20));
        assert!(ring.contains(TaskId::from_raw(10)));
        assert!(ring.contains(TaskId::from_raw(20)));
        assert_eq!(
            ring.recent(),
            vec![TaskId::from_raw(20), TaskId::from_raw(10)]
        );
    }

    #[test]
    fn test_oldest_entry_overwritten() {
        let ring = HistoryRing::new();
        for raw in 1..=(HISTORY_LEN as u64 + 1) {
            ring.push(TaskId::from_raw(raw));
        }

        assert!(!ring.contains(TaskId::from_raw(1)));
        for raw in 2..=(HISTORY_LEN as u64 + 1) {
            assert!(ring.contains(TaskId::from_raw(raw)));
        }
        assert_eq!(ring.recent().len(), HISTORY_LEN);
        assert_eq!(ring.recent()[0], TaskId::from_raw(HISTORY_LEN as u64 + 1));
    }
}
