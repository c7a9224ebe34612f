//! Lane Statistics

use std::sync::atomic::{AtomicU64, Ordering};

/// Per-lane counters
#[derive(Debug, Default)]
pub struct LaneStats {
    enqueued: AtomicU64,
    executed: AtomicU64,
    promoted: AtomicU64,
    cancelled: AtomicU64,
    panicked: AtomicU64,
}

impl LaneStats {
    pub(crate) fn record_enqueued(&self) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_executed(&self) {
        self.executed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_promoted(&self) {
        self.promoted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cancelled(&self, count: usize) {
        self.cancelled.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_panicked(&self) {
        self.panicked.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy the current counter values
    pub fn snapshot(&self) -> LaneStatsSnapshot {
        LaneStatsSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            executed: self.executed.load(Ordering::Relaxed),
            promoted: self.promoted.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            panicked: self.panicked.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time lane counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LaneStatsSnapshot {
    /// Items pushed onto the lane
    pub enqueued: u64,
    /// Items the lane ran to completion (panicked ones included)
    pub executed: u64,
    /// Successful deep-search promotions
    pub promoted: u64,
    /// Items discarded by `cancel_all`
    pub cancelled: u64,
    /// Payloads that panicked
    pub panicked: u64,
}

impl LaneStatsSnapshot {
    /// Items neither run nor cancelled yet
    pub fn outstanding(&self) -> u64 {
        self.enqueued.saturating_sub(self.executed + self.cancelled)
    }
}
