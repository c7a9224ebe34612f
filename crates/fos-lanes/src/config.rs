//! Scheduler Configuration

use std::time::Duration;

use serde::Deserialize;

use crate::error::{Result, SchedulerError};

/// Scheduler configuration options
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Attempts per `try_pop` during a deep search before the queue is
    /// considered exhausted
    pub deep_search_retries: u32,

    /// Spins a blocked `wait` performs between re-waking the lane
    pub rewake_interval: u32,

    /// Sleep between polls in `wait_for_all`
    pub drain_poll_interval: Duration,

    /// Lane threads are named `{prefix}-critical` / `{prefix}-background`
    pub thread_name_prefix: String,

    /// Raise and lower lane thread priority around drains
    pub priority_control: bool,

    /// Worker stack size used by `initialize_default` (bytes)
    pub stack_size: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            deep_search_retries: 64,
            rewake_interval: 1024,
            drain_poll_interval: Duration::from_millis(1),
            thread_name_prefix: "fos-lane".to_string(),
            priority_control: true,
            stack_size: 2 * 1024 * 1024, // 2MB
        }
    }
}

impl SchedulerConfig {
    /// Set the deep-search retry budget
    pub fn with_deep_search_retries(mut self, retries: u32) -> Self {
        self.deep_search_retries = retries;
        self
    }

    /// Set the number of spins between re-wakes while waiting
    pub fn with_rewake_interval(mut self, spins: u32) -> Self {
        self.rewake_interval = spins;
        self
    }

    /// Set the `wait_for_all` poll interval
    pub fn with_drain_poll_interval(mut self, interval: Duration) -> Self {
        self.drain_poll_interval = interval;
        self
    }

    /// Set the thread name prefix
    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Enable or disable OS priority changes
    pub fn with_priority_control(mut self, enabled: bool) -> Self {
        self.priority_control = enabled;
        self
    }

    /// Set the default worker stack size
    pub fn with_stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = bytes;
        self
    }

    /// Reject values the lanes cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.deep_search_retries == 0 {
            return Err(SchedulerError::InvalidConfig(
                "deep_search_retries must be at least 1".to_string(),
            ));
        }
        if self.rewake_interval == 0 {
            return Err(SchedulerError::InvalidConfig(
                "rewake_interval must be at least 1".to_string(),
            ));
        }
        if self.stack_size == 0 {
            return Err(SchedulerError::InvalidConfig(
                "stack_size must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Optional core pinning for each lane thread
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct LaneAffinity {
    /// Core index for the critical lane
    pub critical: Option<usize>,
    /// Core index for the background lane
    pub background: Option<usize>,
}

impl LaneAffinity {
    /// Leave both threads to the OS scheduler
    pub fn unpinned() -> Self {
        Self::default()
    }

    /// Pin each lane to its own core
    pub fn pinned(critical: usize, background: usize) -> Self {
        Self {
            critical: Some(critical),
            background: Some(background),
        }
    }
}
