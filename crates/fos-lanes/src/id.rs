//! Task Identifiers
//!
//! Ids mix a random draw with the storage address of the payload so that
//! two items built back to back never share a value even if the RNG
//! repeats. Zero is reserved as "no task".

use std::fmt;

/// Opaque 64-bit task identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TaskId(u64);

impl TaskId {
    /// The "no task" sentinel. Waiting on it is an immediate no-op.
    pub const NONE: TaskId = TaskId(0);

    /// Wrap a raw id
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw value
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Check for the sentinel
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl From<TaskId> for u64 {
    fn from(id: TaskId) -> u64 {
        id.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Generate a fresh non-zero id for an item stored at `addr`
pub fn generate(addr: usize) -> TaskId {
    let raw = rand::random::<u64>().wrapping_add(addr as u64);
    if raw == 0 {
        TaskId(1)
    } else {
        TaskId(raw)
    }
}
