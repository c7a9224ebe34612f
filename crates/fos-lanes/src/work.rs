//! Work Items

use std::fmt;

use crate::id::{self, TaskId};

/// Task function type
pub type TaskFn = Box<dyn FnOnce() + Send + 'static>;

/// A unit of work submitted to a lane
///
/// Move-only. The payload runs at most once: either a lane executes it or
/// `cancel_all` drops it unrun.
pub struct WorkItem {
    id: TaskId,
    payload: TaskFn,
}

impl WorkItem {
    /// Box `f` and derive its id from the boxed storage
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let payload: TaskFn = Box::new(f);
        let addr = &*payload as *const (dyn FnOnce() + Send) as *const () as usize;
        Self {
            id: id::generate(addr),
            payload,
        }
    }

    /// Task id
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Consume the item and run its payload
    pub fn run(self) {
        (self.payload)();
    }
}

impl fmt::Debug for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkItem").field("id", &self.id).finish()
    }
}
