//! fOS Lanes
//!
//! Two-lane background task scheduler.
//!
//! Two dedicated OS threads, a latency-critical lane and a background lane,
//! run fire-and-forget work submitted from any thread. A producer can later
//! block on one specific task; if that task is still queued it is promoted
//! to the head of its lane first.
//!
//! # Example
//! ```rust,no_run
//! use fos_lanes::{Lane, Scheduler, SchedulerConfig};
//!
//! let scheduler = Scheduler::new(SchedulerConfig::default())?;
//! scheduler.initialize_default()?;
//!
//! let id = scheduler.spawn(Lane::Background, || {
//!     // decode, compress, ...
//! });
//! scheduler.wait(Lane::Background, id, "thumbnail");
//! # Ok::<(), fos_lanes::SchedulerError>(())
//! ```

pub mod config;
pub mod error;
pub mod history;
pub mod id;
pub mod lane;
pub mod priority;
pub mod queue;
pub mod scheduler;
pub mod stats;
pub mod work;

pub use config::{LaneAffinity, SchedulerConfig};
pub use error::{Result, SchedulerError};
pub use history::HISTORY_LEN;
pub use id::TaskId;
pub use lane::Lane;
pub use priority::SchedulingClass;
pub use queue::{LaneQueue, MutexDeque};
pub use scheduler::Scheduler;
pub use stats::LaneStatsSnapshot;
pub use work::{TaskFn, WorkItem};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
