//! Scheduler errors

use crate::lane::Lane;

/// Scheduler error
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("scheduler is already initialized")]
    AlreadyInitialized,

    #[error("scheduler has been shut down")]
    ShutDown,

    #[error("failed to spawn {lane} lane thread: {source}")]
    Spawn {
        lane: Lane,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
