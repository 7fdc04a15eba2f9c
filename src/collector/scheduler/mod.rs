//! Run scheduling: FIFO queue, per-handle exclusivity and concurrency gate

pub mod cancel;
pub mod persistence;
pub mod run;
#[allow(clippy::module_inception)]
pub mod scheduler;

#[cfg(test)]
mod tests;

use thiserror::Error;
use uuid::Uuid;

pub use cancel::CancelToken;
pub use persistence::RunStore;
pub use run::{format_utc_z, Run, RunError, RunKind, RunRecord, TaskStatus};
pub use scheduler::{HandleState, RunExecutor, RunRef, Scheduler, SchedulerConfig, SchedulerSnapshot};

/// Errors raised by scheduler operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("handle must not be empty")]
    InvalidHandle,

    #[error("kind must be \"start\" or \"continue\", got {0:?}")]
    InvalidKind(String),

    #[error("account {0} already has an active run (Queued/Running)")]
    Conflict(String),

    #[error("max_concurrent must be at least 1, got {0}")]
    InvalidConcurrency(usize),

    #[error("run {0} is not tracked")]
    UnknownRun(Uuid),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
