//! Scheduler error types.

use thiserror::Error;

use hermit_driver::DriverError;
use hermit_store::StoreError;

#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The submission queue is saturated; the caller should retry or
    /// apply admission control.
    #[error("task queue is full")]
    QueueFull,

    #[error("task not found: {0}")]
    NotFound(String),

    /// Kill of an already-terminated task.
    #[error("task {0} has already terminated")]
    IllegalState(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Driver(#[from] DriverError),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
