//! Error types for scheduling and task execution

use std::any::Any;
use std::io;

/// Errors returned by the scheduling API.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("worker thread count must be positive, got {0}")]
    InvalidThreadCount(usize),
    #[error("batch size must be positive, got {0}")]
    InvalidBatchSize(usize),
    #[error("paired arrays differ in length: {left} vs {right}")]
    LengthMismatch { left: usize, right: usize },
    #[error("executor pool has been shut down")]
    ShutDown,
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] io::Error),
}

/// Failure of a single task body invocation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    #[error("task failed: {0}")]
    Failed(String),
    #[error("task panicked: {0}")]
    Panicked(String),
}

impl TaskError {
    /// Builds a `Panicked` error from a `catch_unwind` payload.
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        TaskError::Panicked(panic_message(payload.as_ref()))
    }
}

/// Extracts the message carried by a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
