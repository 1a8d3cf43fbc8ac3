//! Pool boundary errors
//!
//! Errors visible to submitters. Task-level failures (what a user function
//! reports about its own execution) live in [`crate::task::TaskFailure`].

use thiserror::Error;

use crate::task::TaskCategory;

/// Errors returned by the pool's public operations.
#[derive(Debug, Clone, Error)]
pub enum PoolError {
    /// Unknown function key or otherwise malformed submission.
    /// Rejected at submit time; the task is never enqueued.
    #[error("invalid task: {0}")]
    InvalidTask(String),

    /// The category queue is at its soft cap.
    #[error("queue full for category {0}")]
    QueueFull(TaskCategory),

    /// Submission arrived after `stop()` was called.
    #[error("pool is shutting down")]
    ShuttingDown,

    /// No result exists for the requested task ID.
    #[error("task not found: {0}")]
    NotFound(String),
}

impl PoolError {
    /// Stable machine-readable code, used by the HTTP layer.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidTask(_) => "invalid_task",
            Self::QueueFull(_) => "queue_full",
            Self::ShuttingDown => "pool_shutting_down",
            Self::NotFound(_) => "not_found",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(PoolError::InvalidTask("x".into()).code(), "invalid_task");
        assert_eq!(PoolError::QueueFull(TaskCategory::Scraping).code(), "queue_full");
        assert_eq!(PoolError::ShuttingDown.code(), "pool_shutting_down");
        assert_eq!(PoolError::NotFound("t-1".into()).code(), "not_found");
    }

    #[test]
    fn test_display() {
        let err = PoolError::InvalidTask("unknown function key".into());
        assert_eq!(err.to_string(), "invalid task: unknown function key");
    }
}
