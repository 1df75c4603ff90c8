// Scheduler error types

use std::fmt;
use thiserror::Error;

/// Failures building a [`Scheduler`](super::Scheduler).
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("scheduler needs at least one lane")]
    NoLanes,

    #[error("scheduler must be created inside a Tokio runtime")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),

    #[error("failed to register scheduler metrics: {0}")]
    Metrics(#[from] prometheus::Error),
}

/// A rejected submission. The task is handed back so the caller can retry
/// or drop it.
#[derive(Error)]
pub enum SubmitError<T> {
    /// The lane's intake queue stayed full for the whole submit timeout.
    /// Recoverable: retry later or on another lane.
    #[error("timed out waiting for intake capacity")]
    Timeout(T),

    /// The scheduler has been cancelled. Terminal; retrying will not help.
    #[error("scheduler has been cancelled")]
    Cancelled(T),
}

impl<T> SubmitError<T> {
    /// Recover the task that was not accepted.
    pub fn into_inner(self) -> T {
        match self {
            SubmitError::Timeout(task) | SubmitError::Cancelled(task) => task,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, SubmitError::Timeout(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, SubmitError::Cancelled(_))
    }

    pub(crate) fn reason(&self) -> &'static str {
        match self {
            SubmitError::Timeout(_) => "timeout",
            SubmitError::Cancelled(_) => "cancelled",
        }
    }
}

// Tasks are opaque, so Debug never prints the payload.
impl<T> fmt::Debug for SubmitError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmitError::Timeout(_) => f.write_str("Timeout(..)"),
            SubmitError::Cancelled(_) => f.write_str("Cancelled(..)"),
        }
    }
}
