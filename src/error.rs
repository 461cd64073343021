//! Dispatch error types

use thiserror::Error;

/// Errors that can occur while admitting or dispatching tasks
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("Invalid parallelism {parallelism}: must be at least 1")]
    Configuration { parallelism: usize },

    #[error("Submission rejected: {reason}")]
    SubmissionRejected { reason: String },

    #[error("Interrupted while waiting for a permit")]
    InterruptedWhileWaiting,

    #[error("No tokio runtime available to host the scheduler")]
    NoRuntime,

    #[error("Task was dropped before it completed")]
    TaskDropped,
}

impl DispatchError {
    /// Build a rejection with the given reason
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::SubmissionRejected { reason: reason.into() }
    }

    /// Check if this is a delegate rejection
    pub fn is_rejection(&self) -> bool {
        matches!(self, DispatchError::SubmissionRejected { .. })
    }

    /// Check if this error is a caller-side cancellation
    pub fn is_interrupted(&self) -> bool {
        matches!(self, DispatchError::InterruptedWhileWaiting)
    }
}

/// Validate a parallelism bound
pub(crate) fn check_parallelism(parallelism: usize) -> Result<usize, DispatchError> {
    if parallelism == 0 {
        return Err(DispatchError::Configuration { parallelism });
    }
    Ok(parallelism)
}
