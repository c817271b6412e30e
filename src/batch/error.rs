//! Batch processing errors

use thiserror::Error;

/// Failures raised by the processor itself rather than by per-item work
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BatchError {
    /// An isolated worker panicked; every item of its batch is reported with this error
    #[error("Worker for batch {batch_index} crashed: {reason}")]
    WorkerCrashed { batch_index: usize, reason: String },

    /// The overall time budget ran out before the item was started
    #[error("Time budget of {budget_ms} ms exceeded before the item was started")]
    TimeBudgetExceeded { budget_ms: u128 },

    /// Invalid size string or option value
    #[error("Invalid batch option: {0}")]
    InvalidOption(String),
}

impl From<BatchError> for String {
    fn from(error: BatchError) -> Self {
        error.to_string()
    }
}
