//! Progress tracking errors

use thiserror::Error;

use super::Phase;

/// Errors returned by the progress tracker
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProgressError {
    /// `start` was called for an id that is already tracked
    #[error("Operation '{0}' is already being tracked")]
    DuplicateOperation(String),

    /// The id has never been started or was purged
    #[error("Unknown operation: {0}")]
    UnknownOperation(String),

    /// The entry already reached a terminal phase
    #[error("Operation '{0}' has already finished")]
    AlreadyFinished(String),

    /// `complete` was called with a non-terminal phase
    #[error("Phase '{0}' is not a terminal phase")]
    NotTerminal(Phase),
}
