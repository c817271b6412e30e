//! Engine errors
//!
//! [`MutationError`] is the per-item failure raised while converting or
//! restoring one element; it ends up as text in a result's `errors` and never
//! fails a whole call. [`EngineError`] is for calls that cannot produce a
//! result at all: malformed requests, unknown operations and storage failures
//! before any item is processed.

use thiserror::Error;

use super::OperationStatus;
use crate::batch::BatchError;
use crate::progress::ProgressError;
use crate::rollback::RollbackError;
use crate::store::StoreError;

/// Failure to convert or restore a single element
#[derive(Debug, Error)]
pub enum MutationError {
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Element not found: {0}")]
    MissingElement(String),

    /// The element's type changed after the operation was planned
    #[error("Element '{element_id}' changed type: expected '{expected}', found '{found}'")]
    TypeChanged {
        element_id: String,
        expected: String,
        found: String,
    },

    #[error("No conversion path from '{from}' to '{to}'")]
    NoConversionPath { from: String, to: String },

    #[error("Rejected: {0}")]
    Rejected(String),

    #[error(transparent)]
    Batch(#[from] BatchError),
}

/// Errors that fail an engine call outright
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Unknown target type: {0}")]
    UnknownTargetType(String),

    #[error("No elements given")]
    EmptyRequest,

    #[error("Unknown operation: {0}")]
    UnknownOperation(String),

    #[error("Operation '{0}' already exists")]
    DuplicateOperation(String),

    #[error("Operation '{operation_id}' cannot move from {from} to {to}")]
    InvalidTransition {
        operation_id: String,
        from: OperationStatus,
        to: OperationStatus,
    },

    #[error("Operation '{0}' has no rollback record")]
    RollbackUnavailable(String),

    #[error("Rollback error: {0}")]
    Rollback(#[from] RollbackError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Progress error: {0}")]
    Progress(#[from] ProgressError),
}
