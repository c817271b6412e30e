//! Rollback errors
//!
//! These cover refusing to run a rollback and storage failures. A step that
//! fails during replay is not an error here: it is recorded in the
//! `RollbackState` and degrades the status to `partial` or `failed`.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum RollbackError {
    #[error("Rollback operation not found: {0}")]
    NotFound(String),

    #[error("Rollback operation '{rollback_id}' expired at {expired_at}")]
    Expired {
        rollback_id: String,
        expired_at: DateTime<Utc>,
    },

    #[error("Rollback operation '{0}' has no steps")]
    Empty(String),

    /// A completed rollback is never replayed again
    #[error("Rollback operation '{0}' has already completed")]
    AlreadyCompleted(String),

    #[error("Rollback operation '{0}' is already executing")]
    InProgress(String),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}
