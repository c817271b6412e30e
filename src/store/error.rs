//! Storage-specific error types
//!
//! This module defines all error types that can occur while reading or
//! writing blobs through a [`DurableStore`](super::DurableStore).
//!
//! # Error Types
//!
//! - **`SledError`**: Errors from the underlying sled embedded database
//! - **`DecodeError`**: Failures when deserializing a blob
//! - **`EncodeError`**: Failures when serializing a value into a blob
//! - **`SerializeError`**: Keys that are not valid UTF-8

use thiserror::Error;

/// Storage-specific errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// Represents a sled database error
    #[error("Database error: {0}")]
    SledError(#[from] sled::Error),

    /// Represents a bincode decoding error
    #[error("Error while decoding data: {0}")]
    DecodeError(#[from] bincode::error::DecodeError),

    /// Represents a bincode encoding error
    #[error("Error while encoding data: {0}")]
    EncodeError(#[from] bincode::error::EncodeError),

    #[error("Error during serialization: {0}")]
    SerializeError(String),
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod error_tests;
