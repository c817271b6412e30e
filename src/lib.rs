//! Retype - bulk type conversion for stored elements
//!
//! Converts many elements to a new type in one tracked operation: conversion
//! paths are resolved against a type catalog, items are validated and then
//! processed in batches with retries, progress is published as the operation
//! runs, and every change can be undone through a persisted rollback record.

use thiserror::Error;

pub mod batch;
pub mod cli;
pub mod commands;
pub mod config;
pub mod conversion;
pub mod engine;
pub mod progress;
pub mod registry;
pub mod rollback;
pub mod store;
pub mod tasks;

#[cfg(test)]
pub mod testing;

/// Error enum, contains all failure states of the program
#[derive(Debug, Error)]
pub enum RetypeError {
    /// Storage error
    #[error("Storage error: {0}")]
    StoreError(#[from] store::StoreError),
    /// Type registry or catalog error
    #[error("Registry error: {0}")]
    RegistryError(#[from] registry::RegistryError),
    /// Invalid conversion rule
    #[error("Conversion error: {0}")]
    ConversionError(#[from] conversion::ConversionError),
    /// Invalid batch option
    #[error("Batch error: {0}")]
    BatchError(#[from] batch::BatchError),
    /// Progress tracking error
    #[error("Progress error: {0}")]
    ProgressError(#[from] progress::ProgressError),
    /// Rollback error
    #[error("Rollback error: {0}")]
    RollbackError(#[from] rollback::RollbackError),
    /// Bulk operation error
    #[error("{0}")]
    EngineError(#[from] engine::EngineError),
    /// Represents a configuration error
    #[error("Configuration error: {0}")]
    ConfigError(#[from] ::config::ConfigError),
    /// Represents an I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
    /// Invalid input error
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
