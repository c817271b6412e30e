//! Command-line interface definitions and parsing
//!
//! This module defines the CLI structure for retype using the `clap` crate.
//!
//! # Commands
//!
//! - **import**: Load elements from a JSON, CSV or plain text file
//! - **convert**: Change elements to a target type as one bulk operation
//! - **status**: Show one operation or list archived ones
//! - **rollback**: Undo a completed operation
//! - **rollbacks**: List or clean up rollback records
//! - **types**: List the types of the catalog
//! - **resolve**: Show the conversion path between two types

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::batch::options::parse_size;
use crate::batch::{BatchError, BatchOptions, BatchStrategy, ProcessingMode};
use crate::engine::{BulkOptions, InvalidItemPolicy};

/// Element input format for `import`
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputFormat {
    /// Pick from the file extension
    #[default]
    Auto,
    /// Array of `{"id", "type", "properties"}` objects
    Json,
    /// `id,type[,key=value...]` records
    Csv,
    /// `id type` per line
    Text,
}

/// Main CLI structure for parsing command-line arguments
#[derive(Parser, Debug)]
#[command(name = "retype")]
#[command(about = "Bulk type conversion with batching and rollback", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Suppress informational output (only print results)
    #[arg(short = 'q', long = "quiet", global = true)]
    pub quiet: bool,

    /// Enable debug logging
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,

    /// Store directory (overrides config)
    #[arg(long = "store", global = true, value_name = "DIR")]
    pub store: Option<PathBuf>,

    /// Type catalog file (overrides config)
    #[arg(long = "catalog", global = true, value_name = "FILE")]
    pub catalog: Option<PathBuf>,

    /// Configuration file to use instead of the default location
    #[arg(long = "config", global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

impl Cli {
    #[must_use]
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

/// Available CLI commands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Import elements into the store
    #[command(visible_alias = "i")]
    Import {
        /// Input file
        #[arg(value_name = "FILE")]
        input: PathBuf,

        /// Input format
        #[arg(long = "format", value_enum, default_value_t = InputFormat::Auto)]
        format: InputFormat,

        /// CSV field delimiter
        #[arg(long = "delimiter", default_value_t = ',')]
        delimiter: char,
    },

    /// Convert elements to a target type
    #[command(visible_alias = "c")]
    Convert {
        /// Type to convert to
        #[arg(value_name = "TARGET_TYPE")]
        target_type: String,

        /// Element ids to convert
        #[arg(value_name = "IDS")]
        ids: Vec<String>,

        /// Convert every element currently of this type
        #[arg(long = "from-type", value_name = "TYPE")]
        from_type: Option<String>,

        /// Read element ids from a file, one per line
        #[arg(long = "ids-file", value_name = "FILE")]
        ids_file: Option<PathBuf>,

        #[command(flatten)]
        bulk: BulkArgs,

        #[command(flatten)]
        batch: BatchArgs,

        /// Print the result as JSON
        #[arg(long = "json")]
        json: bool,
    },

    /// Show an operation, or list archived operations
    #[command(visible_alias = "s")]
    Status {
        /// Operation id
        #[arg(value_name = "OPERATION_ID")]
        operation_id: Option<String>,

        /// Print as JSON
        #[arg(long = "json")]
        json: bool,
    },

    /// Undo a completed operation
    Rollback {
        /// Operation id
        #[arg(value_name = "OPERATION_ID")]
        operation_id: String,

        /// Show what would be restored without restoring it
        #[arg(short = 'n', long = "dry-run")]
        dry_run: bool,

        /// Skip confirmation prompt
        #[arg(short = 'y', long = "yes")]
        yes: bool,
    },

    /// Manage rollback records
    Rollbacks {
        #[command(subcommand)]
        command: RollbackCommands,
    },

    /// List the types of the catalog
    Types,

    /// Show the conversion path between two types
    Resolve {
        #[arg(value_name = "FROM")]
        from: String,

        #[arg(value_name = "TO")]
        to: String,
    },
}

/// Rollback record management commands
#[derive(Subcommand, Debug, Clone)]
pub enum RollbackCommands {
    /// List rollback records with their status
    #[command(visible_alias = "ls")]
    List,

    /// Delete expired rollback records
    Cleanup {
        /// Skip confirmation prompt
        #[arg(short = 'y', long = "yes")]
        yes: bool,
    },
}

/// Operation-level flags of `convert`
#[derive(Args, Debug, Clone, Default)]
pub struct BulkArgs {
    /// Validate and preview without changing anything
    #[arg(short = 'n', long = "dry-run")]
    pub dry_run: bool,

    /// Skip confirmation prompt
    #[arg(short = 'y', long = "yes")]
    pub yes: bool,

    /// Do not validate conversions before executing
    #[arg(long = "no-validate")]
    pub no_validate: bool,

    /// Fail the whole operation if any element is invalid
    #[arg(long = "fail-fast")]
    pub fail_fast: bool,

    /// Do not record a rollback
    #[arg(long = "no-rollback")]
    pub no_rollback: bool,

    /// Use this operation id instead of a generated one
    #[arg(long = "operation-id", value_name = "ID")]
    pub operation_id: Option<String>,
}

/// Batch flags of `convert`; unset flags keep the configured defaults
#[derive(Args, Debug, Clone, Default)]
pub struct BatchArgs {
    /// Items per batch
    #[arg(short = 'b', long = "batch-size", value_name = "N")]
    pub batch_size: Option<usize>,

    /// Worker threads
    #[arg(short = 'w', long = "workers", value_name = "N")]
    pub workers: Option<usize>,

    /// Batch scheduling mode
    #[arg(long = "mode", value_enum)]
    pub mode: Option<ProcessingMode>,

    /// Batch sizing strategy
    #[arg(long = "strategy", value_enum)]
    pub strategy: Option<BatchStrategy>,

    /// Memory limit, e.g. "512 MiB"
    #[arg(long = "memory-limit", value_name = "SIZE")]
    pub memory_limit: Option<String>,

    /// Overall time budget in seconds
    #[arg(long = "timeout", value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Attempts per item
    #[arg(long = "retries", value_name = "N")]
    pub retries: Option<u32>,

    /// Base delay between attempts in milliseconds
    #[arg(long = "retry-delay", value_name = "MS")]
    pub retry_delay: Option<u64>,

    /// Record a checkpoint every N batches (0 disables)
    #[arg(long = "checkpoint-interval", value_name = "N")]
    pub checkpoint_interval: Option<usize>,

    /// Report results in input order
    #[arg(long = "preserve-order")]
    pub preserve_order: bool,
}

impl BatchArgs {
    /// Apply the flags that were given on top of `defaults`
    ///
    /// # Errors
    ///
    /// Returns `BatchError::InvalidOption` for an invalid size or a zero batch size.
    pub fn apply(&self, defaults: &BatchOptions) -> Result<BatchOptions, BatchError> {
        let mut options = defaults.clone();
        if let Some(size) = self.batch_size {
            if size == 0 {
                return Err(BatchError::InvalidOption("batch size must be at least 1".into()));
            }
            options.batch_size = size;
        }
        if let Some(workers) = self.workers {
            options.max_workers = workers;
        }
        if let Some(mode) = self.mode {
            options.processing_mode = mode;
        }
        if let Some(strategy) = self.strategy {
            options.batch_strategy = strategy;
        }
        if let Some(limit) = &self.memory_limit {
            options.memory_limit = parse_size(limit)?;
        }
        if let Some(secs) = self.timeout {
            options.timeout = Some(std::time::Duration::from_secs(secs));
        }
        if let Some(retries) = self.retries {
            options.retry_attempts = retries;
        }
        if let Some(ms) = self.retry_delay {
            options.retry_delay = std::time::Duration::from_millis(ms);
        }
        if let Some(interval) = self.checkpoint_interval {
            options.checkpoint_interval = interval;
        }
        options.preserve_order |= self.preserve_order;
        Ok(options)
    }
}

impl BulkArgs {
    /// Engine options for a run with the given batch options
    #[must_use]
    pub fn options(&self, batch: BatchOptions) -> BulkOptions {
        BulkOptions {
            validate_before_execution: !self.no_validate,
            invalid_items: if self.fail_fast {
                InvalidItemPolicy::FailFast
            } else {
                InvalidItemPolicy::SkipInvalid
            },
            dry_run: self.dry_run,
            enable_rollback: !self.no_rollback,
            rollback_ttl: None,
            batch,
            operation_id: self.operation_id.clone(),
        }
    }
}
