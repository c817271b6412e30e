//! Generic batch execution
//!
//! [`BatchProcessor`] splits an item list into chunks and runs caller-supplied
//! per-item work over them in one of the [`ProcessingMode`]s, with per-item
//! retry, periodic checkpoints and memory sampling. Item failures are
//! collected into the [`BatchResult`]; they never abort sibling items.

mod cancel;
mod error;
pub mod memory;
pub mod options;
pub mod processor;
pub mod result;
pub mod retry;

pub use cancel::CancellationFlag;
pub use error::BatchError;
pub use memory::{FixedProbe, MemoryProbe, SystemProbe};
pub use options::{BatchOptions, BatchStrategy, ProcessingMode};
pub use processor::{BatchProcessor, PressureRelief, ProgressFn};
pub use result::{BatchProgress, BatchResult, BatchStatistics, Checkpoint, ItemFailure};
pub use retry::{RetryOutcome, RetryPolicy};
