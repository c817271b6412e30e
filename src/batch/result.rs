//! Aggregate outcome of a batch run

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An item whose work failed after every retry
#[derive(Debug, Clone)]
pub struct ItemFailure<T, E> {
    pub item: T,
    pub error: E,
    pub attempts: u32,
}

/// Progress snapshot taken every `checkpoint_interval` batches
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub batch_index: usize,
    pub timestamp: DateTime<Utc>,
    pub processed: usize,
    pub successful: usize,
    pub failed: usize,
}

/// Running statistics, recalculated after every batch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchStatistics {
    pub total_batches: usize,
    pub completed_batches: usize,
    pub effective_batch_size: usize,
    pub workers: usize,
    /// Items per second
    pub processing_rate: f64,
    pub estimated_time_remaining: Option<Duration>,
    pub elapsed: Duration,
    pub memory_samples: usize,
    pub peak_memory: Option<u64>,
    /// Largest amount by which a sample exceeded the memory limit
    pub memory_overage: u64,
    pub pressure_events: usize,
}

/// Progress reported to the caller after every batch
#[derive(Debug, Clone, PartialEq)]
pub struct BatchProgress {
    pub batch_index: usize,
    pub completed_batches: usize,
    pub total_batches: usize,
    pub processed: usize,
    pub successful: usize,
    pub failed: usize,
    pub total_items: usize,
    pub processing_rate: f64,
    pub estimated_time_remaining: Option<Duration>,
}

impl BatchProgress {
    #[must_use]
    pub fn percentage(&self) -> f64 {
        if self.total_items == 0 {
            100.0
        } else {
            (self.processed as f64 / self.total_items as f64 * 100.0).min(100.0)
        }
    }
}

/// Everything a batch run produced
///
/// `successful` and `failed` hold the items that ran; `unprocessed` holds the
/// items never started because of cancellation. Items skipped by the time
/// budget are reported in `failed`.
#[derive(Debug)]
pub struct BatchResult<T, E> {
    pub successful: Vec<T>,
    pub failed: Vec<ItemFailure<T, E>>,
    pub unprocessed: Vec<T>,
    pub checkpoints: Vec<Checkpoint>,
    pub statistics: BatchStatistics,
    pub total_items: usize,
    pub cancelled: bool,
    pub timed_out: bool,
}

impl<T, E> BatchResult<T, E> {
    /// Items that were attempted
    #[must_use]
    pub fn processed(&self) -> usize {
        self.successful.len() + self.failed.len()
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.unprocessed.is_empty() && !self.cancelled
    }
}
