//! Batch configuration and its resolution into a concrete execution plan

use std::time::Duration;

use byte_unit::{Byte, UnitType};
use clap::ValueEnum;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::BatchError;
use super::memory::MemoryProbe;

/// Smallest batch the sizing strategies will pick
pub const MIN_BATCH_SIZE: usize = 10;

/// Largest batch the sizing strategies will pick
pub const MAX_BATCH_SIZE: usize = 10_000;

/// Assumed in-flight footprint of one item, used by memory-driven sizing
pub const ESTIMATED_ITEM_BYTES: u64 = 64 * 1024;

/// How batches are scheduled onto threads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ProcessingMode {
    /// One thread, batches in order
    Sequential,
    /// Bounded worker pool
    #[default]
    Concurrent,
    /// Each batch on its own worker with crash containment
    IsolatedProcess,
    /// Concurrent scheduling; isolation is reserved for explicitly CPU-heavy work
    Hybrid,
}

/// How the batch size is chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum, Default)]
#[serde(rename_all = "kebab-case")]
pub enum BatchStrategy {
    /// Use `batch_size` as given
    #[default]
    Fixed,
    /// Derive from available memory and CPU cores
    Adaptive,
    /// Derive from `memory_limit` and worker count
    MemoryBased,
    /// Size batches to a target duration measured on a probe batch
    TimeBased,
}

/// Batch execution options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchOptions {
    pub batch_size: usize,
    pub max_workers: usize,
    pub processing_mode: ProcessingMode,
    pub batch_strategy: BatchStrategy,
    /// Advisory process memory ceiling in bytes; accepts sizes like `"512 MiB"`
    #[serde(with = "byte_size")]
    pub memory_limit: u64,
    /// Overall time budget; no new batch starts once it is spent
    #[serde(rename = "timeout_secs", with = "optional_secs")]
    pub timeout: Option<Duration>,
    pub retry_attempts: u32,
    #[serde(rename = "retry_delay_ms", with = "millis")]
    pub retry_delay: Duration,
    /// Record a checkpoint every N completed batches (0 disables)
    pub checkpoint_interval: usize,
    pub preserve_order: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            batch_size: 100,
            max_workers: 4,
            processing_mode: ProcessingMode::Concurrent,
            batch_strategy: BatchStrategy::Fixed,
            memory_limit: 512 * 1024 * 1024,
            timeout: None,
            retry_attempts: 3,
            retry_delay: Duration::from_millis(100),
            checkpoint_interval: 10,
            preserve_order: false,
        }
    }
}

impl BatchOptions {
    /// Number of batches `item_count` items split into at the configured size
    #[must_use]
    pub fn batch_count(&self, item_count: usize) -> usize {
        item_count.div_ceil(self.batch_size.max(1))
    }

    /// Worker count bounded by twice the core count
    #[must_use]
    pub fn effective_workers(&self, cpu_cores: usize) -> usize {
        match self.processing_mode {
            ProcessingMode::Sequential => 1,
            _ => self.max_workers.clamp(1, (cpu_cores * 2).max(1)),
        }
    }

    /// Derived copy with sizing resolved to concrete numbers
    ///
    /// Adaptive and memory-based sizing become `Fixed` with the computed size,
    /// so optimizing an already optimized copy changes nothing. Time-based
    /// sizing stays as is because it needs a measured probe batch.
    #[must_use]
    pub fn optimized(&self, probe: &dyn MemoryProbe) -> Self {
        let cores = probe.cpu_cores();
        let workers = self.effective_workers(cores);
        let batch_size = match self.batch_strategy {
            BatchStrategy::Fixed | BatchStrategy::TimeBased => self.batch_size.max(1),
            BatchStrategy::Adaptive => probe.available_memory().map_or_else(
                || clamp_batch(self.batch_size as u64),
                |available| adaptive_batch_size(available, cores),
            ),
            BatchStrategy::MemoryBased => {
                clamp_batch(self.memory_limit / (ESTIMATED_ITEM_BYTES * workers as u64).max(1))
            }
        };
        let batch_strategy = match self.batch_strategy {
            BatchStrategy::TimeBased => BatchStrategy::TimeBased,
            _ => BatchStrategy::Fixed,
        };

        Self {
            batch_size,
            max_workers: workers,
            batch_strategy,
            ..self.clone()
        }
    }

    /// Human-readable memory limit, e.g. `512 MiB`
    #[must_use]
    pub fn memory_limit_display(&self) -> String {
        format_bytes(self.memory_limit)
    }
}

/// Batch size from a quarter of available memory shared across cores
#[must_use]
pub fn adaptive_batch_size(available_memory: u64, cpu_cores: usize) -> usize {
    let budget = available_memory / 4;
    let per_core = budget / cpu_cores.max(1) as u64;
    clamp_batch(per_core / ESTIMATED_ITEM_BYTES)
}

fn clamp_batch(size: u64) -> usize {
    usize::try_from(size)
        .unwrap_or(MAX_BATCH_SIZE)
        .clamp(MIN_BATCH_SIZE, MAX_BATCH_SIZE)
}

/// Parse a size such as `512 MiB`, `2GB` or a plain byte count
///
/// # Errors
///
/// Returns `BatchError::InvalidOption` if the string is not a valid size.
pub fn parse_size(text: &str) -> Result<u64, BatchError> {
    Byte::parse_str(text.trim(), true)
        .map(|b| b.as_u64())
        .map_err(|e| BatchError::InvalidOption(format!("invalid size '{text}': {e}")))
}

/// Format a byte count with binary units
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    Byte::from_u64(bytes)
        .get_appropriate_unit(UnitType::Binary)
        .to_string()
}

mod byte_size {
    use super::{Deserialize, Deserializer, Serializer, format_bytes, parse_size};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum SizeRepr {
        Bytes(u64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(bytes: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_bytes(*bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        match SizeRepr::deserialize(deserializer)? {
            SizeRepr::Bytes(n) => Ok(n),
            SizeRepr::Text(s) => parse_size(&s).map_err(serde::de::Error::custom),
        }
    }
}

mod millis {
    use super::{Deserialize, Deserializer, Duration, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

mod optional_secs {
    use super::{Deserialize, Deserializer, Duration, Serialize, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        value.map(|d| d.as_secs()).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_secs))
    }
}
