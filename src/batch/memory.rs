//! Memory and CPU sampling used for batch sizing and backpressure
//!
//! [`SystemProbe`] reads the Linux `/proc` interfaces and reports `None` where
//! they are unavailable, in which case sizing falls back to the configured
//! batch size and the memory check is skipped.

use std::fs;

/// Source of process memory, available memory and CPU count
pub trait MemoryProbe: Send + Sync {
    /// Resident memory of the current process in bytes
    fn process_memory(&self) -> Option<u64>;

    /// Memory the system can still hand out, in bytes
    fn available_memory(&self) -> Option<u64>;

    fn cpu_cores(&self) -> usize;
}

/// Probe backed by the running system
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProbe;

impl MemoryProbe for SystemProbe {
    fn process_memory(&self) -> Option<u64> {
        read_kib_field("/proc/self/status", "VmRSS:")
    }

    fn available_memory(&self) -> Option<u64> {
        read_kib_field("/proc/meminfo", "MemAvailable:")
    }

    fn cpu_cores(&self) -> usize {
        std::thread::available_parallelism()
            .map(std::num::NonZero::get)
            .unwrap_or(1)
    }
}

/// Probe returning fixed values
#[derive(Debug, Clone, Copy)]
pub struct FixedProbe {
    pub process_memory: Option<u64>,
    pub available_memory: Option<u64>,
    pub cpu_cores: usize,
}

impl MemoryProbe for FixedProbe {
    fn process_memory(&self) -> Option<u64> {
        self.process_memory
    }

    fn available_memory(&self) -> Option<u64> {
        self.available_memory
    }

    fn cpu_cores(&self) -> usize {
        self.cpu_cores.max(1)
    }
}

fn read_kib_field(path: &str, field: &str) -> Option<u64> {
    let content = fs::read_to_string(path).ok()?;
    parse_kib_field(&content, field)
}

/// Parse a `Name:   1234 kB` line into bytes
fn parse_kib_field(content: &str, field: &str) -> Option<u64> {
    content
        .lines()
        .find_map(|line| line.strip_prefix(field))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|kib| kib.parse::<u64>().ok())
        .map(|kib| kib * 1024)
}
