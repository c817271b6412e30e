//! Progress records and updates

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle phase of a tracked operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Initializing,
    Analyzing,
    Processing,
    Validating,
    Finalizing,
    Completed,
    Failed,
    Cancelled,
}

impl Phase {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Analyzing => "analyzing",
            Self::Processing => "processing",
            Self::Validating => "validating",
            Self::Finalizing => "finalizing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Live progress of one operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationProgress {
    pub operation_id: String,
    pub operation_type: String,
    pub phase: Phase,
    pub current_item: usize,
    pub total_items: usize,
    pub start_time: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
    pub message: Option<String>,
    /// Set when a terminal phase is reached
    pub finished_at: Option<DateTime<Utc>>,
}

impl OperationProgress {
    pub(crate) fn new(
        operation_id: impl Into<String>,
        operation_type: impl Into<String>,
        total_items: usize,
    ) -> Self {
        let now = Utc::now();
        Self {
            operation_id: operation_id.into(),
            operation_type: operation_type.into(),
            phase: Phase::Initializing,
            current_item: 0,
            total_items,
            start_time: now,
            last_update: now,
            message: None,
            finished_at: None,
        }
    }

    /// Completion in percent, capped at 100
    #[must_use]
    pub fn percentage(&self) -> f64 {
        if self.total_items == 0 {
            return if self.phase == Phase::Completed { 100.0 } else { 0.0 };
        }
        (self.current_item as f64 / self.total_items as f64 * 100.0).min(100.0)
    }

    /// Remaining time extrapolated from the rate so far, measured at `now`
    ///
    /// `None` until at least one item is done.
    #[must_use]
    pub fn estimated_remaining_at(&self, now: DateTime<Utc>) -> Option<Duration> {
        if self.current_item == 0 || self.total_items == 0 {
            return None;
        }
        let elapsed = (now - self.start_time).to_std().unwrap_or_default();
        let fraction = (self.current_item as f64 / self.total_items as f64).min(1.0);
        let estimated_total = elapsed.as_secs_f64() / fraction;
        Duration::try_from_secs_f64(estimated_total - elapsed.as_secs_f64())
            .ok()
            .or(Some(Duration::ZERO))
    }

    #[must_use]
    pub fn estimated_remaining(&self) -> Option<Duration> {
        self.estimated_remaining_at(Utc::now())
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.phase.is_terminal()
    }
}

/// Partial update applied by [`super::ProgressTracker::update`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub current_item: Option<usize>,
    pub phase: Option<Phase>,
    pub message: Option<String>,
}

impl ProgressUpdate {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn current_item(mut self, current: usize) -> Self {
        self.current_item = Some(current);
        self
    }

    #[must_use]
    pub const fn phase(mut self, phase: Phase) -> Self {
        self.phase = Some(phase);
        self
    }

    #[must_use]
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    #[test]
    fn test_percentage_is_capped() {
        let mut progress = OperationProgress::new("op", "bulk", 200);
        progress.current_item = 50;
        assert!((progress.percentage() - 25.0).abs() < f64::EPSILON);
        progress.current_item = 400;
        assert!((progress.percentage() - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_estimated_remaining() {
        let mut progress = OperationProgress::new("op", "bulk", 100);
        assert_eq!(progress.estimated_remaining_at(progress.start_time), None);

        progress.current_item = 25;
        let now = progress.start_time + TimeDelta::seconds(10);
        // 10s for a quarter: 40s total, 30s left
        let remaining = progress.estimated_remaining_at(now).unwrap();
        assert_eq!(remaining.as_secs(), 30);
    }

    #[test]
    fn test_terminal_phases() {
        assert!(Phase::Completed.is_terminal());
        assert!(Phase::Cancelled.is_terminal());
        assert!(!Phase::Finalizing.is_terminal());
        assert_eq!(Phase::Analyzing.to_string(), "analyzing");
    }
}
