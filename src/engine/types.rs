//! Requests, work items and results of bulk operations

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use super::preview::ImpactPreview;
use crate::batch::{BatchOptions, BatchStatistics, Checkpoint};
use crate::conversion::ConversionPath;
use crate::store::PropertyValue;

/// Operation type recorded for bulk type changes
pub const BULK_TYPE_CHANGE: &str = "bulk_type_change";

/// Outcome of validating one conversion
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    #[must_use]
    pub fn valid() -> Self {
        Self {
            is_valid: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn invalid(error: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            errors: vec![error.into()],
            warnings: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings = warnings;
        self
    }
}

/// One element to convert
///
/// Built when the request is expanded; only `validation_result` is filled in
/// afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationItem {
    pub element_id: String,
    pub current_type: String,
    pub target_type: String,
    pub properties: BTreeMap<String, PropertyValue>,
    pub metadata: BTreeMap<String, String>,
    pub conversion_path: Option<ConversionPath>,
    pub validation_result: Option<ValidationResult>,
}

impl OperationItem {
    /// False only when validation ran and rejected the item
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.validation_result.as_ref().is_none_or(|v| v.is_valid)
    }
}

/// Lifecycle of a bulk operation
///
/// `pending -> running -> {completed | failed | cancelled}`, plus
/// `completed -> rolled_back` through an explicit rollback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    RolledBack,
}

impl OperationStatus {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::RolledBack
        )
    }

    /// Whether moving from `self` to `next` is allowed
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running | Self::Failed | Self::Cancelled)
                | (Self::Running, Self::Completed | Self::Failed | Self::Cancelled)
                | (Self::Completed, Self::RolledBack)
        )
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::RolledBack => "rolled_back",
        }
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to do with items that fail validation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum InvalidItemPolicy {
    /// Fail the whole operation
    FailFast,
    /// Drop invalid items and count them as skipped
    #[default]
    SkipInvalid,
}

/// Options of a bulk type change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BulkOptions {
    pub validate_before_execution: bool,
    pub invalid_items: InvalidItemPolicy,
    pub dry_run: bool,
    pub enable_rollback: bool,
    /// Lifetime of the rollback record; the rollback manager's default when unset
    #[serde(skip)]
    pub rollback_ttl: Option<Duration>,
    pub batch: BatchOptions,
    /// Use this id instead of a generated one
    pub operation_id: Option<String>,
}

impl Default for BulkOptions {
    fn default() -> Self {
        Self {
            validate_before_execution: true,
            invalid_items: InvalidItemPolicy::SkipInvalid,
            dry_run: false,
            enable_rollback: true,
            rollback_ttl: None,
            batch: BatchOptions::default(),
            operation_id: None,
        }
    }
}

/// Result of a bulk operation
///
/// `processed_items == successful_items + failed_items + skipped_items` at all
/// times. Items left unprocessed by cancellation are not counted as processed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkOperationResult {
    pub operation_id: String,
    pub operation_type: String,
    pub target_type: String,
    pub status: OperationStatus,
    pub total_items: usize,
    pub processed_items: usize,
    pub successful_items: usize,
    pub failed_items: usize,
    pub skipped_items: usize,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub failed_element_ids: Vec<String>,
    pub rollback_operation_id: Option<String>,
    pub dry_run: bool,
    pub impact: Option<ImpactPreview>,
    pub statistics: Option<BatchStatistics>,
    pub checkpoints: Vec<Checkpoint>,
}

impl BulkOperationResult {
    pub(crate) fn new(operation_id: String, target_type: &str, total_items: usize) -> Self {
        Self {
            operation_id,
            operation_type: BULK_TYPE_CHANGE.to_string(),
            target_type: target_type.to_string(),
            status: OperationStatus::Pending,
            total_items,
            processed_items: 0,
            successful_items: 0,
            failed_items: 0,
            skipped_items: 0,
            start_time: Utc::now(),
            end_time: None,
            errors: Vec::new(),
            warnings: Vec::new(),
            failed_element_ids: Vec::new(),
            rollback_operation_id: None,
            dry_run: false,
            impact: None,
            statistics: None,
            checkpoints: Vec::new(),
        }
    }

    /// Completed with at least one failed item
    #[must_use]
    pub fn is_partial(&self) -> bool {
        self.status == OperationStatus::Completed
            && self.successful_items > 0
            && self.failed_items > 0
    }

    #[must_use]
    pub fn duration(&self) -> Option<Duration> {
        self.end_time.and_then(|end| (end - self.start_time).to_std().ok())
    }

    /// Move to `next`, refusing transitions the lifecycle does not allow
    ///
    /// Reaching a terminal status sets `end_time`.
    pub(crate) fn transition(&mut self, next: OperationStatus) -> Result<(), (OperationStatus, OperationStatus)> {
        if !self.status.can_transition_to(next) {
            return Err((self.status, next));
        }
        self.status = next;
        if next.is_terminal() && self.end_time.is_none() {
            self.end_time = Some(Utc::now());
        }
        Ok(())
    }

    pub(crate) fn record_skipped(&mut self, element_id: &str, reason: &str) {
        self.skipped_items += 1;
        self.processed_items += 1;
        self.warnings.push(format!("{element_id}: skipped, {reason}"));
    }

    pub(crate) fn record_failure(&mut self, element_id: &str, error: &str) {
        self.failed_items += 1;
        self.processed_items += 1;
        self.errors.push(format!("{element_id}: {error}"));
        self.failed_element_ids.push(element_id.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_transitions() {
        use OperationStatus::*;
        assert!(Pending.can_transition_to(Running));
        assert!(Running.can_transition_to(Completed));
        assert!(Completed.can_transition_to(RolledBack));
        assert!(!Running.can_transition_to(RolledBack));
        assert!(!Failed.can_transition_to(RolledBack));
        assert!(!Pending.can_transition_to(Completed));
    }

    #[test]
    fn test_terminal_status_never_changes() {
        use OperationStatus::*;
        for terminal in [Completed, Failed, Cancelled, RolledBack] {
            for next in [Pending, Running, Completed, Failed, Cancelled] {
                assert!(!terminal.can_transition_to(next), "{terminal} -> {next}");
            }
        }
    }

    #[test]
    fn test_counters_keep_processed_sum() {
        let mut result = BulkOperationResult::new("op".into(), "title", 3);
        result.successful_items = 1;
        result.processed_items = 1;
        result.record_failure("e2", "boom");
        result.record_skipped("e3", "no conversion path");

        assert_eq!(
            result.processed_items,
            result.successful_items + result.failed_items + result.skipped_items
        );
        assert_eq!(result.failed_element_ids, vec!["e2".to_string()]);
        assert_eq!(result.errors, vec!["e2: boom".to_string()]);
    }

    #[test]
    fn test_transition_sets_end_time_and_rejects_invalid() {
        let mut result = BulkOperationResult::new("op".into(), "title", 1);
        result.transition(OperationStatus::Running).unwrap();
        assert!(result.end_time.is_none());
        result.transition(OperationStatus::Completed).unwrap();
        assert!(result.end_time.is_some());
        assert_eq!(
            result.transition(OperationStatus::Failed),
            Err((OperationStatus::Completed, OperationStatus::Failed))
        );
    }

    #[test]
    fn test_is_partial() {
        let mut result = BulkOperationResult::new("op".into(), "title", 2);
        result.transition(OperationStatus::Running).unwrap();
        result.successful_items = 1;
        result.processed_items = 1;
        result.record_failure("e2", "boom");
        result.transition(OperationStatus::Completed).unwrap();
        assert!(result.is_partial());
    }
}
