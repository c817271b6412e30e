//! Rollback records
//!
//! A [`RollbackOperation`] is written once and never rewritten; everything that
//! changes while it is replayed lives in its [`RollbackState`], which is
//! persisted under its own key.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// Undo record for a single mutated item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackStep {
    pub target_id: String,
    /// Encoded state of the target before the mutation
    pub original_state: Vec<u8>,
    /// Extra data the applier may need to reverse the mutation
    pub rollback_data: Vec<u8>,
    #[serde(default)]
    pub executed: bool,
    #[serde(default)]
    pub error: Option<String>,
}

impl RollbackStep {
    #[must_use]
    pub fn new(target_id: impl Into<String>, original_state: Vec<u8>, rollback_data: Vec<u8>) -> Self {
        Self {
            target_id: target_id.into(),
            original_state,
            rollback_data,
            executed: false,
            error: None,
        }
    }
}

/// A group of undo steps belonging to one original operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackOperation {
    pub rollback_id: String,
    pub name: String,
    pub original_operation_id: String,
    pub steps: Vec<RollbackStep>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl RollbackOperation {
    pub(crate) fn new(
        rollback_id: String,
        name: impl Into<String>,
        original_operation_id: impl Into<String>,
        steps: Vec<RollbackStep>,
        ttl: Duration,
    ) -> Self {
        let created_at = Utc::now();
        let ttl = TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX);
        let expires_at = created_at
            .checked_add_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self {
            rollback_id,
            name: name.into(),
            original_operation_id: original_operation_id.into(),
            steps,
            created_at,
            expires_at,
            tags: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Copy step outcomes recorded in `state` onto the steps
    pub(crate) fn apply_state(&mut self, state: &RollbackState) {
        for (index, step) in self.steps.iter_mut().enumerate() {
            step.executed = state.executed.get(index).copied().unwrap_or(false);
            step.error = state
                .step_errors
                .iter()
                .find(|e| e.step_index == index)
                .map(|e| e.error.clone());
        }
    }
}

/// Replay status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackStatus {
    Pending,
    Preparing,
    Executing,
    Completed,
    /// Some steps restored, some failed
    Partial,
    Failed,
}

impl fmt::Display for RollbackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Preparing => "preparing",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Partial => "partial",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Error recorded for one step during replay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepError {
    pub step_index: usize,
    pub target_id: String,
    pub error: String,
}

/// Mutable replay state of a rollback operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackState {
    pub rollback_id: String,
    pub status: RollbackStatus,
    pub successful_steps: usize,
    pub failed_steps: usize,
    /// Per-step executed flags, index-aligned with the operation's steps
    pub executed: Vec<bool>,
    pub step_errors: Vec<StepError>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub dry_run: bool,
}

impl RollbackState {
    #[must_use]
    pub fn pending(rollback_id: impl Into<String>, step_count: usize) -> Self {
        Self {
            rollback_id: rollback_id.into(),
            status: RollbackStatus::Pending,
            successful_steps: 0,
            failed_steps: 0,
            executed: vec![false; step_count],
            step_errors: Vec::new(),
            started_at: None,
            completed_at: None,
            dry_run: false,
        }
    }

    /// Steps not restored yet
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.executed.iter().filter(|done| !**done).count()
    }
}
