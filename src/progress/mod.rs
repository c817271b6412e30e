//! Progress registry for running operations
//!
//! A [`ProgressTracker`] maps operation ids to [`OperationProgress`] entries and
//! notifies subscribers synchronously on every change. Trackers are plain
//! values: construct one and hand it (usually in an `Arc`) to whoever reports
//! or observes progress.

use std::collections::HashMap;
use std::io;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;

use crate::tasks::PeriodicTask;

pub mod error;
pub mod types;

pub use error::ProgressError;
pub use types::{OperationProgress, Phase, ProgressUpdate};

/// Error a subscriber may report; it is logged and never propagated
pub type SubscriberError = Box<dyn std::error::Error + Send + Sync>;

/// Callback notified with the latest snapshot of one operation
pub type Subscriber = Arc<dyn Fn(&OperationProgress) -> Result<(), SubscriberError> + Send + Sync>;

/// Thread-safe registry of operation progress
#[derive(Default)]
pub struct ProgressTracker {
    entries: RwLock<HashMap<String, OperationProgress>>,
    subscribers: RwLock<HashMap<String, Vec<Subscriber>>>,
}

impl ProgressTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> RwLockReadGuard<'_, HashMap<String, OperationProgress>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn entries_mut(&self) -> RwLockWriteGuard<'_, HashMap<String, OperationProgress>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Begin tracking `operation_id`
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::DuplicateOperation` if the id is already tracked.
    pub fn start(
        &self,
        operation_id: &str,
        operation_type: &str,
        total_items: usize,
    ) -> Result<OperationProgress, ProgressError> {
        let progress = {
            let mut entries = self.entries_mut();
            if entries.contains_key(operation_id) {
                return Err(ProgressError::DuplicateOperation(operation_id.to_string()));
            }
            let progress = OperationProgress::new(operation_id, operation_type, total_items);
            entries.insert(operation_id.to_string(), progress.clone());
            progress
        };

        tracing::debug!(operation_id, operation_type, total_items, "Tracking progress");
        self.notify(&progress);
        Ok(progress)
    }

    /// Apply a partial update and notify subscribers
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::UnknownOperation` for an untracked id and
    /// `ProgressError::AlreadyFinished` once the entry is terminal. Terminal
    /// phases are only reachable through [`Self::complete`].
    pub fn update(
        &self,
        operation_id: &str,
        update: ProgressUpdate,
    ) -> Result<OperationProgress, ProgressError> {
        if let Some(phase) = update.phase
            && phase.is_terminal()
        {
            return self.complete_with(operation_id, phase, update.message);
        }

        let progress = {
            let mut entries = self.entries_mut();
            let entry = entries
                .get_mut(operation_id)
                .ok_or_else(|| ProgressError::UnknownOperation(operation_id.to_string()))?;
            if entry.is_finished() {
                return Err(ProgressError::AlreadyFinished(operation_id.to_string()));
            }
            if let Some(current) = update.current_item {
                entry.current_item = current;
            }
            if let Some(phase) = update.phase {
                entry.phase = phase;
            }
            if update.message.is_some() {
                entry.message = update.message;
            }
            entry.last_update = Utc::now();
            entry.clone()
        };

        self.notify(&progress);
        Ok(progress)
    }

    /// Move the entry into a terminal phase
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::NotTerminal` if `final_phase` is not terminal, plus
    /// the errors of [`Self::update`].
    pub fn complete(
        &self,
        operation_id: &str,
        final_phase: Phase,
    ) -> Result<OperationProgress, ProgressError> {
        self.complete_with(operation_id, final_phase, None)
    }

    fn complete_with(
        &self,
        operation_id: &str,
        final_phase: Phase,
        message: Option<String>,
    ) -> Result<OperationProgress, ProgressError> {
        if !final_phase.is_terminal() {
            return Err(ProgressError::NotTerminal(final_phase));
        }

        let progress = {
            let mut entries = self.entries_mut();
            let entry = entries
                .get_mut(operation_id)
                .ok_or_else(|| ProgressError::UnknownOperation(operation_id.to_string()))?;
            if entry.is_finished() {
                return Err(ProgressError::AlreadyFinished(operation_id.to_string()));
            }
            let now = Utc::now();
            entry.phase = final_phase;
            if final_phase == Phase::Completed {
                entry.current_item = entry.total_items;
            }
            if message.is_some() {
                entry.message = message;
            }
            entry.last_update = now;
            entry.finished_at = Some(now);
            entry.clone()
        };

        tracing::debug!(operation_id, phase = %final_phase, "Progress finished");
        self.notify(&progress);
        Ok(progress)
    }

    /// Register `callback` for `operation_id`; allowed before `start`
    pub fn subscribe<F>(&self, operation_id: &str, callback: F)
    where
        F: Fn(&OperationProgress) -> Result<(), SubscriberError> + Send + Sync + 'static,
    {
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(operation_id.to_string())
            .or_default()
            .push(Arc::new(callback));
    }

    #[must_use]
    pub fn get(&self, operation_id: &str) -> Option<OperationProgress> {
        self.entries().get(operation_id).cloned()
    }

    /// Entries that have not reached a terminal phase
    #[must_use]
    pub fn active(&self) -> Vec<OperationProgress> {
        self.entries()
            .values()
            .filter(|p| !p.is_finished())
            .cloned()
            .collect()
    }

    /// Stop tracking an operation and drop its subscribers
    pub fn remove(&self, operation_id: &str) -> Option<OperationProgress> {
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(operation_id);
        self.entries_mut().remove(operation_id)
    }

    /// Re-notify subscribers of every in-flight operation
    pub fn heartbeat(&self) {
        for progress in self.active() {
            self.notify(&progress);
        }
    }

    /// Remove terminal entries that finished more than `retention` ago
    pub fn purge_finished(&self, retention: Duration) -> usize {
        let retention = chrono::Duration::from_std(retention).unwrap_or(chrono::TimeDelta::MAX);
        let cutoff = Utc::now().checked_sub_signed(retention);

        let expired: Vec<String> = self
            .entries()
            .values()
            .filter(|p| match (p.finished_at, cutoff) {
                (Some(finished), Some(cutoff)) => finished <= cutoff,
                _ => false,
            })
            .map(|p| p.operation_id.clone())
            .collect();

        for id in &expired {
            self.remove(id);
        }
        if !expired.is_empty() {
            tracing::debug!(purged = expired.len(), "Purged finished progress entries");
        }
        expired.len()
    }

    /// Run [`Self::heartbeat`] every `interval` on a background task
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the thread cannot be spawned.
    pub fn spawn_heartbeat(self: &Arc<Self>, interval: Duration) -> io::Result<PeriodicTask> {
        let tracker = Arc::clone(self);
        PeriodicTask::spawn("progress-heartbeat", interval, move || tracker.heartbeat())
    }

    /// Run [`Self::purge_finished`] every `interval` on a background task
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the thread cannot be spawned.
    pub fn spawn_cleanup(
        self: &Arc<Self>,
        interval: Duration,
        retention: Duration,
    ) -> io::Result<PeriodicTask> {
        let tracker = Arc::clone(self);
        PeriodicTask::spawn("progress-cleanup", interval, move || {
            tracker.purge_finished(retention);
        })
    }

    /// Call every subscriber of the operation outside of any lock
    fn notify(&self, progress: &OperationProgress) {
        let subscribers: Vec<Subscriber> = self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&progress.operation_id)
            .cloned()
            .unwrap_or_default();

        for subscriber in subscribers {
            if let Err(e) = subscriber(progress) {
                tracing::warn!(
                    operation_id = %progress.operation_id,
                    error = %e,
                    "Progress subscriber failed"
                );
            }
        }
    }
}

#[cfg(test)]
#[path = "tracker_tests.rs"]
mod tests;
