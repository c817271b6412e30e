//! Persisted undo records and their replay
//!
//! The [`RollbackManager`] stores one [`RollbackOperation`] per rollback id
//! under `rollback/op/<id>` and its evolving [`RollbackState`] under
//! `rollback/state/<id>`. Replay never stops at a failing step: every
//! remaining step is attempted and the outcome is reported per step.

use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use crate::engine::MutationError;
use crate::store::types::{Namespace, RecordKey, decode, encode};
use crate::store::DurableStore;
use crate::tasks::PeriodicTask;

pub mod error;
pub mod types;

pub use error::RollbackError;
pub use types::{RollbackOperation, RollbackState, RollbackStatus, RollbackStep, StepError};

/// Default lifetime of a rollback operation
pub const DEFAULT_ROLLBACK_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Restores a single target from its rollback step
pub trait RollbackApplier: Send + Sync {
    /// Write the step's original state back
    ///
    /// # Errors
    ///
    /// Returns `MutationError` if the target cannot be restored.
    fn restore(&self, step: &RollbackStep) -> Result<(), MutationError>;
}

pub struct RollbackManager {
    store: Arc<dyn DurableStore>,
    applier: Arc<dyn RollbackApplier>,
    operations: RwLock<HashMap<String, RollbackOperation>>,
    states: RwLock<HashMap<String, RollbackState>>,
    executing: Mutex<HashSet<String>>,
    default_ttl: Duration,
}

impl RollbackManager {
    /// Load every persisted rollback operation from `store`
    ///
    /// Operations without a saved state get a fresh `pending` state, which is
    /// written back.
    ///
    /// # Errors
    ///
    /// Returns `RollbackError::Store` if listing, reading or decoding fails.
    pub fn open(
        store: Arc<dyn DurableStore>,
        applier: Arc<dyn RollbackApplier>,
    ) -> Result<Self, RollbackError> {
        let mut operations = HashMap::new();
        let mut states = HashMap::new();

        for key in store.list(Namespace::RollbackOperation.prefix())? {
            let Some(blob) = store.get(&key)? else {
                continue;
            };
            let mut operation: RollbackOperation = decode(&blob)?;
            let state_key = RecordKey::new(Namespace::RollbackState, &operation.rollback_id);

            let state = match store.get(state_key.as_str())? {
                Some(blob) => decode::<RollbackState>(&blob)?,
                None => {
                    tracing::info!(
                        rollback_id = %operation.rollback_id,
                        "Initializing missing rollback state"
                    );
                    let state = RollbackState::pending(&operation.rollback_id, operation.steps.len());
                    store.put(state_key.as_str(), &encode(&state)?)?;
                    state
                }
            };

            operation.apply_state(&state);
            states.insert(operation.rollback_id.clone(), state);
            operations.insert(operation.rollback_id.clone(), operation);
        }

        tracing::debug!(loaded = operations.len(), "Rollback operations loaded");

        Ok(Self {
            store,
            applier,
            operations: RwLock::new(operations),
            states: RwLock::new(states),
            executing: Mutex::new(HashSet::new()),
            default_ttl: DEFAULT_ROLLBACK_TTL,
        })
    }

    #[must_use]
    pub const fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    #[must_use]
    pub const fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Persist a new rollback operation in the `pending` state
    ///
    /// `ttl` of `None` uses the manager's default lifetime.
    ///
    /// # Errors
    ///
    /// Returns `RollbackError::Store` if either record cannot be written.
    pub fn create(
        &self,
        name: &str,
        original_operation_id: &str,
        steps: Vec<RollbackStep>,
        ttl: Option<Duration>,
    ) -> Result<RollbackOperation, RollbackError> {
        self.create_tagged(name, original_operation_id, steps, ttl, Vec::new())
    }

    /// [`Self::create`] with tags attached to the operation
    ///
    /// # Errors
    ///
    /// Returns `RollbackError::Store` if either record cannot be written.
    pub fn create_tagged(
        &self,
        name: &str,
        original_operation_id: &str,
        steps: Vec<RollbackStep>,
        ttl: Option<Duration>,
        tags: Vec<String>,
    ) -> Result<RollbackOperation, RollbackError> {
        let rollback_id = Uuid::new_v4().to_string();
        let mut operation = RollbackOperation::new(
            rollback_id.clone(),
            name,
            original_operation_id,
            steps,
            ttl.unwrap_or(self.default_ttl),
        );
        operation.tags = tags;
        let state = RollbackState::pending(&rollback_id, operation.steps.len());

        self.store.put(
            RecordKey::new(Namespace::RollbackOperation, &rollback_id).as_str(),
            &encode(&operation)?,
        )?;
        self.save_state(&state)?;

        tracing::info!(
            %rollback_id,
            original_operation_id,
            steps = operation.steps.len(),
            expires_at = %operation.expires_at,
            "Rollback operation created"
        );

        self.operations
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(rollback_id, operation.clone());

        Ok(operation)
    }

    #[must_use]
    pub fn get(&self, rollback_id: &str) -> Option<RollbackOperation> {
        self.operations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(rollback_id)
            .cloned()
    }

    #[must_use]
    pub fn state(&self, rollback_id: &str) -> Option<RollbackState> {
        self.states
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(rollback_id)
            .cloned()
    }

    /// All operations, oldest first
    #[must_use]
    pub fn list(&self) -> Vec<RollbackOperation> {
        let mut operations: Vec<RollbackOperation> = self
            .operations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        operations.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.rollback_id.cmp(&b.rollback_id))
        });
        operations
    }

    /// Replay the steps of a rollback operation
    ///
    /// Steps run newest first. Only steps not executed by an earlier replay are
    /// attempted, so a `partial` or `failed` rollback can be retried. With
    /// `dry_run` the operation is only validated and nothing is written.
    ///
    /// # Errors
    ///
    /// Returns an error if the operation is unknown, expired, empty, already
    /// completed or currently executing, or if its state cannot be persisted.
    pub fn execute(&self, rollback_id: &str, dry_run: bool) -> Result<RollbackState, RollbackError> {
        let operation = self
            .get(rollback_id)
            .ok_or_else(|| RollbackError::NotFound(rollback_id.to_string()))?;
        let _guard = ExecutionGuard::acquire(&self.executing, rollback_id)?;
        let mut state = self
            .state(rollback_id)
            .unwrap_or_else(|| RollbackState::pending(rollback_id, operation.steps.len()));

        if state.status == RollbackStatus::Completed {
            return Err(RollbackError::AlreadyCompleted(rollback_id.to_string()));
        }
        if operation.steps.is_empty() {
            return Err(RollbackError::Empty(rollback_id.to_string()));
        }
        if operation.is_expired() {
            return Err(RollbackError::Expired {
                rollback_id: rollback_id.to_string(),
                expired_at: operation.expires_at,
            });
        }

        if dry_run {
            tracing::info!(rollback_id, steps = operation.steps.len(), "Rollback dry run validated");
            let now = Utc::now();
            return Ok(RollbackState {
                status: RollbackStatus::Completed,
                started_at: Some(now),
                completed_at: Some(now),
                dry_run: true,
                ..state
            });
        }

        state.executed.resize(operation.steps.len(), false);
        state.started_at = Some(Utc::now());
        state.completed_at = None;
        state.status = RollbackStatus::Preparing;
        self.save_state(&state)?;

        state.status = RollbackStatus::Executing;
        self.save_state(&state)?;
        tracing::info!(rollback_id, pending_steps = state.remaining(), "Executing rollback");

        for (index, step) in operation.steps.iter().enumerate().rev() {
            if state.executed[index] {
                continue;
            }
            state.step_errors.retain(|e| e.step_index != index);

            match self.applier.restore(step) {
                Ok(()) => state.executed[index] = true,
                Err(e) => {
                    tracing::warn!(
                        rollback_id,
                        step = index,
                        target_id = %step.target_id,
                        error = %e,
                        "Rollback step failed"
                    );
                    state.step_errors.push(StepError {
                        step_index: index,
                        target_id: step.target_id.clone(),
                        error: e.to_string(),
                    });
                }
            }
            self.save_state(&state)?;
        }

        state.step_errors.sort_by_key(|e| e.step_index);
        state.failed_steps = state.remaining();
        state.successful_steps = state.executed.len() - state.failed_steps;
        state.status = if state.failed_steps == 0 {
            RollbackStatus::Completed
        } else if state.successful_steps > 0 {
            RollbackStatus::Partial
        } else {
            RollbackStatus::Failed
        };
        state.completed_at = Some(Utc::now());
        self.save_state(&state)?;

        tracing::info!(
            rollback_id,
            status = %state.status,
            successful = state.successful_steps,
            failed = state.failed_steps,
            "Rollback finished"
        );

        Ok(state)
    }

    /// Ids of operations whose expiry time has passed
    #[must_use]
    pub fn list_expired(&self) -> Vec<String> {
        let now = Utc::now();
        let mut expired: Vec<String> = self
            .operations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|op| op.is_expired_at(now))
            .map(|op| op.rollback_id.clone())
            .collect();
        expired.sort();
        expired
    }

    /// Delete expired operations together with their state
    ///
    /// # Errors
    ///
    /// Returns `RollbackError::Store` if a delete fails; operations removed
    /// before the failure stay removed.
    pub fn cleanup(&self) -> Result<usize, RollbackError> {
        let expired = self.list_expired();
        for rollback_id in &expired {
            self.store
                .delete(RecordKey::new(Namespace::RollbackOperation, rollback_id).as_str())?;
            self.store
                .delete(RecordKey::new(Namespace::RollbackState, rollback_id).as_str())?;
            self.operations
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(rollback_id);
            self.states
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(rollback_id);
        }
        if !expired.is_empty() {
            tracing::info!(removed = expired.len(), "Expired rollback operations removed");
        }
        Ok(expired.len())
    }

    /// Run [`Self::cleanup`] every `interval` on a background task
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the thread cannot be spawned.
    pub fn spawn_expiry_sweep(self: &Arc<Self>, interval: Duration) -> io::Result<PeriodicTask> {
        let manager = Arc::clone(self);
        PeriodicTask::spawn("rollback-expiry", interval, move || {
            if let Err(e) = manager.cleanup() {
                tracing::error!(error = %e, "Rollback expiry sweep failed");
            }
        })
    }

    fn save_state(&self, state: &RollbackState) -> Result<(), RollbackError> {
        self.store.put(
            RecordKey::new(Namespace::RollbackState, &state.rollback_id).as_str(),
            &encode(state)?,
        )?;
        let mut states = self.states.write().unwrap_or_else(PoisonError::into_inner);
        states.insert(state.rollback_id.clone(), state.clone());
        drop(states);

        if let Some(operation) = self
            .operations
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(&state.rollback_id)
        {
            operation.apply_state(state);
        }
        Ok(())
    }
}

/// Marks a rollback as executing for the guard's lifetime
struct ExecutionGuard<'a> {
    executing: &'a Mutex<HashSet<String>>,
    rollback_id: String,
}

impl<'a> ExecutionGuard<'a> {
    fn acquire(executing: &'a Mutex<HashSet<String>>, rollback_id: &str) -> Result<Self, RollbackError> {
        let mut set = executing.lock().unwrap_or_else(PoisonError::into_inner);
        if !set.insert(rollback_id.to_string()) {
            return Err(RollbackError::InProgress(rollback_id.to_string()));
        }
        Ok(Self {
            executing,
            rollback_id: rollback_id.to_string(),
        })
    }
}

impl Drop for ExecutionGuard<'_> {
    fn drop(&mut self) {
        self.executing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.rollback_id);
    }
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
