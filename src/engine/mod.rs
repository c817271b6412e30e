//! Bulk type operation engine
//!
//! [`BulkTypeOperationEngine`] turns a request to change a list of elements to
//! a target type into a tracked, reversible operation:
//!
//! 1. the target type is checked against the type registry
//! 2. element ids are expanded into [`OperationItem`]s with conversion paths
//! 3. items are validated and invalid ones skipped or the call failed
//! 4. pre-mutation snapshots are stored as a rollback operation
//! 5. the [`BatchProcessor`] applies the [`Mutator`] to every item
//! 6. progress is published after every batch and the terminal result archived
//!
//! Item-level failures never fail the call; they are collected in the
//! returned [`BulkOperationResult`].

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};

use uuid::Uuid;

use crate::batch::{BatchProcessor, BatchProgress, CancellationFlag};
use crate::conversion::ConversionPathResolver;
use crate::progress::{Phase, ProgressTracker, ProgressUpdate};
use crate::registry::TypeRegistry;
use crate::rollback::{RollbackManager, RollbackState, RollbackStatus, RollbackStep};
use crate::store::types::{Namespace, RecordKey, decode, encode};
use crate::store::{DurableStore, Element, StoreError};

pub mod error;
pub mod preview;
pub mod types;
pub mod validation;

pub use error::{EngineError, MutationError};
pub use preview::ImpactPreview;
pub use types::{
    BULK_TYPE_CHANGE, BulkOperationResult, BulkOptions, InvalidItemPolicy, OperationItem,
    OperationStatus, ValidationResult,
};
pub use validation::{PathValidator, ValidationEngine};

/// Loads the current state of elements
pub trait ElementSource: Send + Sync {
    /// # Errors
    ///
    /// Returns `StoreError` if the element cannot be read.
    fn load(&self, element_id: &str) -> Result<Option<Element>, StoreError>;
}

/// Applies the conversion of a single item
pub trait Mutator: Send + Sync {
    /// # Errors
    ///
    /// Returns `MutationError` if the item cannot be converted.
    fn apply(&self, item: &OperationItem) -> Result<(), MutationError>;
}

/// Collaborators an engine is built from
pub struct EngineParts {
    pub registry: Arc<dyn TypeRegistry>,
    pub resolver: Arc<ConversionPathResolver>,
    pub elements: Arc<dyn ElementSource>,
    pub mutator: Arc<dyn Mutator>,
    pub rollbacks: Arc<RollbackManager>,
    pub progress: Arc<ProgressTracker>,
    /// Archive of terminal results
    pub store: Arc<dyn DurableStore>,
}

/// Outcome of [`BulkTypeOperationEngine::rollback`]
#[derive(Debug, Clone)]
pub struct RollbackReport {
    /// The operation; `rolled_back` only if every step was restored
    pub result: BulkOperationResult,
    pub state: RollbackState,
}

struct ActiveOperation {
    result: BulkOperationResult,
    cancel: CancellationFlag,
}

/// Items ready to process, each with the element state captured before mutation
type Planned = Vec<(OperationItem, Element)>;

pub struct BulkTypeOperationEngine {
    registry: Arc<dyn TypeRegistry>,
    resolver: Arc<ConversionPathResolver>,
    validator: Arc<dyn ValidationEngine>,
    elements: Arc<dyn ElementSource>,
    mutator: Arc<dyn Mutator>,
    rollbacks: Arc<RollbackManager>,
    progress: Arc<ProgressTracker>,
    store: Arc<dyn DurableStore>,
    processor: BatchProcessor,
    operations: RwLock<HashMap<String, ActiveOperation>>,
}

impl BulkTypeOperationEngine {
    /// Build an engine validating through a [`PathValidator`]
    ///
    /// The batch processor relieves memory pressure by clearing the conversion
    /// path cache.
    pub fn new(parts: EngineParts) -> Self {
        let validator = Arc::new(PathValidator::new(
            Arc::clone(&parts.registry),
            Arc::clone(&parts.resolver),
        ));
        let resolver = Arc::clone(&parts.resolver);
        let processor = BatchProcessor::new().with_pressure_relief(Arc::new(move || {
            resolver.clear_cache();
            tracing::debug!("Conversion path cache cleared under memory pressure");
        }));

        Self {
            registry: parts.registry,
            resolver: parts.resolver,
            validator,
            elements: parts.elements,
            mutator: parts.mutator,
            rollbacks: parts.rollbacks,
            progress: parts.progress,
            store: parts.store,
            processor,
            operations: RwLock::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn with_validator(mut self, validator: Arc<dyn ValidationEngine>) -> Self {
        self.validator = validator;
        self
    }

    /// Replace the batch processor; the replacement is used as given
    #[must_use]
    pub fn with_processor(mut self, processor: BatchProcessor) -> Self {
        self.processor = processor;
        self
    }

    #[must_use]
    pub fn resolver(&self) -> &Arc<ConversionPathResolver> {
        &self.resolver
    }

    #[must_use]
    pub fn progress(&self) -> &Arc<ProgressTracker> {
        &self.progress
    }

    #[must_use]
    pub fn rollbacks(&self) -> &Arc<RollbackManager> {
        &self.rollbacks
    }

    /// Change every element in `element_ids` to `target_type`
    ///
    /// Duplicate ids are processed once. Blocks until the operation reaches a
    /// terminal status and returns its result.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::EmptyRequest` or `EngineError::UnknownTargetType`
    /// for malformed requests, `EngineError::DuplicateOperation` for a reused
    /// operation id, and storage errors raised before any item is mutated.
    pub fn submit(
        &self,
        element_ids: &[String],
        target_type: &str,
        options: &BulkOptions,
    ) -> Result<BulkOperationResult, EngineError> {
        if element_ids.is_empty() {
            return Err(EngineError::EmptyRequest);
        }
        if !self.registry.type_exists(target_type) {
            return Err(EngineError::UnknownTargetType(target_type.to_string()));
        }

        let mut seen = HashSet::new();
        let unique: Vec<&str> = element_ids
            .iter()
            .map(String::as_str)
            .filter(|id| seen.insert(*id))
            .collect();

        let operation_id = options
            .operation_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let cancel = self.register(&operation_id, target_type, unique.len())?;

        tracing::info!(
            operation_id = %operation_id,
            target_type,
            items = unique.len(),
            dry_run = options.dry_run,
            "Bulk operation submitted"
        );
        let duplicates = element_ids.len() - unique.len();
        if duplicates > 0 {
            self.with_result(&operation_id, |r| {
                r.warnings.push(format!("{duplicates} duplicate element ids ignored"));
            });
        }

        match self.run(&operation_id, &unique, target_type, options, &cancel) {
            Ok(result) => Ok(result),
            Err(e) => {
                tracing::error!(operation_id = %operation_id, error = %e, "Bulk operation aborted");
                self.with_result(&operation_id, |r| r.errors.push(e.to_string()));
                if let Err(finish_error) = self.finish(&operation_id, OperationStatus::Failed) {
                    tracing::debug!(error = %finish_error, "Aborted operation already finished");
                }
                Err(e)
            }
        }
    }

    /// Request cancellation
    ///
    /// A pending operation is cancelled at once. A running one stops before its
    /// next batch and reports `cancelled` when its submitter finishes; the
    /// returned status is then still `running`.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::UnknownOperation` for unknown ids and
    /// `EngineError::InvalidTransition` for operations that already finished.
    pub fn cancel(&self, operation_id: &str) -> Result<OperationStatus, EngineError> {
        let pending_cancelled = {
            let mut operations = self.operations.write().unwrap_or_else(PoisonError::into_inner);
            let Some(active) = operations.get_mut(operation_id) else {
                drop(operations);
                return match self.load_archived(operation_id)? {
                    Some(result) => Err(EngineError::InvalidTransition {
                        operation_id: operation_id.to_string(),
                        from: result.status,
                        to: OperationStatus::Cancelled,
                    }),
                    None => Err(EngineError::UnknownOperation(operation_id.to_string())),
                };
            };

            match active.result.status {
                OperationStatus::Pending => {
                    active.cancel.cancel();
                    let _ = active.result.transition(OperationStatus::Cancelled);
                    Some(active.result.clone())
                }
                OperationStatus::Running => {
                    active.cancel.cancel();
                    None
                }
                status => {
                    return Err(EngineError::InvalidTransition {
                        operation_id: operation_id.to_string(),
                        from: status,
                        to: OperationStatus::Cancelled,
                    });
                }
            }
        };

        match pending_cancelled {
            Some(result) => {
                self.publish_terminal(&result);
                Ok(OperationStatus::Cancelled)
            }
            None => {
                tracing::info!(operation_id, "Cancellation requested");
                Ok(OperationStatus::Running)
            }
        }
    }

    /// Undo a completed operation through its rollback record
    ///
    /// The operation becomes `rolled_back` only when every step was restored;
    /// after a partial rollback it stays `completed` and the rollback can be
    /// retried.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::UnknownOperation`, `EngineError::InvalidTransition`
    /// if the operation is not `completed`, `EngineError::RollbackUnavailable`
    /// if it has no rollback record, or the rollback manager's error.
    pub fn rollback(&self, operation_id: &str) -> Result<RollbackReport, EngineError> {
        let result = self
            .get_status(operation_id)?
            .ok_or_else(|| EngineError::UnknownOperation(operation_id.to_string()))?;

        if result.status != OperationStatus::Completed {
            return Err(EngineError::InvalidTransition {
                operation_id: operation_id.to_string(),
                from: result.status,
                to: OperationStatus::RolledBack,
            });
        }
        let rollback_id = result
            .rollback_operation_id
            .clone()
            .ok_or_else(|| EngineError::RollbackUnavailable(operation_id.to_string()))?;

        let state = self.rollbacks.execute(&rollback_id, false)?;
        if state.status != RollbackStatus::Completed {
            tracing::warn!(
                operation_id,
                rollback_id = %rollback_id,
                status = %state.status,
                failed = state.failed_steps,
                "Rollback incomplete"
            );
            return Ok(RollbackReport { result, state });
        }

        let result = self.mark_rolled_back(result)?;
        tracing::info!(operation_id, rollback_id = %rollback_id, "Operation rolled back");
        Ok(RollbackReport { result, state })
    }

    /// Current result of an operation, from memory or the archive
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Store` if the archive cannot be read.
    pub fn get_status(&self, operation_id: &str) -> Result<Option<BulkOperationResult>, EngineError> {
        let in_memory = self
            .operations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(operation_id)
            .map(|active| active.result.clone());
        match in_memory {
            Some(result) => Ok(Some(result)),
            None => self.load_archived(operation_id),
        }
    }

    /// Operations that have not finished yet
    #[must_use]
    pub fn active_operations(&self) -> Vec<BulkOperationResult> {
        self.operations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|active| !active.result.status.is_terminal())
            .map(|active| active.result.clone())
            .collect()
    }

    /// Every archived result, oldest first
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Store` if listing or decoding fails.
    pub fn archived_operations(&self) -> Result<Vec<BulkOperationResult>, EngineError> {
        let mut results = Vec::new();
        for key in self.store.list(Namespace::Operation.prefix())? {
            if let Some(blob) = self.store.get(&key)? {
                results.push(decode::<BulkOperationResult>(&blob)?);
            }
        }
        results.sort_by(|a, b| a.start_time.cmp(&b.start_time));
        Ok(results)
    }

    /// Drop finished operations from memory; archived ones stay queryable
    pub fn forget_finished(&self) -> usize {
        let mut operations = self.operations.write().unwrap_or_else(PoisonError::into_inner);
        let before = operations.len();
        operations.retain(|_, active| !active.result.status.is_terminal());
        before - operations.len()
    }

    fn run(
        &self,
        operation_id: &str,
        element_ids: &[&str],
        target_type: &str,
        options: &BulkOptions,
        cancel: &CancellationFlag,
    ) -> Result<BulkOperationResult, EngineError> {
        if !self.begin(operation_id) {
            return self
                .get_status(operation_id)?
                .ok_or_else(|| EngineError::UnknownOperation(operation_id.to_string()));
        }

        self.report(
            operation_id,
            ProgressUpdate::new()
                .phase(Phase::Analyzing)
                .message("Resolving element types"),
        );
        let (mut planned, missing) = self.expand(element_ids, target_type)?;
        let items: Vec<OperationItem> = planned.iter().map(|(item, _)| item.clone()).collect();
        let impact = ImpactPreview::from_items(&items);
        tracing::debug!(
            operation_id,
            convertible = impact.convertible,
            unconvertible = impact.unconvertible,
            unsafe_conversions = impact.unsafe_conversions,
            "Impact preview"
        );
        self.with_result(operation_id, |r| r.impact = Some(impact));

        if options.validate_before_execution {
            self.report(operation_id, ProgressUpdate::new().phase(Phase::Validating));
            if !self.validate(operation_id, &mut planned, &missing, options.invalid_items) {
                return self.finish(operation_id, OperationStatus::Failed);
            }
        } else {
            self.with_result(operation_id, |r| {
                for id in &missing {
                    r.record_failure(id, &MutationError::MissingElement(id.clone()).to_string());
                }
            });
        }

        if options.dry_run {
            let count = planned.len();
            self.with_result(operation_id, |r| {
                r.dry_run = true;
                r.warnings
                    .push(format!("Dry run: {count} elements would be converted, nothing was changed"));
            });
            return self.finish(operation_id, OperationStatus::Completed);
        }

        if planned.is_empty() {
            self.with_result(operation_id, |r| r.errors.push("No valid elements to convert".to_string()));
            return self.finish(operation_id, OperationStatus::Failed);
        }

        if options.enable_rollback {
            self.prepare_rollback(operation_id, target_type, &planned, options)?;
        }

        self.execute(operation_id, planned, options, cancel);

        let (successful, failed) = self
            .get_status(operation_id)?
            .map_or((0, 0), |r| (r.successful_items, r.failed_items));
        let status = if cancel.is_cancelled() {
            OperationStatus::Cancelled
        } else if successful == 0 && failed > 0 {
            OperationStatus::Failed
        } else {
            if failed > 0 {
                self.with_result(operation_id, |r| {
                    r.warnings.push(format!("Completed with {failed} failed elements"));
                });
            }
            OperationStatus::Completed
        };

        self.report(operation_id, ProgressUpdate::new().phase(Phase::Finalizing));
        self.finish(operation_id, status)
    }

    /// Look up each element and plan its conversion
    fn expand(&self, element_ids: &[&str], target_type: &str) -> Result<(Planned, Vec<String>), EngineError> {
        let mut planned = Vec::with_capacity(element_ids.len());
        let mut missing = Vec::new();

        for id in element_ids {
            let Some(element) = self.elements.load(id)? else {
                missing.push((*id).to_string());
                continue;
            };
            let item = OperationItem {
                element_id: element.id.clone(),
                current_type: element.type_id.clone(),
                target_type: target_type.to_string(),
                properties: element.properties.clone(),
                metadata: element.metadata.clone(),
                conversion_path: self.resolver.resolve(&element.type_id, target_type),
                validation_result: None,
            };
            planned.push((item, element));
        }
        Ok((planned, missing))
    }

    /// Validate every planned item; returns false if the operation must fail
    fn validate(
        &self,
        operation_id: &str,
        planned: &mut Planned,
        missing: &[String],
        policy: InvalidItemPolicy,
    ) -> bool {
        for (item, _) in planned.iter_mut() {
            item.validation_result = Some(self.validator.validate_conversion(
                &item.element_id,
                &item.current_type,
                &item.target_type,
            ));
        }

        let mut invalid: Vec<(String, String)> = missing
            .iter()
            .map(|id| (id.clone(), "element not found".to_string()))
            .collect();
        invalid.extend(planned.iter().filter(|(item, _)| !item.is_valid()).map(|(item, _)| {
            let reason = item
                .validation_result
                .as_ref()
                .map(|v| v.errors.join("; "))
                .unwrap_or_default();
            (item.element_id.clone(), reason)
        }));

        let mut warnings: Vec<String> = Vec::new();
        for (item, _) in planned.iter().filter(|(item, _)| item.is_valid()) {
            for warning in item.validation_result.iter().flat_map(|v| &v.warnings) {
                if !warnings.contains(warning) {
                    warnings.push(warning.clone());
                }
            }
        }
        self.with_result(operation_id, |r| r.warnings.extend(warnings));

        if invalid.is_empty() {
            return true;
        }

        tracing::info!(operation_id, invalid = invalid.len(), ?policy, "Validation rejected elements");
        match policy {
            InvalidItemPolicy::FailFast => {
                self.with_result(operation_id, |r| {
                    for (id, reason) in &invalid {
                        r.errors.push(format!("{id}: {reason}"));
                        r.failed_element_ids.push(id.clone());
                    }
                });
                false
            }
            InvalidItemPolicy::SkipInvalid => {
                self.with_result(operation_id, |r| {
                    for (id, reason) in &invalid {
                        r.record_skipped(id, reason);
                    }
                });
                planned.retain(|(item, _)| item.is_valid());
                true
            }
        }
    }

    /// Store the pre-mutation snapshots as a rollback operation
    fn prepare_rollback(
        &self,
        operation_id: &str,
        target_type: &str,
        planned: &Planned,
        options: &BulkOptions,
    ) -> Result<(), EngineError> {
        let steps = planned
            .iter()
            .map(|(item, element)| {
                Ok(RollbackStep::new(
                    &item.element_id,
                    encode(element)?,
                    item.current_type.as_bytes().to_vec(),
                ))
            })
            .collect::<Result<Vec<_>, StoreError>>()?;

        let rollback = self.rollbacks.create_tagged(
            &format!("Bulk type change to {target_type}"),
            operation_id,
            steps,
            options.rollback_ttl,
            vec![BULK_TYPE_CHANGE.to_string(), target_type.to_string()],
        )?;

        let irreversible = planned
            .iter()
            .filter(|(item, _)| item.conversion_path.as_ref().is_some_and(|p| !p.is_reversible()))
            .count();
        self.with_result(operation_id, |r| {
            r.rollback_operation_id = Some(rollback.rollback_id);
            if irreversible > 0 {
                r.warnings.push(format!(
                    "{irreversible} conversions use irreversible rules; rollback restores stored snapshots"
                ));
            }
        });
        Ok(())
    }

    /// Run the mutator over the items and fold the batch result into the operation
    fn execute(&self, operation_id: &str, planned: Planned, options: &BulkOptions, cancel: &CancellationFlag) {
        let items: Vec<OperationItem> = planned.into_iter().map(|(item, _)| item).collect();
        let (base_failed, skipped) = self
            .operations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(operation_id)
            .map_or((0, 0), |a| (a.result.failed_items, a.result.skipped_items));

        self.report(
            operation_id,
            ProgressUpdate::new()
                .phase(Phase::Processing)
                .current_item(skipped + base_failed),
        );

        let on_progress = |p: &BatchProgress| {
            self.with_result(operation_id, |r| {
                r.successful_items = p.successful;
                r.failed_items = base_failed + p.failed;
                r.processed_items = r.successful_items + r.failed_items + r.skipped_items;
            });
            self.report(
                operation_id,
                ProgressUpdate::new()
                    .current_item(skipped + base_failed + p.processed)
                    .message(format!("Batch {}/{}", p.completed_batches, p.total_batches)),
            );
        };

        let mutator = &self.mutator;
        let batch = self.processor.process_with_cancel(
            items,
            |item| mutator.apply(item),
            &options.batch,
            Some(&on_progress),
            cancel,
        );

        for failure in &batch.failed {
            tracing::debug!(
                operation_id,
                element_id = %failure.item.element_id,
                attempts = failure.attempts,
                error = %failure.error,
                "Element conversion failed"
            );
        }

        self.with_result(operation_id, |r| {
            r.successful_items = batch.successful.len();
            r.failed_items = base_failed + batch.failed.len();
            r.processed_items = r.successful_items + r.failed_items + r.skipped_items;
            for failure in &batch.failed {
                r.errors.push(format!("{}: {}", failure.item.element_id, failure.error));
                r.failed_element_ids.push(failure.item.element_id.clone());
            }
            if !batch.unprocessed.is_empty() {
                r.warnings.push(format!(
                    "{} elements were not processed after cancellation",
                    batch.unprocessed.len()
                ));
            }
            if batch.timed_out {
                r.warnings.push("Time budget exceeded; remaining elements were not started".to_string());
            }
            if batch.statistics.pressure_events > 0 {
                r.warnings.push(format!(
                    "Memory limit exceeded {} times",
                    batch.statistics.pressure_events
                ));
            }
            r.statistics = Some(batch.statistics.clone());
            r.checkpoints.clone_from(&batch.checkpoints);
        });
    }

    fn register(
        &self,
        operation_id: &str,
        target_type: &str,
        total_items: usize,
    ) -> Result<CancellationFlag, EngineError> {
        if self.load_archived(operation_id)?.is_some() {
            return Err(EngineError::DuplicateOperation(operation_id.to_string()));
        }

        let cancel = CancellationFlag::new();
        {
            let mut operations = self.operations.write().unwrap_or_else(PoisonError::into_inner);
            if operations.contains_key(operation_id) {
                return Err(EngineError::DuplicateOperation(operation_id.to_string()));
            }
            operations.insert(
                operation_id.to_string(),
                ActiveOperation {
                    result: BulkOperationResult::new(operation_id.to_string(), target_type, total_items),
                    cancel: cancel.clone(),
                },
            );
        }

        if let Err(e) = self.progress.start(operation_id, BULK_TYPE_CHANGE, total_items) {
            self.operations
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(operation_id);
            return Err(e.into());
        }
        Ok(cancel)
    }

    /// Move a pending operation to running; false if it was cancelled first
    fn begin(&self, operation_id: &str) -> bool {
        self.operations
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(operation_id)
            .is_some_and(|active| active.result.transition(OperationStatus::Running).is_ok())
    }

    fn finish(&self, operation_id: &str, status: OperationStatus) -> Result<BulkOperationResult, EngineError> {
        let result = {
            let mut operations = self.operations.write().unwrap_or_else(PoisonError::into_inner);
            let active = operations
                .get_mut(operation_id)
                .ok_or_else(|| EngineError::UnknownOperation(operation_id.to_string()))?;
            active
                .result
                .transition(status)
                .map_err(|(from, to)| EngineError::InvalidTransition {
                    operation_id: operation_id.to_string(),
                    from,
                    to,
                })?;
            active.result.clone()
        };
        self.publish_terminal(&result);
        Ok(result)
    }

    /// Complete progress and archive a result that just became terminal
    fn publish_terminal(&self, result: &BulkOperationResult) {
        let phase = match result.status {
            OperationStatus::Failed => Phase::Failed,
            OperationStatus::Cancelled => Phase::Cancelled,
            _ => Phase::Completed,
        };
        if let Err(e) = self.progress.complete(&result.operation_id, phase) {
            tracing::debug!(operation_id = %result.operation_id, error = %e, "Progress already finished");
        }
        if !result.dry_run
            && let Err(e) = self.archive(result)
        {
            tracing::error!(operation_id = %result.operation_id, error = %e, "Failed to archive result");
        }

        tracing::info!(
            operation_id = %result.operation_id,
            status = %result.status,
            processed = result.processed_items,
            successful = result.successful_items,
            failed = result.failed_items,
            skipped = result.skipped_items,
            "Bulk operation finished"
        );
    }

    fn mark_rolled_back(&self, loaded: BulkOperationResult) -> Result<BulkOperationResult, EngineError> {
        let operation_id = loaded.operation_id.clone();
        let to_invalid = |(from, to): (OperationStatus, OperationStatus)| EngineError::InvalidTransition {
            operation_id: operation_id.clone(),
            from,
            to,
        };

        let in_memory = {
            let mut operations = self.operations.write().unwrap_or_else(PoisonError::into_inner);
            match operations.get_mut(&operation_id) {
                Some(active) => {
                    active
                        .result
                        .transition(OperationStatus::RolledBack)
                        .map_err(to_invalid)?;
                    Some(active.result.clone())
                }
                None => None,
            }
        };

        let result = match in_memory {
            Some(result) => result,
            None => {
                let mut result = loaded;
                result
                    .transition(OperationStatus::RolledBack)
                    .map_err(to_invalid)?;
                result
            }
        };

        if let Err(e) = self.archive(&result) {
            tracing::error!(operation_id = %operation_id, error = %e, "Failed to archive rolled back result");
        }
        Ok(result)
    }

    fn archive(&self, result: &BulkOperationResult) -> Result<(), StoreError> {
        self.store.put(
            RecordKey::new(Namespace::Operation, &result.operation_id).as_str(),
            &encode(result)?,
        )
    }

    fn load_archived(&self, operation_id: &str) -> Result<Option<BulkOperationResult>, EngineError> {
        let key = RecordKey::new(Namespace::Operation, operation_id);
        Ok(self
            .store
            .get(key.as_str())?
            .map(|blob| decode(&blob))
            .transpose()?)
    }

    fn with_result(&self, operation_id: &str, update: impl FnOnce(&mut BulkOperationResult)) {
        if let Some(active) = self
            .operations
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(operation_id)
        {
            update(&mut active.result);
        }
    }

    fn report(&self, operation_id: &str, update: ProgressUpdate) {
        if let Err(e) = self.progress.update(operation_id, update) {
            tracing::debug!(operation_id, error = %e, "Progress update ignored");
        }
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
