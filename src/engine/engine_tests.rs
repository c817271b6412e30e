use super::*;
use crate::batch::{BatchOptions, ProcessingMode};
use crate::progress::Phase;
use crate::store::{ElementRepository, PropertyValue};
use crate::testing::EngineHarness;
use std::collections::HashSet;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

fn options(batch_size: usize) -> BulkOptions {
    BulkOptions {
        batch: BatchOptions {
            batch_size,
            processing_mode: ProcessingMode::Sequential,
            retry_attempts: 1,
            retry_delay: Duration::ZERO,
            ..BatchOptions::default()
        },
        ..BulkOptions::default()
    }
}

fn with_id(mut options: BulkOptions, id: &str) -> BulkOptions {
    options.operation_id = Some(id.to_string());
    options
}

/// Fails every listed element, converts the rest
struct FailingFor {
    inner: Arc<ElementRepository>,
    ids: HashSet<String>,
}

impl FailingFor {
    fn new(inner: Arc<ElementRepository>, ids: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            inner,
            ids: ids.iter().map(|id| (*id).to_string()).collect(),
        })
    }
}

impl Mutator for FailingFor {
    fn apply(&self, item: &OperationItem) -> Result<(), MutationError> {
        if self.ids.contains(&item.element_id) {
            return Err(MutationError::Rejected("scripted failure".into()));
        }
        self.inner.apply(item)
    }
}

/// Blocks on its first item until released
struct GatedMutator {
    inner: Arc<ElementRepository>,
    started: Mutex<Option<mpsc::Sender<()>>>,
    gate: Mutex<mpsc::Receiver<()>>,
}

impl Mutator for GatedMutator {
    fn apply(&self, item: &OperationItem) -> Result<(), MutationError> {
        if let Some(started) = self.started.lock().unwrap().take() {
            started.send(()).unwrap();
            self.gate.lock().unwrap().recv().unwrap();
        }
        self.inner.apply(item)
    }
}

/// Panics on the listed elements
struct PanicsOn {
    inner: Arc<ElementRepository>,
    ids: HashSet<String>,
}

impl Mutator for PanicsOn {
    fn apply(&self, item: &OperationItem) -> Result<(), MutationError> {
        assert!(!self.ids.contains(&item.element_id), "mutator blew up");
        self.inner.apply(item)
    }
}

#[test]
fn test_converts_every_element_in_three_batches() {
    let h = EngineHarness::new();
    let ids = h.seed("t", "text", 250);

    let result = h.engine.submit(&ids, "title", &options(100)).unwrap();

    assert_eq!(result.status, OperationStatus::Completed);
    assert_eq!(result.total_items, 250);
    assert_eq!(result.successful_items, 250);
    assert_eq!(result.processed_items, 250);
    assert!(!result.is_partial());
    let statistics = result.statistics.as_ref().unwrap();
    assert_eq!(statistics.total_batches, 3);
    assert_eq!(statistics.completed_batches, 3);
    assert!(result.end_time.is_some());

    let converted = h.element("t-42");
    assert_eq!(converted.type_id, "title");
    assert_eq!(
        converted.properties.get("heading"),
        Some(&PropertyValue::Text("content 42".into()))
    );
    assert!(result.warnings.contains(&"titles are limited to one line".to_string()));
}

#[test]
fn test_rejects_malformed_requests() {
    let h = EngineHarness::new();
    let ids = h.seed("t", "text", 1);

    assert!(matches!(
        h.engine.submit(&[], "title", &options(10)),
        Err(EngineError::EmptyRequest)
    ));
    assert!(matches!(
        h.engine.submit(&ids, "paragraph", &options(10)),
        Err(EngineError::UnknownTargetType(t)) if t == "paragraph"
    ));
    assert_eq!(h.element("t-0").type_id, "text");
}

#[test]
fn test_invalid_items_are_skipped() {
    let h = EngineHarness::new();
    let mut ids = h.seed("t", "text", 3);
    ids.extend(h.seed("i", "image", 2));
    ids.push("ghost".into());

    let result = h.engine.submit(&ids, "title", &options(10)).unwrap();

    assert_eq!(result.status, OperationStatus::Completed);
    assert_eq!(result.successful_items, 3);
    assert_eq!(result.skipped_items, 3);
    assert_eq!(result.failed_items, 0);
    assert_eq!(result.processed_items, 6);
    assert_eq!(h.element("i-0").type_id, "image");
    assert!(result.warnings.iter().any(|w| w.starts_with("ghost: skipped")));
    assert_eq!(result.impact.as_ref().unwrap().unconvertible, 2);
}

#[test]
fn test_fail_fast_mutates_nothing() {
    let h = EngineHarness::new();
    let mut ids = h.seed("t", "text", 3);
    ids.extend(h.seed("i", "image", 1));

    let mut opts = options(10);
    opts.invalid_items = InvalidItemPolicy::FailFast;
    let result = h.engine.submit(&ids, "title", &opts).unwrap();

    assert_eq!(result.status, OperationStatus::Failed);
    assert_eq!(result.failed_element_ids, vec!["i-0".to_string()]);
    assert!(result.rollback_operation_id.is_none());
    assert_eq!(h.element("t-0").type_id, "text");
}

#[test]
fn test_missing_elements_fail_without_validation() {
    let h = EngineHarness::new();
    let mut ids = h.seed("t", "text", 2);
    ids.push("ghost".into());

    let mut opts = options(10);
    opts.validate_before_execution = false;
    let result = h.engine.submit(&ids, "title", &opts).unwrap();

    assert!(result.is_partial());
    assert_eq!(result.failed_element_ids, vec!["ghost".to_string()]);
    assert_eq!(result.processed_items, 3);
}

#[test]
fn test_all_items_skipped_fails() {
    let h = EngineHarness::new();
    let ids = h.seed("i", "image", 2);

    let result = h.engine.submit(&ids, "title", &options(10)).unwrap();
    assert_eq!(result.status, OperationStatus::Failed);
    assert_eq!(result.skipped_items, 2);
}

#[test]
fn test_dry_run_writes_nothing() {
    let h = EngineHarness::new();
    let ids = h.seed("t", "text", 20);
    let puts_before = h.counting.puts();

    let mut opts = options(5);
    opts.dry_run = true;
    let result = h.engine.submit(&ids, "title", &opts).unwrap();

    assert_eq!(result.status, OperationStatus::Completed);
    assert!(result.dry_run);
    assert_eq!(result.impact.as_ref().unwrap().convertible, 20);
    assert!(result.warnings.iter().any(|w| w.starts_with("Dry run")));
    assert_eq!(h.counting.puts(), puts_before);
    assert_eq!(h.element("t-0").type_id, "text");
    assert!(h.engine.rollbacks().list().is_empty());
}

#[test]
fn test_rollback_restores_elements() {
    let h = EngineHarness::new();
    let ids = h.seed("t", "text", 12);

    let result = h.engine.submit(&ids, "title", &options(5)).unwrap();
    assert!(result.rollback_operation_id.is_some());
    assert_eq!(h.element("t-3").type_id, "title");

    let report = h.engine.rollback(&result.operation_id).unwrap();
    assert_eq!(report.state.successful_steps, 12);
    assert_eq!(report.result.status, OperationStatus::RolledBack);

    let restored = h.element("t-3");
    assert_eq!(restored.type_id, "text");
    assert_eq!(
        restored.properties.get("body"),
        Some(&PropertyValue::Text("content 3".into()))
    );
    assert!(restored.properties.get("heading").is_none());

    let status = h.engine.get_status(&result.operation_id).unwrap().unwrap();
    assert_eq!(status.status, OperationStatus::RolledBack);
    assert!(matches!(
        h.engine.rollback(&result.operation_id),
        Err(EngineError::InvalidTransition { from: OperationStatus::RolledBack, .. })
    ));
}

#[test]
fn test_rollback_requires_record() {
    let h = EngineHarness::new();
    let ids = h.seed("t", "text", 2);

    let mut opts = options(10);
    opts.enable_rollback = false;
    let result = h.engine.submit(&ids, "title", &opts).unwrap();

    assert!(matches!(
        h.engine.rollback(&result.operation_id),
        Err(EngineError::RollbackUnavailable(_))
    ));
    assert!(matches!(
        h.engine.rollback("nope"),
        Err(EngineError::UnknownOperation(_))
    ));
}

#[test]
fn test_item_failures_give_partial_success() {
    let h = EngineHarness::new();
    let ids = h.seed("t", "text", 5);
    let engine = h.engine_with(FailingFor::new(h.elements.clone(), &["t-2"]));

    let result = engine.submit(&ids, "title", &options(2)).unwrap();

    assert_eq!(result.status, OperationStatus::Completed);
    assert!(result.is_partial());
    assert_eq!(result.successful_items, 4);
    assert_eq!(result.failed_items, 1);
    assert_eq!(result.failed_element_ids, vec!["t-2".to_string()]);
    assert!(result.errors[0].contains("scripted failure"));
    assert!(result.warnings.contains(&"Completed with 1 failed elements".to_string()));
    assert_eq!(h.element("t-2").type_id, "text");
}

#[test]
fn test_all_failures_fail_the_operation() {
    let h = EngineHarness::new();
    let ids = h.seed("t", "text", 2);
    let engine = h.engine_with(FailingFor::new(h.elements.clone(), &["t-0", "t-1"]));

    let result = engine.submit(&ids, "title", &options(10)).unwrap();
    assert_eq!(result.status, OperationStatus::Failed);
    assert_eq!(result.failed_items, 2);
    assert!(matches!(
        engine.rollback(&result.operation_id),
        Err(EngineError::InvalidTransition { from: OperationStatus::Failed, .. })
    ));
}

#[test]
fn test_duplicate_ids_and_operations() {
    let h = EngineHarness::new();
    let ids = h.seed("t", "text", 2);
    let request = vec![ids[0].clone(), ids[0].clone(), ids[1].clone()];

    let result = h
        .engine
        .submit(&request, "title", &with_id(options(10), "op-1"))
        .unwrap();
    assert_eq!(result.total_items, 2);
    assert!(result.warnings.contains(&"1 duplicate element ids ignored".to_string()));

    assert!(matches!(
        h.engine.submit(&ids, "code", &with_id(options(10), "op-1")),
        Err(EngineError::DuplicateOperation(_))
    ));

    h.engine.forget_finished();
    assert!(matches!(
        h.engine.submit(&ids, "code", &with_id(options(10), "op-1")),
        Err(EngineError::DuplicateOperation(_))
    ));
}

#[test]
fn test_status_survives_forgetting() {
    let h = EngineHarness::new();
    let ids = h.seed("t", "text", 3);
    let result = h
        .engine
        .submit(&ids, "title", &with_id(options(10), "op-archived"))
        .unwrap();

    assert_eq!(h.engine.forget_finished(), 1);
    assert!(h.engine.active_operations().is_empty());

    let archived = h.engine.get_status("op-archived").unwrap().unwrap();
    assert_eq!(archived, result);
    assert_eq!(h.engine.archived_operations().unwrap().len(), 1);
    assert!(h.engine.get_status("missing").unwrap().is_none());
}

#[test]
fn test_cancel_errors() {
    let h = EngineHarness::new();
    let ids = h.seed("t", "text", 1);
    h.engine
        .submit(&ids, "title", &with_id(options(10), "done"))
        .unwrap();

    assert!(matches!(
        h.engine.cancel("unknown"),
        Err(EngineError::UnknownOperation(_))
    ));
    assert!(matches!(
        h.engine.cancel("done"),
        Err(EngineError::InvalidTransition { from: OperationStatus::Completed, .. })
    ));

    h.engine.forget_finished();
    assert!(matches!(
        h.engine.cancel("done"),
        Err(EngineError::InvalidTransition { .. })
    ));
}

#[test]
fn test_cancel_running_operation() {
    let h = EngineHarness::new();
    let ids = h.seed("t", "text", 50);
    let (started_tx, started_rx) = mpsc::channel();
    let (gate_tx, gate_rx) = mpsc::channel();
    let engine = h.engine_with(Arc::new(GatedMutator {
        inner: h.elements.clone(),
        started: Mutex::new(Some(started_tx)),
        gate: Mutex::new(gate_rx),
    }));

    let result = thread::scope(|scope| {
        let submit = scope.spawn(|| {
            engine
                .submit(&ids, "title", &with_id(options(10), "op-cancel"))
                .unwrap()
        });

        started_rx.recv().unwrap();
        assert_eq!(engine.cancel("op-cancel").unwrap(), OperationStatus::Running);
        gate_tx.send(()).unwrap();
        submit.join().unwrap()
    });

    assert_eq!(result.status, OperationStatus::Cancelled);
    assert_eq!(result.successful_items, 10);
    assert_eq!(result.processed_items, 10);
    assert!(
        result
            .warnings
            .contains(&"40 elements were not processed after cancellation".to_string())
    );
    assert_eq!(h.element("t-49").type_id, "text");
}

#[test]
fn test_progress_phases_reach_completion() {
    let h = EngineHarness::new();
    let ids = h.seed("t", "text", 30);
    let phases = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&phases);
    h.engine.progress().subscribe("op-progress", move |p| {
        seen.lock().unwrap().push((p.phase, p.current_item));
        Ok(())
    });

    h.engine
        .submit(&ids, "title", &with_id(options(10), "op-progress"))
        .unwrap();

    let phases = phases.lock().unwrap();
    let order: Vec<Phase> = phases.iter().map(|(phase, _)| *phase).collect();
    for expected in [Phase::Analyzing, Phase::Validating, Phase::Processing, Phase::Finalizing] {
        assert!(order.contains(&expected), "missing {expected}");
    }
    assert_eq!(order.last(), Some(&Phase::Completed));
    assert!(phases.iter().any(|(_, current)| *current == 30));

    let progress = h.engine.progress().get("op-progress").unwrap();
    assert!(progress.is_finished());
}

#[test]
fn test_operation_is_archived_under_its_key() {
    let h = EngineHarness::new();
    let ids = h.seed("t", "text", 2);
    h.engine
        .submit(&ids, "title", &with_id(options(10), "op-key"))
        .unwrap();

    assert_eq!(h.counting.puts_with_prefix("operation/op-key"), 1);
    assert_eq!(h.counting.puts_with_prefix("rollback/op/"), 1);
}

#[test]
fn test_panicking_mutator_fails_only_its_element() {
    let h = EngineHarness::new();
    let ids = h.seed("t", "text", 5);
    let engine = h.engine_with(Arc::new(PanicsOn {
        inner: h.elements.clone(),
        ids: HashSet::from(["t-1".to_string()]),
    }));

    let result = engine
        .submit(&ids, "title", &with_id(options(2), "op-panic"))
        .unwrap();

    assert_eq!(result.status, OperationStatus::Completed);
    assert_eq!(result.successful_items, 4);
    assert_eq!(result.failed_element_ids, vec!["t-1".to_string()]);
    assert!(result.errors[0].contains("mutator blew up"));
    assert!(engine.active_operations().is_empty());
    assert_eq!(
        engine.progress().get("op-panic").unwrap().phase,
        Phase::Completed
    );
    assert_eq!(h.element("t-1").type_id, "text");
}
