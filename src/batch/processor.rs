//! Chunked execution of per-item work across the processing modes

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use rayon::prelude::*;

use super::memory::{MemoryProbe, SystemProbe};
use super::options::{BatchOptions, BatchStrategy, MAX_BATCH_SIZE, MIN_BATCH_SIZE, ProcessingMode};
use super::result::{BatchProgress, BatchResult, BatchStatistics, Checkpoint, ItemFailure};
use super::retry::{RetryOutcome, RetryPolicy};
use super::{BatchError, CancellationFlag};

/// Memory is sampled once per this many completed batches
pub const MEMORY_SAMPLE_INTERVAL: usize = 10;

/// Items in the probe batch used by the time-based strategy
pub const TIME_PROBE_ITEMS: usize = 10;

/// Duration the time-based strategy aims for per batch
pub const TARGET_BATCH_DURATION: Duration = Duration::from_secs(2);

/// Hook invoked when sampled memory exceeds the limit
pub type PressureRelief = Arc<dyn Fn() + Send + Sync>;

/// Progress callback invoked after every batch
pub type ProgressFn<'a> = dyn Fn(&BatchProgress) + Sync + 'a;

type Indexed<T> = Vec<(usize, T)>;

/// Splits items into batches and runs per-item work over them
pub struct BatchProcessor {
    probe: Arc<dyn MemoryProbe>,
    relief: Option<PressureRelief>,
}

impl Default for BatchProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchProcessor {
    #[must_use]
    pub fn new() -> Self {
        Self {
            probe: Arc::new(SystemProbe),
            relief: None,
        }
    }

    #[must_use]
    pub fn with_probe(mut self, probe: Arc<dyn MemoryProbe>) -> Self {
        self.probe = probe;
        self
    }

    #[must_use]
    pub fn with_pressure_relief(mut self, relief: PressureRelief) -> Self {
        self.relief = Some(relief);
        self
    }

    #[must_use]
    pub fn probe(&self) -> &dyn MemoryProbe {
        self.probe.as_ref()
    }

    /// Run `work` over every item
    pub fn process<T, E, F>(
        &self,
        items: Vec<T>,
        work: F,
        options: &BatchOptions,
        on_progress: Option<&ProgressFn<'_>>,
    ) -> BatchResult<T, E>
    where
        T: Send + Sync,
        E: Send + From<BatchError>,
        F: Fn(&T) -> Result<(), E> + Sync,
    {
        self.process_with_cancel(items, work, options, on_progress, &CancellationFlag::new())
    }

    /// Run `work` over every item, stopping between batches once `cancel` is raised
    ///
    /// A failing item never aborts its siblings. Batches not started because of
    /// cancellation come back in `unprocessed`; batches not started because the
    /// time budget ran out are reported as failed with
    /// [`BatchError::TimeBudgetExceeded`].
    pub fn process_with_cancel<T, E, F>(
        &self,
        items: Vec<T>,
        work: F,
        options: &BatchOptions,
        on_progress: Option<&ProgressFn<'_>>,
        cancel: &CancellationFlag,
    ) -> BatchResult<T, E>
    where
        T: Send + Sync,
        E: Send + From<BatchError>,
        F: Fn(&T) -> Result<(), E> + Sync,
    {
        let plan = options.optimized(self.probe.as_ref());
        let total_items = items.len();
        let started = Instant::now();

        let statistics = BatchStatistics {
            total_batches: plan.batch_count(total_items),
            effective_batch_size: plan.batch_size,
            workers: plan.max_workers,
            ..BatchStatistics::default()
        };
        tracing::debug!(
            total_items,
            batch_size = plan.batch_size,
            workers = plan.max_workers,
            mode = ?plan.processing_mode,
            strategy = ?plan.batch_strategy,
            "Starting batch run"
        );

        let run = Run {
            work: &work,
            policy: RetryPolicy::new(plan.retry_attempts, plan.retry_delay),
            cancel,
            total_items,
            deadline: plan.timeout.and_then(|t| started.checked_add(t)),
            budget: plan.timeout,
            started,
            options: &plan,
            probe: self.probe.as_ref(),
            relief: self.relief.as_ref(),
            on_progress,
            acc: Mutex::new(Accumulator::new(statistics)),
        };

        let mut indexed: Indexed<T> = items.into_iter().enumerate().collect();

        if plan.batch_strategy == BatchStrategy::TimeBased && total_items > 0 {
            let probe_len = TIME_PROBE_ITEMS.min(plan.batch_size.max(1)).min(total_items);
            let rest = indexed.split_off(probe_len);

            let probe_started = Instant::now();
            run.execute_batch(0, indexed);
            let per_item = probe_started.elapsed() / u32::try_from(probe_len).unwrap_or(u32::MAX);

            let size = time_based_batch_size(per_item);
            let batches = chunk(rest, size, 1);
            run.resize(1 + batches.len(), size);
            tracing::debug!(
                per_item_us = per_item.as_micros() as u64,
                batch_size = size,
                "Time-based batch size resolved"
            );

            run.dispatch(batches);
        } else {
            run.dispatch(chunk(indexed, plan.batch_size, 0));
        }

        run.finish()
    }
}

/// Batch size that makes one batch take about [`TARGET_BATCH_DURATION`]
#[must_use]
pub fn time_based_batch_size(per_item: Duration) -> usize {
    if per_item.is_zero() {
        return MAX_BATCH_SIZE;
    }
    let size = TARGET_BATCH_DURATION.as_nanos() / per_item.as_nanos();
    usize::try_from(size)
        .unwrap_or(MAX_BATCH_SIZE)
        .clamp(MIN_BATCH_SIZE, MAX_BATCH_SIZE)
}

fn chunk<T>(items: Indexed<T>, size: usize, first_index: usize) -> Vec<(usize, Indexed<T>)> {
    let size = size.max(1);
    let mut batches = Vec::with_capacity(items.len().div_ceil(size));
    let mut current = Vec::with_capacity(size);
    for entry in items {
        current.push(entry);
        if current.len() == size {
            batches.push(std::mem::replace(&mut current, Vec::with_capacity(size)));
        }
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
        .into_iter()
        .enumerate()
        .map(|(i, batch)| (first_index + i, batch))
        .collect()
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "worker panicked".to_string())
}

#[derive(Debug, Clone, Copy)]
enum Stop {
    Cancelled,
    TimedOut,
}

struct Accumulator<T, E> {
    successful: Indexed<T>,
    failed: Indexed<ItemFailure<T, E>>,
    unprocessed: Indexed<T>,
    checkpoints: Vec<Checkpoint>,
    statistics: BatchStatistics,
    cancelled: bool,
    timed_out: bool,
}

impl<T, E> Accumulator<T, E> {
    fn new(statistics: BatchStatistics) -> Self {
        Self {
            successful: Vec::new(),
            failed: Vec::new(),
            unprocessed: Vec::new(),
            checkpoints: Vec::new(),
            statistics,
            cancelled: false,
            timed_out: false,
        }
    }

    fn processed(&self) -> usize {
        self.successful.len() + self.failed.len()
    }
}

/// State shared by every worker of one `process` call
struct Run<'a, T, E, F> {
    work: &'a F,
    policy: RetryPolicy,
    cancel: &'a CancellationFlag,
    total_items: usize,
    deadline: Option<Instant>,
    budget: Option<Duration>,
    started: Instant,
    options: &'a BatchOptions,
    probe: &'a dyn MemoryProbe,
    relief: Option<&'a PressureRelief>,
    on_progress: Option<&'a ProgressFn<'a>>,
    acc: Mutex<Accumulator<T, E>>,
}

impl<T, E, F> Run<'_, T, E, F>
where
    T: Send + Sync,
    E: Send + From<BatchError>,
    F: Fn(&T) -> Result<(), E> + Sync,
{
    fn lock(&self) -> MutexGuard<'_, Accumulator<T, E>> {
        self.acc.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn stop_reason(&self) -> Option<Stop> {
        if self.cancel.is_cancelled() {
            Some(Stop::Cancelled)
        } else if self.deadline.is_some_and(|d| Instant::now() >= d) {
            Some(Stop::TimedOut)
        } else {
            None
        }
    }

    fn resize(&self, total_batches: usize, batch_size: usize) {
        let mut acc = self.lock();
        acc.statistics.total_batches = total_batches;
        acc.statistics.effective_batch_size = batch_size;
    }

    fn dispatch(&self, batches: Vec<(usize, Indexed<T>)>) {
        match self.options.processing_mode {
            ProcessingMode::Sequential => {
                for (index, batch) in batches {
                    self.execute_batch(index, batch);
                }
            }
            ProcessingMode::Concurrent | ProcessingMode::Hybrid => {
                match rayon::ThreadPoolBuilder::new()
                    .num_threads(self.options.max_workers.max(1))
                    .build()
                {
                    Ok(pool) => pool.install(|| {
                        batches
                            .into_par_iter()
                            .for_each(|(index, batch)| self.execute_batch(index, batch));
                    }),
                    Err(e) => {
                        tracing::warn!(error = %e, "Worker pool unavailable, running sequentially");
                        for (index, batch) in batches {
                            self.execute_batch(index, batch);
                        }
                    }
                }
            }
            ProcessingMode::IsolatedProcess => self.dispatch_isolated(batches),
        }
    }

    /// Run waves of `max_workers` batches, each on its own worker thread
    ///
    /// A panicking worker fails every item of its batch with
    /// [`BatchError::WorkerCrashed`]; the other batches are unaffected.
    fn dispatch_isolated(&self, batches: Vec<(usize, Indexed<T>)>) {
        let workers = self.options.max_workers.max(1);
        let mut pending = batches.into_iter();

        loop {
            let wave: Vec<_> = pending.by_ref().take(workers).collect();
            if wave.is_empty() {
                break;
            }

            let mut started = Vec::with_capacity(wave.len());
            for (index, batch) in wave {
                match self.stop_reason() {
                    Some(stop) => self.skip(batch, stop),
                    None => started.push((index, batch)),
                }
            }

            let joined: Vec<thread::Result<Vec<RetryOutcome<(), E>>>> = thread::scope(|s| {
                let handles: Vec<_> = started
                    .iter()
                    .map(|(_, batch)| s.spawn(move || self.run_items(batch)))
                    .collect();
                handles.into_iter().map(|h| h.join()).collect()
            });

            for ((index, batch), outcome) in started.into_iter().zip(joined) {
                let outcomes = outcome.unwrap_or_else(|payload| {
                    let reason = panic_message(payload.as_ref());
                    tracing::error!(batch_index = index, %reason, "Isolated worker crashed");
                    batch
                        .iter()
                        .map(|_| RetryOutcome {
                            result: Err(E::from(BatchError::WorkerCrashed {
                                batch_index: index,
                                reason: reason.clone(),
                            })),
                            attempts: 1,
                        })
                        .collect()
                });
                self.record(index, batch, outcomes);
            }
        }
    }

    fn execute_batch(&self, index: usize, batch: Indexed<T>) {
        if let Some(stop) = self.stop_reason() {
            self.skip(batch, stop);
            return;
        }
        let outcomes = self.run_items_contained(index, &batch);
        self.record(index, batch, outcomes);
    }

    /// Like [`Self::run_items`], but a panicking item fails on its own with
    /// [`BatchError::WorkerCrashed`] instead of unwinding into the caller
    fn run_items_contained(&self, index: usize, batch: &[(usize, T)]) -> Vec<RetryOutcome<(), E>> {
        batch
            .iter()
            .map(|(_, item)| {
                panic::catch_unwind(AssertUnwindSafe(|| {
                    self.policy.run(self.cancel, |_| (self.work)(item))
                }))
                .unwrap_or_else(|payload| {
                    let reason = panic_message(payload.as_ref());
                    tracing::error!(batch_index = index, %reason, "Item work panicked");
                    RetryOutcome {
                        result: Err(E::from(BatchError::WorkerCrashed {
                            batch_index: index,
                            reason,
                        })),
                        attempts: 1,
                    }
                })
            })
            .collect()
    }

    fn run_items(&self, batch: &[(usize, T)]) -> Vec<RetryOutcome<(), E>> {
        batch
            .iter()
            .map(|(_, item)| self.policy.run(self.cancel, |_| (self.work)(item)))
            .collect()
    }

    fn skip(&self, batch: Indexed<T>, stop: Stop) {
        let mut acc = self.lock();
        match stop {
            Stop::Cancelled => {
                acc.cancelled = true;
                acc.unprocessed.extend(batch);
            }
            Stop::TimedOut => {
                let budget_ms = self.budget.unwrap_or_default().as_millis();
                acc.timed_out = true;
                acc.failed.extend(batch.into_iter().map(|(index, item)| {
                    (
                        index,
                        ItemFailure {
                            item,
                            error: E::from(BatchError::TimeBudgetExceeded { budget_ms }),
                            attempts: 0,
                        },
                    )
                }));
            }
        }
    }

    fn record(&self, index: usize, batch: Indexed<T>, outcomes: Vec<RetryOutcome<(), E>>) {
        let mut acc = self.lock();
        let mut batch_failed = 0;

        for ((position, item), outcome) in batch.into_iter().zip(outcomes) {
            match outcome.result {
                Ok(()) => acc.successful.push((position, item)),
                Err(error) => {
                    batch_failed += 1;
                    acc.failed.push((
                        position,
                        ItemFailure {
                            item,
                            error,
                            attempts: outcome.attempts,
                        },
                    ));
                }
            }
        }

        acc.statistics.completed_batches += 1;
        self.update_rates(&mut acc);
        tracing::debug!(batch_index = index, failed = batch_failed, "Batch completed");

        let completed = acc.statistics.completed_batches;
        let interval = self.options.checkpoint_interval;
        if interval > 0 && completed % interval == 0 {
            let checkpoint = Checkpoint {
                batch_index: index,
                timestamp: Utc::now(),
                processed: acc.processed(),
                successful: acc.successful.len(),
                failed: acc.failed.len(),
            };
            tracing::debug!(batch_index = index, processed = checkpoint.processed, "Checkpoint");
            acc.checkpoints.push(checkpoint);
        }

        if completed % MEMORY_SAMPLE_INTERVAL == 0 {
            self.sample_memory(&mut acc.statistics);
        }

        if let Some(on_progress) = self.on_progress {
            let progress = BatchProgress {
                batch_index: index,
                completed_batches: completed,
                total_batches: acc.statistics.total_batches,
                processed: acc.processed(),
                successful: acc.successful.len(),
                failed: acc.failed.len(),
                total_items: self.total_items,
                processing_rate: acc.statistics.processing_rate,
                estimated_time_remaining: acc.statistics.estimated_time_remaining,
            };
            on_progress(&progress);
        }
    }

    /// Items neither attempted nor set aside yet
    fn remaining(&self, acc: &Accumulator<T, E>) -> usize {
        self.total_items
            .saturating_sub(acc.processed() + acc.unprocessed.len())
    }

    fn update_rates(&self, acc: &mut Accumulator<T, E>) {
        let elapsed = self.started.elapsed();
        let processed = acc.processed();
        let remaining = self.remaining(acc);
        let secs = elapsed.as_secs_f64();

        acc.statistics.elapsed = elapsed;
        acc.statistics.processing_rate = if secs > 0.0 {
            processed as f64 / secs
        } else {
            0.0
        };
        acc.statistics.estimated_time_remaining = if remaining == 0 {
            Some(Duration::ZERO)
        } else if acc.statistics.processing_rate > 0.0 {
            Duration::try_from_secs_f64(remaining as f64 / acc.statistics.processing_rate).ok()
        } else {
            None
        };
    }

    fn sample_memory(&self, statistics: &mut BatchStatistics) {
        let Some(resident) = self.probe.process_memory() else {
            return;
        };
        statistics.memory_samples += 1;
        statistics.peak_memory = Some(statistics.peak_memory.map_or(resident, |p| p.max(resident)));

        let limit = self.options.memory_limit;
        if resident > limit {
            let overage = resident - limit;
            statistics.memory_overage = statistics.memory_overage.max(overage);
            statistics.pressure_events += 1;
            tracing::warn!(resident, limit, overage, "Memory limit exceeded");
            if let Some(relief) = self.relief {
                relief();
            }
        }
    }

    fn finish(self) -> BatchResult<T, E> {
        let preserve_order = self.options.preserve_order;
        let mut acc = self.acc.into_inner().unwrap_or_else(PoisonError::into_inner);

        if preserve_order {
            acc.successful.sort_by_key(|(index, _)| *index);
            acc.failed.sort_by_key(|(index, _)| *index);
            acc.unprocessed.sort_by_key(|(index, _)| *index);
        }

        acc.statistics.elapsed = self.started.elapsed();
        if acc.cancelled {
            tracing::info!(unprocessed = acc.unprocessed.len(), "Batch run cancelled");
        }
        if acc.timed_out {
            tracing::warn!("Batch run exceeded its time budget");
        }

        BatchResult {
            successful: acc.successful.into_iter().map(|(_, item)| item).collect(),
            failed: acc.failed.into_iter().map(|(_, failure)| failure).collect(),
            unprocessed: acc.unprocessed.into_iter().map(|(_, item)| item).collect(),
            checkpoints: acc.checkpoints,
            statistics: acc.statistics,
            total_items: self.total_items,
            cancelled: acc.cancelled,
            timed_out: acc.timed_out,
        }
    }
}

#[cfg(test)]
#[path = "processor_tests.rs"]
mod tests;
