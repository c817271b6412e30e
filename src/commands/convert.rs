//! `convert`: submit a bulk type change and report its result

use std::path::Path;

use colored::Colorize;
use dialoguer::Confirm;
use indicatif::{ProgressBar, ProgressStyle};
use uuid::Uuid;

use super::{Context, Result};
use crate::cli::{BatchArgs, BulkArgs};
use crate::engine::{BulkOperationResult, OperationStatus};
use crate::progress::{OperationProgress, SubscriberError};
use crate::RetypeError;

/// Element selection of a `convert` invocation
#[derive(Debug, Clone, Default)]
pub struct Selection<'a> {
    pub ids: &'a [String],
    pub from_type: Option<&'a str>,
    pub ids_file: Option<&'a Path>,
}

/// Convert the selected elements to `target_type`
///
/// # Errors
///
/// Returns `RetypeError` if nothing is selected, an option is invalid, the
/// user input cannot be read, or the engine rejects the request.
pub fn execute(
    ctx: &Context,
    target_type: &str,
    selection: &Selection<'_>,
    bulk: &BulkArgs,
    batch: &BatchArgs,
    json: bool,
) -> Result<Option<BulkOperationResult>> {
    let ids = collect_ids(ctx, selection)?;
    if ids.is_empty() {
        return Err(RetypeError::InvalidInput("No elements selected".into()));
    }

    let batch_options = batch.apply(&ctx.config.batch)?;
    let mut options = bulk.options(batch_options);

    if !bulk.dry_run && !bulk.yes && !ctx.quiet {
        let mut preview_options = options.clone();
        preview_options.dry_run = true;
        preview_options.operation_id = None;
        let preview = ctx.engine.submit(&ids, target_type, &preview_options)?;
        print_preview(&preview);

        let confirmed = Confirm::new()
            .with_prompt(format!("Convert {} element(s) to '{target_type}'?", ids.len()))
            .interact()
            .map_err(|e| RetypeError::InvalidInput(format!("Failed to get confirmation: {e}")))?;
        if !confirmed {
            println!("Operation cancelled.");
            return Ok(None);
        }
    }

    let operation_id = options
        .operation_id
        .get_or_insert_with(|| Uuid::new_v4().to_string())
        .clone();

    let bar = if ctx.quiet || json {
        ProgressBar::hidden()
    } else {
        progress_bar(ids.len())
    };
    ctx.engine
        .progress()
        .subscribe(&operation_id, drive_progress_bar(bar.clone()));

    let settings = &ctx.config;
    let tasks = [
        ctx.engine
            .progress()
            .spawn_heartbeat(settings.progress.heartbeat_interval())?,
        ctx.engine.progress().spawn_cleanup(
            settings.progress.cleanup_interval(),
            settings.progress.retention(),
        )?,
        ctx.engine
            .rollbacks()
            .spawn_expiry_sweep(settings.rollback.sweep_interval())?,
    ];
    let result = ctx.engine.submit(&ids, target_type, &options);
    for task in tasks {
        task.shutdown();
    }
    if !bar.is_finished() {
        bar.abandon();
    }
    let result = result?;

    if json {
        let rendered = serde_json::to_string_pretty(&result)
            .map_err(|e| RetypeError::InvalidInput(format!("Failed to render result: {e}")))?;
        println!("{rendered}");
    } else if ctx.quiet {
        println!("{}", result.operation_id);
    } else {
        print_result(&result);
    }
    Ok(Some(result))
}

fn progress_bar(total: usize) -> ProgressBar {
    let bar = ProgressBar::new(total as u64);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .map_or_else(|_| ProgressStyle::default_bar(), |style| style.progress_chars("█▓░"));
    bar.set_style(style);
    bar
}

/// Subscriber mirroring an operation's progress onto `bar`
fn drive_progress_bar(
    bar: ProgressBar,
) -> impl Fn(&OperationProgress) -> std::result::Result<(), SubscriberError> + Send + Sync + 'static {
    move |p| {
        bar.set_length(p.total_items as u64);
        bar.set_position(p.current_item as u64);
        match &p.message {
            Some(message) => bar.set_message(format!("{} {message}", p.phase)),
            None => bar.set_message(p.phase.to_string()),
        }
        if p.is_finished() {
            bar.finish_with_message(p.phase.to_string());
        }
        Ok(())
    }
}

fn collect_ids(ctx: &Context, selection: &Selection<'_>) -> Result<Vec<String>> {
    let mut ids = selection.ids.to_vec();

    if let Some(path) = selection.ids_file {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RetypeError::InvalidInput(format!("Failed to read {}: {}", path.display(), e))
        })?;
        ids.extend(
            content
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#'))
                .map(String::from),
        );
    }

    if let Some(type_id) = selection.from_type {
        ids.extend(ctx.elements.ids_of_type(type_id)?);
    }
    Ok(ids)
}

fn print_preview(preview: &BulkOperationResult) {
    println!("{}", "=== Preview ===".yellow().bold());
    if let Some(impact) = &preview.impact {
        println!("  Convertible:     {}", impact.convertible);
        println!("  Unconvertible:   {}", impact.unconvertible);
        println!("  Already target:  {}", impact.unchanged);
        if impact.unsafe_conversions > 0 {
            println!(
                "  {} {}",
                "Destructive:".red(),
                impact.unsafe_conversions
            );
        }
        println!("  Mean path cost:  {:.2}", impact.mean_path_cost);
        println!(
            "  Max data loss:   {:.0}%",
            impact.max_estimated_data_loss * 100.0
        );
    }
    if preview.skipped_items > 0 {
        println!("  Will skip:       {}", preview.skipped_items);
    }
    for warning in preview.warnings.iter().filter(|w| !w.starts_with("Dry run")).take(10) {
        println!("  {} {warning}", "!".yellow());
    }
    println!();
}

/// Print a colored summary of an operation result
pub fn print_result(result: &BulkOperationResult) {
    let status = match result.status {
        OperationStatus::Completed if result.is_partial() => "completed (partial)".yellow().bold(),
        OperationStatus::Completed => "completed".green().bold(),
        OperationStatus::RolledBack => "rolled back".cyan().bold(),
        OperationStatus::Failed => "failed".red().bold(),
        OperationStatus::Cancelled => "cancelled".yellow().bold(),
        OperationStatus::Pending | OperationStatus::Running => result.status.as_str().normal(),
    };

    if result.dry_run {
        println!("{}", "=== Dry Run Mode ===".yellow().bold());
    }
    println!("Operation {} {}", result.operation_id.bold(), status);
    println!("  Target type: {}", result.target_type);
    println!(
        "  Processed {}/{}: {} succeeded, {} failed, {} skipped",
        result.processed_items,
        result.total_items,
        result.successful_items.to_string().green(),
        result.failed_items.to_string().red(),
        result.skipped_items
    );
    if let Some(duration) = result.duration() {
        println!("  Duration: {:.2}s", duration.as_secs_f64());
    }
    if let Some(statistics) = &result.statistics {
        println!(
            "  Batches: {}/{} of {} on {} worker(s), {:.1} items/s",
            statistics.completed_batches,
            statistics.total_batches,
            statistics.effective_batch_size,
            statistics.workers,
            statistics.processing_rate
        );
    }
    if let Some(rollback_id) = &result.rollback_operation_id {
        println!("  Rollback: {rollback_id}");
    }
    for error in result.errors.iter().take(10) {
        println!("  {} {error}", "✗".red());
    }
    if result.errors.len() > 10 {
        println!("  ... and {} more errors", result.errors.len() - 10);
    }
    for warning in result.warnings.iter().take(10) {
        println!("  {} {warning}", "!".yellow());
    }
    if result.dry_run {
        println!("\n{}", "Run without --dry-run to apply changes.".yellow());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::{Phase, ProgressTracker, ProgressUpdate};

    #[test]
    fn test_progress_bar_follows_tracker() {
        let tracker = ProgressTracker::new();
        let bar = ProgressBar::hidden();
        tracker.subscribe("op", drive_progress_bar(bar.clone()));

        tracker.start("op", "bulk_type_change", 40).unwrap();
        tracker
            .update(
                "op",
                ProgressUpdate::new()
                    .phase(Phase::Processing)
                    .current_item(25)
                    .message("Batch 1/2"),
            )
            .unwrap();
        assert_eq!(bar.length(), Some(40));
        assert_eq!(bar.position(), 25);
        assert_eq!(bar.message(), "processing Batch 1/2");
        assert!(!bar.is_finished());

        tracker.complete("op", Phase::Completed).unwrap();
        assert!(bar.is_finished());
        assert_eq!(bar.message(), "completed");
    }
}
