//! `rollback` and `rollbacks`: undo operations and manage rollback records

use colored::Colorize;
use dialoguer::Confirm;

use super::{Context, Result};
use crate::rollback::RollbackStatus;
use crate::RetypeError;

/// Undo a completed operation
///
/// # Errors
///
/// Returns `RetypeError` if the operation cannot be rolled back or the user
/// input cannot be read.
pub fn execute(ctx: &Context, operation_id: &str, dry_run: bool, yes: bool) -> Result<()> {
    let result = ctx
        .engine
        .get_status(operation_id)?
        .ok_or_else(|| RetypeError::InvalidInput(format!("Unknown operation: {operation_id}")))?;

    if dry_run {
        let rollback_id = result.rollback_operation_id.as_deref().ok_or_else(|| {
            RetypeError::InvalidInput(format!("Operation '{operation_id}' has no rollback record"))
        })?;
        let state = ctx.engine.rollbacks().execute(rollback_id, true)?;
        println!("{}", "=== Dry Run Mode ===".yellow().bold());
        println!(
            "Would restore {} element(s) changed by {operation_id}",
            state.remaining()
        );
        println!("\n{}", "Run without --dry-run to apply changes.".yellow());
        return Ok(());
    }

    if !yes && !ctx.quiet {
        let confirmed = Confirm::new()
            .with_prompt(format!(
                "Restore {} element(s) changed by {operation_id}?",
                result.successful_items
            ))
            .interact()
            .map_err(|e| RetypeError::InvalidInput(format!("Failed to get confirmation: {e}")))?;
        if !confirmed {
            println!("Operation cancelled.");
            return Ok(());
        }
    }

    let report = ctx.engine.rollback(operation_id)?;
    let state = &report.state;
    if ctx.quiet {
        println!("{}", state.status);
        return Ok(());
    }

    let status = match state.status {
        RollbackStatus::Completed => state.status.to_string().green().bold(),
        RollbackStatus::Partial => state.status.to_string().yellow().bold(),
        _ => state.status.to_string().red().bold(),
    };
    println!("Rollback {} {status}", state.rollback_id.bold());
    println!(
        "  Restored {}, failed {}",
        state.successful_steps.to_string().green(),
        state.failed_steps.to_string().red()
    );
    for error in state.step_errors.iter().take(10) {
        println!("  {} {}: {}", "✗".red(), error.target_id, error.error);
    }
    if state.status != RollbackStatus::Completed {
        println!(
            "\n{}",
            "Run the rollback again to retry the failed steps.".yellow()
        );
    }
    Ok(())
}

/// List rollback records with their status
///
/// # Errors
///
/// Never fails; returns `Result` for uniformity with the other commands.
pub fn list(ctx: &Context) -> Result<()> {
    let rollbacks = ctx.engine.rollbacks();
    let operations = rollbacks.list();
    if operations.is_empty() {
        if !ctx.quiet {
            println!("No rollback records.");
        }
        return Ok(());
    }

    for op in operations {
        let status = rollbacks
            .state(&op.rollback_id)
            .map_or_else(|| "unknown".to_string(), |s| s.status.to_string());
        if ctx.quiet {
            println!("{}\t{status}", op.rollback_id);
            continue;
        }
        let expiry = if op.is_expired() {
            "expired".red().to_string()
        } else {
            format!("expires {}", op.expires_at.format("%Y-%m-%d %H:%M"))
        };
        println!(
            "{}  {:<10} {} step(s)  {}  {}",
            op.rollback_id.dimmed(),
            status.bold(),
            op.steps.len(),
            op.name,
            expiry
        );
    }
    Ok(())
}

/// Delete expired rollback records
///
/// # Errors
///
/// Returns `RetypeError` if records cannot be deleted or the user input cannot be read.
pub fn cleanup(ctx: &Context, yes: bool) -> Result<usize> {
    let expired = ctx.engine.rollbacks().list_expired();
    if expired.is_empty() {
        if !ctx.quiet {
            println!("No expired rollback records.");
        }
        return Ok(0);
    }

    if !yes && !ctx.quiet {
        let confirmed = Confirm::new()
            .with_prompt(format!("Delete {} expired rollback record(s)?", expired.len()))
            .interact()
            .map_err(|e| RetypeError::InvalidInput(format!("Failed to get confirmation: {e}")))?;
        if !confirmed {
            println!("Operation cancelled.");
            return Ok(0);
        }
    }

    let removed = ctx.engine.rollbacks().cleanup()?;
    if !ctx.quiet {
        println!("{} {removed} expired rollback record(s)", "Removed".green().bold());
    }
    Ok(removed)
}
