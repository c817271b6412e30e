//! `status`: show one operation or list archived operations

use colored::Colorize;

use super::convert::print_result;
use super::{Context, Result};
use crate::RetypeError;

/// # Errors
///
/// Returns `RetypeError` if the operation is unknown or the archive cannot be read.
pub fn execute(ctx: &Context, operation_id: Option<&str>, json: bool) -> Result<()> {
    let Some(operation_id) = operation_id else {
        return list(ctx, json);
    };

    let result = ctx
        .engine
        .get_status(operation_id)?
        .ok_or_else(|| RetypeError::InvalidInput(format!("Unknown operation: {operation_id}")))?;

    if json {
        println!("{}", render_json(&result)?);
    } else if ctx.quiet {
        println!("{}", result.status);
    } else {
        print_result(&result);
    }
    Ok(())
}

fn list(ctx: &Context, json: bool) -> Result<()> {
    let operations = ctx.engine.archived_operations()?;

    if json {
        println!("{}", render_json(&operations)?);
        return Ok(());
    }
    if operations.is_empty() {
        if !ctx.quiet {
            println!("No operations recorded.");
        }
        return Ok(());
    }

    for op in &operations {
        if ctx.quiet {
            println!("{}\t{}", op.operation_id, op.status);
            continue;
        }
        println!(
            "{}  {:<12} -> {:<12} {}/{} ok, {} failed  {}",
            op.start_time.format("%Y-%m-%d %H:%M:%S"),
            op.status.to_string().bold(),
            op.target_type,
            op.successful_items,
            op.total_items,
            op.failed_items,
            op.operation_id.dimmed()
        );
    }
    Ok(())
}

fn render_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value)
        .map_err(|e| RetypeError::InvalidInput(format!("Failed to render JSON: {e}")))
}
