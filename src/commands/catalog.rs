//! `types` and `resolve`: inspect the type catalog

use colored::Colorize;

use super::{Context, Result};

/// List the catalog types, with their parents and outgoing rules
///
/// # Errors
///
/// Never fails; returns `Result` for uniformity with the other commands.
pub fn types(ctx: &Context) -> Result<()> {
    let types = ctx.registry.list_types();
    if types.is_empty() {
        if !ctx.quiet {
            println!("No types defined. Set a catalog with --catalog or in the config file.");
        }
        return Ok(());
    }

    for definition in types {
        if ctx.quiet {
            println!("{}", definition.id);
            continue;
        }
        let targets: Vec<&str> = ctx
            .catalog
            .rules
            .iter()
            .filter(|rule| rule.from_type == definition.id)
            .map(|rule| rule.to_type.as_str())
            .collect();
        let parent = definition
            .parent
            .as_deref()
            .map(|p| format!(" ({} {p})", "extends".dimmed()))
            .unwrap_or_default();
        if targets.is_empty() {
            println!("{}{parent}", definition.id.bold());
        } else {
            println!("{}{parent} -> {}", definition.id.bold(), targets.join(", "));
        }
    }
    Ok(())
}

/// Print the conversion path from `from` to `to`, returning whether one exists
///
/// # Errors
///
/// Never fails; returns `Result` for uniformity with the other commands.
pub fn resolve(ctx: &Context, from: &str, to: &str) -> Result<bool> {
    let Some(path) = ctx.engine.resolver().resolve(from, to) else {
        if !ctx.quiet {
            println!("{} from '{from}' to '{to}'", "No conversion path".red());
        }
        return Ok(false);
    };

    if ctx.quiet {
        println!("{}", path.total_cost);
        return Ok(true);
    }

    let safety = if path.is_safe {
        "safe".green()
    } else {
        "destructive".red()
    };
    println!(
        "{} -> {}: cost {:.2}, {}, estimated data loss {:.0}%",
        from.bold(),
        to.bold(),
        path.total_cost,
        safety,
        path.estimated_data_loss * 100.0
    );
    if path.steps.is_empty() {
        println!("  (same type)");
    }
    for (i, step) in path.steps.iter().enumerate() {
        println!(
            "  {}. {} -> {} [{:?}, {:?}, cost {:.2}]",
            i + 1,
            step.from_type,
            step.to_type,
            step.strategy,
            step.preservation_level,
            step.cost
        );
    }
    for warning in &path.total_warnings {
        println!("  {} {warning}", "!".yellow());
    }
    Ok(true)
}
