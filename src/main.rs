//! Retype CLI application entry point
//!
//! # Usage
//!
//! ```bash
//! # Load elements and convert every `text` element to `title`
//! retype --catalog types.toml import elements.json
//! retype convert title --from-type text --batch-size 500
//!
//! # Preview only
//! retype convert title e1 e2 --dry-run
//!
//! # Inspect and undo
//! retype status
//! retype rollback <operation-id>
//! retype rollbacks cleanup
//! ```
//!
//! # Configuration
//!
//! On first run, retype prompts for initial setup. Configuration is stored in
//! the user's config directory (`~/.config/retype/config.toml` on Linux) and
//! can be overridden with `RETYPE_*` environment variables.

use std::process::ExitCode;

use colored::Colorize;
use retype::{
    RetypeError,
    cli::{Cli, Commands, RollbackCommands},
    commands::{self, Context, convert::Selection},
    config::RetypeConfig,
    engine::OperationStatus,
};

type Result<T> = std::result::Result<T, RetypeError>;

/// Initialize the logging system
///
/// `RUST_LOG` takes precedence over the verbosity flags.
fn init_logging(verbose: bool, quiet: bool) {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let default = if verbose {
        "retype=debug"
    } else if quiet {
        "retype=warn"
    } else {
        "retype=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(false)
                .without_time()
                .with_writer(std::io::stderr),
        )
        .with(filter)
        .init();
}

fn load_config(cli: &Cli) -> Result<RetypeConfig> {
    let config = match &cli.config {
        Some(path) => RetypeConfig::load_from(path)?,
        None => RetypeConfig::load_or_setup()?,
    };
    Ok(config)
}

fn run(cli: Cli) -> Result<ExitCode> {
    let config = load_config(&cli)?;
    let quiet = cli.quiet || config.quiet;

    let store_path = cli.store.clone().unwrap_or_else(|| config.database.clone());
    let catalog_path = cli.catalog.clone().or_else(|| config.catalog.clone());
    let ctx = Context::open(config, &store_path, catalog_path.as_deref(), quiet)?;

    match &cli.command {
        Commands::Import {
            input,
            format,
            delimiter,
        } => {
            commands::import(&ctx, input, *format, *delimiter)?;
        }
        Commands::Convert {
            target_type,
            ids,
            from_type,
            ids_file,
            bulk,
            batch,
            json,
        } => {
            let selection = Selection {
                ids,
                from_type: from_type.as_deref(),
                ids_file: ids_file.as_deref(),
            };
            let result = commands::convert(&ctx, target_type, &selection, bulk, batch, *json)?;
            if let Some(result) = result
                && matches!(result.status, OperationStatus::Failed | OperationStatus::Cancelled)
            {
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::Status { operation_id, json } => {
            commands::status(&ctx, operation_id.as_deref(), *json)?;
        }
        Commands::Rollback {
            operation_id,
            dry_run,
            yes,
        } => {
            commands::rollback(&ctx, operation_id, *dry_run, *yes)?;
        }
        Commands::Rollbacks { command } => match command {
            RollbackCommands::List => commands::rollback_list(&ctx)?,
            RollbackCommands::Cleanup { yes } => {
                commands::rollback_cleanup(&ctx, *yes)?;
            }
        },
        Commands::Types => commands::types(&ctx)?,
        Commands::Resolve { from, to } => {
            if !commands::resolve(&ctx, from, to)? {
                return Ok(ExitCode::FAILURE);
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn main() -> ExitCode {
    let cli = Cli::parse_args();
    init_logging(cli.verbose, cli.quiet);

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {e}", "Error:".red().bold());
            ExitCode::FAILURE
        }
    }
}
