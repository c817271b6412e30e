//! Interactive setup wizard for first-time configuration
//!
//! This module handles the interactive prompts for creating an initial
//! configuration when retype is run for the first time.

use super::RetypeConfig;
use config::ConfigError;
use dialoguer::{Input, theme::ColorfulTheme};
use std::path::PathBuf;

/// Interactive first-time setup - prompts for store location and type catalog
///
/// 1. Prompts for the store location (default: system data directory)
/// 2. Prompts for an optional type catalog file
/// 3. Creates and saves the configuration
///
/// # Errors
///
/// Returns `ConfigError` if user input cannot be read or the configuration
/// cannot be saved.
pub fn first_time_setup() -> Result<RetypeConfig, ConfigError> {
    println!("Welcome to retype! Let's set up your element store.\n");

    let mut config = RetypeConfig::default();
    let theme = ColorfulTheme::default();

    let database: String = Input::with_theme(&theme)
        .with_prompt("Store location")
        .default(config.database.to_string_lossy().to_string())
        .interact_text()
        .map_err(|e| ConfigError::Message(format!("Failed to read input: {e}")))?;

    let catalog: String = Input::with_theme(&theme)
        .with_prompt("Type catalog file (empty for none)")
        .allow_empty(true)
        .interact_text()
        .map_err(|e| ConfigError::Message(format!("Failed to read input: {e}")))?;

    config.database = PathBuf::from(database);
    config.catalog = (!catalog.trim().is_empty()).then(|| PathBuf::from(catalog.trim()));

    config.save()?;

    println!("\nConfiguration saved successfully!");
    Ok(config)
}
