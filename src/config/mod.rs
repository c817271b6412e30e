//! Configuration module for retype
//!
//! Settings live in `<config_dir>/retype/config.toml` and can be overridden
//! with `RETYPE_*` environment variables; nested keys use a double underscore,
//! e.g. `RETYPE_BATCH__BATCH_SIZE=500`.

mod setup;

pub use setup::first_time_setup;

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::batch::BatchOptions;

/// Prefix of environment overrides
pub const ENV_PREFIX: &str = "RETYPE";

/// Rollback record lifetime and expiry sweeping
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct RollbackSettings {
    pub ttl_hours: u64,
    pub sweep_interval_secs: u64,
}

impl Default for RollbackSettings {
    fn default() -> Self {
        Self {
            ttl_hours: 24 * 7,
            sweep_interval_secs: 3600,
        }
    }
}

impl RollbackSettings {
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_hours * 3600)
    }

    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Progress heartbeat and retention of finished entries
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ProgressSettings {
    pub heartbeat_secs: u64,
    /// How often finished entries older than `retention_secs` are purged
    pub cleanup_secs: u64,
    pub retention_secs: u64,
}

impl Default for ProgressSettings {
    fn default() -> Self {
        Self {
            heartbeat_secs: 30,
            cleanup_secs: 300,
            retention_secs: 3600,
        }
    }
}

impl ProgressSettings {
    #[must_use]
    pub const fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }

    #[must_use]
    pub const fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_secs)
    }

    #[must_use]
    pub const fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }
}

/// Application configuration structure
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RetypeConfig {
    /// Directory of the sled store
    #[serde(default = "default_database")]
    pub database: PathBuf,

    /// Type catalog loaded at startup
    #[serde(default)]
    pub catalog: Option<PathBuf>,

    /// Suppress informational output by default
    #[serde(default)]
    pub quiet: bool,

    /// Defaults for `convert`
    #[serde(default)]
    pub batch: BatchOptions,

    #[serde(default)]
    pub rollback: RollbackSettings,

    #[serde(default)]
    pub progress: ProgressSettings,
}

fn default_database() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("retype")
        .join("store")
}

impl Default for RetypeConfig {
    fn default() -> Self {
        Self {
            database: default_database(),
            catalog: None,
            quiet: false,
            batch: BatchOptions::default(),
            rollback: RollbackSettings::default(),
            progress: ProgressSettings::default(),
        }
    }
}

impl RetypeConfig {
    /// Get the path to the config file
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the system config directory cannot be determined.
    pub fn config_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| ConfigError::Message("Could not determine config directory".to_string()))?;

        Ok(config_dir.join("retype").join("config.toml"))
    }

    /// Load configuration from file, creating default if it doesn't exist
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the config file cannot be read, parsed, or created.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            Self::default().save_to(&config_path)?;
        }
        Self::load_from(&config_path)
    }

    /// Load configuration from `path` with environment overrides applied
    ///
    /// A missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file or an override cannot be parsed.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        Self::load_with_env(path, None)
    }

    fn load_with_env(path: &Path, env: Option<HashMap<String, String>>) -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(
                File::from(path.to_path_buf())
                    .format(FileFormat::Toml)
                    .required(false),
            )
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .source(env),
            )
            .build()?;

        settings.try_deserialize()
    }

    /// Save configuration to the default location
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the config path cannot be determined or writing fails.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path()?)
    }

    /// Save configuration to `path`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the config directory cannot be created, the configuration
    /// cannot be serialized to TOML, or the file cannot be written.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| ConfigError::Message(format!("Failed to create config directory: {e}")))?;
        }

        let toml_string = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::Message(format!("Failed to serialize config: {e}")))?;

        fs::write(path, toml_string)
            .map_err(|e| ConfigError::Message(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Load configuration, running first-time setup if config doesn't exist
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if loading or creating the configuration fails.
    pub fn load_or_setup() -> Result<Self, ConfigError> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            first_time_setup()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::{BatchStrategy, ProcessingMode};
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = RetypeConfig::default();
        assert!(config.catalog.is_none());
        assert!(!config.quiet);
        assert_eq!(config.batch, BatchOptions::default());
        assert_eq!(config.rollback.ttl(), Duration::from_secs(7 * 24 * 3600));
        assert!(config.database.ends_with("retype/store"));
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = RetypeConfig::load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.batch.batch_size, 100);
        assert_eq!(config.progress.heartbeat_interval(), Duration::from_secs(30));
        assert_eq!(config.progress.cleanup_interval(), Duration::from_secs(300));
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = RetypeConfig::default();
        config.database = PathBuf::from("/tmp/retype-store");
        config.catalog = Some(PathBuf::from("/tmp/catalog.toml"));
        config.batch.batch_size = 250;
        config.batch.processing_mode = ProcessingMode::Sequential;
        config.rollback.ttl_hours = 1;
        config.save_to(&path).unwrap();

        let loaded = RetypeConfig::load_from(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_human_sizes_and_partial_sections() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
database = "/data/retype"

[batch]
batch_size = 50
memory_limit = "1 GiB"
batch_strategy = "time-based"
timeout_secs = 120

[progress]
retention_secs = 60
"#,
        )
        .unwrap();

        let config = RetypeConfig::load_from(&path).unwrap();
        assert_eq!(config.database, PathBuf::from("/data/retype"));
        assert_eq!(config.batch.batch_size, 50);
        assert_eq!(config.batch.memory_limit, 1024 * 1024 * 1024);
        assert_eq!(config.batch.batch_strategy, BatchStrategy::TimeBased);
        assert_eq!(config.batch.timeout, Some(Duration::from_secs(120)));
        assert_eq!(config.batch.retry_attempts, 3);
        assert_eq!(config.progress.retention(), Duration::from_secs(60));
        assert_eq!(config.progress.heartbeat_secs, 30);
        assert_eq!(config.progress.cleanup_interval(), Duration::from_secs(300));
    }

    #[test]
    fn test_environment_overrides_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "quiet = false\n[batch]\nbatch_size = 50\n").unwrap();

        let env = HashMap::from([
            ("RETYPE_QUIET".to_string(), "true".to_string()),
            ("RETYPE_BATCH__BATCH_SIZE".to_string(), "500".to_string()),
            ("RETYPE_BATCH__MEMORY_LIMIT".to_string(), "256 MiB".to_string()),
            ("RETYPE_PROGRESS__CLEANUP_SECS".to_string(), "15".to_string()),
            ("UNRELATED".to_string(), "1".to_string()),
        ]);
        let config = RetypeConfig::load_with_env(&path, Some(env)).unwrap();

        assert!(config.quiet);
        assert_eq!(config.batch.batch_size, 500);
        assert_eq!(config.batch.memory_limit, 256 * 1024 * 1024);
        assert_eq!(config.progress.cleanup_interval(), Duration::from_secs(15));
        assert_eq!(config.progress.heartbeat_interval(), Duration::from_secs(30));
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[batch]\nbatch_size = \"many\"\n").unwrap();
        assert!(RetypeConfig::load_from(&path).is_err());
    }
}
