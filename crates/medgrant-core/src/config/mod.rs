//! Engine configuration parsing and validation.
//!
//! Configuration is TOML on disk; every field has a default so an empty
//! file is a valid configuration. Ranges are validated on load: a sweep
//! interval outside `[1s, 24h]` or a zero collaborator timeout is a
//! configuration error, not a runtime surprise.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::approval::DEFAULT_DURATION_MS;

/// Minimum allowed sweep interval.
pub const MIN_SWEEP_INTERVAL_SECS: u64 = 1;

/// Maximum allowed sweep interval.
pub const MAX_SWEEP_INTERVAL_SECS: u64 = 86_400;

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// The TOML could not be parsed.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A field is outside its allowed range.
    #[error("invalid configuration: {0}")]
    Validation(String),
}

/// Engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Path of the approval database.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Interval between scheduled sweep runs, in seconds.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Timeout applied to each directory and ledger call, in milliseconds.
    #[serde(default = "default_collaborator_timeout_ms")]
    pub collaborator_timeout_ms: u64,

    /// Validity window applied when a request does not specify one, in
    /// milliseconds.
    #[serde(default = "default_duration_ms")]
    pub default_duration_ms: u64,

    /// Directory role a practitioner must hold to receive grants.
    #[serde(default = "default_required_role")]
    pub required_role: String,

    /// Upper bound on a single list page.
    #[serde(default = "default_max_page_size")]
    pub max_page_size: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            sweep_interval_secs: default_sweep_interval_secs(),
            collaborator_timeout_ms: default_collaborator_timeout_ms(),
            default_duration_ms: default_duration_ms(),
            required_role: default_required_role(),
            max_page_size: default_max_page_size(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or a field is out of range.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_SWEEP_INTERVAL_SECS..=MAX_SWEEP_INTERVAL_SECS)
            .contains(&self.sweep_interval_secs)
        {
            return Err(ConfigError::Validation(format!(
                "sweep_interval_secs must be within [{MIN_SWEEP_INTERVAL_SECS}, {MAX_SWEEP_INTERVAL_SECS}], got {}",
                self.sweep_interval_secs
            )));
        }
        if self.collaborator_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "collaborator_timeout_ms must be positive".to_string(),
            ));
        }
        if self.default_duration_ms == 0 {
            return Err(ConfigError::Validation(
                "default_duration_ms must be positive".to_string(),
            ));
        }
        if self.max_page_size == 0 {
            return Err(ConfigError::Validation(
                "max_page_size must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("medgrant.db")
}

const fn default_sweep_interval_secs() -> u64 {
    3_600
}

const fn default_collaborator_timeout_ms() -> u64 {
    5_000
}

const fn default_duration_ms() -> u64 {
    DEFAULT_DURATION_MS
}

fn default_required_role() -> String {
    "practitioner".to_string()
}

const fn default_max_page_size() -> u64 {
    100
}
