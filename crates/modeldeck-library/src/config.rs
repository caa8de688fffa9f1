//! Configuration for the library core.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Top-level library configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LibraryConfig {
    /// Event channel sizing.
    #[serde(default)]
    pub events: EventsConfig,

    /// External catalog import settings.
    #[serde(default)]
    pub import: ImportConfig,
}

/// Broadcast buffer sizes for the error and busy channels.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventsConfig {
    /// Buffered error events per subscriber before it lags (default: 64).
    #[serde(default = "default_error_capacity")]
    pub error_capacity: usize,

    /// Buffered busy edges per subscriber before it lags (default: 16).
    #[serde(default = "default_busy_capacity")]
    pub busy_capacity: usize,
}

/// Settings for converting external catalog entries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImportConfig {
    /// Prefix for converted model ids (default: "hf-").
    #[serde(default = "default_id_prefix")]
    pub id_prefix: String,

    /// Revision used in manifest URLs when the entry has no last-modified time.
    #[serde(default = "default_revision")]
    pub default_revision: String,
}

fn default_error_capacity() -> usize {
    64
}

fn default_busy_capacity() -> usize {
    16
}

fn default_id_prefix() -> String {
    "hf-".to_string()
}

fn default_revision() -> String {
    "main".to_string()
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self { error_capacity: default_error_capacity(), busy_capacity: default_busy_capacity() }
    }
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self { id_prefix: default_id_prefix(), default_revision: default_revision() }
    }
}

/// Errors that can occur during configuration validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Invalid error channel capacity (must be > 0).
    #[error("Invalid error capacity: must be greater than 0")]
    InvalidErrorCapacity,

    /// Invalid busy channel capacity (must be > 0).
    #[error("Invalid busy capacity: must be greater than 0")]
    InvalidBusyCapacity,

    /// Blank import id prefix.
    #[error("Invalid import id prefix: must not be blank")]
    BlankIdPrefix,

    /// Blank default revision.
    #[error("Invalid default revision: must not be blank")]
    BlankRevision,
}

impl LibraryConfig {
    /// Loads and validates configuration from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&contents)
    }

    /// Parses and validates configuration from a TOML string.
    ///
    /// # Errors
    /// Returns an error if the string cannot be parsed or validated.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    /// Returns `ConfigError` if any configuration value is invalid.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.events.error_capacity == 0 {
            return Err(ConfigError::InvalidErrorCapacity);
        }

        if self.events.busy_capacity == 0 {
            return Err(ConfigError::InvalidBusyCapacity);
        }

        if self.import.id_prefix.trim().is_empty() {
            return Err(ConfigError::BlankIdPrefix);
        }

        if self.import.default_revision.trim().is_empty() {
            return Err(ConfigError::BlankRevision);
        }

        Ok(())
    }
}
