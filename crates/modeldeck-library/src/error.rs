// Error types for the library core

use crate::config::ConfigError;
use modeldeck_abstraction::CollaboratorError;
use thiserror::Error;

/// Result type for library core operations
pub type Result<T> = std::result::Result<T, LibraryCoreError>;

/// Library core errors
#[derive(Debug, Error)]
pub enum LibraryCoreError {
    /// The owning session or the caller cancelled the operation
    #[error("Operation cancelled")]
    Cancelled,

    /// A collaborator reported a structured failure
    #[error("Operation failed: {0}")]
    Operation(CollaboratorError),

    /// A collaborator panicked
    #[error("Unexpected error: {0}")]
    Unexpected(String),

    /// Configuration is invalid
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parse error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl From<CollaboratorError> for LibraryCoreError {
    fn from(error: CollaboratorError) -> Self {
        if error.is_cancellation() { Self::Cancelled } else { Self::Operation(error) }
    }
}

impl LibraryCoreError {
    /// Returns `true` for cooperative cancellation.
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
