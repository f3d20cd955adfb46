//! Error types for Conveyor

use std::path::PathBuf;
use thiserror::Error;

use crate::graph::GraphError;

/// Result type alias using ConveyorError
pub type Result<T> = std::result::Result<T, ConveyorError>;

/// Main error type for Conveyor core operations
#[derive(Debug, Error)]
pub enum ConveyorError {
    /// Configuration-related errors
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Workspace discovery errors
    #[error(transparent)]
    Workspace(#[from] WorkspaceError),

    /// Graph construction errors
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic errors
    #[error("{0}")]
    Other(String),
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file not found
    #[error("Configuration file not found at {0}")]
    NotFound(PathBuf),

    /// Invalid configuration value
    #[error("Invalid configuration: {field} - {message}")]
    InvalidValue { field: String, message: String },

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// TOML parsing error
    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    /// IO error
    #[error("IO error reading config: {0}")]
    Io(#[from] std::io::Error),
}

/// Workspace discovery errors
#[derive(Debug, Error)]
pub enum WorkspaceError {
    /// No root manifest
    #[error("No package.json found at workspace root {0}")]
    RootManifestNotFound(PathBuf),

    /// Failed to parse a package manifest
    #[error("Failed to parse manifest {path}: {reason}")]
    ManifestParseError { path: PathBuf, reason: String },

    /// Two packages share a name
    #[error("Duplicate package name '{name}' at {first} and {second}")]
    DuplicatePackage {
        name: String,
        first: PathBuf,
        second: PathBuf,
    },

    /// Invalid glob pattern
    #[error("Invalid package pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// Circular dependency between workspace packages
    #[error("Circular dependency between packages: {0}")]
    CircularDependency(String),
}

impl ConveyorError {
    /// Create a new "other" error with a message
    pub fn other<S: Into<String>>(msg: S) -> Self {
        Self::Other(msg.into())
    }
}
