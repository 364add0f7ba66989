//! Error types for the berth pipeline

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur during validation, loading, and lifecycle operations
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Mod folder not found: {0}")]
    ModFolderMissing(PathBuf),

    #[error("Mod manifest not found in {0}")]
    ManifestMissing(PathBuf),

    #[error("Invalid module artifact {path}: {message}")]
    InvalidArtifact { path: String, message: String },

    #[error("Rule violation: {rule} - {message}")]
    RuleViolation { rule: String, message: String },

    #[error("Load context for '{0}' is revoked")]
    ContextRevoked(String),

    #[error("Module runtime error: {0}")]
    Runtime(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Core error: {0}")]
    CoreError(#[from] berth_core::Error),
}

/// Result type for berth operations
pub type Result<T> = std::result::Result<T, Error>;
