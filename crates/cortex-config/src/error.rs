//! Error types for cortex-config

use thiserror::Error;

/// Errors that can occur loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    /// TOML parse failure
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Semantic validation failure
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Result type for cortex-config operations
pub type Result<T> = std::result::Result<T, ConfigError>;
