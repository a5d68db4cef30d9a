//! Error types for cortex-search

use thiserror::Error;

/// Errors that can occur in search operations
#[derive(Debug, Error)]
pub enum SearchError {
    /// Query embedding failed
    #[error("Embedding error: {0}")]
    Embedding(#[from] cortex_embed::EmbedError),

    /// The index has not been initialized
    #[error("Index unavailable: {0}")]
    IndexUnavailable(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for cortex-search operations
pub type Result<T> = std::result::Result<T, SearchError>;
