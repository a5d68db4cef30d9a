//! Error types for cortex-engine

use thiserror::Error;

/// Errors that can occur orchestrating indexing
#[derive(Debug, Error)]
pub enum EngineError {
    /// Scanner failure
    #[error("Scan error: {0}")]
    Scan(#[from] cortex_core::scanner::ScanError),

    /// Persistent store failure
    #[error("Store error: {0}")]
    Store(#[from] cortex_core::StoreError),

    /// Graph persistence failure
    #[error("Graph error: {0}")]
    Graph(#[from] cortex_core::graph::GraphError),

    /// Embedding pool failure
    #[error("Embedding error: {0}")]
    Embed(#[from] cortex_embed::EmbedError),

    /// Search failure
    #[error("Search error: {0}")]
    Search(#[from] cortex_search::SearchError),

    /// Watcher failure
    #[error("Watch error: {0}")]
    Watch(#[from] cortex_watch::WatchError),

    /// The persisted index cannot be read with this schema
    #[error("Forced rebuild required: {0}")]
    ForcedRebuildRequired(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for cortex-engine operations
pub type Result<T> = std::result::Result<T, EngineError>;
