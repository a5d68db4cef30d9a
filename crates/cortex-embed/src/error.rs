//! Error types for cortex-embed

use thiserror::Error;

/// Errors that can occur in embedding pool operations
#[derive(Debug, Error)]
pub enum EmbedError {
    /// No worker is ready and available
    #[error("No workers available")]
    NoWorkersAvailable,

    /// A batch exceeded its hard timeout
    #[error("Worker {worker_id} timed out after {timeout_ms} ms on batch {batch_id}")]
    WorkerTimeout {
        worker_id: usize,
        batch_id: u64,
        timeout_ms: u64,
    },

    /// Worker process exited or its pipes broke
    #[error("Worker {worker_id} crashed: {reason}")]
    WorkerCrashed { worker_id: usize, reason: String },

    /// Worker returned a vector of the wrong length
    #[error("Invalid embedding dimension: expected {expected}, got {actual}")]
    InvalidEmbeddingDimension { expected: usize, actual: usize },

    /// A protocol line could not be parsed
    #[error("Transport parse error: {0}")]
    TransportParseError(String),

    /// Worker failed to initialize in time
    #[error("Worker {worker_id} failed to initialize: {reason}")]
    InitFailed { worker_id: usize, reason: String },

    /// Embedding backend failure (inside a worker or in-process)
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Shared buffer allocation or mapping failure
    #[error("Shared buffer error: {0}")]
    SharedBuffer(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Pool is shutting down
    #[error("Pool is shut down")]
    ShutDown,
}

/// Result type for cortex-embed operations
pub type Result<T> = std::result::Result<T, EmbedError>;
