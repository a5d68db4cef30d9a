//! # cortex-embed
//!
//! Parallel embedding engine: a pool of isolated worker processes behind a
//! bounded dispatch queue, a shared fingerprint-keyed embedding cache with
//! scored-LRU eviction, adaptive batch sizing with failure recovery, and a
//! shared-buffer transport for large batches.
//!
//! The pool depends only on the [`embedder::Embedder`] capability; the
//! bundled [`embedder::HashEmbedder`] keeps the whole pipeline runnable
//! without a model download.

pub mod batching;
pub mod cache;
pub mod embedder;
pub mod error;
pub mod memory;
pub mod pool;
pub mod protocol;
pub mod shared;
pub mod text;
pub mod worker;

pub use batching::{AdaptiveBatchSizer, BatchConfig, BatchSample};
pub use cache::{CacheConfig, CacheStats, EmbeddingCache};
pub use embedder::{Embedder, HashEmbedder, DEFAULT_DIMENSION};
pub use error::{EmbedError, Result};
pub use pool::{
    default_process_count, EmbeddingPool, InProcessSpawner, PoolConfig, PoolStats, ProcessSpawner,
    WorkerConnection, WorkerSpawner,
};
pub use text::{chunk_fingerprint, embedding_text, fingerprint};
