//! # cortex-engine
//!
//! Orchestration layer of the Cortex code-intelligence engine. Ties the
//! core pipeline (scan → chunk → delta → embed → persist) to the embedding
//! pool, serves relationship-aware queries, and keeps the index live under
//! filesystem changes through the watch pipeline.

pub mod api;
pub mod error;
pub mod indexer;
pub mod live;

pub use api::{IndexMode, IndexRequest, IndexResponse, IndexStatus, ReindexAdvisor, ReindexRecommendation};
pub use error::{EngineError, Result};
pub use indexer::CodebaseIndexer;
pub use live::LiveIndexer;
