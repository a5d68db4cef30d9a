//! API types consumed by the wider system
//!
//! Request/response shapes for the indexer entry points, plus the reindex
//! advisor that turns schema-incompatibility into an actionable
//! recommendation. Stack traces never cross this boundary; failures become
//! status-coded responses with short messages.

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Indexing mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexMode {
    /// All tracked + staged files from scratch
    Full,
    /// Delta against persisted state
    Incremental,
    /// Wipe persisted state, then full
    Reindex,
}

/// Request for [`crate::CodebaseIndexer::index_repository`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexRequest {
    pub repository_path: String,
    pub mode: IndexMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since_commit: Option<String>,
}

/// Outcome status of an indexing run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexStatus {
    Success,
    /// Some files failed but the run completed
    Partial,
    Error,
}

/// Response from an indexing run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexResponse {
    pub status: IndexStatus,
    pub chunks_processed: usize,
    pub time_taken_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl IndexResponse {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: IndexStatus::Error,
            chunks_processed: 0,
            time_taken_ms: 0,
            error_message: Some(message.into()),
        }
    }
}

/// Recommendation produced when a persisted index cannot be used.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReindexRecommendation {
    pub rebuild_required: bool,
    pub reason: String,
}

/// Translates load failures into rebuild recommendations.
pub struct ReindexAdvisor;

impl ReindexAdvisor {
    /// Inspect an initialization failure.
    pub fn advise(error: &EngineError) -> ReindexRecommendation {
        match error {
            EngineError::Store(e) if e.requires_rebuild() => ReindexRecommendation {
                rebuild_required: true,
                reason: e.to_string(),
            },
            EngineError::ForcedRebuildRequired(reason) => ReindexRecommendation {
                rebuild_required: true,
                reason: reason.clone(),
            },
            other => ReindexRecommendation {
                rebuild_required: false,
                reason: other.to_string(),
            },
        }
    }
}
