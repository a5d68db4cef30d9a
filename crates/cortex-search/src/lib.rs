//! # cortex-search
//!
//! Relationship-aware search over the Cortex index: semantic ranking fused
//! with graph traversal, guarded MMR diversification under a token budget,
//! and context-package assembly for LLM consumption.

pub mod context;
pub mod error;
pub mod mmr;
pub mod searcher;
pub mod traverser;

pub use context::{build_package, ChunkGroup, ContextMode, ContextPackage, DependencyTier};
pub use error::{Result, SearchError};
pub use mmr::{GuardedMmrSelector, MmrCandidate, MmrSelection};
pub use searcher::{
    MultiHop, SearchChunk, SearchRequest, SearchResponse, SearchStatus, Searcher,
    DEFAULT_TOKEN_BUDGET,
};
pub use traverser::{
    ContextGroup, DependencyTraverser, PruneStrategy, RelationshipPath, TraversalDirection,
    TraversalOptions, TraversalRequest, TraversalResult,
};
