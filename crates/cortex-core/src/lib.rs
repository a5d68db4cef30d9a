//! # cortex-core
//!
//! Core building blocks of the Cortex code-intelligence engine: repository
//! scanning, heuristic chunking, content analysis, delta computation, the
//! in-memory vector store, the symbol relationship graph and the dual-tier
//! persistent store.
//!
//! The crate is deliberately free of embedding concerns; `cortex-embed`
//! fills chunk embeddings and `cortex-search` ranks them.

pub mod analyzer;
pub mod chunker;
pub mod delta;
pub mod graph;
pub mod mapper;
pub mod scanner;
pub mod store;
pub mod types;
pub mod vector_store;

pub use analyzer::{ContentAnalysis, ContentAnalyzer, FileType, SemanticValue};
pub use chunker::{ChunkContext, Chunker};
pub use delta::{ChunkDelta, ChunkComparison, DeltaEngine, FileChanges};
pub use graph::{EdgeKind, PersistedGraph, RelationEdge, RelationshipGraph, SymbolNode};
pub use mapper::DependencyMapper;
pub use scanner::{RepositoryScanner, ScanMode, StagingOptions};
pub use store::{DualStore, LoadOutcome, LoadSource, RepositoryRegistry, StoreError, StorePaths};
pub use types::{
    ChangeEvent, ChangeKind, ChunkKind, CodeChunk, CommitInfo, IndexMetadata, IndexingPriority,
    Language, ModelInfo, PersistedIndex, PROGRAM_VERSION, SCHEMA_VERSION,
};
pub use vector_store::{cosine_similarity, RelationKind, ScoredChunk, VectorStore};
