//! Codebase Indexer
//!
//! Owns one repository's vector store and relationship graph and drives
//! the scan → chunk → delta → embed → persist pipeline. Startup loads
//! persisted state through the dual-tier store (winner selection included);
//! full and incremental runs share the delta path so unchanged content is
//! never re-embedded; per-file failures are caught and the run continues,
//! ending in a status-coded response instead of an error.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use cortex_config::CortexConfig;
use cortex_core::chunker::ChunkContext;
use cortex_core::delta::ChunkDelta;
use cortex_core::scanner::{ScanMode, StagingOptions};
use cortex_core::store::RegistryGuard;
use cortex_core::types::now_ms;
use cortex_core::{
    ChangeKind, Chunker, CodeChunk, DeltaEngine, DependencyMapper, DualStore, ModelInfo,
    PersistedIndex, RelationshipGraph, RepositoryRegistry, RepositoryScanner, VectorStore,
};
use cortex_embed::{Embedder, EmbeddingPool};
use cortex_search::{SearchRequest, SearchResponse, SearchStatus, Searcher};

use crate::api::{IndexMode, IndexResponse, IndexStatus};
use crate::error::Result;

/// Single-writer indexer for one repository.
pub struct CodebaseIndexer {
    repo_path: PathBuf,
    scanner: RepositoryScanner,
    chunker: Chunker,
    delta_engine: DeltaEngine,
    mapper: DependencyMapper,
    store: VectorStore,
    graph: RelationshipGraph,
    dual: DualStore,
    pool: EmbeddingPool,
    searcher: Searcher,
    model: ModelInfo,
    needs_rebuild: bool,
    /// Holds the registry key for this repository for the indexer's life
    _registry_guard: RegistryGuard,
}

impl CodebaseIndexer {
    /// Load persisted state (winner-selected) and construct the indexer.
    ///
    /// A schema-incompatible index does not fail initialization; it flags
    /// the indexer so the next run performs a forced full rebuild.
    pub async fn initialize(
        repo_path: impl AsRef<Path>,
        pool: EmbeddingPool,
        query_embedder: Arc<dyn Embedder>,
        registry: &RepositoryRegistry,
        config: &CortexConfig,
        global_root: Option<&Path>,
    ) -> Result<Self> {
        let repo_path = repo_path.as_ref().to_path_buf();
        let scanner = RepositoryScanner::with_options(
            &repo_path,
            StagingOptions {
                include_untracked: config.staging.include_untracked_files,
                max_untracked_files: config.staging.max_untracked_files,
                max_file_size_kb: config.staging.max_file_size_kb,
                exclude_patterns: config.staging.exclude_patterns.clone(),
            },
        )?;
        let dual = DualStore::for_repository(&repo_path, global_root);
        let registry_guard = registry.acquire(&repo_path, &dual.paths().local_dir)?;

        let model = query_embedder.model_info();
        let mut store = VectorStore::new();
        let mut graph = RelationshipGraph::new();
        let mut needs_rebuild = false;

        match dual.load_index(scanner.head_commit().as_deref()).await {
            Ok(outcome) => {
                if let Some(index) = outcome.value {
                    info!(
                        "Loaded {} chunks from {:?} tier",
                        index.chunks.len(),
                        outcome.source
                    );
                    store.upsert(index.chunks);
                }
            }
            Err(e) if e.requires_rebuild() => {
                warn!("Persisted index unusable ({}), full rebuild required", e);
                needs_rebuild = true;
            }
            Err(e) => {
                warn!("Index load failed ({}), starting empty", e);
            }
        }

        match dual.load_graph().await {
            Ok(outcome) => {
                if let Some(persisted) = outcome.value {
                    match RelationshipGraph::from_persisted(persisted) {
                        Ok(loaded) => graph = loaded,
                        Err(e) => warn!("Relationship file unusable ({}), rebuilding", e),
                    }
                }
            }
            Err(e) => warn!("Relationship load failed ({}), rebuilding", e),
        }

        Ok(Self {
            repo_path,
            scanner,
            chunker: Chunker::new(),
            delta_engine: DeltaEngine::new(),
            mapper: DependencyMapper::new(),
            store,
            graph,
            dual,
            pool,
            searcher: Searcher::new(query_embedder),
            model,
            needs_rebuild,
            _registry_guard: registry_guard,
        })
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    pub fn chunk_count(&self) -> usize {
        self.store.len()
    }

    /// Whether initialization found an index that demands a rebuild.
    pub fn needs_rebuild(&self) -> bool {
        self.needs_rebuild
    }

    // ------------------------------------------------------------------
    // Indexing entry point
    // ------------------------------------------------------------------

    /// Entry point for callers holding an [`crate::api::IndexRequest`].
    /// The indexer is bound to one repository; a mismatched path is an
    /// error response, not a panic.
    pub async fn handle_request(&mut self, request: &crate::api::IndexRequest) -> IndexResponse {
        if Path::new(&request.repository_path) != self.repo_path {
            return IndexResponse::error(format!(
                "indexer is bound to {:?}, not {}",
                self.repo_path, request.repository_path
            ));
        }
        self.index_repository(request.mode).await
    }

    /// Run an indexing pass. Per-file errors are absorbed; the response is
    /// status-coded and never carries a stack trace.
    pub async fn index_repository(&mut self, mode: IndexMode) -> IndexResponse {
        let started = Instant::now();
        let effective = if self.needs_rebuild && mode == IndexMode::Incremental {
            info!("Escalating incremental run to forced rebuild");
            IndexMode::Reindex
        } else {
            mode
        };

        let result = match effective {
            IndexMode::Reindex => self.run_pass(ScanMode::Full, true).await,
            IndexMode::Full => self.run_pass(ScanMode::Full, false).await,
            IndexMode::Incremental => self.run_pass(ScanMode::Incremental, false).await,
        };

        match result {
            Ok(processed) => IndexResponse {
                status: IndexStatus::Success,
                chunks_processed: processed,
                time_taken_ms: started.elapsed().as_millis() as u64,
                error_message: None,
            },
            Err(e) => {
                warn!("Indexing failed: {}", e);
                IndexResponse {
                    status: IndexStatus::Error,
                    chunks_processed: 0,
                    time_taken_ms: started.elapsed().as_millis() as u64,
                    error_message: Some(e.to_string()),
                }
            }
        }
    }

    async fn run_pass(&mut self, scan_mode: ScanMode, wipe: bool) -> Result<usize> {
        if wipe {
            info!("Wiping persisted index for rebuild");
            self.dual.wipe().await?;
            self.store = VectorStore::new();
            self.graph = RelationshipGraph::new();
            self.needs_rebuild = false;
        }

        let files = self.scanner.list_files(scan_mode)?;
        info!("Indexing pass over {} candidate files", files.len());

        let delta = {
            let scanner = &self.scanner;
            let chunker = &self.chunker;
            self.delta_engine
                .calculate_file_delta(&self.store, &files, |path| {
                    chunk_one(scanner, chunker, path)
                })
        };

        if !delta.has_changes() {
            debug!("No changes detected");
            return Ok(0);
        }
        info!(
            "Delta: {} added, {} updated, {} removed ({} files changed)",
            delta.added.len(),
            delta.updated.len(),
            delta.removed.len(),
            delta.file_changes.added.len()
                + delta.file_changes.modified.len()
                + delta.file_changes.deleted.len()
        );

        let processed = self.embed_and_apply(delta).await?;
        self.rebuild_graph();
        self.persist().await?;
        Ok(processed)
    }

    /// Fill embeddings for delta chunks that need them, then apply the
    /// delta to the store (deletions first).
    async fn embed_and_apply(&mut self, mut delta: ChunkDelta) -> Result<usize> {
        let dimension = self.model.dimension;
        let stamp = now_ms();

        let mut pending: Vec<&mut CodeChunk> = delta
            .added
            .iter_mut()
            .chain(delta.updated.iter_mut())
            .filter(|c| !c.has_valid_embedding(dimension))
            .collect();

        if !pending.is_empty() {
            let inputs: Vec<CodeChunk> = pending.iter().map(|c| (**c).clone()).collect();
            let vectors = self.pool.embed_chunks(&inputs).await?;
            for (chunk, vector) in pending.iter_mut().zip(vectors) {
                chunk.embedding = Some(vector);
                chunk.indexed_at = stamp;
            }
        }
        for chunk in delta.added.iter_mut().chain(delta.updated.iter_mut()) {
            if chunk.indexed_at == 0 {
                chunk.indexed_at = stamp;
            }
        }

        let processed = delta.added.len() + delta.updated.len();
        delta.apply(&mut self.store);
        Ok(processed)
    }

    /// Rebuild the relationship graph from the store's current chunks.
    fn rebuild_graph(&mut self) {
        let mut by_file: BTreeMap<String, Vec<CodeChunk>> = BTreeMap::new();
        let mut co_changes: std::collections::HashMap<String, Vec<String>> = Default::default();
        for chunk in self.store.iter() {
            if !chunk.co_change_files.is_empty() {
                co_changes
                    .entry(chunk.file_path.clone())
                    .or_insert_with(|| chunk.co_change_files.clone());
            }
            by_file
                .entry(chunk.file_path.clone())
                .or_default()
                .push(chunk.clone());
        }
        for chunks in by_file.values_mut() {
            chunks.sort_by_key(|c| c.start_line);
        }

        self.graph = self.mapper.build_from_chunks(&by_file, &co_changes);

        // Backfill reverse call metadata on stored chunks.
        let callers: Vec<(String, Vec<String>)> = by_file
            .values()
            .flatten()
            .map(|c| (c.chunk_id.clone(), self.graph.callers_of(&c.chunk_id)))
            .collect();
        let mut updates = Vec::new();
        for (chunk_id, called_by) in callers {
            if let Some(chunk) = self.store.get(&chunk_id) {
                if chunk.called_by != called_by {
                    let mut updated = chunk.clone();
                    updated.called_by = called_by;
                    updates.push(updated);
                }
            }
        }
        self.store.upsert(updates);

        debug!(
            "Graph rebuilt: {} nodes, {} edges",
            self.graph.node_count(),
            self.graph.edge_count()
        );
    }

    /// Persist both the index and the relationship graph to both tiers.
    async fn persist(&mut self) -> Result<()> {
        let mut chunks: Vec<CodeChunk> = self.store.iter().cloned().collect();
        chunks.sort_by(|a, b| {
            (&a.file_path, a.start_line).cmp(&(&b.file_path, b.start_line))
        });

        let mut file_hashes = BTreeMap::new();
        for path in self.store.file_paths() {
            let contents: Vec<String> = self
                .store
                .chunks_by_file(&path)
                .iter()
                .map(|c| c.content.clone())
                .collect();
            file_hashes.insert(path, CodeChunk::hash_content(&contents.join("\n")));
        }

        let index = PersistedIndex {
            version: cortex_core::PROGRAM_VERSION.to_string(),
            schema_version: cortex_core::SCHEMA_VERSION,
            timestamp: now_ms(),
            repository_path: self.repo_path.to_string_lossy().into_owned(),
            commit_hash: self.scanner.head_commit(),
            metadata: cortex_core::IndexMetadata {
                total_chunks: chunks.len(),
                last_indexed: now_ms(),
                embedding_model: self.model.name.clone(),
                model_info: Some(self.model.clone()),
            },
            chunks,
            file_hashes,
        };

        self.dual.save_index(&index).await?;
        self.dual.save_graph(&self.graph.to_persisted()).await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Search entry point
    // ------------------------------------------------------------------

    /// Serve a query over the owned store and graph. Failures become
    /// `status = error` responses with a short message.
    pub async fn search(&self, request: &SearchRequest) -> SearchResponse {
        match self.searcher.search(&self.store, &self.graph, request).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Search failed: {}", e);
                let mut response = SearchResponse::empty();
                response.status = SearchStatus::Error;
                response.error_message = Some(e.to_string());
                response
            }
        }
    }

    // ------------------------------------------------------------------
    // Live-change entry points
    // ------------------------------------------------------------------

    /// Apply a single file event from the live pipeline.
    pub async fn handle_file_change(&mut self, relative_path: &str, kind: ChangeKind) {
        match kind {
            ChangeKind::Unlink => self.remove_file(relative_path).await,
            ChangeKind::Add | ChangeKind::Change => self.reindex_file(relative_path).await,
        }
    }

    /// Drop a deleted file's chunks and graph nodes, then persist.
    pub async fn remove_file(&mut self, relative_path: &str) {
        let removed = self.store.delete_file(relative_path);
        self.graph.remove_file(relative_path);
        if !removed.is_empty() {
            info!("Removed {} chunks for deleted {}", removed.len(), relative_path);
            if let Err(e) = self.persist().await {
                warn!("Persist after deletion failed: {}", e);
            }
        }
    }

    /// Re-chunk and re-embed one file, reusing embeddings for chunks whose
    /// content survived.
    pub async fn reindex_file(&mut self, relative_path: &str) {
        let fresh = match chunk_one(&self.scanner, &self.chunker, relative_path) {
            Some(chunks) => chunks,
            None => {
                // Unreadable counts as deleted for this pass.
                self.remove_file(relative_path).await;
                return;
            }
        };

        let stored = self.store.chunks_by_file(relative_path);
        let comparison = self.delta_engine.compare_chunks(&stored, fresh);
        let stored_ids: Vec<String> = stored.iter().map(|c| c.chunk_id.clone()).collect();

        let delta = ChunkDelta {
            added: comparison.to_add,
            updated: comparison.to_keep,
            removed: stored_ids,
            file_changes: Default::default(),
        };

        match self.embed_and_apply(delta).await {
            Ok(processed) => {
                debug!("Reindexed {} ({} chunks)", relative_path, processed);
                self.rebuild_graph();
                if let Err(e) = self.persist().await {
                    warn!("Persist after reindex failed: {}", e);
                }
            }
            Err(e) => warn!("Reindex of {} failed: {}", relative_path, e),
        }
    }

    /// Flush state before shutdown.
    pub async fn cleanup(&mut self, reason: &str) {
        info!("Indexer cleanup ({})", reason);
        if let Err(e) = self.persist().await {
            warn!("Final persist failed: {}", e);
        }
    }
}

/// Chunk one file with commit and co-change context. `None` when the file
/// cannot be read.
fn chunk_one(
    scanner: &RepositoryScanner,
    chunker: &Chunker,
    relative_path: &str,
) -> Option<Vec<CodeChunk>> {
    let content = scanner.read_to_string(relative_path).ok()?;
    let context = ChunkContext {
        last_commit: scanner
            .file_changes(std::slice::from_ref(&relative_path.to_string()))
            .into_iter()
            .next()
            .map(|fc| fc.last_commit),
        co_change_files: scanner.co_change_files(relative_path),
    };
    Some(chunker.chunk_file(relative_path, &content, &context))
}
