//! Searcher
//!
//! Relationship-aware semantic search over one repository's vector store
//! and relationship graph. Three modes, selected in order: a smart
//! dependency-chain mode that expands semantic seeds through the traverser
//! into budgeted tiers, a relationship-aware mode that re-ranks a flat
//! union of semantic and traversal hits, and a traditional cosine top-k
//! mode. Whenever the ranked candidate set exceeds the chunk cap, the
//! guarded MMR selector makes the final cut with seeds pinned.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Instant;

use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use cortex_core::graph::RelationshipGraph;
use cortex_core::{RelationKind, VectorStore};
use cortex_embed::Embedder;

use crate::context::{build_package, ContextMode, ContextPackage, DependencyTier};
use crate::error::Result;
use crate::mmr::{GuardedMmrSelector, MmrCandidate, MmrSelection};
use crate::traverser::{
    DependencyTraverser, RelationshipPath, TraversalDirection, TraversalOptions, TraversalRequest,
};

/// Queries kept in the embedding cache.
const QUERY_CACHE_SIZE: usize = 256;

/// Default token budget with a 15% reserve held back.
pub const DEFAULT_TOKEN_BUDGET: usize = 4_000;
const BUDGET_RESERVE: f32 = 0.15;

/// Multi-hop expansion options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiHop {
    pub enabled: bool,
    pub max_hops: usize,
}

impl Default for MultiHop {
    fn default() -> Self {
        Self {
            enabled: false,
            max_hops: 2,
        }
    }
}

/// A search request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    pub task: String,
    pub max_chunks: usize,
    /// Substring filters on file paths; empty means all files
    pub file_filters: Vec<String>,
    pub multi_hop: MultiHop,
    pub context_mode: ContextMode,
    pub token_budget: usize,
}

impl Default for SearchRequest {
    fn default() -> Self {
        Self {
            task: String::new(),
            max_chunks: 10,
            file_filters: Vec::new(),
            multi_hop: MultiHop::default(),
            context_mode: ContextMode::default(),
            token_budget: DEFAULT_TOKEN_BUDGET,
        }
    }
}

/// Response status at the API boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchStatus {
    Success,
    Error,
}

/// One returned chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchChunk {
    pub chunk_id: String,
    pub file_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol_name: Option<String>,
    pub start_line: usize,
    pub end_line: usize,
    pub score: f32,
    pub content: String,
    pub tier: DependencyTier,
}

/// Search outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    pub status: SearchStatus,
    pub chunks: Vec<SearchChunk>,
    pub context_package: ContextPackage,
    pub query_time_ms: u64,
    pub total_chunks_considered: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub relationship_paths: Vec<RelationshipPath>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selection: Option<MmrSelection>,
    pub efficiency_score: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl SearchResponse {
    /// Well-formed empty response for an empty or missing index.
    pub fn empty() -> Self {
        Self {
            status: SearchStatus::Success,
            chunks: Vec::new(),
            context_package: ContextPackage::default(),
            query_time_ms: 0,
            total_chunks_considered: 0,
            relationship_paths: Vec::new(),
            selection: None,
            efficiency_score: 0.0,
            error_message: None,
        }
    }
}

/// Ranked candidate before final selection.
#[derive(Debug, Clone)]
struct Candidate {
    chunk_id: String,
    score: f32,
    tier: DependencyTier,
    critical: bool,
}

/// Relationship-aware searcher. Holds the query embedder and a bounded
/// query-embedding cache; store and graph stay owned by the indexer and
/// are borrowed per query.
pub struct Searcher {
    embedder: Arc<dyn Embedder>,
    query_cache: Mutex<LruCache<String, Vec<f32>>>,
    /// Dependency-chain assembly; disabling falls back to the flat
    /// relationship-aware mode
    chain_enabled: bool,
    selector: GuardedMmrSelector,
}

impl Searcher {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            query_cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(QUERY_CACHE_SIZE).expect("nonzero cache size"),
            )),
            chain_enabled: true,
            selector: GuardedMmrSelector::default(),
        }
    }

    pub fn with_chain_enabled(mut self, enabled: bool) -> Self {
        self.chain_enabled = enabled;
        self
    }

    /// Run a search against one repository's store and graph.
    pub async fn search(
        &self,
        store: &VectorStore,
        graph: &RelationshipGraph,
        request: &SearchRequest,
    ) -> Result<SearchResponse> {
        let started = Instant::now();
        if store.is_empty() {
            debug!("Search on empty store");
            return Ok(SearchResponse::empty());
        }

        let query_vec = self.embed_query(&request.task).await?;
        let max_chunks = request.max_chunks.max(1);
        let budget = if request.token_budget == 0 {
            DEFAULT_TOKEN_BUDGET
        } else {
            request.token_budget
        };
        let usable_budget = (budget as f32 * (1.0 - BUDGET_RESERVE)) as usize;

        // Semantic seeds, over-fetched for re-ranking headroom.
        let fetch = (max_chunks * 3).max(20);
        let mut hits = store.similarity_search(&query_vec, fetch);
        if !request.file_filters.is_empty() {
            hits.retain(|hit| {
                let file = hit.chunk_id.rsplit_once(':').map(|(f, _)| f).unwrap_or("");
                request.file_filters.iter().any(|f| file.contains(f.as_str()))
            });
        }

        let traverser_available = graph.node_count() > 0;
        let mut paths: Vec<RelationshipPath> = Vec::new();
        let mut efficiency = 0.0f32;

        let candidates = if request.multi_hop.enabled && traverser_available && self.chain_enabled
        {
            self.chain_candidates(
                store,
                graph,
                request,
                &hits,
                max_chunks,
                usable_budget,
                &mut paths,
                &mut efficiency,
            )
        } else if request.multi_hop.enabled && traverser_available {
            self.relationship_candidates(store, graph, request, &hits, max_chunks, &mut paths)
        } else {
            self.traditional_candidates(store, &hits, max_chunks)
        };

        // Final cut: MMR whenever the ranked set exceeds the cap.
        let (selected, selection) = if candidates.len() > max_chunks {
            let mmr_candidates: Vec<MmrCandidate> = candidates
                .iter()
                .map(|c| MmrCandidate {
                    chunk_id: c.chunk_id.clone(),
                    relevance: c.score.clamp(0.0, 1.0),
                    embedding: store.get(&c.chunk_id).and_then(|ch| ch.embedding.clone()),
                    tokens: store
                        .get(&c.chunk_id)
                        .map(|ch| ch.estimated_tokens())
                        .unwrap_or(0),
                    critical: c.critical,
                })
                .collect();
            let selection = self.selector.select(mmr_candidates, max_chunks, usable_budget);
            let chosen: Vec<Candidate> = selection
                .chunks
                .iter()
                .filter_map(|id| candidates.iter().find(|c| &c.chunk_id == id).cloned())
                .collect();
            (chosen, Some(selection))
        } else {
            (candidates, None)
        };

        let tiers: Vec<(String, DependencyTier)> = selected
            .iter()
            .map(|c| (c.chunk_id.clone(), c.tier))
            .collect();
        let context_package = build_package(
            store,
            &request.task,
            &tiers,
            request.context_mode,
            efficiency,
        );

        let chunks: Vec<SearchChunk> = selected
            .iter()
            .filter_map(|c| {
                let chunk = store.get(&c.chunk_id)?;
                Some(SearchChunk {
                    chunk_id: chunk.chunk_id.clone(),
                    file_path: chunk.file_path.clone(),
                    symbol_name: chunk.symbol_name.clone(),
                    start_line: chunk.start_line,
                    end_line: chunk.end_line,
                    score: c.score,
                    content: chunk.content.clone(),
                    tier: c.tier,
                })
            })
            .collect();

        info!(
            "Search \"{}\": {} chunks in {} ms",
            request.task,
            chunks.len(),
            started.elapsed().as_millis()
        );

        Ok(SearchResponse {
            status: SearchStatus::Success,
            chunks,
            context_package,
            query_time_ms: started.elapsed().as_millis() as u64,
            total_chunks_considered: store.len(),
            relationship_paths: paths,
            selection,
            efficiency_score: efficiency,
            error_message: None,
        })
    }

    async fn embed_query(&self, task: &str) -> Result<Vec<f32>> {
        if let Some(vec) = self.query_cache.lock().get(task) {
            return Ok(vec.clone());
        }
        let mut vectors = self.embedder.embed_batch(vec![task.to_string()]).await?;
        let vector = vectors.pop().unwrap_or_default();
        self.query_cache
            .lock()
            .put(task.to_string(), vector.clone());
        Ok(vector)
    }

    // ------------------------------------------------------------------
    // Mode 1: smart dependency-chain
    // ------------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    fn chain_candidates(
        &self,
        store: &VectorStore,
        graph: &RelationshipGraph,
        request: &SearchRequest,
        hits: &[cortex_core::ScoredChunk],
        max_chunks: usize,
        usable_budget: usize,
        paths: &mut Vec<RelationshipPath>,
        efficiency: &mut f32,
    ) -> Vec<Candidate> {
        // Seeds take half the slots so traversal discoveries can survive
        // the final cut alongside them.
        let seed_count = (max_chunks / 2).clamp(1, 5);
        let seeds: Vec<&cortex_core::ScoredChunk> = hits.iter().take(seed_count).collect();
        let focus_symbols: Vec<String> = seeds
            .iter()
            .filter_map(|hit| store.get(&hit.chunk_id))
            .filter_map(|chunk| chunk.symbol_name.clone())
            .collect();

        let traverser = DependencyTraverser::new(graph, store);
        let forward = traverser.traverse(&TraversalRequest {
            base_query: request.task.clone(),
            focus_symbols: focus_symbols.clone(),
            relationship_types: Vec::new(),
            options: TraversalOptions {
                max_depth: request.multi_hop.max_hops,
                direction: TraversalDirection::Forward,
                ..Default::default()
            },
            include_context: false,
            context_radius: 0,
        });
        let backward = traverser.traverse(&TraversalRequest {
            base_query: request.task.clone(),
            focus_symbols,
            relationship_types: Vec::new(),
            options: TraversalOptions {
                max_depth: request.multi_hop.max_hops,
                direction: TraversalDirection::Backward,
                ..Default::default()
            },
            include_context: true,
            context_radius: 10,
        });

        paths.extend(forward.relationship_paths.iter().cloned());
        paths.extend(backward.relationship_paths.iter().cloned());
        *efficiency = (forward.efficiency_score + backward.efficiency_score) / 2.0;

        // Tier fill in priority order under the usable budget.
        let mut candidates: Vec<Candidate> = Vec::new();
        let mut spent = 0usize;
        let mut push = |chunk_id: &str, score: f32, tier: DependencyTier, critical: bool,
                        candidates: &mut Vec<Candidate>, spent: &mut usize| {
            if candidates.iter().any(|c| c.chunk_id == chunk_id) {
                return;
            }
            let tokens = store.get(chunk_id).map(|c| c.estimated_tokens()).unwrap_or(0);
            if !critical && *spent + tokens > usable_budget {
                return;
            }
            *spent += tokens;
            candidates.push(Candidate {
                chunk_id: chunk_id.to_string(),
                score,
                tier,
                critical,
            });
        };

        for hit in &seeds {
            push(
                &hit.chunk_id,
                hit.score,
                DependencyTier::Critical,
                true,
                &mut candidates,
                &mut spent,
            );
        }
        for (i, id) in forward.related_chunks.iter().enumerate() {
            let score = 0.6 - (i as f32 * 0.01);
            push(id, score, DependencyTier::Forward, false, &mut candidates, &mut spent);
        }
        for (i, id) in backward
            .related_chunks
            .iter()
            .take(backward.relationship_paths.len())
            .enumerate()
        {
            let score = 0.5 - (i as f32 * 0.01);
            push(id, score, DependencyTier::Backward, false, &mut candidates, &mut spent);
        }
        // Context extras landed past the path-backed entries.
        for (i, id) in backward
            .related_chunks
            .iter()
            .skip(backward.relationship_paths.len())
            .enumerate()
        {
            let score = 0.3 - (i as f32 * 0.01);
            push(id, score, DependencyTier::Contextual, false, &mut candidates, &mut spent);
        }

        candidates
    }

    // ------------------------------------------------------------------
    // Mode 2: relationship-aware flat union
    // ------------------------------------------------------------------

    fn relationship_candidates(
        &self,
        store: &VectorStore,
        graph: &RelationshipGraph,
        request: &SearchRequest,
        hits: &[cortex_core::ScoredChunk],
        max_chunks: usize,
        paths: &mut Vec<RelationshipPath>,
    ) -> Vec<Candidate> {
        let focus_symbols: Vec<String> = hits
            .iter()
            .take(max_chunks)
            .filter_map(|hit| store.get(&hit.chunk_id))
            .filter_map(|chunk| chunk.symbol_name.clone())
            .collect();

        let traverser = DependencyTraverser::new(graph, store);
        let traversal = traverser.traverse(&TraversalRequest {
            base_query: request.task.clone(),
            focus_symbols,
            relationship_types: Vec::new(),
            options: TraversalOptions {
                max_depth: request.multi_hop.max_hops,
                ..Default::default()
            },
            include_context: false,
            context_radius: 0,
        });

        let avg_path_strength = if traversal.relationship_paths.is_empty() {
            0.0
        } else {
            traversal
                .relationship_paths
                .iter()
                .map(|p| p.total_strength)
                .sum::<f32>()
                / traversal.relationship_paths.len() as f32
        };
        let avg_group_importance = if traversal.context_groups.is_empty() {
            0.0
        } else {
            traversal
                .context_groups
                .iter()
                .map(|g| g.importance)
                .sum::<f32>()
                / traversal.context_groups.len() as f32
        };
        let boost = 0.3 * avg_path_strength + 0.2 * avg_group_importance.min(1.0);
        paths.extend(traversal.relationship_paths.iter().cloned());

        let mut candidates: Vec<Candidate> = Vec::new();
        for (i, hit) in hits.iter().enumerate() {
            candidates.push(Candidate {
                chunk_id: hit.chunk_id.clone(),
                score: hit.score,
                tier: DependencyTier::Critical,
                critical: i == 0,
            });
        }
        for id in traversal.related_chunks {
            if candidates.iter().any(|c| c.chunk_id == id) {
                if let Some(c) = candidates.iter_mut().find(|c| c.chunk_id == id) {
                    c.score += boost;
                }
            } else {
                candidates.push(Candidate {
                    chunk_id: id,
                    score: 0.4 + boost,
                    tier: DependencyTier::Forward,
                    critical: false,
                });
            }
        }

        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        candidates
    }

    // ------------------------------------------------------------------
    // Mode 3: traditional top-k
    // ------------------------------------------------------------------

    fn traditional_candidates(
        &self,
        store: &VectorStore,
        hits: &[cortex_core::ScoredChunk],
        max_chunks: usize,
    ) -> Vec<Candidate> {
        let mut candidates: Vec<Candidate> = hits
            .iter()
            .take(max_chunks)
            .enumerate()
            .map(|(i, hit)| Candidate {
                chunk_id: hit.chunk_id.clone(),
                score: hit.score,
                tier: DependencyTier::Critical,
                critical: i == 0,
            })
            .collect();

        // Light relationship expansion: callers of the top symbols.
        let top_symbols: Vec<String> = candidates
            .iter()
            .take(3)
            .filter_map(|c| store.get(&c.chunk_id))
            .filter_map(|c| c.symbol_name.clone())
            .collect();
        for symbol in top_symbols {
            for related in store.find_by_relationship(RelationKind::Calls, &symbol) {
                if !candidates.iter().any(|c| c.chunk_id == related.chunk_id) {
                    candidates.push(Candidate {
                        chunk_id: related.chunk_id.clone(),
                        score: 0.3,
                        tier: DependencyTier::Backward,
                        critical: false,
                    });
                }
            }
        }
        candidates
    }
}
