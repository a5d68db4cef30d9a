//! In-memory Vector Store
//!
//! Holds the chunk map for one repository and answers nearest-neighbor
//! queries by linear cosine scan. The scan is O(n·d); the store is small
//! enough per-repository that an ANN index has not been needed, and the
//! query surface is narrow so one can be substituted behind the same
//! methods.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::types::CodeChunk;

/// Relationship field selector for [`VectorStore::find_by_relationship`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    Imports,
    Exports,
    Calls,
    CalledBy,
    DataFlow,
}

/// A similarity hit: chunk id plus cosine score.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk_id: String,
    pub score: f32,
}

/// Single-writer, in-memory map of `chunk_id -> CodeChunk`.
#[derive(Debug, Default)]
pub struct VectorStore {
    chunks: HashMap<String, CodeChunk>,
    /// `file_path -> chunk ids`, kept in sync on every mutation
    by_file: HashMap<String, Vec<String>>,
}

impl VectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn get(&self, chunk_id: &str) -> Option<&CodeChunk> {
        self.chunks.get(chunk_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CodeChunk> {
        self.chunks.values()
    }

    /// Insert or replace chunks. Replacement updates the file index.
    pub fn upsert(&mut self, chunks: Vec<CodeChunk>) {
        for chunk in chunks {
            if let Some(old) = self.chunks.get(&chunk.chunk_id) {
                if old.file_path != chunk.file_path {
                    self.unindex_file_entry(&old.file_path.clone(), &chunk.chunk_id);
                }
            }
            let ids = self.by_file.entry(chunk.file_path.clone()).or_default();
            if !ids.contains(&chunk.chunk_id) {
                ids.push(chunk.chunk_id.clone());
            }
            self.chunks.insert(chunk.chunk_id.clone(), chunk);
        }
    }

    /// Remove a chunk by id. Returns the removed chunk when present.
    pub fn delete(&mut self, chunk_id: &str) -> Option<CodeChunk> {
        let chunk = self.chunks.remove(chunk_id)?;
        self.unindex_file_entry(&chunk.file_path, chunk_id);
        Some(chunk)
    }

    /// Remove every chunk of a file. Returns removed ids.
    pub fn delete_file(&mut self, file_path: &str) -> Vec<String> {
        let ids = self.by_file.remove(file_path).unwrap_or_default();
        for id in &ids {
            self.chunks.remove(id);
        }
        ids
    }

    /// Chunks of one file in line order.
    pub fn chunks_by_file(&self, file_path: &str) -> Vec<&CodeChunk> {
        let mut chunks: Vec<&CodeChunk> = self
            .by_file
            .get(file_path)
            .map(|ids| ids.iter().filter_map(|id| self.chunks.get(id)).collect())
            .unwrap_or_default();
        chunks.sort_by_key(|c| c.start_line);
        chunks
    }

    /// All distinct file paths present in the store.
    pub fn file_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.by_file.keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Chunks whose given relationship list contains `symbol`.
    pub fn find_by_relationship(&self, kind: RelationKind, symbol: &str) -> Vec<&CodeChunk> {
        let mut found: Vec<&CodeChunk> = self
            .chunks
            .values()
            .filter(|c| {
                let list = match kind {
                    RelationKind::Imports => &c.imports,
                    RelationKind::Exports => &c.exports,
                    RelationKind::Calls => &c.calls,
                    RelationKind::CalledBy => &c.called_by,
                    RelationKind::DataFlow => &c.data_flow,
                };
                list.iter().any(|s| s == symbol)
            })
            .collect();
        found.sort_by(|a, b| a.chunk_id.cmp(&b.chunk_id));
        found
    }

    /// Top-k chunks by cosine similarity to `query`. Chunks without an
    /// embedding, or with a mismatched dimension, are skipped.
    pub fn similarity_search(&self, query: &[f32], k: usize) -> Vec<ScoredChunk> {
        if k == 0 || query.is_empty() {
            return Vec::new();
        }

        let mut scored: Vec<ScoredChunk> = self
            .chunks
            .values()
            .filter_map(|chunk| {
                let embedding = chunk.embedding.as_ref()?;
                if embedding.len() != query.len() {
                    return None;
                }
                let score = cosine_similarity(query, embedding);
                score.is_finite().then(|| ScoredChunk {
                    chunk_id: chunk.chunk_id.clone(),
                    score,
                })
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        scored.truncate(k);
        scored
    }

    fn unindex_file_entry(&mut self, file_path: &str, chunk_id: &str) {
        if let Some(ids) = self.by_file.get_mut(file_path) {
            ids.retain(|id| id != chunk_id);
            if ids.is_empty() {
                self.by_file.remove(file_path);
            }
        }
    }
}

/// Cosine similarity of two equal-length vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}
