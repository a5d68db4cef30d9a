//! Delta Engine
//!
//! Computes file- and chunk-level change sets against persisted state. A
//! file is compared by hashing the concatenation of its stored chunks'
//! contents in line order against the same hash over freshly-computed
//! chunks; on mismatch all stored chunk ids are marked for removal and the
//! fresh chunks are partitioned by content hash so unchanged chunks inherit
//! their old embedding instead of being re-embedded.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::types::CodeChunk;
use crate::vector_store::VectorStore;

/// File-level breakdown of a delta.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileChanges {
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub deleted: Vec<String>,
}

/// The chunk-level triple plus the file-level breakdown.
#[derive(Debug, Clone, Default)]
pub struct ChunkDelta {
    /// Fresh chunks with no persisted counterpart (new content hashes)
    pub added: Vec<CodeChunk>,
    /// Fresh chunks whose content hash matched a persisted chunk; their
    /// embedding was inherited from the old chunk
    pub updated: Vec<CodeChunk>,
    /// Persisted chunk ids that no longer exist
    pub removed: Vec<String>,
    pub file_changes: FileChanges,
}

impl ChunkDelta {
    pub fn has_changes(&self) -> bool {
        !self.added.is_empty() || !self.updated.is_empty() || !self.removed.is_empty()
    }

    pub fn total_changes(&self) -> usize {
        self.added.len() + self.updated.len() + self.removed.len()
    }

    /// Apply this delta to a store: deletions first, then upserts.
    ///
    /// Afterwards no id in `removed` remains and every chunk in
    /// `added ∪ updated` is present.
    pub fn apply(&self, store: &mut VectorStore) {
        for id in &self.removed {
            store.delete(id);
        }
        store.upsert(self.added.clone());
        store.upsert(self.updated.clone());
    }
}

/// Result of a content-hash chunk comparison for one file.
#[derive(Debug, Clone, Default)]
pub struct ChunkComparison {
    /// New content hashes, need embedding
    pub to_add: Vec<CodeChunk>,
    /// Matched content hashes, old embedding inherited
    pub to_keep: Vec<CodeChunk>,
    /// Orphaned old chunk ids
    pub to_remove: Vec<String>,
}

/// Computes deltas between live files and persisted chunks.
#[derive(Debug, Clone, Default)]
pub struct DeltaEngine;

impl DeltaEngine {
    pub fn new() -> Self {
        Self
    }

    /// Compute the delta for `files` against `store`.
    ///
    /// `fresh_chunks` produces the current chunk list for a live file, or
    /// `None` when the file cannot be read; an unreadable file is treated
    /// as deleted for this pass. Paths present in the store but absent from
    /// `files` are deleted.
    pub fn calculate_file_delta<F>(
        &self,
        store: &VectorStore,
        files: &[String],
        mut fresh_chunks: F,
    ) -> ChunkDelta
    where
        F: FnMut(&str) -> Option<Vec<CodeChunk>>,
    {
        let mut delta = ChunkDelta::default();
        let input_set: HashSet<&str> = files.iter().map(String::as_str).collect();

        for file in files {
            let stored = store.chunks_by_file(file);

            let fresh = match fresh_chunks(file) {
                Some(chunks) => chunks,
                None => {
                    debug!("File unreadable during delta, treating as deleted: {}", file);
                    if !stored.is_empty() {
                        delta
                            .removed
                            .extend(stored.iter().map(|c| c.chunk_id.clone()));
                        delta.file_changes.deleted.push(file.clone());
                    }
                    continue;
                }
            };

            if stored.is_empty() {
                if !fresh.is_empty() {
                    delta.added.extend(fresh);
                    delta.file_changes.added.push(file.clone());
                }
                continue;
            }

            let stored_hash = Self::file_hash(stored.iter().map(|c| c.content.as_str()));
            let fresh_hash = Self::file_hash(fresh.iter().map(|c| c.content.as_str()));
            if stored_hash == fresh_hash {
                continue;
            }

            // Modified: all stored ids go, fresh chunks come back in with
            // embeddings reused where content survived.
            let comparison = self.compare_chunks(&stored, fresh);
            delta.removed.extend(comparison.to_remove);
            delta
                .removed
                .extend(comparison.to_keep.iter().filter_map(|c| {
                    // The id may have shifted (line moved); the old id is
                    // already covered by to_remove when orphaned, but a
                    // same-id keep must still replace the stored row.
                    stored
                        .iter()
                        .find(|s| s.content_hash == c.content_hash)
                        .map(|s| s.chunk_id.clone())
                }));
            delta.added.extend(comparison.to_add);
            delta.updated.extend(comparison.to_keep);
            delta.file_changes.modified.push(file.clone());
        }

        // Anything persisted but no longer listed is deleted.
        for path in store.file_paths() {
            if !input_set.contains(path.as_str()) {
                delta
                    .removed
                    .extend(store.chunks_by_file(&path).iter().map(|c| c.chunk_id.clone()));
                delta.file_changes.deleted.push(path);
            }
        }

        delta.removed.sort();
        delta.removed.dedup();
        delta
    }

    /// Partition `fresh` chunks of one file against its stored chunks by
    /// content hash. Matching hashes inherit the stored embedding.
    pub fn compare_chunks(
        &self,
        stored: &[&CodeChunk],
        fresh: Vec<CodeChunk>,
    ) -> ChunkComparison {
        let by_hash: HashMap<&str, &CodeChunk> = stored
            .iter()
            .map(|c| (c.content_hash.as_str(), *c))
            .collect();

        let mut comparison = ChunkComparison::default();
        let mut matched: HashSet<&str> = HashSet::new();

        for mut chunk in fresh {
            match by_hash.get(chunk.content_hash.as_str()) {
                Some(old) => {
                    chunk.embedding = old.embedding.clone();
                    chunk.indexed_at = old.indexed_at;
                    matched.insert(old.content_hash.as_str());
                    comparison.to_keep.push(chunk);
                }
                None => comparison.to_add.push(chunk),
            }
        }

        comparison.to_remove = stored
            .iter()
            .filter(|c| !matched.contains(c.content_hash.as_str()))
            .map(|c| c.chunk_id.clone())
            .collect();

        comparison
    }

    /// Hash of the concatenation of chunk contents in line order.
    fn file_hash<'a>(contents: impl Iterator<Item = &'a str>) -> String {
        let joined: Vec<&str> = contents.collect();
        CodeChunk::hash_content(&joined.join("\n"))
    }
}
