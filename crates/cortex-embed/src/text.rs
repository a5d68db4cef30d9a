//! Embedding text construction
//!
//! A chunk's *embedding text* is what actually goes to the model: symbol
//! name, chunk kind, content and the first three imports joined by spaces.
//! The cache fingerprint is the SHA-256 of that text, so two chunks with
//! the same embedding text share one cache entry even across files.

use sha2::{Digest, Sha256};

use cortex_core::CodeChunk;

/// Imports included in the embedding text.
const IMPORT_CONTEXT: usize = 3;

/// Build the embedding text for a chunk.
pub fn embedding_text(chunk: &CodeChunk) -> String {
    let mut parts: Vec<&str> = Vec::with_capacity(3 + IMPORT_CONTEXT);
    if let Some(symbol) = &chunk.symbol_name {
        parts.push(symbol);
    }
    parts.push(chunk.kind.as_str());
    parts.push(&chunk.content);
    for import in chunk.imports.iter().take(IMPORT_CONTEXT) {
        parts.push(import);
    }
    parts.join(" ")
}

/// SHA-256 hex fingerprint of an embedding text.
pub fn fingerprint(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Fingerprint of a chunk's embedding text.
pub fn chunk_fingerprint(chunk: &CodeChunk) -> String {
    fingerprint(&embedding_text(chunk))
}
