//! Embedder capability
//!
//! The pool and the worker runtime depend only on this trait; any backend
//! producing fixed-dimension vectors satisfies it. The crate ships
//! [`HashEmbedder`], a deterministic hash-projection backend used by the
//! worker binary default and by tests. Model-quality backends live outside
//! the core and plug in through the same trait.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use cortex_core::ModelInfo;

use crate::error::Result;

/// Batch embedding capability.
///
/// Implementations must be `Send + Sync`; the worker runtime owns one per
/// process, the searcher holds one for query encoding.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts. The result has one vector per input, each of
    /// `model_info().dimension` finite floats, in input order.
    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>>;

    /// Model descriptor: name, dimension, tokenizer.
    fn model_info(&self) -> ModelInfo;
}

/// Deterministic hash-projection embedder.
///
/// Tokenizes on non-alphanumeric boundaries, hashes each token into a
/// handful of dimensions and L2-normalizes. Not a semantic model: identical
/// texts embed identically, token overlap yields proportional cosine
/// similarity, and that is enough for the pipeline, the wire protocol and
/// every test to run without a model download.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimension: usize,
}

/// Default embedding dimension used across the index.
pub const DEFAULT_DIMENSION: usize = 384;

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_DIMENSION)
    }
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    /// Synchronous embedding of one text.
    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];

        for token in text
            .split(|c: char| !c.is_alphanumeric() && c != '_')
            .filter(|t| !t.is_empty())
        {
            let mut hasher = Sha256::new();
            hasher.update(token.to_ascii_lowercase().as_bytes());
            let digest = hasher.finalize();

            // Each token contributes to four dimensions with signed weight.
            for pair in digest.chunks(8).take(4) {
                let idx = u32::from_le_bytes([pair[0], pair[1], pair[2], pair[3]]) as usize
                    % self.dimension;
                let sign = if pair[4] & 1 == 0 { 1.0 } else { -1.0 };
                vector[idx] += sign;
            }
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut vector {
                *x /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            name: format!("hash-{}", self.dimension),
            dimension: self.dimension,
            tokenizer: "whitespace-hash".to_string(),
        }
    }
}
