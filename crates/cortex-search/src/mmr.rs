//! Guarded MMR selection
//!
//! Maximal-marginal-relevance selection under a token budget: maximizes
//! relevance while penalizing redundancy against already-selected chunks.
//! A critical set is pinned up front and must survive selection regardless
//! of diversity penalties.

use std::time::Instant;

use serde::{Deserialize, Serialize};

use cortex_core::cosine_similarity;

/// One selectable candidate.
#[derive(Debug, Clone)]
pub struct MmrCandidate {
    pub chunk_id: String,
    /// Query relevance in [0, 1]
    pub relevance: f32,
    pub embedding: Option<Vec<f32>>,
    pub tokens: usize,
    /// Pinned: must survive selection
    pub critical: bool,
}

/// Selection outcome and quality metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MmrSelection {
    pub chunks: Vec<String>,
    pub total_tokens: usize,
    /// Fraction of critical candidates that made it (1.0 unless the
    /// candidate list was truncated upstream)
    pub critical_set_coverage: f32,
    /// 1 − average pairwise similarity of the selected set
    pub diversity_score: f32,
    pub budget_utilization: f32,
    pub selection_time_ms: u64,
}

/// MMR selector with a pinned critical set.
#[derive(Debug, Clone)]
pub struct GuardedMmrSelector {
    /// Relevance weight; `1 - lambda` weighs the redundancy penalty
    pub lambda: f32,
}

impl Default for GuardedMmrSelector {
    fn default() -> Self {
        Self { lambda: 0.7 }
    }
}

impl GuardedMmrSelector {
    pub fn new(lambda: f32) -> Self {
        Self {
            lambda: lambda.clamp(0.0, 1.0),
        }
    }

    /// Select up to `max_chunks` candidates within `token_budget`.
    ///
    /// Critical candidates are taken first, in relevance order, even when
    /// that exhausts the budget. Remaining slots fill greedily by the MMR
    /// objective `lambda * relevance - (1 - lambda) * max_sim_to_selected`.
    pub fn select(
        &self,
        mut candidates: Vec<MmrCandidate>,
        max_chunks: usize,
        token_budget: usize,
    ) -> MmrSelection {
        let started = Instant::now();
        let critical_total = candidates.iter().filter(|c| c.critical).count();

        candidates.sort_by(|a, b| {
            b.relevance
                .partial_cmp(&a.relevance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });

        let mut selected: Vec<MmrCandidate> = Vec::new();
        let mut total_tokens = 0usize;

        // Phase 1: pin the critical set.
        let mut remaining: Vec<MmrCandidate> = Vec::new();
        for candidate in candidates {
            if candidate.critical && selected.len() < max_chunks {
                total_tokens += candidate.tokens;
                selected.push(candidate);
            } else {
                remaining.push(candidate);
            }
        }

        // Phase 2: greedy MMR fill within budget.
        while selected.len() < max_chunks && !remaining.is_empty() {
            let mut best: Option<(usize, f32)> = None;
            for (i, candidate) in remaining.iter().enumerate() {
                if total_tokens + candidate.tokens > token_budget {
                    continue;
                }
                let redundancy = selected
                    .iter()
                    .filter_map(|s| match (&candidate.embedding, &s.embedding) {
                        (Some(a), Some(b)) if a.len() == b.len() => {
                            Some(cosine_similarity(a, b))
                        }
                        _ => None,
                    })
                    .fold(0.0f32, f32::max);
                let score = self.lambda * candidate.relevance - (1.0 - self.lambda) * redundancy;
                match best {
                    Some((_, best_score)) if best_score >= score => {}
                    _ => best = Some((i, score)),
                }
            }

            match best {
                Some((i, _)) => {
                    let candidate = remaining.swap_remove(i);
                    total_tokens += candidate.tokens;
                    selected.push(candidate);
                }
                None => break, // nothing fits the budget
            }
        }

        let critical_selected = selected.iter().filter(|c| c.critical).count();
        let diversity_score = diversity(&selected);

        MmrSelection {
            chunks: selected.into_iter().map(|c| c.chunk_id).collect(),
            total_tokens,
            critical_set_coverage: if critical_total == 0 {
                1.0
            } else {
                critical_selected as f32 / critical_total as f32
            },
            diversity_score,
            budget_utilization: if token_budget == 0 {
                0.0
            } else {
                (total_tokens as f32 / token_budget as f32).min(1.0)
            },
            selection_time_ms: started.elapsed().as_millis() as u64,
        }
    }
}

fn diversity(selected: &[MmrCandidate]) -> f32 {
    let mut pairs = 0usize;
    let mut similarity_sum = 0.0f32;
    for i in 0..selected.len() {
        for j in (i + 1)..selected.len() {
            if let (Some(a), Some(b)) = (&selected[i].embedding, &selected[j].embedding) {
                if a.len() == b.len() {
                    similarity_sum += cosine_similarity(a, b);
                    pairs += 1;
                }
            }
        }
    }
    if pairs == 0 {
        1.0
    } else {
        (1.0 - similarity_sum / pairs as f32).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: &str, relevance: f32, embedding: Vec<f32>, critical: bool) -> MmrCandidate {
        MmrCandidate {
            chunk_id: id.to_string(),
            relevance,
            embedding: Some(embedding),
            tokens: 100,
            critical,
        }
    }

    #[test]
    fn test_critical_set_always_survives() {
        let candidates = vec![
            candidate("a", 0.9, vec![1.0, 0.0], false),
            candidate("b", 0.1, vec![0.0, 1.0], true),
            candidate("c", 0.8, vec![1.0, 0.1], false),
        ];
        let selection = GuardedMmrSelector::default().select(candidates, 2, 10_000);
        assert!(selection.chunks.contains(&"b".to_string()));
        assert!((selection.critical_set_coverage - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_redundancy_penalized() {
        // Two near-identical high-relevance chunks plus one distinct: MMR
        // should pick one of the twins and the distinct one.
        let candidates = vec![
            candidate("twin1", 0.9, vec![1.0, 0.0], false),
            candidate("twin2", 0.89, vec![0.99, 0.01], false),
            candidate("other", 0.6, vec![0.0, 1.0], false),
        ];
        let selection = GuardedMmrSelector::new(0.5).select(candidates, 2, 10_000);
        assert!(selection.chunks.contains(&"twin1".to_string()));
        assert!(selection.chunks.contains(&"other".to_string()));
    }

    #[test]
    fn test_token_budget_respected_for_fill() {
        let mut candidates = vec![
            candidate("a", 0.9, vec![1.0, 0.0], false),
            candidate("b", 0.8, vec![0.0, 1.0], false),
            candidate("c", 0.7, vec![0.5, 0.5], false),
        ];
        for c in &mut candidates {
            c.tokens = 150;
        }
        let selection = GuardedMmrSelector::default().select(candidates, 3, 300);
        assert_eq!(selection.chunks.len(), 2);
        assert!(selection.total_tokens <= 300);
        assert!(selection.budget_utilization <= 1.0);
    }

    #[test]
    fn test_max_chunks_cap() {
        let candidates = (0..10)
            .map(|i| candidate(&format!("c{}", i), 0.5, vec![i as f32, 1.0], false))
            .collect();
        let selection = GuardedMmrSelector::default().select(candidates, 4, 100_000);
        assert_eq!(selection.chunks.len(), 4);
    }

    #[test]
    fn test_empty_candidates() {
        let selection = GuardedMmrSelector::default().select(Vec::new(), 5, 1_000);
        assert!(selection.chunks.is_empty());
        assert_eq!(selection.total_tokens, 0);
        assert!((selection.critical_set_coverage - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_diversity_score_reflects_spread() {
        let spread = GuardedMmrSelector::default().select(
            vec![
                candidate("a", 0.9, vec![1.0, 0.0], false),
                candidate("b", 0.8, vec![0.0, 1.0], false),
            ],
            2,
            10_000,
        );
        let tight = GuardedMmrSelector::default().select(
            vec![
                candidate("a", 0.9, vec![1.0, 0.0], false),
                candidate("b", 0.8, vec![1.0, 0.001], false),
            ],
            2,
            10_000,
        );
        assert!(spread.diversity_score > tight.diversity_score);
    }
}
