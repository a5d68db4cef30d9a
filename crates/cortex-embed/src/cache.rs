//! Embedding Cache
//!
//! Shared, parent-owned cache keyed by the SHA-256 fingerprint of a chunk's
//! embedding text. Eviction is a scored LRU: when utilization passes the
//! threshold, the bottom share by `(now - last_accessed) / (hit_count + 1)`
//! is dropped (a higher score means staler and less reused). Eviction is
//! guarded by a single-writer flag so overlapping eviction calls coalesce
//! into one.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Cache sizing and eviction policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub max_entries: usize,
    /// Utilization fraction that triggers eviction
    pub eviction_threshold: f64,
    /// Fraction of entries dropped per eviction
    pub eviction_percentage: f64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 50_000,
            eviction_threshold: 0.8,
            eviction_percentage: 0.2,
        }
    }
}

/// One cached embedding with access bookkeeping.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub embedding: Vec<f32>,
    pub hit_count: u64,
    pub last_accessed: u64,
    pub created_at: u64,
}

/// Cumulative cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub insertions: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Fingerprint-keyed embedding cache. Owned by the pool parent; only the
/// parent mutates it.
#[derive(Debug)]
pub struct EmbeddingCache {
    entries: HashMap<String, CacheEntry>,
    config: CacheConfig,
    stats: CacheStats,
    /// Single-writer eviction flag: set while an eviction runs so that
    /// re-entrant calls coalesce
    evicting: bool,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl EmbeddingCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: HashMap::new(),
            config,
            stats: CacheStats::default(),
            evicting: false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    /// Look up a fingerprint, updating access bookkeeping on a hit.
    pub fn get(&mut self, fingerprint: &str) -> Option<Vec<f32>> {
        match self.entries.get_mut(fingerprint) {
            Some(entry) => {
                entry.hit_count += 1;
                entry.last_accessed = now_ms();
                self.stats.hits += 1;
                Some(entry.embedding.clone())
            }
            None => {
                self.stats.misses += 1;
                None
            }
        }
    }

    /// Peek without counting a hit or miss.
    pub fn contains(&self, fingerprint: &str) -> bool {
        self.entries.contains_key(fingerprint)
    }

    /// Insert an embedding, evicting first when over the threshold.
    pub fn insert(&mut self, fingerprint: String, embedding: Vec<f32>) {
        self.maybe_evict();
        let now = now_ms();
        self.entries.insert(
            fingerprint,
            CacheEntry {
                embedding,
                hit_count: 0,
                last_accessed: now,
                created_at: now,
            },
        );
        self.stats.insertions += 1;
    }

    /// Drop everything. Called on pool shutdown.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Evict the bottom share by LRU score when utilization exceeds the
    /// threshold. Returns how many entries were dropped.
    pub fn maybe_evict(&mut self) -> usize {
        let threshold =
            (self.config.max_entries as f64 * self.config.eviction_threshold) as usize;
        if self.entries.len() <= threshold || self.evicting {
            return 0;
        }
        self.evicting = true;

        let now = now_ms();
        let mut scored: Vec<(String, f64, u64)> = self
            .entries
            .iter()
            .map(|(key, entry)| {
                let age = now.saturating_sub(entry.last_accessed) as f64;
                (
                    key.clone(),
                    age / (entry.hit_count as f64 + 1.0),
                    entry.hit_count,
                )
            })
            .collect();
        // Highest score = least valuable, evicted first; score ties fall
        // back to fewest hits, then key for determinism.
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.2.cmp(&b.2))
                .then_with(|| a.0.cmp(&b.0))
        });

        let drop_count =
            ((self.entries.len() as f64) * self.config.eviction_percentage).ceil() as usize;
        for (key, _, _) in scored.into_iter().take(drop_count) {
            self.entries.remove(&key);
        }

        self.stats.evictions += drop_count as u64;
        debug!(
            "Evicted {} cache entries ({} remain)",
            drop_count,
            self.entries.len()
        );
        self.evicting = false;
        drop_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_cache() -> EmbeddingCache {
        EmbeddingCache::new(CacheConfig {
            max_entries: 10,
            eviction_threshold: 0.8,
            eviction_percentage: 0.2,
        })
    }

    #[test]
    fn test_miss_then_hit() {
        let mut cache = small_cache();
        assert!(cache.get("fp1").is_none());
        cache.insert("fp1".into(), vec![1.0, 2.0]);
        assert_eq!(cache.get("fp1"), Some(vec![1.0, 2.0]));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_eviction_at_threshold() {
        let mut cache = small_cache();
        // Threshold is 8 of 10; the insertion finding 9 live entries evicts.
        for i in 0..10 {
            cache.insert(format!("fp{}", i), vec![i as f32]);
        }
        assert!(cache.stats().evictions > 0);
        assert!(cache.len() <= 9);
    }

    #[test]
    fn test_eviction_prefers_unused_entries() {
        let mut cache = small_cache();
        for i in 0..9 {
            cache.insert(format!("fp{}", i), vec![i as f32]);
        }
        // Touch fp0..fp5 so fp6..fp8 carry zero hits.
        for i in 0..6 {
            cache.get(&format!("fp{}", i));
        }
        // Crossing the threshold evicts the untouched entries first.
        cache.insert("fp9".into(), vec![9.0]);

        for i in 0..6 {
            assert!(cache.contains(&format!("fp{}", i)), "fp{} evicted", i);
        }
        assert!(cache.stats().evictions > 0);
    }

    #[test]
    fn test_clear() {
        let mut cache = small_cache();
        cache.insert("fp".into(), vec![1.0]);
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_no_eviction_below_threshold() {
        let mut cache = small_cache();
        for i in 0..5 {
            cache.insert(format!("fp{}", i), vec![i as f32]);
        }
        assert_eq!(cache.stats().evictions, 0);
        assert_eq!(cache.len(), 5);
    }
}
