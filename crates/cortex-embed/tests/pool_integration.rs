//! Pool behavior under healthy, failing, crashing and hanging workers.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use cortex_embed::embedder::HashEmbedder;
use cortex_embed::error::{EmbedError, Result};
use cortex_embed::pool::{
    EmbeddingPool, InProcessSpawner, PoolConfig, WorkerConnection, WorkerSpawner,
};
use cortex_embed::protocol::{EmbedStats, ParentMessage, WorkerMessage};
use cortex_embed::text;
use cortex_embed::{batching::BatchConfig, cache::CacheConfig};

const DIM: usize = 16;

fn test_config(process_count: usize) -> PoolConfig {
    PoolConfig {
        process_count,
        dimension: DIM,
        batch_timeout_ms: 5_000,
        warning_fraction: 0.7,
        init_timeout_ms: 5_000,
        shared_threshold: 50,
        cache: CacheConfig::default(),
        batching: BatchConfig {
            initial: 4,
            min: 1,
            max: 16,
            step: 2,
            failure_recovery_size: 2,
            ..Default::default()
        },
    }
}

fn texts(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("symbol_{} function body_{}", i, i)).collect()
}

// ============================================================================
// Scripted worker: failure injection without processes
// ============================================================================

/// Shared fault counters, decremented as faults are consumed.
#[derive(Default)]
struct Faults {
    fail_batches: AtomicU32,
    crash_batches: AtomicU32,
    hang_batches: AtomicU32,
    bad_dimension_batches: AtomicU32,
}

struct ScriptedSpawner {
    faults: Arc<Faults>,
}

impl ScriptedSpawner {
    fn new(faults: Faults) -> Self {
        Self {
            faults: Arc::new(faults),
        }
    }
}

impl WorkerSpawner for ScriptedSpawner {
    fn spawn(&self, _worker_id: usize) -> Result<Box<dyn WorkerConnection>> {
        Ok(Box::new(ScriptedConnection {
            faults: self.faults.clone(),
            embedder: HashEmbedder::new(DIM),
            queue: VecDeque::new(),
            crashed: false,
            hanging: false,
        }))
    }
}

struct ScriptedConnection {
    faults: Arc<Faults>,
    embedder: HashEmbedder,
    queue: VecDeque<WorkerMessage>,
    crashed: bool,
    hanging: bool,
}

fn take(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| v.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl WorkerConnection for ScriptedConnection {
    async fn send(&mut self, message: &ParentMessage) -> Result<()> {
        match message {
            ParentMessage::Init { .. } => {
                self.queue.push_back(WorkerMessage::InitComplete {
                    success: true,
                    error: None,
                });
            }
            ParentMessage::EmbedBatch { batch_id, data } => {
                let stats = EmbedStats {
                    duration_ms: 1,
                    texts: data.texts.len(),
                };
                if take(&self.faults.crash_batches) {
                    self.crashed = true;
                } else if take(&self.faults.hang_batches) {
                    self.hanging = true;
                } else if take(&self.faults.fail_batches) {
                    self.queue.push_back(WorkerMessage::EmbedComplete {
                        batch_id: *batch_id,
                        success: false,
                        embeddings: None,
                        partial: None,
                        stats,
                    });
                } else if take(&self.faults.bad_dimension_batches) {
                    self.queue.push_back(WorkerMessage::EmbedComplete {
                        batch_id: *batch_id,
                        success: true,
                        embeddings: Some(vec![vec![1.0; DIM + 3]; data.texts.len()]),
                        partial: None,
                        stats,
                    });
                } else {
                    let embeddings = data.texts.iter().map(|t| self.embedder.embed_one(t)).collect();
                    self.queue.push_back(WorkerMessage::EmbedComplete {
                        batch_id: *batch_id,
                        success: true,
                        embeddings: Some(embeddings),
                        partial: None,
                        stats,
                    });
                }
            }
            ParentMessage::EmbedBatchShared { batch_id, data } => {
                let embeddings: Vec<Vec<f32>> =
                    data.texts.iter().map(|t| self.embedder.embed_one(t)).collect();
                cortex_embed::shared::write_embeddings(&data.shared_buffer_key, &embeddings)?;
                self.queue.push_back(WorkerMessage::SharedMemory {
                    batch_id: *batch_id,
                    success: true,
                    buffer_key: data.shared_buffer_key.clone(),
                    result_count: embeddings.len(),
                    embed_dimension: DIM,
                    stats: EmbedStats {
                        duration_ms: 1,
                        texts: data.texts.len(),
                    },
                    error: None,
                });
            }
            ParentMessage::QueryMemory { request_id } => {
                self.queue.push_back(WorkerMessage::MemoryResponse {
                    request_id: *request_id,
                    success: true,
                    memory_usage: 0,
                });
            }
            ParentMessage::Shutdown => {}
        }
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<WorkerMessage>> {
        if self.crashed {
            return Ok(None);
        }
        if self.hanging {
            std::future::pending::<()>().await;
        }
        match self.queue.pop_front() {
            Some(message) => Ok(Some(message)),
            None => Ok(None),
        }
    }

    async fn terminate(&mut self) {}
}

// ============================================================================
// Healthy pool
// ============================================================================

#[tokio::test]
async fn test_embed_matches_backend() {
    let pool = EmbeddingPool::spawn(
        InProcessSpawner::new(|| HashEmbedder::new(DIM)),
        test_config(2),
    )
    .await
    .unwrap();

    let inputs = texts(3);
    let out = pool.embed_texts(inputs.clone()).await.unwrap();

    let reference = HashEmbedder::new(DIM);
    for (text, embedding) in inputs.iter().zip(out.iter()) {
        assert_eq!(embedding, &reference.embed_one(text));
    }
    pool.shutdown().await;
}

#[tokio::test]
async fn test_second_pass_fully_cached() {
    let pool = EmbeddingPool::spawn(
        InProcessSpawner::new(|| HashEmbedder::new(DIM)),
        test_config(1),
    )
    .await
    .unwrap();

    let inputs = texts(6);
    let first = pool.embed_texts(inputs.clone()).await.unwrap();
    let dispatched_after_first = pool.stats().batches_dispatched;

    let second = pool.embed_texts(inputs).await.unwrap();
    let stats = pool.stats();

    assert_eq!(first, second);
    assert_eq!(
        stats.batches_dispatched, dispatched_after_first,
        "second pass must not reach a worker"
    );
    assert!(stats.cache.hits >= 6);
    pool.shutdown().await;
}

#[tokio::test]
async fn test_ordering_preserved_across_batches() {
    // Batch size 4 over 13 texts: four batches, two workers racing.
    let pool = EmbeddingPool::spawn(
        InProcessSpawner::new(|| HashEmbedder::new(DIM)),
        test_config(2),
    )
    .await
    .unwrap();

    let inputs = texts(13);
    let out = pool.embed_texts(inputs.clone()).await.unwrap();
    assert_eq!(out.len(), 13);

    let reference = HashEmbedder::new(DIM);
    for (i, text) in inputs.iter().enumerate() {
        assert_eq!(out[i], reference.embed_one(text), "row {} out of order", i);
    }
    pool.shutdown().await;
}

#[tokio::test]
async fn test_cached_results_spliced_between_uncached() {
    let pool = EmbeddingPool::spawn(
        InProcessSpawner::new(|| HashEmbedder::new(DIM)),
        test_config(1),
    )
    .await
    .unwrap();

    // Warm the cache for every even row.
    let all = texts(8);
    let even: Vec<String> = all.iter().step_by(2).cloned().collect();
    pool.embed_texts(even).await.unwrap();

    let out = pool.embed_texts(all.clone()).await.unwrap();
    let reference = HashEmbedder::new(DIM);
    for (i, text) in all.iter().enumerate() {
        assert_eq!(out[i], reference.embed_one(text));
    }
    pool.shutdown().await;
}

#[tokio::test]
async fn test_shared_buffer_transport() {
    let mut config = test_config(1);
    config.shared_threshold = 2;
    config.batching.initial = 8;

    let pool = EmbeddingPool::spawn(ScriptedSpawner::new(Faults::default()), config)
        .await
        .unwrap();

    let inputs = texts(6);
    let out = pool.embed_texts(inputs.clone()).await.unwrap();

    let reference = HashEmbedder::new(DIM);
    for (text, embedding) in inputs.iter().zip(out.iter()) {
        assert_eq!(embedding, &reference.embed_one(text));
    }
    assert!(pool.stats().shared_batches >= 1);
    pool.shutdown().await;
}

#[tokio::test]
async fn test_embed_chunks_uses_embedding_text() {
    let pool = EmbeddingPool::spawn(
        InProcessSpawner::new(|| HashEmbedder::new(DIM)),
        test_config(1),
    )
    .await
    .unwrap();

    let chunks = cortex_core::Chunker::new().chunk_file(
        "a.ts",
        "export function gamma() {\n  return 3;\n}",
        &cortex_core::ChunkContext::default(),
    );
    let out = pool.embed_chunks(&chunks).await.unwrap();

    let reference = HashEmbedder::new(DIM);
    assert_eq!(out[0], reference.embed_one(&text::embedding_text(&chunks[0])));
    pool.shutdown().await;
}

// ============================================================================
// Failure paths
// ============================================================================

#[tokio::test]
async fn test_two_failures_trigger_recovery() {
    let pool = EmbeddingPool::spawn(
        ScriptedSpawner::new(Faults {
            fail_batches: AtomicU32::new(2),
            ..Default::default()
        }),
        test_config(1),
    )
    .await
    .unwrap();

    let inputs = texts(4); // one batch at initial size 4
    let out = pool.embed_texts(inputs.clone()).await.unwrap();

    // Recovery sub-batches succeed, so coverage is real embeddings.
    let reference = HashEmbedder::new(DIM);
    for (text, embedding) in inputs.iter().zip(out.iter()) {
        assert_eq!(embedding, &reference.embed_one(text));
    }
    assert!(pool.stats().batches_failed >= 2);
    pool.shutdown().await;
}

#[tokio::test]
async fn test_worker_crash_restarts_and_retries() {
    let pool = EmbeddingPool::spawn(
        ScriptedSpawner::new(Faults {
            crash_batches: AtomicU32::new(1),
            ..Default::default()
        }),
        test_config(1),
    )
    .await
    .unwrap();

    let inputs = texts(4);
    let out = pool.embed_texts(inputs.clone()).await.unwrap();

    let reference = HashEmbedder::new(DIM);
    for (text, embedding) in inputs.iter().zip(out.iter()) {
        assert_eq!(embedding, &reference.embed_one(text));
    }
    assert!(pool.stats().worker_restarts >= 1);
    pool.shutdown().await;
}

#[tokio::test]
async fn test_unrecoverable_batch_yields_placeholders() {
    let pool = EmbeddingPool::spawn(
        ScriptedSpawner::new(Faults {
            fail_batches: AtomicU32::new(u32::MAX),
            ..Default::default()
        }),
        test_config(1),
    )
    .await
    .unwrap();

    let inputs = texts(4);
    let out = pool.embed_texts(inputs).await.unwrap();

    // Coverage is 100%: every row present, zero-vector placeholders allowed.
    assert_eq!(out.len(), 4);
    for row in &out {
        assert_eq!(row.len(), DIM);
        assert!(row.iter().all(|x| *x == 0.0));
    }
    assert!(pool.stats().placeholder_embeddings >= 4);
    pool.shutdown().await;
}

#[tokio::test]
async fn test_hard_timeout_recovers() {
    let mut config = test_config(1);
    config.batch_timeout_ms = 200;

    let pool = EmbeddingPool::spawn(
        ScriptedSpawner::new(Faults {
            hang_batches: AtomicU32::new(1),
            ..Default::default()
        }),
        config,
    )
    .await
    .unwrap();

    let inputs = texts(3);
    let out = pool.embed_texts(inputs.clone()).await.unwrap();

    let reference = HashEmbedder::new(DIM);
    for (text, embedding) in inputs.iter().zip(out.iter()) {
        assert_eq!(embedding, &reference.embed_one(text));
    }
    assert!(pool.stats().worker_restarts >= 1);
    pool.shutdown().await;
}

#[tokio::test]
async fn test_invalid_dimension_recovers() {
    let pool = EmbeddingPool::spawn(
        ScriptedSpawner::new(Faults {
            bad_dimension_batches: AtomicU32::new(1),
            ..Default::default()
        }),
        test_config(1),
    )
    .await
    .unwrap();

    let inputs = texts(4);
    let out = pool.embed_texts(inputs.clone()).await.unwrap();

    let reference = HashEmbedder::new(DIM);
    for (text, embedding) in inputs.iter().zip(out.iter()) {
        assert_eq!(embedding, &reference.embed_one(text));
    }
    pool.shutdown().await;
}

#[tokio::test]
async fn test_spawn_fails_without_workers() {
    struct NeverSpawner;
    impl WorkerSpawner for NeverSpawner {
        fn spawn(&self, worker_id: usize) -> Result<Box<dyn WorkerConnection>> {
            Err(EmbedError::InitFailed {
                worker_id,
                reason: "nope".into(),
            })
        }
    }

    let result = EmbeddingPool::spawn(NeverSpawner, test_config(2)).await;
    assert!(matches!(result, Err(EmbedError::NoWorkersAvailable)));
}

#[tokio::test]
async fn test_shutdown_rejects_new_work() {
    let pool = EmbeddingPool::spawn(
        InProcessSpawner::new(|| HashEmbedder::new(DIM)),
        test_config(1),
    )
    .await
    .unwrap();
    pool.shutdown().await;

    let result = pool.embed_texts(texts(1)).await;
    assert!(matches!(result, Err(EmbedError::ShutDown)));
}
