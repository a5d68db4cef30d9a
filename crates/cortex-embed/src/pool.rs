//! Embedding Worker Pool
//!
//! Parent-side coordinator for N worker processes. Each worker loads the
//! model once and serves batches over the newline-JSON protocol; the parent
//! runs single-threaded cooperative concurrency with a bounded dispatch
//! queue whose width equals the pool size.
//!
//! Per batch the pool: builds embedding texts and fingerprints, serves
//! cache hits directly, splits the uncached remainder by the adaptive batch
//! size, dispatches to idle workers (JSON results for small batches, a
//! shared buffer for large ones), enforces the hard timeout, restarts
//! crashed workers, and reassembles results in original chunk order.
//! Unrecoverable texts get a zero-vector placeholder so indexing proceeds.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use cortex_core::CodeChunk;

use crate::batching::{AdaptiveBatchSizer, BatchConfig, BatchSample};
use crate::cache::{CacheConfig, CacheStats, EmbeddingCache};
use crate::embedder::DEFAULT_DIMENSION;
use crate::error::{EmbedError, Result};
use crate::memory::MemoryMonitor;
use crate::protocol::{
    encode_line, EmbedBatchData, EmbedBatchSharedData, InitData, ParentMessage, WorkerMessage,
};
use crate::shared::SharedBufferPool;
use crate::text;

/// Default worker count: all cores minus two, at least one.
pub fn default_process_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().saturating_sub(2))
        .unwrap_or(1)
        .max(1)
}

/// Pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub process_count: usize,
    /// Embedding dimension every result must match
    pub dimension: usize,
    /// Hard per-batch timeout
    pub batch_timeout_ms: u64,
    /// Fraction of the hard timeout at which workers warn
    pub warning_fraction: f64,
    pub init_timeout_ms: u64,
    /// Uncached batch size above which the shared-buffer transport is used
    pub shared_threshold: usize,
    pub cache: CacheConfig,
    pub batching: BatchConfig,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            process_count: default_process_count(),
            dimension: DEFAULT_DIMENSION,
            batch_timeout_ms: 120_000,
            warning_fraction: 0.7,
            init_timeout_ms: 30_000,
            shared_threshold: 50,
            cache: CacheConfig::default(),
            batching: BatchConfig::default(),
        }
    }
}

/// Cumulative pool counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct PoolStats {
    pub batches_dispatched: u64,
    pub batches_failed: u64,
    pub worker_restarts: u64,
    pub placeholder_embeddings: u64,
    pub shared_batches: u64,
    pub cache: CacheStats,
}

// ============================================================================
// Worker transport
// ============================================================================

/// One worker's duplex channel. The process implementation wraps
/// stdin/stdout pipes; tests and single-process mode use an in-memory pair.
#[async_trait]
pub trait WorkerConnection: Send {
    async fn send(&mut self, message: &ParentMessage) -> Result<()>;

    /// Next message from the worker; `Ok(None)` means the stream closed
    /// (worker exit).
    async fn recv(&mut self) -> Result<Option<WorkerMessage>>;

    /// Best-effort shutdown: polite request, short grace, then force.
    async fn terminate(&mut self);
}

/// Spawns worker connections. Injected so the pool never hard-codes how
/// workers come to exist.
pub trait WorkerSpawner: Send + Sync + 'static {
    fn spawn(&self, worker_id: usize) -> Result<Box<dyn WorkerConnection>>;
}

// ----------------------------------------------------------------------
// OS process transport
// ----------------------------------------------------------------------

/// Spawns real worker processes running the `cortex-embed-worker` protocol.
pub struct ProcessSpawner {
    pub command: String,
    pub args: Vec<String>,
}

impl ProcessSpawner {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }
}

impl WorkerSpawner for ProcessSpawner {
    fn spawn(&self, worker_id: usize) -> Result<Box<dyn WorkerConnection>> {
        let mut child = tokio::process::Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child.stdin.take().ok_or_else(|| EmbedError::InitFailed {
            worker_id,
            reason: "no stdin pipe".into(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| EmbedError::InitFailed {
            worker_id,
            reason: "no stdout pipe".into(),
        })?;

        Ok(Box::new(ProcessConnection {
            child,
            stdin,
            lines: BufReader::new(stdout).lines(),
        }))
    }
}

struct ProcessConnection {
    child: Child,
    stdin: ChildStdin,
    lines: tokio::io::Lines<BufReader<ChildStdout>>,
}

#[async_trait]
impl WorkerConnection for ProcessConnection {
    async fn send(&mut self, message: &ParentMessage) -> Result<()> {
        let line = encode_line(message)?;
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.flush().await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<WorkerMessage>> {
        loop {
            match self.lines.next_line().await? {
                None => return Ok(None),
                Some(line) if line.trim().is_empty() => continue,
                Some(line) => {
                    return serde_json::from_str(line.trim())
                        .map(Some)
                        .map_err(|e| EmbedError::TransportParseError(format!("{}: {}", e, line)));
                }
            }
        }
    }

    async fn terminate(&mut self) {
        let _ = self.send(&ParentMessage::Shutdown).await;
        match tokio::time::timeout(Duration::from_secs(1), self.child.wait()).await {
            Ok(_) => {}
            Err(_) => {
                let _ = self.child.kill().await;
            }
        }
    }
}

// ----------------------------------------------------------------------
// In-process transport
// ----------------------------------------------------------------------

/// Runs the worker loop on an in-memory pipe inside this process. Used by
/// tests and by single-process deployments that skip process isolation.
pub struct InProcessSpawner<F> {
    factory: F,
}

impl<F, E> InProcessSpawner<F>
where
    F: Fn() -> E + Send + Sync + 'static,
    E: crate::embedder::Embedder + 'static,
{
    pub fn new(factory: F) -> Self {
        Self { factory }
    }
}

impl<F, E> WorkerSpawner for InProcessSpawner<F>
where
    F: Fn() -> E + Send + Sync + 'static,
    E: crate::embedder::Embedder + 'static,
{
    fn spawn(&self, _worker_id: usize) -> Result<Box<dyn WorkerConnection>> {
        let (parent_io, worker_io) = tokio::io::duplex(1 << 22);
        let (worker_read, worker_write) = tokio::io::split(worker_io);
        let embedder = Arc::new((self.factory)());
        tokio::spawn(async move {
            if let Err(e) = crate::worker::run_worker(embedder, worker_read, worker_write).await {
                warn!("In-process worker exited with error: {}", e);
            }
        });

        let (read, write) = tokio::io::split(parent_io);
        Ok(Box::new(DuplexConnection {
            write,
            lines: BufReader::new(read).lines(),
        }))
    }
}

struct DuplexConnection {
    write: tokio::io::WriteHalf<tokio::io::DuplexStream>,
    lines: tokio::io::Lines<BufReader<tokio::io::ReadHalf<tokio::io::DuplexStream>>>,
}

#[async_trait]
impl WorkerConnection for DuplexConnection {
    async fn send(&mut self, message: &ParentMessage) -> Result<()> {
        let line = encode_line(message)?;
        self.write.write_all(line.as_bytes()).await?;
        self.write.flush().await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<WorkerMessage>> {
        loop {
            match self.lines.next_line().await? {
                None => return Ok(None),
                Some(line) if line.trim().is_empty() => continue,
                Some(line) => {
                    return serde_json::from_str(line.trim())
                        .map(Some)
                        .map_err(|e| EmbedError::TransportParseError(format!("{}: {}", e, line)));
                }
            }
        }
    }

    async fn terminate(&mut self) {
        let _ = self.send(&ParentMessage::Shutdown).await;
    }
}

// ============================================================================
// Pool
// ============================================================================

struct WorkerSlot {
    ready: bool,
    /// Taken while a batch is in flight
    conn: Option<Box<dyn WorkerConnection>>,
}

struct PoolInner {
    config: PoolConfig,
    spawner: Box<dyn WorkerSpawner>,
    slots: Mutex<Vec<WorkerSlot>>,
    idle: Notify,
    cache: Mutex<EmbeddingCache>,
    sizer: Mutex<AdaptiveBatchSizer>,
    buffers: Mutex<SharedBufferPool>,
    memory: Mutex<MemoryMonitor>,
    stats: Mutex<PoolStats>,
    next_batch_id: AtomicU64,
    shutting_down: AtomicBool,
}

/// Parent handle to the worker pool.
#[derive(Clone)]
pub struct EmbeddingPool {
    inner: Arc<PoolInner>,
}

impl EmbeddingPool {
    /// Spawn and initialize the pool. Fails only if *no* worker comes up.
    pub async fn spawn(spawner: impl WorkerSpawner, config: PoolConfig) -> Result<Self> {
        let inner = Arc::new(PoolInner {
            slots: Mutex::new(Vec::new()),
            idle: Notify::new(),
            cache: Mutex::new(EmbeddingCache::new(config.cache.clone())),
            sizer: Mutex::new(AdaptiveBatchSizer::new(config.batching.clone())),
            buffers: Mutex::new(SharedBufferPool::new()?),
            memory: Mutex::new(MemoryMonitor::new()),
            stats: Mutex::new(PoolStats::default()),
            next_batch_id: AtomicU64::new(1),
            shutting_down: AtomicBool::new(false),
            spawner: Box::new(spawner),
            config,
        });

        let mut started = 0usize;
        for worker_id in 0..inner.config.process_count {
            inner.slots.lock().push(WorkerSlot {
                ready: false,
                conn: None,
            });
            match inner.start_worker(worker_id).await {
                Ok(()) => started += 1,
                Err(e) => warn!("Worker {} failed to start: {}", worker_id, e),
            }
        }

        if started == 0 {
            return Err(EmbedError::NoWorkersAvailable);
        }
        info!(
            "Embedding pool ready: {}/{} workers",
            started, inner.config.process_count
        );
        Ok(Self { inner })
    }

    /// Embed a slice of chunks, returning one vector per chunk in input
    /// order. Cached fingerprints never reach a worker; unrecoverable
    /// failures come back as zero vectors.
    pub async fn embed_chunks(&self, chunks: &[CodeChunk]) -> Result<Vec<Vec<f32>>> {
        let texts: Vec<String> = chunks.iter().map(text::embedding_text).collect();
        self.embed_texts(texts).await
    }

    /// Embed raw texts (already in embedding-text form).
    pub async fn embed_texts(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if self.inner.shutting_down.load(Ordering::SeqCst) {
            return Err(EmbedError::ShutDown);
        }
        let dimension = self.inner.config.dimension;
        let fingerprints: Vec<String> = texts.iter().map(|t| text::fingerprint(t)).collect();

        let mut results: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        let mut uncached: Vec<(usize, String)> = Vec::new();
        {
            let mut cache = self.inner.cache.lock();
            for (i, fp) in fingerprints.iter().enumerate() {
                match cache.get(fp) {
                    Some(embedding) => results[i] = Some(embedding),
                    None => uncached.push((i, texts[i].clone())),
                }
            }
        }

        if !uncached.is_empty() {
            let batch_size = self.inner.sizer.lock().current().max(1);
            let mut set: JoinSet<(usize, Vec<(Vec<f32>, bool)>)> = JoinSet::new();
            for (batch_idx, batch) in uncached.chunks(batch_size).enumerate() {
                let inner = self.inner.clone();
                let batch_texts: Vec<String> = batch.iter().map(|(_, t)| t.clone()).collect();
                set.spawn(async move { (batch_idx, inner.process_batch(batch_texts).await) });
            }

            let mut by_batch: Vec<Option<Vec<(Vec<f32>, bool)>>> =
                vec![None; uncached.len().div_ceil(batch_size)];
            while let Some(joined) = set.join_next().await {
                let (batch_idx, out) = joined.map_err(|e| EmbedError::Embedding(e.to_string()))?;
                by_batch[batch_idx] = Some(out);
            }

            // Splice worker results back into original positions; the nth
            // result of a batch belongs to the nth uncached entry.
            let mut cache = self.inner.cache.lock();
            let mut cursor = 0usize;
            for out in by_batch.into_iter().flatten() {
                for (embedding, valid) in out {
                    let (orig_idx, _) = &uncached[cursor];
                    if valid {
                        cache.insert(fingerprints[*orig_idx].clone(), embedding.clone());
                    }
                    results[*orig_idx] = Some(embedding);
                    cursor += 1;
                }
            }
        }

        Ok(results
            .into_iter()
            .map(|r| r.unwrap_or_else(|| vec![0.0; dimension]))
            .collect())
    }

    pub fn stats(&self) -> PoolStats {
        let mut stats = *self.inner.stats.lock();
        stats.cache = self.inner.cache.lock().stats();
        stats
    }

    pub fn dimension(&self) -> usize {
        self.inner.config.dimension
    }

    /// Warn-only check of machine-wide memory pressure.
    pub fn check_memory_pressure(&self) -> u64 {
        self.inner.memory.lock().check_system_pressure()
    }

    /// Drain, terminate every worker, release buffers, clear the cache.
    pub async fn shutdown(&self) {
        self.inner.shutting_down.store(true, Ordering::SeqCst);

        // Workers still processing return their connection to the slot on
        // release; wait for them, then terminate everything.
        loop {
            let mut conns = Vec::new();
            let busy = {
                let mut slots = self.inner.slots.lock();
                let mut busy = false;
                for slot in slots.iter_mut() {
                    if let Some(conn) = slot.conn.take() {
                        conns.push(conn);
                        slot.ready = false;
                    } else if slot.ready {
                        // Connection is out with a batch; wait for release.
                        busy = true;
                    }
                }
                busy
            };
            for mut conn in conns {
                conn.terminate().await;
            }
            if !busy {
                break;
            }
            self.inner.idle.notified().await;
        }

        self.inner.cache.lock().clear();
        info!("Embedding pool shut down");
    }
}

impl PoolInner {
    async fn start_worker(self: &Arc<Self>, worker_id: usize) -> Result<()> {
        let mut conn = self.spawner.spawn(worker_id)?;
        conn.send(&ParentMessage::Init {
            data: InitData {
                process_id: worker_id,
            },
        })
        .await?;

        tokio::time::timeout(
            Duration::from_millis(self.config.init_timeout_ms),
            async {
                loop {
                    match conn.recv().await? {
                        None => {
                            return Err(EmbedError::WorkerCrashed {
                                worker_id,
                                reason: "exited during init".into(),
                            })
                        }
                        Some(WorkerMessage::InitComplete { success: true, .. }) => return Ok(()),
                        Some(WorkerMessage::InitComplete {
                            success: false,
                            error,
                        }) => {
                            return Err(EmbedError::InitFailed {
                                worker_id,
                                reason: error.unwrap_or_else(|| "unknown".into()),
                            })
                        }
                        Some(other) => debug!("Pre-init message ignored: {:?}", other),
                    }
                }
            },
        )
        .await
        .map_err(|_| EmbedError::InitFailed {
            worker_id,
            reason: format!("no init_complete within {} ms", self.config.init_timeout_ms),
        })??;

        let mut slots = self.slots.lock();
        let slot = &mut slots[worker_id];
        slot.ready = true;
        slot.conn = Some(conn);
        drop(slots);
        self.idle.notify_one();
        Ok(())
    }

    /// Take an idle ready worker, waiting if all are busy. Errors when no
    /// worker is alive at all.
    async fn acquire_worker(&self) -> Result<(usize, Box<dyn WorkerConnection>)> {
        loop {
            if self.shutting_down.load(Ordering::SeqCst) {
                return Err(EmbedError::ShutDown);
            }
            {
                let mut slots = self.slots.lock();
                let mut any_alive = false;
                for (id, slot) in slots.iter_mut().enumerate() {
                    if slot.ready {
                        any_alive = true;
                        if let Some(conn) = slot.conn.take() {
                            return Ok((id, conn));
                        }
                    }
                }
                if !any_alive {
                    return Err(EmbedError::NoWorkersAvailable);
                }
            }
            self.idle.notified().await;
        }
    }

    fn release_worker(&self, worker_id: usize, conn: Box<dyn WorkerConnection>) {
        let mut slots = self.slots.lock();
        slots[worker_id].conn = Some(conn);
        drop(slots);
        self.idle.notify_one();
    }

    /// Mark a worker dead and bring up a replacement with the same id.
    async fn restart_worker(self: &Arc<Self>, worker_id: usize, mut dead: Box<dyn WorkerConnection>) {
        dead.terminate().await;
        {
            let mut slots = self.slots.lock();
            slots[worker_id].ready = false;
            slots[worker_id].conn = None;
        }
        self.stats.lock().worker_restarts += 1;

        if self.shutting_down.load(Ordering::SeqCst) {
            self.idle.notify_one();
            return;
        }
        match self.start_worker(worker_id).await {
            Ok(()) => info!("Worker {} restarted", worker_id),
            Err(e) => {
                warn!("Worker {} could not be restarted: {}", worker_id, e);
                self.idle.notify_one();
            }
        }
    }

    /// Embed one batch with retry and failure recovery. Always returns one
    /// `(vector, valid)` pair per input text.
    async fn process_batch(self: Arc<Self>, texts: Vec<String>) -> Vec<(Vec<f32>, bool)> {
        match self.dispatch(&texts).await {
            Ok(embeddings) => return mark_valid(embeddings),
            Err(e) => {
                warn!("Batch of {} failed: {}", texts.len(), e);
                self.stats.lock().batches_failed += 1;
                self.sizer.lock().record_failure();
            }
        }

        if !self.sizer.lock().needs_recovery() {
            // Single failure: one straight retry.
            match self.dispatch(&texts).await {
                Ok(embeddings) => return mark_valid(embeddings),
                Err(e) => {
                    warn!("Batch retry failed: {}", e);
                    self.stats.lock().batches_failed += 1;
                    self.sizer.lock().record_failure();
                }
            }
        }

        // Recovery: shrink to the recovery size and walk the batch in
        // sub-batches, halving the recovery size on repeated failure.
        let recovery_size = {
            let mut sizer = self.sizer.lock();
            sizer.enter_recovery();
            sizer.recovery_size().max(1)
        };

        let mut out: Vec<(Vec<f32>, bool)> = Vec::with_capacity(texts.len());
        let mut all_ok = true;
        for sub in texts.chunks(recovery_size) {
            match self.dispatch(sub).await {
                Ok(embeddings) => out.extend(mark_valid(embeddings)),
                Err(e) => {
                    warn!("Recovery sub-batch failed: {}", e);
                    all_ok = false;
                    self.sizer.lock().recovery_failed();
                    let dimension = self.config.dimension;
                    let placeholders = sub.len() as u64;
                    self.stats.lock().placeholder_embeddings += placeholders;
                    out.extend(sub.iter().map(|_| (vec![0.0; dimension], false)));
                }
            }
        }

        if all_ok {
            self.sizer.lock().recovery_succeeded();
        }
        out
    }

    /// One dispatch to one worker, including transport selection, the hard
    /// timeout, result validation and crash-driven restart.
    async fn dispatch(self: &Arc<Self>, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let (worker_id, mut conn) = self.acquire_worker().await?;
        let batch_id = self.next_batch_id.fetch_add(1, Ordering::SeqCst);
        let dimension = self.config.dimension;
        let timeout = Duration::from_millis(self.config.batch_timeout_ms);
        let warning_ms =
            (self.config.batch_timeout_ms as f64 * self.config.warning_fraction) as u64;

        let use_shared = texts.len() > self.config.shared_threshold;
        let buffer = if use_shared {
            Some(self.buffers.lock().allocate(texts.len(), dimension)?)
        } else {
            None
        };

        let message = if let Some(buffer) = &buffer {
            ParentMessage::EmbedBatchShared {
                batch_id,
                data: EmbedBatchSharedData {
                    texts: texts.to_vec(),
                    shared_buffer_key: buffer.key(),
                    expected_results: texts.len(),
                    embed_dimension: dimension,
                    timeout_warning: warning_ms,
                },
            }
        } else {
            ParentMessage::EmbedBatch {
                batch_id,
                data: EmbedBatchData {
                    texts: texts.to_vec(),
                    timeout_warning: warning_ms,
                },
            }
        };

        self.stats.lock().batches_dispatched += 1;
        if use_shared {
            self.stats.lock().shared_batches += 1;
        }
        let started = Instant::now();

        let exchange = tokio::time::timeout(timeout, async {
            conn.send(&message).await?;
            loop {
                match conn.recv().await? {
                    None => {
                        return Err(EmbedError::WorkerCrashed {
                            worker_id,
                            reason: "stream closed mid-batch".into(),
                        })
                    }
                    Some(WorkerMessage::Progress {
                        batch_id: id,
                        processed,
                        total,
                        ..
                    }) if id == batch_id => {
                        debug!("Batch {}: {}/{}", batch_id, processed, total);
                    }
                    Some(WorkerMessage::TimeoutWarning { message, .. }) => {
                        warn!("Worker {}: {}", worker_id, message);
                    }
                    Some(WorkerMessage::EmbedComplete {
                        batch_id: id,
                        success,
                        embeddings,
                        ..
                    }) if id == batch_id => {
                        return if success {
                            embeddings.map(ExchangeResult::Json).ok_or_else(|| {
                                EmbedError::Embedding("success without embeddings".into())
                            })
                        } else {
                            Err(EmbedError::Embedding("worker reported batch failure".into()))
                        };
                    }
                    Some(WorkerMessage::SharedMemory {
                        batch_id: id,
                        success,
                        result_count,
                        error,
                        ..
                    }) if id == batch_id => {
                        return if success {
                            Ok(ExchangeResult::Shared { result_count })
                        } else {
                            Err(EmbedError::Embedding(
                                error.unwrap_or_else(|| "shared batch failed".into()),
                            ))
                        };
                    }
                    Some(WorkerMessage::Error { error }) => {
                        return Err(EmbedError::Embedding(error))
                    }
                    Some(other) => debug!("Stale message ignored: {:?}", other),
                }
            }
        })
        .await;

        let elapsed = started.elapsed().as_millis() as u64;

        let outcome = match exchange {
            Ok(Ok(result)) => {
                let embeddings = match (result, &buffer) {
                    (ExchangeResult::Json(embeddings), _) => Ok(embeddings),
                    (ExchangeResult::Shared { result_count }, Some(buffer)) => {
                        if result_count != texts.len() {
                            Err(EmbedError::Embedding(format!(
                                "shared batch returned {} of {} results",
                                result_count,
                                texts.len()
                            )))
                        } else {
                            buffer.read_embeddings(result_count)
                        }
                    }
                    (ExchangeResult::Shared { .. }, None) => Err(EmbedError::Embedding(
                        "shared result for a JSON batch".into(),
                    )),
                };

                embeddings.and_then(|embeddings| {
                    validate_embeddings(&embeddings, texts.len(), dimension).map(|_| embeddings)
                })
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(EmbedError::WorkerTimeout {
                worker_id,
                batch_id,
                timeout_ms: self.config.batch_timeout_ms,
            }),
        };

        if let Some(buffer) = buffer {
            buffer.release();
        }

        match outcome {
            Ok(embeddings) => {
                let heap = self.memory.lock().heap_used();
                self.sizer.lock().record_sample(
                    BatchSample {
                        size: texts.len(),
                        duration_ms: elapsed,
                        heap_used_after: heap,
                        success: true,
                    },
                    cortex_core::types::now_ms(),
                );
                self.release_worker(worker_id, conn);
                Ok(embeddings)
            }
            Err(e) => {
                match &e {
                    // A bad result set is the worker's output, not its
                    // death: keep it alive for the retry.
                    EmbedError::InvalidEmbeddingDimension { .. } | EmbedError::Embedding(_) => {
                        self.release_worker(worker_id, conn);
                    }
                    _ => {
                        self.restart_worker(worker_id, conn).await;
                    }
                }
                Err(e)
            }
        }
    }
}

/// What one protocol exchange produced before buffer resolution.
enum ExchangeResult {
    Json(Vec<Vec<f32>>),
    Shared { result_count: usize },
}

fn mark_valid(embeddings: Vec<Vec<f32>>) -> Vec<(Vec<f32>, bool)> {
    embeddings.into_iter().map(|e| (e, true)).collect()
}

fn validate_embeddings(embeddings: &[Vec<f32>], expected: usize, dimension: usize) -> Result<()> {
    if embeddings.len() != expected {
        return Err(EmbedError::Embedding(format!(
            "expected {} embeddings, got {}",
            expected,
            embeddings.len()
        )));
    }
    for embedding in embeddings {
        if embedding.len() != dimension {
            return Err(EmbedError::InvalidEmbeddingDimension {
                expected: dimension,
                actual: embedding.len(),
            });
        }
        if !embedding.iter().all(|x| x.is_finite()) {
            return Err(EmbedError::Embedding("non-finite embedding value".into()));
        }
    }
    Ok(())
}
