//! Worker runtime
//!
//! The loop a worker process runs around its embedder: read parent
//! messages line-by-line from stdin, embed batches, answer on stdout.
//! Each worker loads its model once at startup and owns it for the life of
//! the process; the parent never shares model state across workers.

use std::sync::Arc;
use std::time::Instant;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, warn};

use crate::embedder::Embedder;
use crate::error::{EmbedError, Result};
use crate::memory::MemoryMonitor;
use crate::protocol::{encode_line, EmbedStats, ParentMessage, WorkerMessage};
use crate::shared;

/// Drive the worker protocol over arbitrary streams. The binary passes
/// stdin/stdout; tests pass in-memory duplex pipes.
pub async fn run_worker<E, R, W>(embedder: Arc<E>, reader: R, mut writer: W) -> Result<()>
where
    E: Embedder + 'static,
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    let mut memory = MemoryMonitor::new();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let message: ParentMessage = match serde_json::from_str(line) {
            Ok(m) => m,
            Err(e) => {
                let reply = WorkerMessage::Error {
                    error: format!("unparseable message: {}", e),
                };
                write_message(&mut writer, &reply).await?;
                continue;
            }
        };

        match message {
            ParentMessage::Init { data } => {
                debug!("Worker {} initializing", data.process_id);
                write_message(&mut writer, &WorkerMessage::InitComplete {
                    success: true,
                    error: None,
                })
                .await?;
            }
            ParentMessage::EmbedBatch { batch_id, data } => {
                let reply = embed_json(
                    embedder.as_ref(),
                    batch_id,
                    data.texts,
                    data.timeout_warning,
                    &mut writer,
                )
                .await?;
                write_message(&mut writer, &reply).await?;
            }
            ParentMessage::EmbedBatchShared { batch_id, data } => {
                let reply = embed_shared(
                    embedder.as_ref(),
                    batch_id,
                    data.texts,
                    &data.shared_buffer_key,
                    data.embed_dimension,
                    data.timeout_warning,
                    &mut writer,
                )
                .await?;
                write_message(&mut writer, &reply).await?;
            }
            ParentMessage::QueryMemory { request_id } => {
                write_message(&mut writer, &WorkerMessage::MemoryResponse {
                    request_id,
                    success: true,
                    memory_usage: memory.heap_used(),
                })
                .await?;
            }
            ParentMessage::Shutdown => {
                debug!("Worker shutting down");
                break;
            }
        }
    }

    Ok(())
}

async fn write_message<W: AsyncWrite + Unpin>(writer: &mut W, message: &WorkerMessage) -> Result<()> {
    let line = encode_line(message)?;
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// Embed with the JSON result path, emitting a timeout warning when the
/// batch runs past the warning mark.
async fn embed_json<E: Embedder, W: AsyncWrite + Unpin>(
    embedder: &E,
    batch_id: u64,
    texts: Vec<String>,
    timeout_warning_ms: u64,
    writer: &mut W,
) -> Result<WorkerMessage> {
    let total = texts.len();
    let started = Instant::now();
    let result = embed_with_warning(embedder, batch_id, texts, timeout_warning_ms, writer).await?;
    let stats = EmbedStats {
        duration_ms: started.elapsed().as_millis() as u64,
        texts: total,
    };

    Ok(match result {
        Ok(embeddings) => WorkerMessage::EmbedComplete {
            batch_id,
            success: true,
            embeddings: Some(embeddings),
            partial: None,
            stats,
        },
        Err(e) => {
            warn!("Batch {} failed in worker: {}", batch_id, e);
            WorkerMessage::EmbedComplete {
                batch_id,
                success: false,
                embeddings: None,
                partial: None,
                stats,
            }
        }
    })
}

/// Embed with the shared-buffer result path.
#[allow(clippy::too_many_arguments)]
async fn embed_shared<E: Embedder, W: AsyncWrite + Unpin>(
    embedder: &E,
    batch_id: u64,
    texts: Vec<String>,
    buffer_key: &str,
    dimension: usize,
    timeout_warning_ms: u64,
    writer: &mut W,
) -> Result<WorkerMessage> {
    let total = texts.len();
    let started = Instant::now();
    let result = embed_with_warning(embedder, batch_id, texts, timeout_warning_ms, writer).await?;

    let stats = EmbedStats {
        duration_ms: started.elapsed().as_millis() as u64,
        texts: total,
    };

    let outcome = result.and_then(|embeddings| {
        shared::write_embeddings(buffer_key, &embeddings)?;
        Ok(embeddings.len())
    });

    Ok(match outcome {
        Ok(result_count) => WorkerMessage::SharedMemory {
            batch_id,
            success: true,
            buffer_key: buffer_key.to_string(),
            result_count,
            embed_dimension: dimension,
            stats,
            error: None,
        },
        Err(e) => {
            warn!("Shared batch {} failed in worker: {}", batch_id, e);
            WorkerMessage::SharedMemory {
                batch_id,
                success: false,
                buffer_key: buffer_key.to_string(),
                result_count: 0,
                embed_dimension: dimension,
                stats,
                error: Some(e.to_string()),
            }
        }
    })
}

/// Race the embedder against the warning timer. The warning is emitted at
/// most once; the embed result is always awaited to completion.
async fn embed_with_warning<E: Embedder, W: AsyncWrite + Unpin>(
    embedder: &E,
    batch_id: u64,
    texts: Vec<String>,
    timeout_warning_ms: u64,
    writer: &mut W,
) -> Result<std::result::Result<Vec<Vec<f32>>, EmbedError>> {
    let embed = embedder.embed_batch(texts);
    tokio::pin!(embed);

    if timeout_warning_ms > 0 {
        let warning = tokio::time::sleep(std::time::Duration::from_millis(timeout_warning_ms));
        tokio::pin!(warning);

        tokio::select! {
            result = &mut embed => return Ok(result),
            _ = &mut warning => {
                write_message(writer, &WorkerMessage::TimeoutWarning {
                    batch_id,
                    message: format!("batch {} still running after {} ms", batch_id, timeout_warning_ms),
                })
                .await?;
            }
        }
    }

    Ok(embed.await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::HashEmbedder;
    use crate::protocol::{EmbedBatchData, InitData, LineDecoder};
    use crate::shared::SharedBufferPool;
    use tokio::io::AsyncReadExt;

    async fn drive(messages: Vec<ParentMessage>) -> Vec<WorkerMessage> {
        let (parent_io, worker_io) = tokio::io::duplex(1 << 20);
        let (worker_read, worker_write) = tokio::io::split(worker_io);
        let (mut parent_read, mut parent_write) = tokio::io::split(parent_io);

        let worker = tokio::spawn(run_worker(
            Arc::new(HashEmbedder::new(8)),
            worker_read,
            worker_write,
        ));

        for msg in messages {
            parent_write
                .write_all(encode_line(&msg).unwrap().as_bytes())
                .await
                .unwrap();
        }
        parent_write
            .write_all(encode_line(&ParentMessage::Shutdown).unwrap().as_bytes())
            .await
            .unwrap();

        worker.await.unwrap().unwrap();

        let mut bytes = Vec::new();
        parent_read.read_to_end(&mut bytes).await.unwrap();
        let mut decoder = LineDecoder::new();
        decoder.feed(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_init_and_embed() {
        let replies = drive(vec![
            ParentMessage::Init {
                data: InitData { process_id: 0 },
            },
            ParentMessage::EmbedBatch {
                batch_id: 1,
                data: EmbedBatchData {
                    texts: vec!["alpha".into(), "beta".into()],
                    timeout_warning: 0,
                },
            },
        ])
        .await;

        assert!(matches!(
            replies[0],
            WorkerMessage::InitComplete { success: true, .. }
        ));
        match &replies[1] {
            WorkerMessage::EmbedComplete {
                batch_id,
                success,
                embeddings: Some(embeddings),
                ..
            } => {
                assert_eq!(*batch_id, 1);
                assert!(*success);
                assert_eq!(embeddings.len(), 2);
                assert_eq!(embeddings[0].len(), 8);
            }
            other => panic!("unexpected reply: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_shared_batch_path() {
        let mut pool = SharedBufferPool::new().unwrap();
        let buffer = pool.allocate(2, 8).unwrap();

        let replies = drive(vec![ParentMessage::EmbedBatchShared {
            batch_id: 2,
            data: crate::protocol::EmbedBatchSharedData {
                texts: vec!["one".into(), "two".into()],
                shared_buffer_key: buffer.key(),
                expected_results: 2,
                embed_dimension: 8,
                timeout_warning: 0,
            },
        }])
        .await;

        match &replies[0] {
            WorkerMessage::SharedMemory {
                success,
                result_count,
                ..
            } => {
                assert!(*success);
                assert_eq!(*result_count, 2);
            }
            other => panic!("unexpected reply: {:?}", other),
        }

        let rows = buffer.read_embeddings(2).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], HashEmbedder::new(8).embed_one("one"));
        buffer.release();
    }

    #[tokio::test]
    async fn test_memory_query() {
        let replies = drive(vec![ParentMessage::QueryMemory { request_id: 9 }]).await;
        assert!(matches!(
            replies[0],
            WorkerMessage::MemoryResponse {
                request_id: 9,
                success: true,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_garbage_line_yields_error_message() {
        let (parent_io, worker_io) = tokio::io::duplex(1 << 16);
        let (worker_read, worker_write) = tokio::io::split(worker_io);
        let (mut parent_read, mut parent_write) = tokio::io::split(parent_io);

        let worker = tokio::spawn(run_worker(
            Arc::new(HashEmbedder::new(4)),
            worker_read,
            worker_write,
        ));

        parent_write.write_all(b"{garbage}\n").await.unwrap();
        parent_write
            .write_all(encode_line(&ParentMessage::Shutdown).unwrap().as_bytes())
            .await
            .unwrap();
        worker.await.unwrap().unwrap();

        let mut bytes = Vec::new();
        parent_read.read_to_end(&mut bytes).await.unwrap();
        let replies: Vec<WorkerMessage> = LineDecoder::new().feed(&bytes).unwrap();
        assert!(matches!(replies[0], WorkerMessage::Error { .. }));
    }
}
