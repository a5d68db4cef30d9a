//! Worker wire protocol
//!
//! Newline-delimited JSON over stdin/stdout: one complete JSON value per
//! line, the reader buffers partial lines until a newline arrives. Message
//! field names are fixed at the JSON boundary (camelCase); in-memory the
//! types are closed enums.

use serde::{Deserialize, Serialize};

use crate::error::{EmbedError, Result};

/// Parent → worker messages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParentMessage {
    Init {
        data: InitData,
    },
    EmbedBatch {
        #[serde(rename = "batchId")]
        batch_id: u64,
        data: EmbedBatchData,
    },
    EmbedBatchShared {
        #[serde(rename = "batchId")]
        batch_id: u64,
        data: EmbedBatchSharedData,
    },
    QueryMemory {
        #[serde(rename = "requestId")]
        request_id: u64,
    },
    Shutdown,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InitData {
    #[serde(rename = "processId")]
    pub process_id: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EmbedBatchData {
    pub texts: Vec<String>,
    /// Milliseconds after which the worker should emit a timeout warning
    pub timeout_warning: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EmbedBatchSharedData {
    pub texts: Vec<String>,
    /// Handle to the parent-allocated shared buffer
    pub shared_buffer_key: String,
    pub expected_results: usize,
    pub embed_dimension: usize,
    pub timeout_warning: u64,
}

/// Worker → parent messages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerMessage {
    InitComplete {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Progress {
        #[serde(rename = "batchId")]
        batch_id: u64,
        processed: usize,
        total: usize,
        progress: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    TimeoutWarning {
        #[serde(rename = "batchId")]
        batch_id: u64,
        message: String,
    },
    EmbedComplete {
        #[serde(rename = "batchId")]
        batch_id: u64,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        embeddings: Option<Vec<Vec<f32>>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        partial: Option<bool>,
        stats: EmbedStats,
    },
    SharedMemory {
        #[serde(rename = "batchId")]
        batch_id: u64,
        success: bool,
        #[serde(rename = "bufferKey")]
        buffer_key: String,
        #[serde(rename = "resultCount")]
        result_count: usize,
        #[serde(rename = "embedDimension")]
        embed_dimension: usize,
        stats: EmbedStats,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    MemoryResponse {
        #[serde(rename = "requestId")]
        request_id: u64,
        success: bool,
        #[serde(rename = "memoryUsage")]
        memory_usage: u64,
    },
    Error {
        error: String,
    },
}

/// Per-batch worker statistics.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EmbedStats {
    pub duration_ms: u64,
    pub texts: usize,
}

// ============================================================================
// Framing
// ============================================================================

/// Encode a message as one newline-terminated JSON line.
pub fn encode_line<T: Serialize>(message: &T) -> Result<String> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}

/// Accumulates bytes and yields complete newline-terminated JSON values.
/// Partial lines stay buffered until their newline arrives.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buffer: String,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes; returns every complete message decoded from them.
    pub fn feed<T: for<'de> Deserialize<'de>>(&mut self, bytes: &[u8]) -> Result<Vec<T>> {
        self.buffer.push_str(&String::from_utf8_lossy(bytes));

        let mut messages = Vec::new();
        while let Some(pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=pos).collect();
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let message = serde_json::from_str(line)
                .map_err(|e| EmbedError::TransportParseError(format!("{}: {}", e, line)))?;
            messages.push(message);
        }
        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parent_message_wire_shape() {
        let msg = ParentMessage::EmbedBatch {
            batch_id: 7,
            data: EmbedBatchData {
                texts: vec!["a".into()],
                timeout_warning: 84_000,
            },
        };
        let json: serde_json::Value =
            serde_json::from_str(encode_line(&msg).unwrap().trim()).unwrap();
        assert_eq!(json["type"], "embed_batch");
        assert_eq!(json["batchId"], 7);
        assert_eq!(json["data"]["timeoutWarning"], 84_000);
    }

    #[test]
    fn test_worker_message_roundtrip() {
        let msg = WorkerMessage::EmbedComplete {
            batch_id: 3,
            success: true,
            embeddings: Some(vec![vec![0.5, 0.25]]),
            partial: None,
            stats: EmbedStats {
                duration_ms: 12,
                texts: 1,
            },
        };
        let line = encode_line(&msg).unwrap();
        let mut decoder = LineDecoder::new();
        let decoded: Vec<WorkerMessage> = decoder.feed(line.as_bytes()).unwrap();
        assert_eq!(decoded, vec![msg]);
    }

    #[test]
    fn test_decoder_buffers_partial_lines() {
        let msg = WorkerMessage::Error {
            error: "boom".into(),
        };
        let line = encode_line(&msg).unwrap();
        let (head, tail) = line.split_at(10);

        let mut decoder = LineDecoder::new();
        let first: Vec<WorkerMessage> = decoder.feed(head.as_bytes()).unwrap();
        assert!(first.is_empty());
        let second: Vec<WorkerMessage> = decoder.feed(tail.as_bytes()).unwrap();
        assert_eq!(second.len(), 1);
    }

    #[test]
    fn test_decoder_multiple_messages_per_feed() {
        let a = encode_line(&WorkerMessage::Error { error: "a".into() }).unwrap();
        let b = encode_line(&WorkerMessage::Error { error: "b".into() }).unwrap();
        let mut decoder = LineDecoder::new();
        let decoded: Vec<WorkerMessage> = decoder.feed(format!("{}{}", a, b).as_bytes()).unwrap();
        assert_eq!(decoded.len(), 2);
    }

    #[test]
    fn test_decoder_rejects_garbage() {
        let mut decoder = LineDecoder::new();
        let result: Result<Vec<WorkerMessage>> = decoder.feed(b"not json\n");
        assert!(matches!(result, Err(EmbedError::TransportParseError(_))));
    }

    #[test]
    fn test_shutdown_wire_shape() {
        let json: serde_json::Value =
            serde_json::from_str(encode_line(&ParentMessage::Shutdown).unwrap().trim()).unwrap();
        assert_eq!(json["type"], "shutdown");
    }
}
