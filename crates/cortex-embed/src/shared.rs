//! Shared buffer transport
//!
//! Large batches skip JSON for the result path: the parent allocates a
//! buffer of `count × dimension × 4` bytes backed by a temp file, hands the
//! worker its key (the path), the worker memory-maps it and writes float32
//! values little-endian in row-major order, and the parent reads the rows
//! back and releases the file. One buffer is lent to exactly one worker for
//! the duration of one batch.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use memmap2::{Mmap, MmapMut};
use tracing::debug;

use crate::error::{EmbedError, Result};

/// Owns the directory that buffer files live in. Dropped with the pool,
/// releasing anything a crashed worker left behind.
#[derive(Debug)]
pub struct SharedBufferPool {
    dir: tempfile::TempDir,
    next_id: u64,
}

impl SharedBufferPool {
    pub fn new() -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("cortex-shm-")
            .tempdir()
            .map_err(|e| EmbedError::SharedBuffer(e.to_string()))?;
        Ok(Self { dir, next_id: 0 })
    }

    /// Allocate a zeroed buffer for `count` embeddings of `dimension`.
    pub fn allocate(&mut self, count: usize, dimension: usize) -> Result<SharedBuffer> {
        let id = self.next_id;
        self.next_id += 1;
        let path = self.dir.path().join(format!("batch-{}.f32", id));
        let len = count
            .checked_mul(dimension)
            .and_then(|n| n.checked_mul(4))
            .ok_or_else(|| EmbedError::SharedBuffer("buffer size overflow".into()))?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| EmbedError::SharedBuffer(e.to_string()))?;
        file.set_len(len as u64)
            .map_err(|e| EmbedError::SharedBuffer(e.to_string()))?;

        debug!("Allocated shared buffer {:?} ({} bytes)", path, len);
        Ok(SharedBuffer {
            path,
            count,
            dimension,
        })
    }
}

/// One parent-owned buffer, lent to one worker for one batch.
#[derive(Debug)]
pub struct SharedBuffer {
    path: PathBuf,
    count: usize,
    dimension: usize,
}

impl SharedBuffer {
    /// The handle sent over the wire.
    pub fn key(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }

    /// Read `result_count` rows back out of the buffer.
    pub fn read_embeddings(&self, result_count: usize) -> Result<Vec<Vec<f32>>> {
        if result_count > self.count {
            return Err(EmbedError::SharedBuffer(format!(
                "worker reported {} results for a {}-row buffer",
                result_count, self.count
            )));
        }

        let file = OpenOptions::new()
            .read(true)
            .open(&self.path)
            .map_err(|e| EmbedError::SharedBuffer(e.to_string()))?;
        // One writer (the worker) has finished by the time this runs.
        let map = unsafe { Mmap::map(&file) }.map_err(|e| EmbedError::SharedBuffer(e.to_string()))?;

        let row_bytes = self.dimension * 4;
        let mut rows = Vec::with_capacity(result_count);
        for r in 0..result_count {
            let offset = r * row_bytes;
            let slice = map
                .get(offset..offset + row_bytes)
                .ok_or_else(|| EmbedError::SharedBuffer("buffer shorter than expected".into()))?;
            let row: Vec<f32> = slice
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect();
            rows.push(row);
        }
        Ok(rows)
    }

    /// Delete the backing file. Called once the batch result was consumed
    /// or the batch timed out.
    pub fn release(self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            debug!("Shared buffer {:?} already gone: {}", self.path, e);
        }
    }
}

/// Worker-side write: map the buffer by key and store rows little-endian.
pub fn write_embeddings(key: &str, embeddings: &[Vec<f32>]) -> Result<()> {
    let path = Path::new(key);
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .map_err(|e| EmbedError::SharedBuffer(e.to_string()))?;
    // The parent created the file and reads it only after our response.
    let mut map =
        unsafe { MmapMut::map_mut(&file) }.map_err(|e| EmbedError::SharedBuffer(e.to_string()))?;

    let mut offset = 0usize;
    for row in embeddings {
        for value in row {
            let bytes = value.to_le_bytes();
            let end = offset + 4;
            map.get_mut(offset..end)
                .ok_or_else(|| EmbedError::SharedBuffer("buffer too small for results".into()))?
                .copy_from_slice(&bytes);
            offset = end;
        }
    }
    map.flush()
        .map_err(|e| EmbedError::SharedBuffer(e.to_string()))?;
    Ok(())
}
