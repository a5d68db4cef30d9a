//! Live indexing wiring
//!
//! Connects the filesystem watcher to the change processor and the change
//! processor to the indexer through explicit channels: the watcher
//! publishes into the processor's owned queue, and the processor's
//! dispatcher resolves to the indexer behind an async mutex (single writer
//! per repository).

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::info;

use cortex_config::CortexConfig;
use cortex_core::{ChangeKind, IndexingPriority};
use cortex_watch::{
    spawn_processor, ActivityConfig, ActivityDetector, ChangeProcessorHandle, FileWatcher,
    IndexDispatcher, ProcessorConfig, ProcessorStats, WatcherConfig,
};

use crate::error::Result;
use crate::indexer::CodebaseIndexer;

/// Running live pipeline for one repository. Dropping it stops the watcher;
/// [`LiveIndexer::shutdown`] also drains the processor.
pub struct LiveIndexer {
    _watcher: FileWatcher,
    processor: ChangeProcessorHandle,
}

impl LiveIndexer {
    /// Start watching `repo_path` and feeding changes into `indexer`.
    pub fn start(
        repo_path: &Path,
        indexer: Arc<tokio::sync::Mutex<CodebaseIndexer>>,
        config: &CortexConfig,
    ) -> Result<Self> {
        let activity = Arc::new(Mutex::new(ActivityDetector::new(ActivityConfig::default())));

        let processor = spawn_processor(
            ProcessorConfig {
                debounce_ms: config.live_indexer.debounce_ms,
                max_queue_size: config.change_processor.max_queue_size,
                max_concurrent_files: config.live_indexer.max_concurrent_files,
                batch_size: config.live_indexer.batch_size,
                suspend_on_high_activity: config.live_indexer.suspend_on_high_activity,
            },
            Arc::new(IndexerDispatcher { indexer }),
            activity,
        );

        let watcher = FileWatcher::start(
            repo_path,
            WatcherConfig {
                enable_content_analysis: config.live_indexer.enable_content_analysis,
                analysis_threshold: config.live_indexer.analysis_threshold,
                max_file_size: config.staging.max_file_size_kb * 1024,
            },
            processor.sender(),
        )?;

        info!("Live indexing started for {:?}", repo_path);
        Ok(Self {
            _watcher: watcher,
            processor,
        })
    }

    pub fn stats(&self) -> ProcessorStats {
        self.processor.stats()
    }

    /// Stop watching and drain in-flight batches.
    pub async fn shutdown(self) {
        drop(self._watcher);
        self.processor.shutdown().await;
    }
}

/// Routes processed batches into the indexer.
struct IndexerDispatcher {
    indexer: Arc<tokio::sync::Mutex<CodebaseIndexer>>,
}

#[async_trait]
impl IndexDispatcher for IndexerDispatcher {
    async fn remove_file(&self, relative_path: &str) {
        self.indexer.lock().await.remove_file(relative_path).await;
    }

    async fn reindex_file(&self, relative_path: &str, _priority: IndexingPriority) {
        self.indexer
            .lock()
            .await
            .handle_file_change(relative_path, ChangeKind::Change)
            .await;
    }
}
