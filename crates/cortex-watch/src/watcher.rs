//! File Watcher
//!
//! Bridges `notify` filesystem events into the change processor's bounded
//! channel as [`ChangeEvent`]s with content analysis attached. Analysis
//! runs on the watcher side so the processor only sees events that already
//! carry a priority and an importance score.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use cortex_core::types::now_ms;
use cortex_core::{ChangeEvent, ChangeKind, ContentAnalyzer, IndexingPriority};

/// Directories never worth watching.
const IGNORED_SEGMENTS: &[&str] = &[
    ".git",
    ".cortex",
    "node_modules",
    "target",
    "dist",
    "build",
    "__pycache__",
    ".venv",
];

/// Watcher behavior knobs.
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    pub enable_content_analysis: bool,
    /// Events whose importance falls below this are marked not-to-index
    pub analysis_threshold: f32,
    pub max_file_size: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            enable_content_analysis: true,
            analysis_threshold: 15.0,
            max_file_size: 1024 * 1024,
        }
    }
}

/// Errors from watcher setup.
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("Watch error: {0}")]
    Notify(#[from] notify::Error),

    #[error("Repository path does not exist: {0}")]
    RepoNotFound(PathBuf),
}

/// Result type for watcher operations.
pub type Result<T> = std::result::Result<T, WatchError>;

/// Live filesystem watcher for one repository. Dropping it stops the
/// underlying notify watcher.
pub struct FileWatcher {
    _watcher: RecommendedWatcher,
}

impl FileWatcher {
    /// Start watching `repo_path`, publishing analyzed events into
    /// `sender`. Events that cannot be enqueued (full channel) are dropped
    /// with a warning; the incremental pass reconciles them later.
    pub fn start(
        repo_path: &Path,
        config: WatcherConfig,
        sender: mpsc::Sender<ChangeEvent>,
    ) -> Result<Self> {
        if !repo_path.exists() {
            return Err(WatchError::RepoNotFound(repo_path.to_path_buf()));
        }
        let root = repo_path.to_path_buf();
        let analyzer = Arc::new(ContentAnalyzer::new());

        let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
            let event = match result {
                Ok(event) => event,
                Err(e) => {
                    warn!("Watcher error: {}", e);
                    return;
                }
            };
            let Some(kind) = map_kind(&event.kind) else { return };

            for path in event.paths {
                let Some(change) = build_event(&root, &path, kind, &config, &analyzer) else {
                    continue;
                };
                if let Err(e) = sender.try_send(change) {
                    warn!("Change channel full, dropping event: {}", e);
                }
            }
        })?;

        watcher.watch(repo_path, RecursiveMode::Recursive)?;
        debug!("Watching {:?}", repo_path);
        Ok(Self { _watcher: watcher })
    }
}

fn map_kind(kind: &EventKind) -> Option<ChangeKind> {
    match kind {
        EventKind::Create(_) => Some(ChangeKind::Add),
        EventKind::Modify(_) => Some(ChangeKind::Change),
        EventKind::Remove(_) => Some(ChangeKind::Unlink),
        _ => None,
    }
}

/// Build an analyzed change event, or `None` for paths outside interest.
fn build_event(
    root: &Path,
    path: &Path,
    kind: ChangeKind,
    config: &WatcherConfig,
    analyzer: &ContentAnalyzer,
) -> Option<ChangeEvent> {
    let relative = path.strip_prefix(root).ok()?;
    let relative_path = relative.to_string_lossy().replace('\\', "/");

    for segment in relative.components() {
        if let std::path::Component::Normal(name) = segment {
            if IGNORED_SEGMENTS.contains(&name.to_str().unwrap_or("")) {
                return None;
            }
        }
    }

    let mut event = ChangeEvent {
        path: path.to_path_buf(),
        relative_path: relative_path.clone(),
        kind,
        timestamp: now_ms(),
        priority: IndexingPriority::Medium,
        importance: 50.0,
        should_index: true,
        filter_reason: None,
    };

    if kind == ChangeKind::Unlink {
        // Nothing to analyze; deletions always pass through.
        return Some(event);
    }

    match std::fs::metadata(path) {
        Ok(meta) if meta.len() > config.max_file_size => {
            event.should_index = false;
            event.filter_reason = Some(format!("file too large ({} bytes)", meta.len()));
            return Some(event);
        }
        Err(_) => {
            // Raced a delete; let the incremental pass sort it out.
            return None;
        }
        _ => {}
    }

    if config.enable_content_analysis {
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let analysis = analyzer.analyze(&relative_path, &content);
                event.importance = analysis.estimated_importance;
                event.priority = analysis.priority();
                if analysis.estimated_importance < config.analysis_threshold {
                    event.should_index = false;
                    event.filter_reason = Some(format!(
                        "importance {:.0} below threshold {:.0}",
                        analysis.estimated_importance, config.analysis_threshold
                    ));
                }
            }
            Err(_) => {
                // Binary or unreadable content.
                event.should_index = false;
                event.filter_reason = Some("unreadable content".to_string());
            }
        }
    }

    Some(event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_build_event_analyzes_source() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("src").join("auth.ts");
        std::fs::create_dir_all(file.parent().unwrap()).unwrap();
        std::fs::write(
            &file,
            "import { a } from './a';\nexport function check() {\n  return a;\n}",
        )
        .unwrap();

        let event = build_event(
            dir.path(),
            &file,
            ChangeKind::Change,
            &WatcherConfig::default(),
            &ContentAnalyzer::new(),
        )
        .unwrap();

        assert_eq!(event.relative_path, "src/auth.ts");
        assert!(event.should_index);
        assert!(event.importance > 15.0);
    }

    #[test]
    fn test_ignored_directories_skipped() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("node_modules").join("x.js");
        assert!(build_event(
            dir.path(),
            &file,
            ChangeKind::Change,
            &WatcherConfig::default(),
            &ContentAnalyzer::new(),
        )
        .is_none());
    }

    #[test]
    fn test_unlink_passes_without_analysis() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("gone.ts");
        let event = build_event(
            dir.path(),
            &file,
            ChangeKind::Unlink,
            &WatcherConfig::default(),
            &ContentAnalyzer::new(),
        )
        .unwrap();
        assert_eq!(event.kind, ChangeKind::Unlink);
        assert!(event.should_index);
    }

    #[test]
    fn test_oversized_file_filtered() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("big.ts");
        std::fs::write(&file, "x".repeat(2048)).unwrap();

        let event = build_event(
            dir.path(),
            &file,
            ChangeKind::Change,
            &WatcherConfig {
                max_file_size: 1024,
                ..Default::default()
            },
            &ContentAnalyzer::new(),
        )
        .unwrap();
        assert!(!event.should_index);
        assert!(event.filter_reason.unwrap().contains("too large"));
    }

    #[tokio::test]
    async fn test_watcher_emits_events() {
        let dir = TempDir::new().unwrap();
        let (sender, mut receiver) = mpsc::channel(16);
        let _watcher = FileWatcher::start(dir.path(), WatcherConfig::default(), sender).unwrap();

        std::fs::write(
            dir.path().join("new.ts"),
            "export function fresh() {\n  return 1;\n}",
        )
        .unwrap();

        // Filesystem notification latency is real; poll briefly.
        let received = tokio::time::timeout(std::time::Duration::from_secs(5), async {
            loop {
                if let Some(event) = receiver.recv().await {
                    if event.relative_path == "new.ts" {
                        return event;
                    }
                }
            }
        })
        .await;

        match received {
            Ok(event) => {
                assert!(matches!(event.kind, ChangeKind::Add | ChangeKind::Change));
                assert!(event.should_index);
            }
            Err(_) => {
                // Some CI filesystems deliver no events; the unit paths
                // above cover the mapping logic.
            }
        }
    }
}
