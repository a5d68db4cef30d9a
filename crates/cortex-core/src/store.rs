//! Dual-Tier Persistent Store
//!
//! Mirrors the vector index and the relationship graph across two
//! locations: repo-local (`<repo>/.cortex/`) and user-global
//! (`~/.claude/cortex-embeddings/<repo-name>-<hash>/`). Writes are atomic
//! (temp file + rename) and issued to both mirrors concurrently. Loads pick
//! a winner: a sub-second timestamp difference short-circuits to local,
//! otherwise a composite comparator (non-empty beats empty, matching commit
//! beats stale, more chunks beats fewer, newer beats older) decides and the
//! losing side is synchronized in the background.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::graph::{PersistedGraph, GRAPH_SCHEMA_VERSION};
use crate::types::{PersistedIndex, SCHEMA_VERSION};

/// File name of the vector index inside a tier directory.
pub const INDEX_FILE: &str = "index.json";
/// File name of the relationship graph inside a tier directory.
pub const RELATIONSHIP_FILE: &str = "relationships.json";
/// Subdirectory reserved for future delta journals.
pub const DELTAS_DIR: &str = "deltas";

/// Two mirror timestamps within this window are considered equivalent and
/// the local copy wins without further comparison.
const TIMESTAMP_EQUIVALENCE_MS: u64 = 1_000;

/// Errors from the persistent store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Index schema version {found} is incompatible (expected {expected}); a full rebuild is required")]
    SchemaVersion { found: u32, expected: u32 },

    #[error("Repository {0} is already initializing in this process")]
    AlreadyInitializing(PathBuf),
}

impl StoreError {
    /// Whether this failure can only be resolved by wiping the index and
    /// performing a full rebuild.
    pub fn requires_rebuild(&self) -> bool {
        matches!(self, StoreError::SchemaVersion { .. })
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

// ============================================================================
// Paths
// ============================================================================

/// Resolved mirror directories for one repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorePaths {
    pub local_dir: PathBuf,
    pub global_dir: PathBuf,
}

impl StorePaths {
    /// Resolve both tiers for a repository. `global_root` overrides
    /// `~/.claude/cortex-embeddings` (used by tests).
    pub fn resolve(repo_path: &Path, global_root: Option<&Path>) -> Self {
        let local_dir = repo_path.join(".cortex");

        let root = global_root
            .map(Path::to_path_buf)
            .or_else(|| dirs::home_dir().map(|h| h.join(".claude").join("cortex-embeddings")))
            .unwrap_or_else(|| PathBuf::from(".cortex-global"));

        let abs = repo_path.to_string_lossy();
        let mut hasher = Sha256::new();
        hasher.update(abs.as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        let name = repo_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "repo".to_string());

        Self {
            global_dir: root.join(format!("{}-{}", name, &digest[..16])),
            local_dir,
        }
    }

    pub fn local_index(&self) -> PathBuf {
        self.local_dir.join(INDEX_FILE)
    }

    pub fn global_index(&self) -> PathBuf {
        self.global_dir.join(INDEX_FILE)
    }

    pub fn local_graph(&self) -> PathBuf {
        self.local_dir.join(RELATIONSHIP_FILE)
    }

    pub fn global_graph(&self) -> PathBuf {
        self.global_dir.join(RELATIONSHIP_FILE)
    }
}

// ============================================================================
// Repository registry
// ============================================================================

/// De-duplicates initialization: at most one load path per
/// `(repository_path, index_dir)` key at a time. Owned and injected rather
/// than process-global; tests reset it by constructing a fresh one.
#[derive(Debug, Clone, Default)]
pub struct RepositoryRegistry {
    active: Arc<Mutex<HashSet<(PathBuf, PathBuf)>>>,
}

impl RepositoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the key, or fail if a load is already in flight. The guard
    /// releases the key on drop.
    pub fn acquire(&self, repo_path: &Path, index_dir: &Path) -> Result<RegistryGuard> {
        let key = (repo_path.to_path_buf(), index_dir.to_path_buf());
        let mut active = self.active.lock();
        if !active.insert(key.clone()) {
            return Err(StoreError::AlreadyInitializing(repo_path.to_path_buf()));
        }
        Ok(RegistryGuard {
            registry: self.active.clone(),
            key,
        })
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }
}

/// Releases a registry key on drop.
#[derive(Debug)]
pub struct RegistryGuard {
    registry: Arc<Mutex<HashSet<(PathBuf, PathBuf)>>>,
    key: (PathBuf, PathBuf),
}

impl Drop for RegistryGuard {
    fn drop(&mut self) {
        self.registry.lock().remove(&self.key);
    }
}

// ============================================================================
// Load outcome
// ============================================================================

/// Which mirror a load was served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadSource {
    Local,
    Global,
    Empty,
}

/// Result of a winner-selected load. When the mirrors diverged, `sync`
/// holds the background task copying the winner over the loser.
#[derive(Debug)]
pub struct LoadOutcome<T> {
    pub value: Option<T>,
    pub source: LoadSource,
    pub sync: Option<JoinHandle<()>>,
}

// ============================================================================
// Dual store
// ============================================================================

/// Atomic, mirrored persistence for one repository.
pub struct DualStore {
    paths: StorePaths,
}

impl DualStore {
    pub fn new(paths: StorePaths) -> Self {
        Self { paths }
    }

    /// Resolve paths from the repository location and construct.
    pub fn for_repository(repo_path: &Path, global_root: Option<&Path>) -> Self {
        Self::new(StorePaths::resolve(repo_path, global_root))
    }

    pub fn paths(&self) -> &StorePaths {
        &self.paths
    }

    /// Serialize the index and write both mirrors concurrently, each via
    /// temp-file + rename.
    pub async fn save_index(&self, index: &PersistedIndex) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(index)?;
        self.save_both(INDEX_FILE, bytes).await
    }

    /// Serialize the relationship graph and write both mirrors.
    pub async fn save_graph(&self, graph: &PersistedGraph) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(graph)?;
        self.save_both(RELATIONSHIP_FILE, bytes).await
    }

    async fn save_both(&self, file: &str, bytes: Vec<u8>) -> Result<()> {
        let local = self.paths.local_dir.join(file);
        let global = self.paths.global_dir.join(file);
        let (a, b) = tokio::join!(
            atomic_write(local, bytes.clone()),
            atomic_write(global, bytes),
        );
        a?;
        b?;
        Ok(())
    }

    /// Load the index with winner selection.
    ///
    /// `current_commit` is the repository's HEAD, used by the composite
    /// comparator when the mirrors diverged. An unusable mirror (stale
    /// schema, corrupt content) does not veto the other side: the good copy
    /// loads and the bad one is repaired by the background sync. Returns
    /// [`StoreError::SchemaVersion`] only when no mirror is readable with
    /// the current schema; the caller maps that to a forced rebuild.
    pub async fn load_index(&self, current_commit: Option<&str>) -> Result<LoadOutcome<PersistedIndex>> {
        let local = read_index(&self.paths.local_index()).await;
        let global = read_index(&self.paths.global_index()).await;

        let (local, global) = match (local, global) {
            (Err(e), Err(_)) => return Err(e),
            (local, global) => (
                discard_unusable(local, "local"),
                discard_unusable(global, "global"),
            ),
        };

        match (local, global) {
            (None, None) => {
                debug!("No persisted index in either tier");
                Ok(LoadOutcome {
                    value: None,
                    source: LoadSource::Empty,
                    sync: None,
                })
            }
            (Some(index), None) => {
                info!("Loaded local index ({} chunks), mirroring to global", index.chunks.len());
                let sync = self.spawn_mirror(INDEX_FILE, &index, self.paths.global_index())?;
                Ok(LoadOutcome {
                    value: Some(index),
                    source: LoadSource::Local,
                    sync: Some(sync),
                })
            }
            (None, Some(index)) => {
                info!("Loaded global index ({} chunks), mirroring to local", index.chunks.len());
                let sync = self.spawn_mirror(INDEX_FILE, &index, self.paths.local_index())?;
                Ok(LoadOutcome {
                    value: Some(index),
                    source: LoadSource::Global,
                    sync: Some(sync),
                })
            }
            (Some(local), Some(global)) => {
                let equivalent =
                    local.timestamp.abs_diff(global.timestamp) < TIMESTAMP_EQUIVALENCE_MS;
                let (winner, source) = select_winner(local, global, current_commit);
                let sync = if equivalent {
                    None
                } else {
                    let loser_path = match source {
                        LoadSource::Local => self.paths.global_index(),
                        _ => self.paths.local_index(),
                    };
                    Some(self.spawn_mirror(INDEX_FILE, &winner, loser_path)?)
                };
                Ok(LoadOutcome {
                    value: Some(winner),
                    source,
                    sync,
                })
            }
        }
    }

    /// Load the relationship graph: local wins when present, otherwise
    /// global, mirroring the chosen side.
    pub async fn load_graph(&self) -> Result<LoadOutcome<PersistedGraph>> {
        let local = read_graph(&self.paths.local_graph()).await;
        let global = read_graph(&self.paths.global_graph()).await;

        let (local, global) = match (local, global) {
            (Err(e), Err(_)) => return Err(e),
            (local, global) => (
                discard_unusable(local, "local"),
                discard_unusable(global, "global"),
            ),
        };

        match (local, global) {
            (None, None) => Ok(LoadOutcome {
                value: None,
                source: LoadSource::Empty,
                sync: None,
            }),
            (Some(graph), _) => Ok(LoadOutcome {
                value: Some(graph),
                source: LoadSource::Local,
                sync: None,
            }),
            (None, Some(graph)) => {
                let sync = self.spawn_mirror(RELATIONSHIP_FILE, &graph, self.paths.local_graph())?;
                Ok(LoadOutcome {
                    value: Some(graph),
                    source: LoadSource::Global,
                    sync: Some(sync),
                })
            }
        }
    }

    /// Remove both mirrors. Used for forced rebuilds.
    pub async fn wipe(&self) -> Result<()> {
        for dir in [&self.paths.local_dir, &self.paths.global_dir] {
            if dir.exists() {
                tokio::fs::remove_dir_all(dir).await?;
            }
        }
        Ok(())
    }

    fn spawn_mirror<T: serde::Serialize>(
        &self,
        label: &'static str,
        value: &T,
        target: PathBuf,
    ) -> Result<JoinHandle<()>> {
        let bytes = serde_json::to_vec_pretty(value)?;
        Ok(tokio::spawn(async move {
            if let Err(e) = atomic_write(target, bytes).await {
                warn!("Background {} mirror sync failed: {}", label, e);
            }
        }))
    }
}

/// Composite winner selection for two live mirrors.
fn select_winner(
    local: PersistedIndex,
    global: PersistedIndex,
    current_commit: Option<&str>,
) -> (PersistedIndex, LoadSource) {
    // Fast path: timestamps within one second are the same write.
    if local.timestamp.abs_diff(global.timestamp) < TIMESTAMP_EQUIVALENCE_MS {
        return (local, LoadSource::Local);
    }

    // One side empty, the other populated.
    if local.chunks.is_empty() != global.chunks.is_empty() {
        return if local.chunks.is_empty() {
            debug!("Local mirror empty, loading global");
            (global, LoadSource::Global)
        } else {
            debug!("Global mirror empty, loading local");
            (local, LoadSource::Local)
        };
    }

    // One side built at the current commit.
    if let Some(commit) = current_commit {
        let local_matches = local.commit_hash.as_deref() == Some(commit);
        let global_matches = global.commit_hash.as_deref() == Some(commit);
        if local_matches != global_matches {
            return if local_matches {
                (local, LoadSource::Local)
            } else {
                (global, LoadSource::Global)
            };
        }
    }

    // More chunks wins.
    if local.chunks.len() != global.chunks.len() {
        return if local.chunks.len() > global.chunks.len() {
            (local, LoadSource::Local)
        } else {
            (global, LoadSource::Global)
        };
    }

    // Most recent write wins.
    if local.timestamp >= global.timestamp {
        (local, LoadSource::Local)
    } else {
        (global, LoadSource::Global)
    }
}

/// Collapse a one-sided load failure to "tier absent" so the other mirror
/// can still win and the background sync can overwrite the bad copy.
fn discard_unusable<T>(side: Result<Option<T>>, tier: &str) -> Option<T> {
    match side {
        Ok(value) => value,
        Err(e) => {
            warn!("Unusable {} mirror ({}), falling back to the other tier", tier, e);
            None
        }
    }
}

// ============================================================================
// File primitives
// ============================================================================

/// Write `bytes` to `path` atomically: create parents, write `<path>.tmp`,
/// rename over the destination. The reserved deltas directory is created
/// alongside.
async fn atomic_write(path: PathBuf, bytes: Vec<u8>) -> Result<()> {
    let parent = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    tokio::fs::create_dir_all(parent.join(DELTAS_DIR)).await?;

    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, &bytes).await?;
    tokio::fs::rename(&tmp, &path).await?;
    Ok(())
}

async fn read_index(path: &Path) -> Result<Option<PersistedIndex>> {
    let bytes = match tokio::fs::read(path).await {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    // Peek the schema version before full deserialization so a version
    // mismatch surfaces as a structured error, not a parse failure.
    let value: serde_json::Value = match serde_json::from_slice(&bytes) {
        Ok(v) => v,
        Err(e) => {
            warn!("Unreadable index at {:?}: {}", path, e);
            return Ok(None);
        }
    };
    let found = value
        .get("schemaVersion")
        .and_then(serde_json::Value::as_u64)
        .unwrap_or(0) as u32;
    if found != SCHEMA_VERSION {
        return Err(StoreError::SchemaVersion {
            found,
            expected: SCHEMA_VERSION,
        });
    }

    match serde_json::from_value::<PersistedIndex>(value) {
        Ok(mut index) => {
            if index.metadata.total_chunks != index.chunks.len() {
                warn!(
                    "Index at {:?} has inconsistent totalChunks ({} vs {}), correcting",
                    path,
                    index.metadata.total_chunks,
                    index.chunks.len()
                );
                index.metadata.total_chunks = index.chunks.len();
            }
            Ok(Some(index))
        }
        Err(e) => {
            warn!("Unreadable index at {:?}: {}", path, e);
            Ok(None)
        }
    }
}

async fn read_graph(path: &Path) -> Result<Option<PersistedGraph>> {
    let bytes = match tokio::fs::read(path).await {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    match serde_json::from_slice::<PersistedGraph>(&bytes) {
        Ok(graph) if graph.schema_version == GRAPH_SCHEMA_VERSION => Ok(Some(graph)),
        Ok(graph) => Err(StoreError::SchemaVersion {
            found: graph.schema_version,
            expected: GRAPH_SCHEMA_VERSION,
        }),
        Err(e) => {
            warn!("Unreadable relationship file at {:?}: {}", path, e);
            Ok(None)
        }
    }
}
