//! Repository Scanner
//!
//! Enumerates candidate files for indexing, reads content, and computes
//! commit and co-change metadata. Tracked and staged files come from git
//! when the repository is a work tree; otherwise an `ignore`-aware walker
//! provides the candidate list. Binary files are filtered by a text
//! extension allow-list plus a null-byte sniff of the first 512 bytes, and
//! files above 1 MiB are skipped.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;

use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use rayon::prelude::*;
use thiserror::Error;
use tracing::{debug, warn};

use crate::types::CommitInfo;

/// Maximum file size considered for indexing.
pub const MAX_FILE_SIZE: u64 = 1024 * 1024;

/// Bytes sniffed from the head of a file when checking for binary content.
const SNIFF_WINDOW: usize = 512;

/// Extensions treated as text and eligible for indexing.
const TEXT_EXTENSIONS: &[&str] = &[
    "ts", "tsx", "mts", "cts", "js", "jsx", "mjs", "cjs", "py", "pyi", "rs", "go", "java", "cs",
    "cpp", "cc", "cxx", "hpp", "hh", "c", "h", "rb", "php", "swift", "kt", "kts", "sh", "bash",
    "zsh", "md", "markdown", "json", "yaml", "yml", "toml", "html", "htm", "css", "scss", "less",
    "sql", "txt", "xml", "ini", "cfg", "env", "graphql", "proto", "vue", "svelte",
];

/// Errors that can occur while scanning a repository.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Repository path does not exist: {0}")]
    RepoNotFound(PathBuf),

    #[error("File exceeds size limit ({size} bytes): {path}")]
    FileTooLarge { path: PathBuf, size: u64 },

    #[error("Invalid exclude pattern: {0}")]
    InvalidPattern(#[from] globset::Error),
}

/// Result type for scanner operations.
pub type Result<T> = std::result::Result<T, ScanError>;

/// Scan mode selecting the candidate set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    /// All tracked + staged text files
    Full,
    /// All tracked files, used to compute a delta against persisted state
    Incremental,
}

/// Staging options controlling untracked-file pickup and exclusions.
#[derive(Debug, Clone)]
pub struct StagingOptions {
    pub include_untracked: bool,
    pub max_untracked_files: usize,
    pub max_file_size_kb: u64,
    pub exclude_patterns: Vec<String>,
}

impl Default for StagingOptions {
    fn default() -> Self {
        Self {
            include_untracked: true,
            max_untracked_files: 200,
            max_file_size_kb: MAX_FILE_SIZE / 1024,
            exclude_patterns: Vec::new(),
        }
    }
}

/// Last-commit metadata for a file.
#[derive(Debug, Clone)]
pub struct FileChange {
    pub path: String,
    pub last_commit: CommitInfo,
}

/// Enumerates and reads repository files.
pub struct RepositoryScanner {
    repo_path: PathBuf,
    options: StagingOptions,
    exclude_set: GlobSet,
    is_git: bool,
}

impl RepositoryScanner {
    pub fn new(repo_path: impl AsRef<Path>) -> Result<Self> {
        Self::with_options(repo_path, StagingOptions::default())
    }

    pub fn with_options(repo_path: impl AsRef<Path>, options: StagingOptions) -> Result<Self> {
        let repo_path = repo_path.as_ref().to_path_buf();
        if !repo_path.exists() {
            return Err(ScanError::RepoNotFound(repo_path));
        }

        let mut builder = GlobSetBuilder::new();
        for pattern in &options.exclude_patterns {
            builder.add(Glob::new(pattern)?);
        }
        let exclude_set = builder.build()?;

        let is_git = repo_path.join(".git").exists();

        Ok(Self {
            repo_path,
            options,
            exclude_set,
            is_git,
        })
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    /// Whether git metadata (commits, co-change) is available.
    pub fn has_git(&self) -> bool {
        self.is_git
    }

    /// List candidate files for the given mode, repo-relative with `/`
    /// separators, filtered to indexable text files.
    pub fn list_files(&self, mode: ScanMode) -> Result<Vec<String>> {
        let mut candidates = if self.is_git {
            self.list_git_files(mode)
        } else {
            self.walk_files()
        };

        candidates.sort();
        candidates.dedup();

        // Parallel text/size filtering; unreadable entries drop out silently
        // (they will surface as deletions on the next incremental pass).
        let repo = self.repo_path.clone();
        let kept: Vec<String> = candidates
            .into_par_iter()
            .filter(|rel| !self.exclude_set.is_match(rel.as_str()))
            .filter(|rel| {
                let abs = repo.join(rel);
                match self.is_indexable(&abs) {
                    Ok(ok) => ok,
                    Err(e) => {
                        debug!("Skipping {}: {}", rel, e);
                        false
                    }
                }
            })
            .collect();

        let mut kept = kept;
        kept.sort();
        Ok(kept)
    }

    /// Read the raw bytes of a repo-relative path, enforcing the size cap.
    pub fn read(&self, relative_path: &str) -> Result<Vec<u8>> {
        let abs = self.repo_path.join(relative_path);
        let meta = std::fs::metadata(&abs)?;
        if meta.len() > self.max_file_size() {
            return Err(ScanError::FileTooLarge {
                path: abs,
                size: meta.len(),
            });
        }
        Ok(std::fs::read(&abs)?)
    }

    /// Read a repo-relative path as UTF-8, replacing invalid sequences.
    pub fn read_to_string(&self, relative_path: &str) -> Result<String> {
        let bytes = self.read(relative_path)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Last-commit info for each of the given paths. Paths with no history
    /// (untracked, or outside a git repo) are omitted.
    pub fn file_changes(&self, paths: &[String]) -> Vec<FileChange> {
        if !self.is_git {
            return Vec::new();
        }

        paths
            .iter()
            .filter_map(|path| {
                let out = self.git(&[
                    "log",
                    "-1",
                    "--format=%H%x1f%an%x1f%s%x1f%aI",
                    "--",
                    path,
                ])?;
                let line = out.lines().next()?;
                let mut parts = line.split('\x1f');
                Some(FileChange {
                    path: path.clone(),
                    last_commit: CommitInfo {
                        hash: parts.next()?.to_string(),
                        author: parts.next()?.to_string(),
                        message: parts.next()?.to_string(),
                        date: parts.next()?.to_string(),
                    },
                })
            })
            .collect()
    }

    /// Files that historically change together with `path`, most frequent
    /// first. Derived from a bounded window of recent commits touching the
    /// path.
    pub fn co_change_files(&self, path: &str) -> Vec<String> {
        const COMMIT_WINDOW: &str = "-50";
        const MAX_CO_CHANGES: usize = 10;

        if !self.is_git {
            return Vec::new();
        }

        let Some(out) = self.git(&["log", COMMIT_WINDOW, "--name-only", "--format=%x1e", "--", path])
        else {
            return Vec::new();
        };

        let mut counts: HashMap<String, usize> = HashMap::new();
        for commit_block in out.split('\x1e') {
            for line in commit_block.lines() {
                let file = line.trim();
                if file.is_empty() || file == path {
                    continue;
                }
                *counts.entry(file.to_string()).or_insert(0) += 1;
            }
        }

        let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked
            .into_iter()
            .take(MAX_CO_CHANGES)
            .map(|(file, _)| file)
            .collect()
    }

    /// Current HEAD commit hash, when available.
    pub fn head_commit(&self) -> Option<String> {
        self.git(&["rev-parse", "HEAD"])
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    // ------------------------------------------------------------------
    // Candidate enumeration
    // ------------------------------------------------------------------

    fn list_git_files(&self, mode: ScanMode) -> Vec<String> {
        let mut files: Vec<String> = self
            .git(&["ls-files"])
            .map(|out| out.lines().map(str::to_string).collect())
            .unwrap_or_default();

        if files.is_empty() {
            // Empty output also happens when git itself is unavailable.
            return self.walk_files();
        }

        if matches!(mode, ScanMode::Full) {
            // Staged-but-not-yet-committed additions.
            if let Some(staged) = self.git(&["diff", "--cached", "--name-only", "--diff-filter=A"])
            {
                files.extend(staged.lines().map(str::to_string));
            }

            if self.options.include_untracked {
                if let Some(untracked) = self.git(&["ls-files", "--others", "--exclude-standard"])
                {
                    files.extend(
                        untracked
                            .lines()
                            .take(self.options.max_untracked_files)
                            .map(str::to_string),
                    );
                }
            }
        }

        files
    }

    fn walk_files(&self) -> Vec<String> {
        let mut files = Vec::new();
        for entry in WalkBuilder::new(&self.repo_path)
            .hidden(true)
            .git_ignore(true)
            .git_exclude(true)
            .build()
            .flatten()
        {
            if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }
            if let Ok(rel) = entry.path().strip_prefix(&self.repo_path) {
                files.push(rel.to_string_lossy().replace('\\', "/"));
            }
        }
        files
    }

    // ------------------------------------------------------------------
    // Filtering
    // ------------------------------------------------------------------

    fn max_file_size(&self) -> u64 {
        self.options.max_file_size_kb * 1024
    }

    fn is_indexable(&self, abs: &Path) -> Result<bool> {
        let ext = abs
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        if !TEXT_EXTENSIONS.contains(&ext.as_str()) {
            return Ok(false);
        }

        let meta = match std::fs::metadata(abs) {
            Ok(m) => m,
            Err(_) => return Ok(false), // racing deletes
        };
        if meta.len() > self.max_file_size() {
            debug!("File over size limit, skipping: {:?}", abs);
            return Ok(false);
        }

        Ok(!Self::sniff_binary(abs)?)
    }

    /// Null-byte sniff over the first 512 bytes.
    fn sniff_binary(abs: &Path) -> Result<bool> {
        use std::io::Read;
        let mut buf = [0u8; SNIFF_WINDOW];
        let mut file = std::fs::File::open(abs)?;
        let n = file.read(&mut buf)?;
        Ok(buf[..n].contains(&0))
    }

    fn git(&self, args: &[&str]) -> Option<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.repo_path)
            .output()
            .ok()?;
        if !output.status.success() {
            warn!("git {:?} failed in {:?}", args.first(), self.repo_path);
            return None;
        }
        Some(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn setup_repo() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("main.ts"), "export function main() {}\n").unwrap();
        fs::write(dir.path().join("util.py"), "def util():\n    pass\n").unwrap();
        fs::write(dir.path().join("image.png"), [0x89u8, 0x50, 0x4e, 0x47]).unwrap();
        dir
    }

    #[test]
    fn test_lists_text_files_without_git() {
        let dir = setup_repo();
        let scanner = RepositoryScanner::new(dir.path()).unwrap();
        let files = scanner.list_files(ScanMode::Full).unwrap();
        assert_eq!(files, vec!["main.ts".to_string(), "util.py".to_string()]);
    }

    #[test]
    fn test_binary_sniff_excludes_null_bytes() {
        let dir = setup_repo();
        // A text extension hiding binary content.
        fs::write(dir.path().join("data.json"), b"{\"k\":\x00\"v\"}").unwrap();
        let scanner = RepositoryScanner::new(dir.path()).unwrap();
        let files = scanner.list_files(ScanMode::Full).unwrap();
        assert!(!files.contains(&"data.json".to_string()));
    }

    #[test]
    fn test_size_boundary() {
        let dir = setup_repo();
        let exactly = "a".repeat(MAX_FILE_SIZE as usize);
        fs::write(dir.path().join("exact.txt"), &exactly).unwrap();
        let over = "a".repeat(MAX_FILE_SIZE as usize + 1);
        fs::write(dir.path().join("over.txt"), &over).unwrap();

        let scanner = RepositoryScanner::new(dir.path()).unwrap();
        let files = scanner.list_files(ScanMode::Full).unwrap();
        assert!(files.contains(&"exact.txt".to_string()));
        assert!(!files.contains(&"over.txt".to_string()));
    }

    #[test]
    fn test_read_enforces_size_cap() {
        let dir = setup_repo();
        let over = "a".repeat(MAX_FILE_SIZE as usize + 1);
        fs::write(dir.path().join("big.txt"), &over).unwrap();
        let scanner = RepositoryScanner::new(dir.path()).unwrap();
        assert!(matches!(
            scanner.read("big.txt"),
            Err(ScanError::FileTooLarge { .. })
        ));
    }

    #[test]
    fn test_exclude_patterns() {
        let dir = setup_repo();
        fs::create_dir_all(dir.path().join("generated")).unwrap();
        fs::write(dir.path().join("generated/out.ts"), "export const X = 1;\n").unwrap();

        let scanner = RepositoryScanner::with_options(
            dir.path(),
            StagingOptions {
                exclude_patterns: vec!["generated/**".to_string()],
                ..Default::default()
            },
        )
        .unwrap();
        let files = scanner.list_files(ScanMode::Full).unwrap();
        assert!(!files.iter().any(|f| f.starts_with("generated/")));
        assert!(files.contains(&"main.ts".to_string()));
    }

    #[test]
    fn test_missing_repo() {
        assert!(matches!(
            RepositoryScanner::new("/nonexistent/repo/path"),
            Err(ScanError::RepoNotFound(_))
        ));
    }

    #[test]
    fn test_no_git_metadata_outside_worktree() {
        let dir = setup_repo();
        let scanner = RepositoryScanner::new(dir.path()).unwrap();
        assert!(!scanner.has_git());
        assert!(scanner.file_changes(&["main.ts".to_string()]).is_empty());
        assert!(scanner.co_change_files("main.ts").is_empty());
        assert!(scanner.head_commit().is_none());
    }
}
