//! Core data model: code chunks, persisted index schema, change events
//!
//! A [`CodeChunk`] is the atomic indexed unit. Chunks are produced by the
//! chunker, embedded by the worker pool, held in the vector store and
//! serialized into the persisted index. All enums carry string tags only at
//! the JSON boundary; in-memory they are closed variants.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Version of the persisted index schema. Readers reject anything else.
pub const SCHEMA_VERSION: u32 = 2;

/// Program version stamped into saved indexes.
pub const PROGRAM_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ============================================================================
// Chunk kinds and languages
// ============================================================================

/// Kind of a code chunk (closed set).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChunkKind {
    /// Function or method body
    Function,
    /// Class, struct, interface or similar container
    Class,
    /// Top-level import/export or configuration statement
    Config,
    /// Documentation (markdown sections, doc blocks)
    Documentation,
    /// Fallback for content with no recognized structure
    #[default]
    Generic,
}

impl ChunkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkKind::Function => "function",
            ChunkKind::Class => "class",
            ChunkKind::Config => "config",
            ChunkKind::Documentation => "documentation",
            ChunkKind::Generic => "generic",
        }
    }
}

/// Source language, derived from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    TypeScript,
    JavaScript,
    Python,
    Rust,
    Go,
    Java,
    CSharp,
    Cpp,
    C,
    Ruby,
    Php,
    Swift,
    Kotlin,
    Shell,
    Markdown,
    Json,
    Yaml,
    Toml,
    Html,
    Css,
    Sql,
    #[default]
    Unknown,
}

impl Language {
    /// Detect language from a file extension (lowercase, without dot).
    pub fn from_extension(ext: &str) -> Self {
        match ext {
            "ts" | "tsx" | "mts" | "cts" => Language::TypeScript,
            "js" | "jsx" | "mjs" | "cjs" => Language::JavaScript,
            "py" | "pyi" => Language::Python,
            "rs" => Language::Rust,
            "go" => Language::Go,
            "java" => Language::Java,
            "cs" => Language::CSharp,
            "cpp" | "cc" | "cxx" | "hpp" | "hh" => Language::Cpp,
            "c" | "h" => Language::C,
            "rb" => Language::Ruby,
            "php" => Language::Php,
            "swift" => Language::Swift,
            "kt" | "kts" => Language::Kotlin,
            "sh" | "bash" | "zsh" => Language::Shell,
            "md" | "markdown" => Language::Markdown,
            "json" => Language::Json,
            "yaml" | "yml" => Language::Yaml,
            "toml" => Language::Toml,
            "html" | "htm" => Language::Html,
            "css" | "scss" | "less" => Language::Css,
            "sql" => Language::Sql,
            _ => Language::Unknown,
        }
    }

    /// Detect language from a path's extension.
    pub fn from_path(path: &str) -> Self {
        path.rsplit('.')
            .next()
            .map(|ext| Self::from_extension(&ext.to_ascii_lowercase()))
            .unwrap_or(Language::Unknown)
    }

    /// Languages whose blocks are delimited by braces.
    pub fn is_brace_delimited(&self) -> bool {
        matches!(
            self,
            Language::TypeScript
                | Language::JavaScript
                | Language::Rust
                | Language::Go
                | Language::Java
                | Language::CSharp
                | Language::Cpp
                | Language::C
                | Language::Php
                | Language::Swift
                | Language::Kotlin
        )
    }

    /// Languages whose blocks are delimited by indentation.
    pub fn is_indent_delimited(&self) -> bool {
        matches!(self, Language::Python | Language::Ruby)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::TypeScript => "typescript",
            Language::JavaScript => "javascript",
            Language::Python => "python",
            Language::Rust => "rust",
            Language::Go => "go",
            Language::Java => "java",
            Language::CSharp => "csharp",
            Language::Cpp => "cpp",
            Language::C => "c",
            Language::Ruby => "ruby",
            Language::Php => "php",
            Language::Swift => "swift",
            Language::Kotlin => "kotlin",
            Language::Shell => "shell",
            Language::Markdown => "markdown",
            Language::Json => "json",
            Language::Yaml => "yaml",
            Language::Toml => "toml",
            Language::Html => "html",
            Language::Css => "css",
            Language::Sql => "sql",
            Language::Unknown => "unknown",
        }
    }
}

// ============================================================================
// Commit metadata
// ============================================================================

/// Last-commit info attached to a chunk's file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub hash: String,
    pub author: String,
    pub message: String,
    pub date: String,
}

// ============================================================================
// Code chunk
// ============================================================================

/// The atomic indexed unit: a contiguous, semantically meaningful slice of
/// a source file plus extracted metadata.
///
/// Identity is `chunk_id = "<file_path>:<start_line>"`; content identity is
/// `content_hash`, a SHA-256 over the normalized content. Two runs over
/// identical bytes produce byte-identical chunks and hashes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeChunk {
    /// `"<file_path>:<start_line>"`, unique within a store
    pub chunk_id: String,
    /// SHA-256 hex of normalized content
    pub content_hash: String,
    /// Repo-relative path
    pub file_path: String,
    /// Symbol this chunk defines, when one was recognized
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol_name: Option<String>,
    pub kind: ChunkKind,
    /// 1-based inclusive line span
    pub start_line: usize,
    pub end_line: usize,
    /// Raw content of the span
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub imports: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exports: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub calls: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub called_by: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data_flow: Vec<String>,
    pub language: Language,
    /// Cyclomatic proxy: count of branch and operator keywords
    #[serde(default)]
    pub complexity: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub co_change_files: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_commit: Option<CommitInfo>,
    /// Fixed-length float vector; length equals the model dimension or absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    /// Milliseconds since epoch at indexing time
    #[serde(default)]
    pub indexed_at: u64,
}

impl CodeChunk {
    /// Canonical chunk id for a path and 1-based start line.
    pub fn id_for(file_path: &str, start_line: usize) -> String {
        format!("{}:{}", file_path, start_line)
    }

    /// Stable hash of normalized content: trailing whitespace stripped per
    /// line, lines joined by `\n`.
    pub fn hash_content(content: &str) -> String {
        let normalized: Vec<&str> = content.lines().map(|l| l.trim_end()).collect();
        let mut hasher = Sha256::new();
        hasher.update(normalized.join("\n").as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Whether the embedding slot is filled and every entry is finite.
    pub fn has_valid_embedding(&self, dimension: usize) -> bool {
        match &self.embedding {
            Some(v) => v.len() == dimension && v.iter().all(|x| x.is_finite()),
            None => false,
        }
    }

    /// Rough token count for budget accounting (chars / 4).
    pub fn estimated_tokens(&self) -> usize {
        self.content.len() / 4
    }
}

// ============================================================================
// Persisted index
// ============================================================================

/// Embedding model descriptor persisted alongside the chunks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub dimension: usize,
    pub tokenizer: String,
}

/// Metadata block of a persisted index.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexMetadata {
    pub total_chunks: usize,
    /// Milliseconds since epoch of the last successful indexing run
    pub last_indexed: u64,
    /// Model name, kept for quick compatibility checks
    pub embedding_model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_info: Option<ModelInfo>,
}

/// On-disk form of the vector index.
///
/// Invariants enforced on load: `schema_version` matches the current reader,
/// `metadata.total_chunks == chunks.len()`, file-hash keys are a subset of
/// the file paths referenced by chunks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedIndex {
    pub version: String,
    pub schema_version: u32,
    /// Milliseconds since epoch at write time
    pub timestamp: u64,
    pub repository_path: String,
    /// Commit hash the index was built at, when the repo is a git work tree
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_hash: Option<String>,
    pub chunks: Vec<CodeChunk>,
    /// `file_path -> content_hash` of the whole file's chunk concatenation
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub file_hashes: BTreeMap<String, String>,
    pub metadata: IndexMetadata,
}

impl PersistedIndex {
    /// An empty index for a repository path.
    pub fn empty(repository_path: impl Into<String>, model: &str) -> Self {
        Self {
            version: PROGRAM_VERSION.to_string(),
            schema_version: SCHEMA_VERSION,
            timestamp: now_ms(),
            repository_path: repository_path.into(),
            commit_hash: None,
            chunks: Vec::new(),
            file_hashes: BTreeMap::new(),
            metadata: IndexMetadata {
                total_chunks: 0,
                last_indexed: 0,
                embedding_model: model.to_string(),
                model_info: None,
            },
        }
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

// ============================================================================
// Change events
// ============================================================================

/// Filesystem event kind observed by the watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Add,
    Change,
    Unlink,
}

/// Priority assigned to a change event by content analysis.
///
/// Ordering is significant: `Critical` sorts above `High` and so on, and the
/// change processor drops the lowest-priority tail on overflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexingPriority {
    Skip,
    Low,
    Medium,
    High,
    Critical,
}

impl IndexingPriority {
    /// Priority from an importance score in `[0, 100]`.
    pub fn from_importance(importance: f32) -> Self {
        if importance >= 80.0 {
            IndexingPriority::Critical
        } else if importance >= 60.0 {
            IndexingPriority::High
        } else if importance >= 35.0 {
            IndexingPriority::Medium
        } else if importance >= 15.0 {
            IndexingPriority::Low
        } else {
            IndexingPriority::Skip
        }
    }
}

/// A single change observed by the live pipeline.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub path: PathBuf,
    pub relative_path: String,
    pub kind: ChangeKind,
    /// Milliseconds since epoch at observation time
    pub timestamp: u64,
    pub priority: IndexingPriority,
    /// Importance score from content analysis, when analysis ran
    pub importance: f32,
    pub should_index: bool,
    pub filter_reason: Option<String>,
}
