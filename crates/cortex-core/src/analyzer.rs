//! Content Analyzer
//!
//! Classifies a file from its path and content: language, file type,
//! structural booleans, semantic value and a heuristic importance score in
//! `[0, 100]`. The importance score is the sole input to the
//! indexing-priority decision for the live pipeline.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::types::{IndexingPriority, Language};

static IMPORT_HINT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*(import\s|from\s+\S+\s+import|use\s|require\s*\()").unwrap());
static EXPORT_HINT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*(export\s|pub\s|module\.exports)").unwrap());
static TEST_HINT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?m)(\bdescribe\s*\(|\bit\s*\(|\btest\s*\(|#\[test\]|def test_|func Test[A-Z])"#)
        .unwrap()
});
static DOC_HINT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)(/\*\*|^\s*///|^\s*#{1,6}\s|^\s*\x22\x22\x22)").unwrap());
static TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[A-Za-z_][A-Za-z0-9_]{2,}").unwrap());

/// Coarse semantic value of a file for search purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SemanticValue {
    High,
    Medium,
    Low,
}

/// File role classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileType {
    Source,
    Test,
    Config,
    Documentation,
    Build,
    Data,
}

/// Analysis output for one file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentAnalysis {
    pub language: Language,
    pub complexity: u32,
    pub has_imports: bool,
    pub has_exports: bool,
    pub has_tests: bool,
    pub has_documentation: bool,
    /// Ratio of code lines to comment lines, saturated at 100
    pub code_comment_ratio: f32,
    pub unique_tokens: usize,
    pub semantic_value: SemanticValue,
    pub file_type: FileType,
    /// Heuristic importance in `[0, 100]`
    pub estimated_importance: f32,
}

impl ContentAnalysis {
    /// Indexing priority derived from the importance score.
    pub fn priority(&self) -> IndexingPriority {
        IndexingPriority::from_importance(self.estimated_importance)
    }
}

/// Classifies file content for indexing decisions.
#[derive(Debug, Clone, Default)]
pub struct ContentAnalyzer;

impl ContentAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Analyze a file. `content` must already be capped at 1 MiB by the
    /// scanner; longer input is truncated defensively at the same limit.
    pub fn analyze(&self, path: &str, content: &str) -> ContentAnalysis {
        let cap = crate::scanner::MAX_FILE_SIZE as usize;
        let content = if content.len() > cap {
            let mut end = cap;
            while !content.is_char_boundary(end) {
                end -= 1;
            }
            &content[..end]
        } else {
            content
        };

        let language = Language::from_path(path);
        let file_type = classify_file_type(path, language);

        let has_imports = IMPORT_HINT.is_match(content);
        let has_exports = EXPORT_HINT.is_match(content);
        let has_tests = TEST_HINT.is_match(content) || file_type == FileType::Test;
        let has_documentation = DOC_HINT.is_match(content);

        let (code_lines, comment_lines) = count_lines(language, content);
        let code_comment_ratio = if comment_lines == 0 {
            code_lines.min(100) as f32
        } else {
            (code_lines as f32 / comment_lines as f32).min(100.0)
        };

        let unique_tokens = TOKEN
            .find_iter(content)
            .map(|m| m.as_str())
            .collect::<HashSet<_>>()
            .len();

        let complexity = crate_complexity(content);

        let semantic_value = classify_semantic_value(file_type, unique_tokens, complexity);

        let estimated_importance = importance_score(
            path,
            language,
            file_type,
            semantic_value,
            has_imports,
            has_exports,
            has_tests,
            has_documentation,
        );

        ContentAnalysis {
            language,
            complexity,
            has_imports,
            has_exports,
            has_tests,
            has_documentation,
            code_comment_ratio,
            unique_tokens,
            semantic_value,
            file_type,
            estimated_importance,
        }
    }
}

fn classify_file_type(path: &str, language: Language) -> FileType {
    let lower = path.to_ascii_lowercase();
    let file_name = lower.rsplit('/').next().unwrap_or(&lower);

    if lower.contains("test") || lower.contains("spec") || lower.contains("__tests__") {
        return FileType::Test;
    }
    if matches!(
        file_name,
        "makefile" | "dockerfile" | "build.gradle" | "pom.xml" | "cargo.toml" | "package.json"
            | "cmakelists.txt" | "go.mod"
    ) {
        return FileType::Build;
    }
    match language {
        Language::Markdown => FileType::Documentation,
        Language::Json | Language::Yaml | Language::Toml => {
            if file_name.contains("data") || file_name.contains("fixture") {
                FileType::Data
            } else {
                FileType::Config
            }
        }
        Language::Sql => FileType::Data,
        Language::Unknown => {
            if lower.ends_with(".txt") {
                FileType::Documentation
            } else {
                FileType::Data
            }
        }
        _ => {
            if file_name.ends_with(".config.js") || file_name.ends_with(".config.ts") {
                FileType::Config
            } else {
                FileType::Source
            }
        }
    }
}

fn count_lines(language: Language, content: &str) -> (usize, usize) {
    let comment_prefix: &[&str] = match language {
        Language::Python | Language::Ruby | Language::Shell | Language::Yaml | Language::Toml => {
            &["#"]
        }
        Language::Markdown | Language::Json | Language::Unknown => &[],
        _ => &["//", "/*", "*", "*/"],
    };

    let mut code = 0usize;
    let mut comments = 0usize;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if comment_prefix.iter().any(|p| trimmed.starts_with(p)) {
            comments += 1;
        } else {
            code += 1;
        }
    }
    (code, comments)
}

fn crate_complexity(content: &str) -> u32 {
    let mut count = 0u32;
    for line in content.lines() {
        let code = line.trim();
        for word in code.split(|c: char| !c.is_alphanumeric() && c != '_') {
            if matches!(
                word,
                "if" | "else" | "for" | "while" | "case" | "match" | "catch" | "elif" | "except"
            ) {
                count += 1;
            }
        }
        count += code.matches("&&").count() as u32;
        count += code.matches("||").count() as u32;
    }
    count
}

fn classify_semantic_value(
    file_type: FileType,
    unique_tokens: usize,
    complexity: u32,
) -> SemanticValue {
    match file_type {
        FileType::Source => {
            if unique_tokens > 120 || complexity > 15 {
                SemanticValue::High
            } else if unique_tokens > 30 {
                SemanticValue::Medium
            } else {
                SemanticValue::Low
            }
        }
        FileType::Test | FileType::Documentation => SemanticValue::Medium,
        FileType::Config | FileType::Build => {
            if unique_tokens > 60 {
                SemanticValue::Medium
            } else {
                SemanticValue::Low
            }
        }
        FileType::Data => SemanticValue::Low,
    }
}

/// Path segments that mark architecturally central files.
const HOT_PATH_KEYWORDS: &[(&str, f32)] = &[
    ("src/", 8.0),
    ("lib/", 6.0),
    ("core", 6.0),
    ("index.", 5.0),
    ("main.", 5.0),
    ("api", 4.0),
    ("auth", 4.0),
    ("server", 4.0),
    ("handler", 3.0),
    ("util", 2.0),
];

#[allow(clippy::too_many_arguments)]
fn importance_score(
    path: &str,
    language: Language,
    file_type: FileType,
    semantic_value: SemanticValue,
    has_imports: bool,
    has_exports: bool,
    has_tests: bool,
    has_documentation: bool,
) -> f32 {
    let mut score = match semantic_value {
        SemanticValue::High => 40.0,
        SemanticValue::Medium => 25.0,
        SemanticValue::Low => 10.0,
    };

    score += match file_type {
        FileType::Source => 20.0,
        FileType::Test => 8.0,
        FileType::Config => 10.0,
        FileType::Build => 8.0,
        FileType::Documentation => 6.0,
        FileType::Data => 2.0,
    };

    score += match language {
        Language::TypeScript | Language::JavaScript | Language::Python | Language::Rust
        | Language::Go | Language::Java | Language::CSharp => 10.0,
        Language::Cpp | Language::C | Language::Ruby | Language::Php | Language::Swift
        | Language::Kotlin => 8.0,
        Language::Markdown | Language::Json | Language::Yaml | Language::Toml => 4.0,
        _ => 2.0,
    };

    if has_exports {
        score += 6.0;
    }
    if has_imports {
        score += 4.0;
    }
    if has_documentation {
        score += 3.0;
    }
    if has_tests && file_type != FileType::Test {
        score += 2.0;
    }

    let lower = path.to_ascii_lowercase();
    for (keyword, weight) in HOT_PATH_KEYWORDS {
        if lower.contains(keyword) {
            score += weight;
        }
    }

    score.clamp(0.0, 100.0)
}
