//! Semantic Chunker
//!
//! Splits a file into ordered chunks along function/class/section boundaries
//! using heuristic, language-dispatched patterns. Brace languages are walked
//! with a nested-depth counter, indent languages with an indentation stack,
//! markdown is partitioned by headings, and unknown languages fall back to
//! fixed 50-line windows. A file that yields nothing becomes one chunk
//! covering the whole file.
//!
//! Guarantees: chunks cover every non-blank line at most once, and two runs
//! over identical bytes produce byte-identical chunks and hashes.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::types::{ChunkKind, CodeChunk, CommitInfo, Language};

/// Window size for files with no recognized structure.
const GENERIC_WINDOW_LINES: usize = 50;

/// How many imports survive into chunk metadata.
const MAX_IMPORTS_PER_CHUNK: usize = 20;

// ============================================================================
// Declaration patterns
// ============================================================================

static TS_FUNCTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:export\s+)?(?:default\s+)?(?:async\s+)?function\s*\*?\s*([A-Za-z_$][\w$]*)")
        .unwrap()
});
static TS_ARROW: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:export\s+)?(?:const|let|var)\s+([A-Za-z_$][\w$]*)\s*(?::[^=]+)?=\s*(?:async\s*)?\([^)]*\)\s*(?::[^=]+)?=>")
        .unwrap()
});
static TS_CLASS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:export\s+)?(?:default\s+)?(?:abstract\s+)?(?:class|interface|enum)\s+([A-Za-z_$][\w$]*)")
        .unwrap()
});

static RS_FUNCTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:pub(?:\([^)]*\))?\s+)?(?:async\s+)?(?:unsafe\s+)?(?:extern\s+\S+\s+)?fn\s+([A-Za-z_]\w*)")
        .unwrap()
});
static RS_CLASS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:pub(?:\([^)]*\))?\s+)?(?:struct|enum|trait|union)\s+([A-Za-z_]\w*)|^\s*impl(?:<[^>]*>)?\s+(?:\S+\s+for\s+)?([A-Za-z_]\w*)")
        .unwrap()
});

static GO_FUNCTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^func\s+(?:\([^)]*\)\s+)?([A-Za-z_]\w*)").unwrap());
static GO_CLASS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^type\s+([A-Za-z_]\w*)\s+(?:struct|interface)").unwrap());

static C_LIKE_CLASS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:[\w\s]*\b)?(?:class|interface|enum|struct)\s+([A-Za-z_]\w*)").unwrap()
});
static C_LIKE_FUNCTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:[\w<>\[\],\s\*&:~]+\s+)\*?([A-Za-z_]\w*)\s*\([^;]*\)?\s*\{?\s*$").unwrap()
});

static PY_DECL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\s*)(?:async\s+)?(def|class)\s+([A-Za-z_]\w*)").unwrap());

static MD_HEADING: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(#{1,6})\s+(.*)$").unwrap());

// ============================================================================
// Import / export patterns
// ============================================================================

static TS_IMPORT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^\s*import\s+(?:[^'"]*\s+from\s+)?['"]([^'"]+)['"]"#).unwrap()
});
static TS_REQUIRE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"require\(\s*['"]([^'"]+)['"]\s*\)"#).unwrap());
static TS_EXPORT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*export\s+(?:default\s+)?(?:async\s+)?(?:function\s*\*?\s*|class\s+|interface\s+|enum\s+|const\s+|let\s+|var\s+|type\s+)([A-Za-z_$][\w$]*)")
        .unwrap()
});
static PY_IMPORT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:from\s+([\w.]+)\s+import|import\s+([\w.]+))").unwrap());
static RS_USE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*(?:pub\s+)?use\s+([\w:]+)").unwrap());
static GO_IMPORT: Lazy<Regex> = Lazy::new(|| Regex::new(r#"^\s*(?:import\s+)?"([^"]+)""#).unwrap());

// ============================================================================
// Call and complexity extraction
// ============================================================================

static CALL_SITE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b([A-Za-z_][A-Za-z0-9_]*)\s*\(").unwrap());

const CALL_KEYWORDS: &[&str] = &[
    "if", "for", "while", "switch", "catch", "return", "match", "fn", "function", "new", "await",
    "typeof", "sizeof", "def", "class", "throw", "do", "else", "in", "loop", "unsafe", "print",
];

const BRANCH_KEYWORDS: &[&str] = &[
    "if", "else", "for", "while", "case", "match", "catch", "when", "elif", "except", "loop",
];

/// Extract likely call-site identifiers in order of first appearance.
fn extract_calls(content: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut calls = Vec::new();
    for cap in CALL_SITE.captures_iter(content) {
        let name = &cap[1];
        if CALL_KEYWORDS.contains(&name) {
            continue;
        }
        if seen.insert(name.to_string()) {
            calls.push(name.to_string());
        }
    }
    calls
}

/// Cyclomatic proxy: branch keywords plus boolean operators and ternaries.
fn complexity_of(content: &str) -> u32 {
    let mut count: u32 = 1;
    for line in content.lines() {
        let code = line.trim();
        if code.starts_with("//") || code.starts_with('#') || code.starts_with('*') {
            continue;
        }
        for word in code.split(|c: char| !c.is_alphanumeric() && c != '_') {
            if BRANCH_KEYWORDS.contains(&word) {
                count += 1;
            }
        }
        count += code.matches("&&").count() as u32;
        count += code.matches("||").count() as u32;
        count += code.matches(" ? ").count() as u32;
    }
    count
}

fn extract_imports(language: Language, content: &str) -> Vec<String> {
    let mut imports = Vec::new();
    for line in content.lines() {
        match language {
            Language::TypeScript | Language::JavaScript => {
                if let Some(cap) = TS_IMPORT.captures(line) {
                    imports.push(cap[1].to_string());
                } else if let Some(cap) = TS_REQUIRE.captures(line) {
                    imports.push(cap[1].to_string());
                }
            }
            Language::Python => {
                if let Some(cap) = PY_IMPORT.captures(line) {
                    let module = cap.get(1).or_else(|| cap.get(2));
                    if let Some(m) = module {
                        imports.push(m.as_str().to_string());
                    }
                }
            }
            Language::Rust => {
                if let Some(cap) = RS_USE.captures(line) {
                    imports.push(cap[1].to_string());
                }
            }
            Language::Go => {
                if let Some(cap) = GO_IMPORT.captures(line) {
                    imports.push(cap[1].to_string());
                }
            }
            _ => {}
        }
        if imports.len() >= MAX_IMPORTS_PER_CHUNK {
            break;
        }
    }
    imports
}

fn extract_exports(language: Language, content: &str) -> Vec<String> {
    let mut exports = Vec::new();
    for line in content.lines() {
        match language {
            Language::TypeScript | Language::JavaScript => {
                if let Some(cap) = TS_EXPORT.captures(line) {
                    exports.push(cap[1].to_string());
                }
            }
            Language::Rust => {
                if let Some(cap) = RS_FUNCTION.captures(line) {
                    if line.trim_start().starts_with("pub") {
                        exports.push(cap[1].to_string());
                    }
                } else if let Some(cap) = RS_CLASS.captures(line) {
                    if line.trim_start().starts_with("pub") {
                        if let Some(m) = cap.get(1).or_else(|| cap.get(2)) {
                            exports.push(m.as_str().to_string());
                        }
                    }
                }
            }
            Language::Go => {
                // Exported identifiers start with an uppercase letter.
                if let Some(cap) = GO_FUNCTION.captures(line).or_else(|| GO_CLASS.captures(line)) {
                    let name = cap[1].to_string();
                    if name.chars().next().map(char::is_uppercase).unwrap_or(false) {
                        exports.push(name);
                    }
                }
            }
            _ => {}
        }
    }
    exports
}

/// Whether a line is a top-level import/export statement that should become
/// its own single-line config chunk.
fn is_config_statement(language: Language, line: &str) -> bool {
    let trimmed = line.trim_start();
    match language {
        Language::TypeScript | Language::JavaScript => {
            (trimmed.starts_with("import ") || trimmed.starts_with("import{"))
                || (trimmed.starts_with("export ")
                    && (trimmed.starts_with("export {")
                        || trimmed.starts_with("export *")
                        || trimmed.starts_with("export default {")))
        }
        Language::Python => trimmed.starts_with("import ") || trimmed.starts_with("from "),
        Language::Rust => trimmed.starts_with("use ") || trimmed.starts_with("pub use "),
        Language::Go => trimmed.starts_with("import \""),
        _ => false,
    }
}

// ============================================================================
// Chunker
// ============================================================================

/// Commit and co-change context attached to every chunk of a file.
#[derive(Debug, Clone, Default)]
pub struct ChunkContext {
    pub last_commit: Option<CommitInfo>,
    pub co_change_files: Vec<String>,
}

/// Splits file content into ordered semantic chunks.
#[derive(Debug, Clone, Default)]
pub struct Chunker;

impl Chunker {
    pub fn new() -> Self {
        Self
    }

    /// Chunk a file's content. Output order follows line order; chunk ids and
    /// hashes are deterministic for identical input bytes.
    pub fn chunk_file(&self, path: &str, content: &str, context: &ChunkContext) -> Vec<CodeChunk> {
        let language = Language::from_path(path);
        let lines: Vec<&str> = content.lines().collect();

        let mut spans = if language.is_brace_delimited() {
            self.brace_spans(language, &lines)
        } else if language.is_indent_delimited() {
            self.indent_spans(language, &lines)
        } else if language == Language::Markdown {
            self.markdown_spans(&lines)
        } else {
            self.window_spans(language, &lines)
        };

        // A file that yields no chunk falls back to one chunk covering it all.
        if spans.is_empty() && lines.iter().any(|l| !l.trim().is_empty()) {
            spans.push(Span {
                start: 1,
                end: lines.len(),
                symbol: None,
                kind: ChunkKind::Generic,
            });
        }

        spans
            .into_iter()
            .map(|span| self.materialize(path, language, &lines, span, context))
            .collect()
    }

    fn materialize(
        &self,
        path: &str,
        language: Language,
        lines: &[&str],
        span: Span,
        context: &ChunkContext,
    ) -> CodeChunk {
        let content = lines[span.start - 1..span.end].join("\n");
        CodeChunk {
            chunk_id: CodeChunk::id_for(path, span.start),
            content_hash: CodeChunk::hash_content(&content),
            file_path: path.to_string(),
            symbol_name: span.symbol,
            kind: span.kind,
            start_line: span.start,
            end_line: span.end,
            imports: extract_imports(language, &content),
            exports: extract_exports(language, &content),
            calls: extract_calls(&content),
            called_by: Vec::new(),
            data_flow: Vec::new(),
            language,
            complexity: complexity_of(&content),
            co_change_files: context.co_change_files.clone(),
            last_commit: context.last_commit.clone(),
            embedding: None,
            indexed_at: 0,
            content,
        }
    }

    // ------------------------------------------------------------------
    // Brace languages
    // ------------------------------------------------------------------

    fn brace_spans(&self, language: Language, lines: &[&str]) -> Vec<Span> {
        let mut spans = Vec::new();
        let mut depth: i64 = 0;
        let mut open: Option<(usize, i64, Option<String>, ChunkKind)> = None;

        for (idx, raw) in lines.iter().enumerate() {
            let line_no = idx + 1;
            let line = strip_line_comment(raw);

            if open.is_none() {
                if depth == 0 && is_config_statement(language, &line) {
                    spans.push(Span {
                        start: line_no,
                        end: line_no,
                        symbol: None,
                        kind: ChunkKind::Config,
                    });
                    depth += brace_delta(&line);
                    continue;
                }

                if let Some((symbol, kind)) = match_brace_declaration(language, &line) {
                    // One-line arrow functions never open a brace scope.
                    if kind == ChunkKind::Function
                        && line.contains("=>")
                        && !line.contains('{')
                    {
                        spans.push(Span {
                            start: line_no,
                            end: line_no,
                            symbol: Some(symbol),
                            kind,
                        });
                        continue;
                    }
                    open = Some((line_no, depth, Some(symbol), kind));
                }
            }

            depth += brace_delta(&line);

            if let Some((start, open_depth)) = open.as_ref().map(|(s, d, _, _)| (*s, *d)) {
                if depth <= open_depth && line.contains('}') {
                    let (start, _, symbol, kind) = open.take().expect("chunk is open");
                    spans.push(Span {
                        start,
                        end: line_no,
                        symbol,
                        kind,
                    });
                } else if depth <= open_depth && line_no > start && line.trim().ends_with(';') {
                    // Declaration that never opened a body (e.g. an interface
                    // method signature matched too eagerly).
                    open = None;
                }
            }
        }

        // Unterminated block at EOF closes at the last line.
        if let Some((start, _, symbol, kind)) = open {
            spans.push(Span {
                start,
                end: lines.len(),
                symbol,
                kind,
            });
        }

        spans
    }

    // ------------------------------------------------------------------
    // Indent languages
    // ------------------------------------------------------------------

    fn indent_spans(&self, language: Language, lines: &[&str]) -> Vec<Span> {
        let mut spans = Vec::new();
        let mut open: Option<(usize, usize, Option<String>, ChunkKind)> = None;

        for (idx, raw) in lines.iter().enumerate() {
            let line_no = idx + 1;
            let trimmed = raw.trim_start();
            let blank = trimmed.is_empty();
            let comment = trimmed.starts_with('#');
            let indent = raw.len() - trimmed.len();

            if let Some((start, open_indent)) = open.as_ref().map(|(s, i, _, _)| (*s, *i)) {
                // Close when indentation returns to <= the opening indent on
                // a non-comment, non-blank line.
                if !blank && !comment && indent <= open_indent && line_no > start {
                    let (start, _, symbol, kind) = open.take().expect("chunk is open");
                    // Back up over trailing blank lines.
                    let mut end = idx;
                    while end > start && lines[end - 1].trim().is_empty() {
                        end -= 1;
                    }
                    spans.push(Span {
                        start,
                        end,
                        symbol,
                        kind,
                    });
                }
            }

            if open.is_none() && !blank && !comment {
                if let Some(cap) = PY_DECL.captures(raw) {
                    let kind = if &cap[2] == "class" {
                        ChunkKind::Class
                    } else {
                        ChunkKind::Function
                    };
                    open = Some((line_no, cap[1].len(), Some(cap[3].to_string()), kind));
                } else if indent == 0 && is_config_statement(language, raw) {
                    spans.push(Span {
                        start: line_no,
                        end: line_no,
                        symbol: None,
                        kind: ChunkKind::Config,
                    });
                }
            }
        }

        if let Some((start, _, symbol, kind)) = open {
            let mut end = lines.len();
            while end > start && lines[end - 1].trim().is_empty() {
                end -= 1;
            }
            spans.push(Span {
                start,
                end,
                symbol,
                kind,
            });
        }

        spans
    }

    // ------------------------------------------------------------------
    // Markdown
    // ------------------------------------------------------------------

    fn markdown_spans(&self, lines: &[&str]) -> Vec<Span> {
        let mut boundaries: Vec<(usize, Option<String>)> = Vec::new();
        for (idx, line) in lines.iter().enumerate() {
            if let Some(cap) = MD_HEADING.captures(line) {
                boundaries.push((idx + 1, Some(cap[2].trim().to_string())));
            }
        }

        let mut spans = Vec::new();
        if boundaries.is_empty() {
            return spans;
        }

        // Preamble before the first heading.
        if boundaries[0].0 > 1 {
            spans.push(Span {
                start: 1,
                end: boundaries[0].0 - 1,
                symbol: None,
                kind: ChunkKind::Documentation,
            });
        }

        for (i, (start, symbol)) in boundaries.iter().enumerate() {
            let end = boundaries
                .get(i + 1)
                .map(|(next, _)| next - 1)
                .unwrap_or(lines.len());
            spans.push(Span {
                start: *start,
                end,
                symbol: symbol.clone(),
                kind: ChunkKind::Documentation,
            });
        }

        spans
    }

    // ------------------------------------------------------------------
    // Unknown languages: fixed windows
    // ------------------------------------------------------------------

    fn window_spans(&self, language: Language, lines: &[&str]) -> Vec<Span> {
        let kind = match language {
            Language::Json | Language::Yaml | Language::Toml => ChunkKind::Config,
            _ => ChunkKind::Generic,
        };

        let mut spans = Vec::new();
        let mut start = 1usize;
        while start <= lines.len() {
            let end = (start + GENERIC_WINDOW_LINES - 1).min(lines.len());
            // Skip windows that are entirely blank.
            if lines[start - 1..end].iter().any(|l| !l.trim().is_empty()) {
                spans.push(Span {
                    start,
                    end,
                    symbol: None,
                    kind,
                });
            }
            start = end + 1;
        }
        spans
    }
}

#[derive(Debug, Clone)]
struct Span {
    start: usize,
    end: usize,
    symbol: Option<String>,
    kind: ChunkKind,
}

fn match_brace_declaration(language: Language, line: &str) -> Option<(String, ChunkKind)> {
    match language {
        Language::TypeScript | Language::JavaScript => {
            if let Some(cap) = TS_CLASS.captures(line) {
                return Some((cap[1].to_string(), ChunkKind::Class));
            }
            if let Some(cap) = TS_FUNCTION.captures(line) {
                return Some((cap[1].to_string(), ChunkKind::Function));
            }
            if let Some(cap) = TS_ARROW.captures(line) {
                return Some((cap[1].to_string(), ChunkKind::Function));
            }
            None
        }
        Language::Rust => {
            if let Some(cap) = RS_FUNCTION.captures(line) {
                return Some((cap[1].to_string(), ChunkKind::Function));
            }
            if let Some(cap) = RS_CLASS.captures(line) {
                let name = cap.get(1).or_else(|| cap.get(2))?;
                return Some((name.as_str().to_string(), ChunkKind::Class));
            }
            None
        }
        Language::Go => {
            if let Some(cap) = GO_FUNCTION.captures(line) {
                return Some((cap[1].to_string(), ChunkKind::Function));
            }
            if let Some(cap) = GO_CLASS.captures(line) {
                return Some((cap[1].to_string(), ChunkKind::Class));
            }
            None
        }
        Language::Java
        | Language::CSharp
        | Language::Cpp
        | Language::C
        | Language::Php
        | Language::Swift
        | Language::Kotlin => {
            if let Some(cap) = C_LIKE_CLASS.captures(line) {
                return Some((cap[1].to_string(), ChunkKind::Class));
            }
            if let Some(cap) = C_LIKE_FUNCTION.captures(line) {
                return Some((cap[1].to_string(), ChunkKind::Function));
            }
            None
        }
        _ => None,
    }
}

/// Net brace depth change of a line.
fn brace_delta(line: &str) -> i64 {
    let mut delta = 0i64;
    for c in line.chars() {
        match c {
            '{' => delta += 1,
            '}' => delta -= 1,
            _ => {}
        }
    }
    delta
}

/// Strip a trailing line comment so braces inside comments don't skew depth.
fn strip_line_comment(line: &str) -> String {
    if let Some(pos) = line.find("//") {
        line[..pos].to_string()
    } else {
        line.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn chunk(path: &str, content: &str) -> Vec<CodeChunk> {
        Chunker::new().chunk_file(path, content, &ChunkContext::default())
    }

    #[test]
    fn test_two_functions_deterministic() {
        let src = "\
function foo() {
  const a = 1;
  return a;
}

function bar() {
  return 2;
}";
        let first = chunk("a.ts", src);
        let second = chunk("a.ts", src);

        assert_eq!(first.len(), 2);
        assert_eq!(first[0].chunk_id, "a.ts:1");
        assert_eq!(first[0].symbol_name.as_deref(), Some("foo"));
        assert_eq!(first[1].chunk_id, "a.ts:6");
        assert_eq!(first[1].symbol_name.as_deref(), Some("bar"));

        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.chunk_id, b.chunk_id);
            assert_eq!(a.content_hash, b.content_hash);
            assert_eq!(a.content, b.content);
        }
    }

    #[test]
    fn test_class_swallows_methods() {
        let src = "\
class Session {
  start() {
    return 1;
  }
  stop() {
    return 2;
  }
}";
        let chunks = chunk("session.ts", src);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].kind, ChunkKind::Class);
        assert_eq!(chunks[0].symbol_name.as_deref(), Some("Session"));
        assert_eq!(chunks[0].start_line, 1);
        assert_eq!(chunks[0].end_line, 8);
    }

    #[test]
    fn test_no_double_coverage() {
        let src = "\
import { x } from './x';

export function alpha() {
  return x;
}

export function beta() {
  return alpha();
}";
        let chunks = chunk("m.ts", src);
        let mut covered = std::collections::HashSet::new();
        for c in &chunks {
            for line in c.start_line..=c.end_line {
                assert!(covered.insert(line), "line {} covered twice", line);
            }
        }
    }

    #[test]
    fn test_import_becomes_config_chunk() {
        let src = "import { a } from './a';\n\nfunction go() {\n  return a;\n}";
        let chunks = chunk("m.ts", src);
        assert_eq!(chunks[0].kind, ChunkKind::Config);
        assert_eq!(chunks[0].start_line, 1);
        assert_eq!(chunks[0].end_line, 1);
        assert_eq!(chunks[0].imports, vec!["./a".to_string()]);
    }

    #[test]
    fn test_python_indent_chunks() {
        let src = "\
import os

def first():
    x = 1
    return x


def second():
    return 2
";
        let chunks = chunk("m.py", src);
        let symbols: Vec<_> = chunks
            .iter()
            .filter_map(|c| c.symbol_name.as_deref())
            .collect();
        assert_eq!(symbols, vec!["first", "second"]);
        let first = chunks.iter().find(|c| c.symbol_name.as_deref() == Some("first")).unwrap();
        assert_eq!(first.start_line, 3);
        assert_eq!(first.end_line, 5);
    }

    #[test]
    fn test_python_class_chunk() {
        let src = "\
class Store:
    def __init__(self):
        self.items = []

    def add(self, item):
        self.items.append(item)
";
        let chunks = chunk("store.py", src);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].kind, ChunkKind::Class);
        assert_eq!(chunks[0].symbol_name.as_deref(), Some("Store"));
    }

    #[test]
    fn test_markdown_headings() {
        let src = "\
intro text

# Setup
install things

## Details
more text

# Usage
run things";
        let chunks = chunk("README.md", src);
        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks[0].symbol_name, None);
        assert_eq!(chunks[1].symbol_name.as_deref(), Some("Setup"));
        assert_eq!(chunks[2].symbol_name.as_deref(), Some("Details"));
        assert_eq!(chunks[3].symbol_name.as_deref(), Some("Usage"));
        assert!(chunks.iter().all(|c| c.kind == ChunkKind::Documentation));
    }

    #[test]
    fn test_unknown_language_windows() {
        let lines: Vec<String> = (0..120).map(|i| format!("line {}", i)).collect();
        let src = lines.join("\n");
        let chunks = chunk("notes.txt", &src);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].start_line, 1);
        assert_eq!(chunks[0].end_line, 50);
        assert_eq!(chunks[2].start_line, 101);
        assert_eq!(chunks[2].end_line, 120);
    }

    #[test]
    fn test_single_line_file() {
        let chunks = chunk("one.txt", "only line");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].start_line, 1);
        assert_eq!(chunks[0].end_line, 1);
    }

    #[test]
    fn test_whole_file_fallback() {
        // A TS file with no recognizable declarations still yields one chunk.
        let src = "const a = 1;\nconst b = 2;\nconsole.log(a + b);";
        let chunks = chunk("misc.ts", src);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].kind, ChunkKind::Generic);
        assert_eq!(chunks[0].start_line, 1);
        assert_eq!(chunks[0].end_line, 3);
    }

    #[test]
    fn test_empty_file() {
        assert!(chunk("empty.ts", "").is_empty());
        assert!(chunk("blank.ts", "\n\n\n").is_empty());
    }

    #[test]
    fn test_rust_functions_and_types() {
        let src = "\
use std::fmt;

pub struct Point {
    x: f32,
}

pub fn magnitude(p: &Point) -> f32 {
    if p.x < 0.0 {
        -p.x
    } else {
        p.x
    }
}";
        let chunks = chunk("geom.rs", src);
        assert_eq!(chunks[0].kind, ChunkKind::Config);
        let strukt = chunks.iter().find(|c| c.symbol_name.as_deref() == Some("Point")).unwrap();
        assert_eq!(strukt.kind, ChunkKind::Class);
        let func = chunks
            .iter()
            .find(|c| c.symbol_name.as_deref() == Some("magnitude"))
            .unwrap();
        assert_eq!(func.kind, ChunkKind::Function);
        assert!(func.complexity > 1);
        assert!(func.exports.contains(&"magnitude".to_string()));
    }

    #[test]
    fn test_call_extraction() {
        let src = "\
function handler() {
  validate(input);
  const out = transform(input);
  return render(out);
}";
        let chunks = chunk("h.ts", src);
        assert_eq!(
            chunks[0].calls,
            vec!["handler", "validate", "transform", "render"]
        );
    }

    #[test]
    fn test_arrow_function_one_liner() {
        let src = "export const double = (x) => x * 2;\n\nexport const triple = (x) => x * 3;";
        let chunks = chunk("fns.ts", src);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].symbol_name.as_deref(), Some("double"));
        assert_eq!(chunks[1].symbol_name.as_deref(), Some("triple"));
    }

    #[test]
    fn test_go_functions() {
        let src = "\
package main

func Exported() int {
\treturn 1
}

func internal() int {
\treturn 2
}";
        let chunks = chunk("main.go", src);
        let exported = chunks
            .iter()
            .find(|c| c.symbol_name.as_deref() == Some("Exported"))
            .unwrap();
        assert!(exported.exports.contains(&"Exported".to_string()));
        assert!(chunks.iter().any(|c| c.symbol_name.as_deref() == Some("internal")));
    }
}
