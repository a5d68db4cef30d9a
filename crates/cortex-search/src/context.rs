//! Context package assembly
//!
//! Shapes a selected chunk set into the package handed to the caller:
//! chunks grouped by dependency tier or by file, a one-sentence summary,
//! related files, insight strings and the token total.

use serde::{Deserialize, Serialize};

use cortex_core::VectorStore;

/// How the final package groups chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ContextMode {
    /// Group by dependency tier (critical/forward/backward/contextual)
    #[default]
    Tiered,
    /// Group by file
    ByFile,
}

/// Dependency tier of a selected chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyTier {
    Critical,
    Forward,
    Backward,
    Contextual,
}

impl DependencyTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            DependencyTier::Critical => "critical",
            DependencyTier::Forward => "forward",
            DependencyTier::Backward => "backward",
            DependencyTier::Contextual => "contextual",
        }
    }
}

/// One group in the package.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkGroup {
    pub title: String,
    pub chunk_ids: Vec<String>,
}

/// The assembled, budgeted context for one query.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ContextPackage {
    pub groups: Vec<ChunkGroup>,
    pub summary: String,
    pub related_files: Vec<String>,
    pub insights: Vec<String>,
    pub total_tokens: usize,
    pub efficiency_score: f32,
}

/// Build the package from selected chunk ids and their tiers.
pub fn build_package(
    store: &VectorStore,
    query: &str,
    selected: &[(String, DependencyTier)],
    mode: ContextMode,
    efficiency_score: f32,
) -> ContextPackage {
    let mut related_files: Vec<String> = Vec::new();
    let mut total_tokens = 0usize;
    let mut languages: Vec<&'static str> = Vec::new();

    for (chunk_id, _) in selected {
        if let Some(chunk) = store.get(chunk_id) {
            total_tokens += chunk.estimated_tokens();
            if !related_files.contains(&chunk.file_path) {
                related_files.push(chunk.file_path.clone());
            }
            let lang = chunk.language.as_str();
            if !languages.contains(&lang) {
                languages.push(lang);
            }
        }
    }

    let groups = match mode {
        ContextMode::Tiered => {
            let mut out: Vec<ChunkGroup> = Vec::new();
            for tier in [
                DependencyTier::Critical,
                DependencyTier::Forward,
                DependencyTier::Backward,
                DependencyTier::Contextual,
            ] {
                let ids: Vec<String> = selected
                    .iter()
                    .filter(|(_, t)| *t == tier)
                    .map(|(id, _)| id.clone())
                    .collect();
                if !ids.is_empty() {
                    out.push(ChunkGroup {
                        title: tier.as_str().to_string(),
                        chunk_ids: ids,
                    });
                }
            }
            out
        }
        ContextMode::ByFile => {
            let mut out: Vec<ChunkGroup> = Vec::new();
            for file in &related_files {
                let ids: Vec<String> = selected
                    .iter()
                    .filter(|(id, _)| {
                        store
                            .get(id)
                            .map(|c| &c.file_path == file)
                            .unwrap_or(false)
                    })
                    .map(|(id, _)| id.clone())
                    .collect();
                out.push(ChunkGroup {
                    title: file.clone(),
                    chunk_ids: ids,
                });
            }
            out
        }
    };

    let mut insights = Vec::new();
    let traversed = selected
        .iter()
        .filter(|(_, t)| *t != DependencyTier::Critical)
        .count();
    if traversed > 0 {
        insights.push(format!(
            "{} chunks discovered through relationship traversal",
            traversed
        ));
    }
    if languages.len() > 1 {
        insights.push(format!("spans {} languages", languages.len()));
    }

    ContextPackage {
        summary: format!(
            "{} chunks across {} files for \"{}\"",
            selected.len(),
            related_files.len(),
            query
        ),
        groups,
        related_files,
        insights,
        total_tokens,
        efficiency_score,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cortex_core::{ChunkContext, Chunker};

    fn store() -> VectorStore {
        let mut store = VectorStore::new();
        let chunker = Chunker::new();
        store.upsert(chunker.chunk_file(
            "a.ts",
            "export function alpha() {\n  return 1;\n}",
            &ChunkContext::default(),
        ));
        store.upsert(chunker.chunk_file(
            "b.py",
            "def beta():\n    return 2\n",
            &ChunkContext::default(),
        ));
        store
    }

    #[test]
    fn test_tiered_grouping() {
        let store = store();
        let selected = vec![
            ("a.ts:1".to_string(), DependencyTier::Critical),
            ("b.py:1".to_string(), DependencyTier::Forward),
        ];
        let package = build_package(&store, "find things", &selected, ContextMode::Tiered, 0.8);

        assert_eq!(package.groups.len(), 2);
        assert_eq!(package.groups[0].title, "critical");
        assert_eq!(package.groups[1].title, "forward");
        assert_eq!(package.related_files, vec!["a.ts", "b.py"]);
        assert!(package.total_tokens > 0);
        assert!(package.summary.contains("2 chunks across 2 files"));
        assert!(package
            .insights
            .iter()
            .any(|i| i.contains("relationship traversal")));
    }

    #[test]
    fn test_by_file_grouping() {
        let store = store();
        let selected = vec![
            ("a.ts:1".to_string(), DependencyTier::Critical),
            ("b.py:1".to_string(), DependencyTier::Critical),
        ];
        let package = build_package(&store, "q", &selected, ContextMode::ByFile, 1.0);
        assert_eq!(package.groups.len(), 2);
        assert_eq!(package.groups[0].title, "a.ts");
    }

    #[test]
    fn test_empty_selection() {
        let store = store();
        let package = build_package(&store, "q", &[], ContextMode::Tiered, 0.0);
        assert!(package.groups.is_empty());
        assert_eq!(package.total_tokens, 0);
        assert!(package.summary.contains("0 chunks"));
    }
}
