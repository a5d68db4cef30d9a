//! Dependency Traverser
//!
//! Bounded traversal of the relationship graph starting from focus symbols.
//! Nodes live in a petgraph arena with integer ids, so the visited set is a
//! plain index set and cycles terminate naturally. Prune strategies bound
//! the frontier; every discovered node carries its path back to a seed.

use std::collections::{HashMap, HashSet, VecDeque};

use petgraph::stable_graph::NodeIndex;
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use tracing::debug;

use cortex_core::graph::{EdgeKind, RelationshipGraph};
use cortex_core::VectorStore;

/// Which way edges are followed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TraversalDirection {
    Forward,
    Backward,
    #[default]
    Both,
}

/// How the frontier is bounded at each node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PruneStrategy {
    #[default]
    Strength,
    Relevance,
    None,
}

/// Traversal tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraversalOptions {
    pub max_depth: usize,
    pub direction: TraversalDirection,
    pub min_strength: f32,
    pub min_confidence: f32,
    pub include_transitive: bool,
    pub prune_strategy: PruneStrategy,
    pub max_results: usize,
}

impl Default for TraversalOptions {
    fn default() -> Self {
        Self {
            max_depth: 2,
            direction: TraversalDirection::Both,
            min_strength: 0.0,
            min_confidence: 0.0,
            include_transitive: true,
            prune_strategy: PruneStrategy::Strength,
            max_results: 50,
        }
    }
}

/// A traversal request.
#[derive(Debug, Clone, Default)]
pub struct TraversalRequest {
    pub base_query: String,
    pub focus_symbols: Vec<String>,
    /// Empty means every edge kind
    pub relationship_types: Vec<EdgeKind>,
    pub options: TraversalOptions,
    pub include_context: bool,
    /// Line radius for same-file context chunks
    pub context_radius: usize,
}

/// One discovered chain from a seed to a related symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationshipPath {
    pub symbols: Vec<String>,
    pub total_strength: f32,
    pub description: String,
}

/// Chunks grouped by a shared theme (their file).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextGroup {
    pub theme: String,
    pub chunk_ids: Vec<String>,
    pub importance: f32,
    pub relationships: Vec<EdgeKind>,
}

/// Traversal output.
#[derive(Debug, Clone, Default)]
pub struct TraversalResult {
    /// Seed chunks (focus symbols resolved)
    pub primary_chunks: Vec<String>,
    /// Chunks discovered through edges
    pub related_chunks: Vec<String>,
    pub relationship_paths: Vec<RelationshipPath>,
    pub context_groups: Vec<ContextGroup>,
    /// Discovered chunks per visited node, in [0, 1]
    pub efficiency_score: f32,
    pub total_tokens: usize,
}

/// Traverses the relationship graph for a query.
pub struct DependencyTraverser<'a> {
    graph: &'a RelationshipGraph,
    store: &'a VectorStore,
}

impl<'a> DependencyTraverser<'a> {
    pub fn new(graph: &'a RelationshipGraph, store: &'a VectorStore) -> Self {
        Self { graph, store }
    }

    pub fn traverse(&self, request: &TraversalRequest) -> TraversalResult {
        let options = &request.options;

        // Resolve seeds.
        let mut seeds: Vec<NodeIndex> = Vec::new();
        for symbol in &request.focus_symbols {
            seeds.extend(self.graph.nodes_for_symbol(symbol));
        }
        seeds.dedup();

        let mut result = TraversalResult::default();
        if seeds.is_empty() {
            return result;
        }

        let mut primary: Vec<String> = Vec::new();
        for seed in &seeds {
            if let Some(node) = self.graph.node(*seed) {
                if !primary.contains(&node.chunk_id) {
                    primary.push(node.chunk_id.clone());
                }
            }
        }

        // BFS with a visited index set; parent links rebuild paths.
        let mut visited: HashSet<NodeIndex> = seeds.iter().copied().collect();
        let mut parent: HashMap<NodeIndex, (NodeIndex, EdgeKind, f32)> = HashMap::new();
        let mut queue: VecDeque<(NodeIndex, usize)> =
            seeds.iter().map(|s| (*s, 0)).collect();
        let mut discovered: Vec<NodeIndex> = Vec::new();
        let mut nodes_visited = 0usize;

        while let Some((node, depth)) = queue.pop_front() {
            nodes_visited += 1;
            if depth >= options.max_depth {
                continue;
            }
            if !options.include_transitive && depth >= 1 {
                continue;
            }

            let mut neighbors = Vec::new();
            if matches!(
                options.direction,
                TraversalDirection::Forward | TraversalDirection::Both
            ) {
                neighbors.extend(self.graph.neighbors(
                    node,
                    Direction::Outgoing,
                    &request.relationship_types,
                    options.min_strength,
                    options.min_confidence,
                ));
            }
            if matches!(
                options.direction,
                TraversalDirection::Backward | TraversalDirection::Both
            ) {
                neighbors.extend(self.graph.neighbors(
                    node,
                    Direction::Incoming,
                    &request.relationship_types,
                    options.min_strength,
                    options.min_confidence,
                ));
            }

            // Prune the frontier per node.
            match options.prune_strategy {
                PruneStrategy::Strength => {
                    neighbors.sort_by(|a, b| {
                        b.1.strength
                            .partial_cmp(&a.1.strength)
                            .unwrap_or(std::cmp::Ordering::Equal)
                    });
                    neighbors.truncate(8);
                }
                PruneStrategy::Relevance => {
                    neighbors.sort_by(|a, b| {
                        (b.1.strength * b.1.confidence)
                            .partial_cmp(&(a.1.strength * a.1.confidence))
                            .unwrap_or(std::cmp::Ordering::Equal)
                    });
                    neighbors.truncate(8);
                }
                PruneStrategy::None => {}
            }

            for (next, edge) in neighbors {
                if visited.contains(&next) {
                    continue;
                }
                if discovered.len() >= options.max_results {
                    break;
                }
                visited.insert(next);
                parent.insert(next, (node, edge.kind, edge.strength));
                discovered.push(next);
                queue.push_back((next, depth + 1));
            }
        }

        // Collect related chunks and paths.
        let primary_set: HashSet<&String> = primary.iter().collect();
        let mut related: Vec<String> = Vec::new();
        for idx in &discovered {
            let Some(node) = self.graph.node(*idx) else { continue };
            if primary_set.contains(&node.chunk_id) || related.contains(&node.chunk_id) {
                continue;
            }
            related.push(node.chunk_id.clone());
            result.relationship_paths.push(self.path_to(*idx, &parent));
        }

        // Same-file context around related chunks.
        if request.include_context && request.context_radius > 0 {
            let mut context: Vec<String> = Vec::new();
            for chunk_id in primary.iter().chain(related.iter()) {
                let Some(chunk) = self.store.get(chunk_id) else { continue };
                for neighbor in self.store.chunks_by_file(&chunk.file_path) {
                    if neighbor.chunk_id == *chunk_id {
                        continue;
                    }
                    let gap = if neighbor.start_line > chunk.end_line {
                        neighbor.start_line - chunk.end_line
                    } else if chunk.start_line > neighbor.end_line {
                        chunk.start_line - neighbor.end_line
                    } else {
                        0
                    };
                    if gap <= request.context_radius
                        && !primary_set.contains(&neighbor.chunk_id)
                        && !related.contains(&neighbor.chunk_id)
                        && !context.contains(&neighbor.chunk_id)
                    {
                        context.push(neighbor.chunk_id.clone());
                    }
                }
            }
            related.extend(context);
        }

        result.context_groups = self.group_by_file(&primary, &related, &parent, &discovered);
        result.total_tokens = primary
            .iter()
            .chain(related.iter())
            .filter_map(|id| self.store.get(id))
            .map(|c| c.estimated_tokens())
            .sum();
        result.efficiency_score = if nodes_visited == 0 {
            0.0
        } else {
            ((primary.len() + related.len()) as f32 / nodes_visited as f32).min(1.0)
        };
        result.primary_chunks = primary;
        result.related_chunks = related;

        debug!(
            "Traversal: {} primary, {} related, {} paths, efficiency {:.2}",
            result.primary_chunks.len(),
            result.related_chunks.len(),
            result.relationship_paths.len(),
            result.efficiency_score
        );
        result
    }

    fn path_to(
        &self,
        target: NodeIndex,
        parent: &HashMap<NodeIndex, (NodeIndex, EdgeKind, f32)>,
    ) -> RelationshipPath {
        let mut symbols = Vec::new();
        let mut strength = 1.0f32;
        let mut kinds: Vec<EdgeKind> = Vec::new();
        let mut cursor = target;

        if let Some(node) = self.graph.node(cursor) {
            symbols.push(node.symbol.clone());
        }
        while let Some((prev, kind, edge_strength)) = parent.get(&cursor) {
            strength *= edge_strength;
            kinds.push(*kind);
            cursor = *prev;
            if let Some(node) = self.graph.node(cursor) {
                symbols.push(node.symbol.clone());
            }
        }
        symbols.reverse();
        kinds.reverse();

        let description = if symbols.len() >= 2 {
            format!(
                "{} -> {} via {}",
                symbols.first().map(String::as_str).unwrap_or(""),
                symbols.last().map(String::as_str).unwrap_or(""),
                kinds
                    .iter()
                    .map(|k| k.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            )
        } else {
            symbols.join("")
        };

        RelationshipPath {
            symbols,
            total_strength: strength,
            description,
        }
    }

    fn group_by_file(
        &self,
        primary: &[String],
        related: &[String],
        parent: &HashMap<NodeIndex, (NodeIndex, EdgeKind, f32)>,
        discovered: &[NodeIndex],
    ) -> Vec<ContextGroup> {
        let mut by_file: HashMap<String, Vec<String>> = HashMap::new();
        for chunk_id in primary.iter().chain(related.iter()) {
            let file = chunk_id.rsplit_once(':').map(|(f, _)| f).unwrap_or(chunk_id);
            by_file
                .entry(file.to_string())
                .or_default()
                .push(chunk_id.clone());
        }

        let mut kinds_by_file: HashMap<String, HashSet<EdgeKind>> = HashMap::new();
        for idx in discovered {
            if let (Some(node), Some((_, kind, _))) = (self.graph.node(*idx), parent.get(idx)) {
                kinds_by_file
                    .entry(node.file_path.clone())
                    .or_default()
                    .insert(*kind);
            }
        }

        let mut groups: Vec<ContextGroup> = by_file
            .into_iter()
            .map(|(theme, chunk_ids)| {
                let importance = chunk_ids
                    .iter()
                    .filter_map(|id| self.store.get(id))
                    .map(|c| c.complexity as f32)
                    .sum::<f32>()
                    .max(1.0)
                    .ln_1p();
                let mut relationships: Vec<EdgeKind> = kinds_by_file
                    .get(&theme)
                    .map(|set| set.iter().copied().collect())
                    .unwrap_or_default();
                relationships.sort_by_key(|k| k.as_str());
                ContextGroup {
                    theme,
                    chunk_ids,
                    importance,
                    relationships,
                }
            })
            .collect();
        groups.sort_by(|a, b| {
            b.importance
                .partial_cmp(&a.importance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.theme.cmp(&b.theme))
        });
        groups
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cortex_core::{ChunkContext, Chunker, DependencyMapper};
    use std::collections::BTreeMap;

    fn fixture() -> (RelationshipGraph, VectorStore) {
        let files: BTreeMap<String, String> = [
            (
                "auth.ts".to_string(),
                "export function login(user) {\n  return checkToken(user);\n}".to_string(),
            ),
            (
                "token.ts".to_string(),
                "export function checkToken(user) {\n  return verify(user);\n}".to_string(),
            ),
            (
                "crypto.ts".to_string(),
                "export function verify(user) {\n  return true;\n}".to_string(),
            ),
        ]
        .into_iter()
        .collect();

        let graph = DependencyMapper::new().build_from_files(&files, &Default::default());

        let mut store = VectorStore::new();
        let chunker = Chunker::new();
        for (path, content) in &files {
            store.upsert(chunker.chunk_file(path, content, &ChunkContext::default()));
        }
        (graph, store)
    }

    #[test]
    fn test_traversal_discovers_transitive_chain() {
        let (graph, store) = fixture();
        let traverser = DependencyTraverser::new(&graph, &store);

        let result = traverser.traverse(&TraversalRequest {
            focus_symbols: vec!["login".to_string()],
            options: TraversalOptions {
                max_depth: 2,
                direction: TraversalDirection::Forward,
                ..Default::default()
            },
            ..Default::default()
        });

        assert!(result.primary_chunks.contains(&"auth.ts:1".to_string()));
        // Two hops: login -> checkToken -> verify.
        assert!(result.related_chunks.contains(&"token.ts:1".to_string()));
        assert!(result.related_chunks.contains(&"crypto.ts:1".to_string()));
        assert!(!result.relationship_paths.is_empty());
    }

    #[test]
    fn test_depth_limit() {
        let (graph, store) = fixture();
        let traverser = DependencyTraverser::new(&graph, &store);

        let result = traverser.traverse(&TraversalRequest {
            focus_symbols: vec!["login".to_string()],
            options: TraversalOptions {
                max_depth: 1,
                direction: TraversalDirection::Forward,
                ..Default::default()
            },
            ..Default::default()
        });

        assert!(result.related_chunks.contains(&"token.ts:1".to_string()));
        assert!(!result.related_chunks.contains(&"crypto.ts:1".to_string()));
    }

    #[test]
    fn test_backward_direction() {
        let (graph, store) = fixture();
        let traverser = DependencyTraverser::new(&graph, &store);

        let result = traverser.traverse(&TraversalRequest {
            focus_symbols: vec!["verify".to_string()],
            options: TraversalOptions {
                max_depth: 2,
                direction: TraversalDirection::Backward,
                ..Default::default()
            },
            ..Default::default()
        });

        assert!(result.related_chunks.contains(&"token.ts:1".to_string()));
    }

    #[test]
    fn test_min_strength_filters() {
        let (graph, store) = fixture();
        let traverser = DependencyTraverser::new(&graph, &store);

        let result = traverser.traverse(&TraversalRequest {
            focus_symbols: vec!["login".to_string()],
            options: TraversalOptions {
                min_strength: 0.99,
                ..Default::default()
            },
            ..Default::default()
        });
        // Call edges carry strength 0.8 and are filtered out.
        assert!(result
            .related_chunks
            .iter()
            .all(|id| !id.starts_with("token")));
    }

    #[test]
    fn test_unknown_symbol_is_empty() {
        let (graph, store) = fixture();
        let traverser = DependencyTraverser::new(&graph, &store);
        let result = traverser.traverse(&TraversalRequest {
            focus_symbols: vec!["nonexistent".to_string()],
            ..Default::default()
        });
        assert!(result.primary_chunks.is_empty());
        assert!(result.related_chunks.is_empty());
    }

    #[test]
    fn test_paths_carry_strength_product() {
        let (graph, store) = fixture();
        let traverser = DependencyTraverser::new(&graph, &store);
        let result = traverser.traverse(&TraversalRequest {
            focus_symbols: vec!["login".to_string()],
            options: TraversalOptions {
                direction: TraversalDirection::Forward,
                ..Default::default()
            },
            ..Default::default()
        });

        for path in &result.relationship_paths {
            assert!(path.total_strength > 0.0 && path.total_strength <= 1.0);
            assert!(path.symbols.len() >= 2);
        }
    }

    #[test]
    fn test_context_groups_by_file() {
        let (graph, store) = fixture();
        let traverser = DependencyTraverser::new(&graph, &store);
        let result = traverser.traverse(&TraversalRequest {
            focus_symbols: vec!["login".to_string()],
            options: TraversalOptions {
                direction: TraversalDirection::Forward,
                ..Default::default()
            },
            ..Default::default()
        });

        assert!(!result.context_groups.is_empty());
        let themes: Vec<&str> = result.context_groups.iter().map(|g| g.theme.as_str()).collect();
        assert!(themes.contains(&"auth.ts"));
    }
}
