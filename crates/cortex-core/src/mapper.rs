//! Dependency Mapper
//!
//! Builds the relationship graph from chunked files by resolving call
//! sites, imports/exports, inheritance, throw/catch pairs, data-flow
//! references and co-change history into typed edges. Resolution is
//! heuristic and name-based; confidence values reflect that.

use std::collections::{BTreeMap, HashMap};

use once_cell::sync::Lazy;
use petgraph::stable_graph::NodeIndex;
use regex::Regex;

use crate::chunker::{ChunkContext, Chunker};
use crate::graph::{EdgeKind, RelationEdge, RelationshipGraph, SymbolNode};
use crate::types::{ChunkKind, CodeChunk, Language};

static EXTENDS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"class\s+\w+(?:<[^>]*>)?\s+extends\s+([A-Za-z_]\w*)").unwrap());
static IMPLEMENTS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"implements\s+([A-Za-z_]\w*(?:\s*,\s*[A-Za-z_]\w*)*)").unwrap());
static PY_BASES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"class\s+\w+\(([^)]+)\)\s*:").unwrap());
static RS_IMPL_FOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"impl(?:<[^>]*>)?\s+([A-Za-z_]\w*)(?:<[^>]*>)?\s+for\s+").unwrap());
static THROWS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:throw\s+new\s+|raise\s+)([A-Za-z_]\w*)").unwrap());
static CATCHES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:catch\s*\(\s*\w+\s*:\s*|except\s+)([A-Za-z_]\w*)").unwrap()
});
static NAMED_IMPORTS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"import\s*\{([^}]+)\}\s*from").unwrap());

/// Edge weights by provenance. Call edges are weaker than import edges
/// because name-based call resolution cross-file is fuzzier.
const CALLS_STRENGTH: (f32, f32) = (0.8, 0.7);
const IMPORTS_STRENGTH: (f32, f32) = (0.9, 0.9);
const EXPORTS_STRENGTH: (f32, f32) = (1.0, 0.95);
const DEPENDS_STRENGTH: (f32, f32) = (0.7, 0.8);
const EXTENDS_STRENGTH: (f32, f32) = (0.95, 0.9);
const IMPLEMENTS_STRENGTH: (f32, f32) = (0.9, 0.9);
const THROWS_STRENGTH: (f32, f32) = (0.7, 0.75);
const CATCHES_STRENGTH: (f32, f32) = (0.6, 0.7);
const DATA_FLOW_STRENGTH: (f32, f32) = (0.5, 0.5);
const CO_CHANGE_STRENGTH: (f32, f32) = (0.5, 0.6);

/// Builds a [`RelationshipGraph`] from file contents.
#[derive(Debug, Clone, Default)]
pub struct DependencyMapper {
    chunker: Chunker,
}

impl DependencyMapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Chunk every file and map the result. Convenience over
    /// [`Self::build_from_chunks`].
    pub fn build_from_files(
        &self,
        files: &BTreeMap<String, String>,
        co_changes: &HashMap<String, Vec<String>>,
    ) -> RelationshipGraph {
        let chunks_by_file: BTreeMap<String, Vec<CodeChunk>> = files
            .iter()
            .map(|(path, content)| {
                (
                    path.clone(),
                    self.chunker.chunk_file(path, content, &ChunkContext::default()),
                )
            })
            .collect();
        self.build_from_chunks(&chunks_by_file, co_changes)
    }

    /// Build the graph from already-chunked files.
    pub fn build_from_chunks(
        &self,
        chunks_by_file: &BTreeMap<String, Vec<CodeChunk>>,
        co_changes: &HashMap<String, Vec<String>>,
    ) -> RelationshipGraph {
        let mut graph = RelationshipGraph::new();

        // Pass 1: nodes. Each chunk with a symbol becomes a node; the first
        // chunk of a file doubles as the module anchor for file-level edges.
        let mut module_anchor: HashMap<&str, NodeIndex> = HashMap::new();
        let mut symbol_nodes: HashMap<String, Vec<NodeIndex>> = HashMap::new();

        for (path, chunks) in chunks_by_file {
            let Some(first) = chunks.first() else { continue };
            let anchor = graph.add_node(SymbolNode {
                chunk_id: first.chunk_id.clone(),
                symbol: module_symbol(path),
                kind: ChunkKind::Config,
                file_path: path.clone(),
            });
            module_anchor.insert(path.as_str(), anchor);

            for chunk in chunks {
                let Some(symbol) = &chunk.symbol_name else { continue };
                let idx = graph.add_node(SymbolNode {
                    chunk_id: chunk.chunk_id.clone(),
                    symbol: symbol.clone(),
                    kind: chunk.kind,
                    file_path: path.clone(),
                });
                symbol_nodes.entry(symbol.clone()).or_default().push(idx);
            }
        }

        // Pass 2: edges.
        for (path, chunks) in chunks_by_file {
            let Some(&anchor) = module_anchor.get(path.as_str()) else { continue };

            for chunk in chunks {
                let from = chunk
                    .symbol_name
                    .as_ref()
                    .and_then(|s| {
                        graph
                            .nodes_for_chunk(&chunk.chunk_id)
                            .into_iter()
                            .find(|idx| graph.node(*idx).map(|n| &n.symbol == s).unwrap_or(false))
                    })
                    .unwrap_or(anchor);

                self.map_calls(&mut graph, chunk, from, &symbol_nodes);
                self.map_imports(&mut graph, chunk, from, anchor, path, &module_anchor);
                self.map_inheritance(&mut graph, chunk, from, &symbol_nodes);
                self.map_exceptions(&mut graph, chunk, from, &symbol_nodes);
                self.map_data_flow(&mut graph, chunk, from, &symbol_nodes);

                if !chunk.exports.is_empty() {
                    for export in &chunk.exports {
                        for target in lookup(&symbol_nodes, export) {
                            graph.add_edge(
                                anchor,
                                target,
                                edge(EdgeKind::Exports, EXPORTS_STRENGTH, &chunk.chunk_id),
                            );
                        }
                    }
                }
            }
        }

        // Pass 3: co-change edges between module anchors.
        for (path, partners) in co_changes {
            let Some(&from) = module_anchor.get(path.as_str()) else { continue };
            for partner in partners {
                if let Some(&to) = module_anchor.get(partner.as_str()) {
                    graph.add_edge(
                        from,
                        to,
                        RelationEdge::new(
                            EdgeKind::CoChange,
                            CO_CHANGE_STRENGTH.0,
                            CO_CHANGE_STRENGTH.1,
                            chunks_by_file[path][0].chunk_id.clone(),
                        ),
                    );
                }
            }
        }

        graph
    }

    fn map_calls(
        &self,
        graph: &mut RelationshipGraph,
        chunk: &CodeChunk,
        from: NodeIndex,
        symbol_nodes: &HashMap<String, Vec<NodeIndex>>,
    ) {
        for call in &chunk.calls {
            if chunk.symbol_name.as_deref() == Some(call.as_str()) {
                continue; // the declaration itself
            }
            for target in lookup(symbol_nodes, call) {
                if target == from {
                    continue;
                }
                graph.add_edge(from, target, edge(EdgeKind::Calls, CALLS_STRENGTH, &chunk.chunk_id));
            }
        }
    }

    fn map_imports(
        &self,
        graph: &mut RelationshipGraph,
        chunk: &CodeChunk,
        from: NodeIndex,
        anchor: NodeIndex,
        path: &str,
        module_anchor: &HashMap<&str, NodeIndex>,
    ) {
        for spec in &chunk.imports {
            let Some(target_anchor) = resolve_module(spec, path, module_anchor) else {
                continue;
            };
            if target_anchor == anchor {
                continue;
            }
            graph.add_edge(
                from,
                target_anchor,
                edge(EdgeKind::Imports, IMPORTS_STRENGTH, &chunk.chunk_id),
            );
            // Aggregate to a module-level dependency as well.
            graph.add_edge(
                anchor,
                target_anchor,
                edge(EdgeKind::DependsOn, DEPENDS_STRENGTH, &chunk.chunk_id),
            );
        }
    }

    fn map_inheritance(
        &self,
        graph: &mut RelationshipGraph,
        chunk: &CodeChunk,
        from: NodeIndex,
        symbol_nodes: &HashMap<String, Vec<NodeIndex>>,
    ) {
        if let Some(cap) = EXTENDS.captures(&chunk.content) {
            for target in lookup(symbol_nodes, &cap[1]) {
                if target != from {
                    graph.add_edge(
                        from,
                        target,
                        edge(EdgeKind::Extends, EXTENDS_STRENGTH, &chunk.chunk_id),
                    );
                }
            }
        }
        if let Some(cap) = IMPLEMENTS.captures(&chunk.content) {
            for name in cap[1].split(',') {
                for target in lookup(symbol_nodes, name.trim()) {
                    if target != from {
                        graph.add_edge(
                            from,
                            target,
                            edge(EdgeKind::Implements, IMPLEMENTS_STRENGTH, &chunk.chunk_id),
                        );
                    }
                }
            }
        }
        if chunk.language == Language::Python {
            if let Some(cap) = PY_BASES.captures(&chunk.content) {
                for base in cap[1].split(',') {
                    for target in lookup(symbol_nodes, base.trim()) {
                        if target != from {
                            graph.add_edge(
                                from,
                                target,
                                edge(EdgeKind::Extends, EXTENDS_STRENGTH, &chunk.chunk_id),
                            );
                        }
                    }
                }
            }
        }
        if chunk.language == Language::Rust {
            if let Some(cap) = RS_IMPL_FOR.captures(&chunk.content) {
                for target in lookup(symbol_nodes, &cap[1]) {
                    if target != from {
                        graph.add_edge(
                            from,
                            target,
                            edge(EdgeKind::Implements, IMPLEMENTS_STRENGTH, &chunk.chunk_id),
                        );
                    }
                }
            }
        }
    }

    fn map_exceptions(
        &self,
        graph: &mut RelationshipGraph,
        chunk: &CodeChunk,
        from: NodeIndex,
        symbol_nodes: &HashMap<String, Vec<NodeIndex>>,
    ) {
        for cap in THROWS.captures_iter(&chunk.content) {
            for target in lookup(symbol_nodes, &cap[1]) {
                if target != from {
                    graph.add_edge(from, target, edge(EdgeKind::Throws, THROWS_STRENGTH, &chunk.chunk_id));
                }
            }
        }
        for cap in CATCHES.captures_iter(&chunk.content) {
            for target in lookup(symbol_nodes, &cap[1]) {
                if target != from {
                    graph.add_edge(
                        from,
                        target,
                        edge(EdgeKind::Catches, CATCHES_STRENGTH, &chunk.chunk_id),
                    );
                }
            }
        }
    }

    /// Named imports that are referenced but never called read as data
    /// dependencies (constants, schemas, config objects).
    fn map_data_flow(
        &self,
        graph: &mut RelationshipGraph,
        chunk: &CodeChunk,
        from: NodeIndex,
        symbol_nodes: &HashMap<String, Vec<NodeIndex>>,
    ) {
        for cap in NAMED_IMPORTS.captures_iter(&chunk.content) {
            for name in cap[1].split(',') {
                let name = name.trim().split_whitespace().next().unwrap_or("");
                if name.is_empty() || chunk.calls.iter().any(|c| c == name) {
                    continue;
                }
                for target in lookup(symbol_nodes, name) {
                    if target != from {
                        graph.add_edge(
                            from,
                            target,
                            edge(EdgeKind::DataFlow, DATA_FLOW_STRENGTH, &chunk.chunk_id),
                        );
                    }
                }
            }
        }
    }
}

fn edge(kind: EdgeKind, (strength, confidence): (f32, f32), source: &str) -> RelationEdge {
    RelationEdge::new(kind, strength, confidence, source)
}

fn lookup(symbol_nodes: &HashMap<String, Vec<NodeIndex>>, symbol: &str) -> Vec<NodeIndex> {
    symbol_nodes.get(symbol).cloned().unwrap_or_default()
}

/// Module display symbol: file stem.
fn module_symbol(path: &str) -> String {
    path.rsplit('/')
        .next()
        .unwrap_or(path)
        .split('.')
        .next()
        .unwrap_or(path)
        .to_string()
}

/// Resolve an import specifier to an indexed file's module anchor by suffix
/// match on the specifier's final segment.
fn resolve_module<'a>(
    spec: &str,
    importer: &str,
    module_anchor: &HashMap<&'a str, NodeIndex>,
) -> Option<NodeIndex> {
    let segment = spec
        .trim_end_matches('/')
        .rsplit(['/', ':'])
        .next()?
        .trim_start_matches('.');
    if segment.is_empty() {
        return None;
    }

    let mut best: Option<(&str, NodeIndex)> = None;
    for (path, idx) in module_anchor {
        if *path == importer {
            continue;
        }
        let stem = module_symbol(path);
        if stem == segment {
            // Prefer the candidate sharing the longest directory prefix
            // with the importer.
            let common = common_prefix_len(path, importer);
            match best {
                Some((current, _)) if common_prefix_len(current, importer) >= common => {}
                _ => best = Some((path, *idx)),
            }
        }
    }
    best.map(|(_, idx)| idx)
}

fn common_prefix_len(a: &str, b: &str) -> usize {
    a.bytes().zip(b.bytes()).take_while(|(x, y)| x == y).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use petgraph::Direction;

    fn files(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(p, c)| (p.to_string(), c.to_string()))
            .collect()
    }

    #[test]
    fn test_call_edges_across_files() {
        let graph = DependencyMapper::new().build_from_files(
            &files(&[
                ("a.ts", "export function alpha() {\n  return beta();\n}"),
                ("b.ts", "export function beta() {\n  return 1;\n}"),
            ]),
            &HashMap::new(),
        );

        let alpha = graph.nodes_for_symbol("alpha")[0];
        let out = graph.neighbors(alpha, Direction::Outgoing, &[EdgeKind::Calls], 0.0, 0.0);
        assert_eq!(out.len(), 1);
        assert_eq!(graph.node(out[0].0).unwrap().symbol, "beta");
    }

    #[test]
    fn test_import_and_depends_on_edges() {
        let graph = DependencyMapper::new().build_from_files(
            &files(&[
                (
                    "src/main.ts",
                    "import { helper } from './util';\n\nexport function main() {\n  return helper();\n}",
                ),
                ("src/util.ts", "export function helper() {\n  return 1;\n}"),
            ]),
            &HashMap::new(),
        );

        let kinds: Vec<EdgeKind> = graph
            .node_indices()
            .flat_map(|idx| {
                graph
                    .neighbors(idx, Direction::Outgoing, &[], 0.0, 0.0)
                    .into_iter()
                    .map(|(_, e)| e.kind)
                    .collect::<Vec<_>>()
            })
            .collect();
        assert!(kinds.contains(&EdgeKind::Imports));
        assert!(kinds.contains(&EdgeKind::DependsOn));
        assert!(kinds.contains(&EdgeKind::Calls));
    }

    #[test]
    fn test_extends_edge() {
        let graph = DependencyMapper::new().build_from_files(
            &files(&[
                ("base.ts", "export class Base {\n  run() { return 0; }\n}"),
                ("child.ts", "export class Child extends Base {\n  run() { return 1; }\n}"),
            ]),
            &HashMap::new(),
        );

        let child = graph.nodes_for_symbol("Child")[0];
        let out = graph.neighbors(child, Direction::Outgoing, &[EdgeKind::Extends], 0.0, 0.0);
        assert_eq!(out.len(), 1);
        assert_eq!(graph.node(out[0].0).unwrap().symbol, "Base");
    }

    #[test]
    fn test_throws_edge() {
        let graph = DependencyMapper::new().build_from_files(
            &files(&[
                ("err.ts", "export class AuthError extends Error {\n  constructor() { super(); }\n}"),
                (
                    "login.ts",
                    "export function login(user) {\n  if (!user) {\n    throw new AuthError();\n  }\n}",
                ),
            ]),
            &HashMap::new(),
        );

        let login = graph.nodes_for_symbol("login")[0];
        let out = graph.neighbors(login, Direction::Outgoing, &[EdgeKind::Throws], 0.0, 0.0);
        assert_eq!(out.len(), 1);
        assert_eq!(graph.node(out[0].0).unwrap().symbol, "AuthError");
    }

    #[test]
    fn test_co_change_edges() {
        let mut co = HashMap::new();
        co.insert("a.ts".to_string(), vec!["b.ts".to_string()]);
        let graph = DependencyMapper::new().build_from_files(
            &files(&[
                ("a.ts", "export function alpha() { return 1; }"),
                ("b.ts", "export function beta() { return 2; }"),
            ]),
            &co,
        );

        let has_co_change = graph.node_indices().any(|idx| {
            !graph
                .neighbors(idx, Direction::Outgoing, &[EdgeKind::CoChange], 0.0, 0.0)
                .is_empty()
        });
        assert!(has_co_change);
    }

    #[test]
    fn test_python_inheritance() {
        let graph = DependencyMapper::new().build_from_files(
            &files(&[
                ("shapes.py", "class Shape:\n    def area(self):\n        return 0\n"),
                ("circle.py", "class Circle(Shape):\n    def area(self):\n        return 3\n"),
            ]),
            &HashMap::new(),
        );

        let circle = graph.nodes_for_symbol("Circle")[0];
        let out = graph.neighbors(circle, Direction::Outgoing, &[EdgeKind::Extends], 0.0, 0.0);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_empty_input() {
        let graph =
            DependencyMapper::new().build_from_files(&BTreeMap::new(), &HashMap::new());
        assert_eq!(graph.node_count(), 0);
        assert_eq!(graph.edge_count(), 0);
    }
}
