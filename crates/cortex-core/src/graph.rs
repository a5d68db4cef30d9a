//! Relationship Graph
//!
//! Symbol-level graph over chunks: nodes are symbol occurrences
//! `(chunk_id, symbol, kind)` stored in a petgraph arena with stable integer
//! indices, edges are typed relationships carrying strength and confidence
//! in `[0, 1]` plus the chunk that produced them. The graph is not
//! guaranteed acyclic; traversals use a visited set over node indices.
//!
//! The graph serializes to a compact node/edge-list form persisted next to
//! the vector index by the dual-tier store.

use std::collections::HashMap;

use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::visit::{EdgeRef, IntoEdgeReferences};
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::ChunkKind;

/// Schema version of the persisted relationship file.
pub const GRAPH_SCHEMA_VERSION: u32 = 2;

/// Errors from graph persistence and validation.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("Graph schema version {found} is not supported (expected {expected})")]
    SchemaVersion { found: u32, expected: u32 },

    #[error("Edge references missing node index {0}")]
    DanglingEdge(usize),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for graph operations.
pub type Result<T> = std::result::Result<T, GraphError>;

// ============================================================================
// Edge and node types
// ============================================================================

/// Typed relationships between symbols (closed set).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    Calls,
    Imports,
    Exports,
    DataFlow,
    CoChange,
    Extends,
    Implements,
    Throws,
    Catches,
    DependsOn,
}

impl EdgeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeKind::Calls => "calls",
            EdgeKind::Imports => "imports",
            EdgeKind::Exports => "exports",
            EdgeKind::DataFlow => "data_flow",
            EdgeKind::CoChange => "co_change",
            EdgeKind::Extends => "extends",
            EdgeKind::Implements => "implements",
            EdgeKind::Throws => "throws",
            EdgeKind::Catches => "catches",
            EdgeKind::DependsOn => "depends_on",
        }
    }

    /// Every edge kind, for iteration in filters.
    pub const ALL: [EdgeKind; 10] = [
        EdgeKind::Calls,
        EdgeKind::Imports,
        EdgeKind::Exports,
        EdgeKind::DataFlow,
        EdgeKind::CoChange,
        EdgeKind::Extends,
        EdgeKind::Implements,
        EdgeKind::Throws,
        EdgeKind::Catches,
        EdgeKind::DependsOn,
    ];
}

/// A symbol occurrence: one chunk defining or containing a symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolNode {
    pub chunk_id: String,
    pub symbol: String,
    pub kind: ChunkKind,
    pub file_path: String,
}

/// A typed, weighted relationship.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationEdge {
    pub kind: EdgeKind,
    /// How strong the relationship is, in `[0, 1]`
    pub strength: f32,
    /// How certain the extraction was, in `[0, 1]`
    pub confidence: f32,
    /// Chunk whose content produced this edge
    pub source_chunk: String,
}

impl RelationEdge {
    pub fn new(kind: EdgeKind, strength: f32, confidence: f32, source_chunk: impl Into<String>) -> Self {
        Self {
            kind,
            strength: strength.clamp(0.0, 1.0),
            confidence: confidence.clamp(0.0, 1.0),
            source_chunk: source_chunk.into(),
        }
    }
}

// ============================================================================
// Graph
// ============================================================================

/// Directed relationship graph with stable integer node ids.
#[derive(Debug, Default)]
pub struct RelationshipGraph {
    graph: StableDiGraph<SymbolNode, RelationEdge>,
    /// `symbol -> nodes` for call/extends resolution
    by_symbol: HashMap<String, Vec<NodeIndex>>,
    /// `chunk_id -> nodes` for chunk-scoped lookups and file removal
    by_chunk: HashMap<String, Vec<NodeIndex>>,
    /// `file_path -> nodes` for incremental per-file rebuilds
    by_file: HashMap<String, Vec<NodeIndex>>,
}

impl RelationshipGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn node(&self, idx: NodeIndex) -> Option<&SymbolNode> {
        self.graph.node_weight(idx)
    }

    pub fn node_indices(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        self.graph.node_indices()
    }

    /// Add a node, deduplicating on `(chunk_id, symbol)`.
    pub fn add_node(&mut self, node: SymbolNode) -> NodeIndex {
        if let Some(existing) = self
            .by_chunk
            .get(&node.chunk_id)
            .and_then(|nodes| nodes.iter().find(|idx| {
                self.graph
                    .node_weight(**idx)
                    .map(|n| n.symbol == node.symbol)
                    .unwrap_or(false)
            }))
        {
            return *existing;
        }

        let symbol = node.symbol.clone();
        let chunk_id = node.chunk_id.clone();
        let file_path = node.file_path.clone();
        let idx = self.graph.add_node(node);
        self.by_symbol.entry(symbol).or_default().push(idx);
        self.by_chunk.entry(chunk_id).or_default().push(idx);
        self.by_file.entry(file_path).or_default().push(idx);
        idx
    }

    /// Add an edge between existing nodes. Parallel edges of the same kind
    /// between the same endpoints collapse to the stronger one.
    pub fn add_edge(&mut self, from: NodeIndex, to: NodeIndex, edge: RelationEdge) {
        if !self.graph.contains_node(from) || !self.graph.contains_node(to) {
            return;
        }
        let existing = self
            .graph
            .edges_connecting(from, to)
            .find(|e| e.weight().kind == edge.kind)
            .map(|e| (e.id(), e.weight().strength));
        match existing {
            Some((_, strength)) if strength >= edge.strength => {}
            Some((id, _)) => {
                if let Some(weight) = self.graph.edge_weight_mut(id) {
                    *weight = edge;
                }
            }
            None => {
                self.graph.add_edge(from, to, edge);
            }
        }
    }

    /// Nodes defining or containing `symbol`.
    pub fn nodes_for_symbol(&self, symbol: &str) -> Vec<NodeIndex> {
        self.by_symbol.get(symbol).cloned().unwrap_or_default()
    }

    /// Nodes belonging to a chunk.
    pub fn nodes_for_chunk(&self, chunk_id: &str) -> Vec<NodeIndex> {
        self.by_chunk.get(chunk_id).cloned().unwrap_or_default()
    }

    /// Symbols of chunks that call into `chunk_id` (reverse `calls` edges).
    pub fn callers_of(&self, chunk_id: &str) -> Vec<String> {
        let mut callers = Vec::new();
        for idx in self.nodes_for_chunk(chunk_id) {
            for edge in self.graph.edges_directed(idx, Direction::Incoming) {
                if edge.weight().kind == EdgeKind::Calls {
                    if let Some(node) = self.graph.node_weight(edge.source()) {
                        if !callers.contains(&node.symbol) {
                            callers.push(node.symbol.clone());
                        }
                    }
                }
            }
        }
        callers.sort();
        callers
    }

    /// Typed, filtered neighbors of a node.
    pub fn neighbors(
        &self,
        idx: NodeIndex,
        direction: Direction,
        kinds: &[EdgeKind],
        min_strength: f32,
        min_confidence: f32,
    ) -> Vec<(NodeIndex, &RelationEdge)> {
        let mut out: Vec<(NodeIndex, &RelationEdge)> = self
            .graph
            .edges_directed(idx, direction)
            .filter(|e| {
                let w = e.weight();
                (kinds.is_empty() || kinds.contains(&w.kind))
                    && w.strength >= min_strength
                    && w.confidence >= min_confidence
            })
            .map(|e| {
                let other = match direction {
                    Direction::Outgoing => e.target(),
                    Direction::Incoming => e.source(),
                };
                (other, e.weight())
            })
            .collect();
        out.sort_by(|a, b| {
            b.1.strength
                .partial_cmp(&a.1.strength)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        out
    }

    /// Remove every node (and its edges) belonging to a file. Used for
    /// incremental per-file rebuilds.
    pub fn remove_file(&mut self, file_path: &str) -> usize {
        let nodes = self.by_file.remove(file_path).unwrap_or_default();
        let removed = nodes.len();
        for idx in nodes {
            if let Some(node) = self.graph.remove_node(idx) {
                if let Some(list) = self.by_symbol.get_mut(&node.symbol) {
                    list.retain(|i| *i != idx);
                    if list.is_empty() {
                        self.by_symbol.remove(&node.symbol);
                    }
                }
                if let Some(list) = self.by_chunk.get_mut(&node.chunk_id) {
                    list.retain(|i| *i != idx);
                    if list.is_empty() {
                        self.by_chunk.remove(&node.chunk_id);
                    }
                }
            }
        }
        removed
    }

    /// Merge another graph into this one (used when a file's subgraph is
    /// rebuilt). Node identity is `(chunk_id, symbol)`.
    pub fn merge(&mut self, other: RelationshipGraph) {
        let mut remap: HashMap<NodeIndex, NodeIndex> = HashMap::new();
        for idx in other.graph.node_indices() {
            if let Some(node) = other.graph.node_weight(idx) {
                remap.insert(idx, self.add_node(node.clone()));
            }
        }
        for edge in other.graph.edge_references() {
            if let (Some(from), Some(to)) = (remap.get(&edge.source()), remap.get(&edge.target())) {
                self.add_edge(*from, *to, edge.weight().clone());
            }
        }
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    pub fn to_persisted(&self) -> PersistedGraph {
        let mut index_of: HashMap<NodeIndex, usize> = HashMap::new();
        let mut nodes = Vec::with_capacity(self.graph.node_count());
        for idx in self.graph.node_indices() {
            if let Some(node) = self.graph.node_weight(idx) {
                index_of.insert(idx, nodes.len());
                nodes.push(node.clone());
            }
        }

        let mut edges: Vec<PersistedEdge> = self
            .graph
            .edge_references()
            .filter_map(|e| {
                Some(PersistedEdge {
                    from: *index_of.get(&e.source())?,
                    to: *index_of.get(&e.target())?,
                    kind: e.weight().kind,
                    strength: e.weight().strength,
                    confidence: e.weight().confidence,
                    source_chunk: e.weight().source_chunk.clone(),
                })
            })
            .collect();
        edges.sort_by(|a, b| (a.from, a.to).cmp(&(b.from, b.to)));

        PersistedGraph {
            schema_version: GRAPH_SCHEMA_VERSION,
            nodes,
            edges,
        }
    }

    pub fn from_persisted(persisted: PersistedGraph) -> Result<Self> {
        if persisted.schema_version != GRAPH_SCHEMA_VERSION {
            return Err(GraphError::SchemaVersion {
                found: persisted.schema_version,
                expected: GRAPH_SCHEMA_VERSION,
            });
        }

        let mut graph = Self::new();
        let mut indices = Vec::with_capacity(persisted.nodes.len());
        for node in persisted.nodes {
            indices.push(graph.add_node(node));
        }
        for edge in persisted.edges {
            let from = *indices.get(edge.from).ok_or(GraphError::DanglingEdge(edge.from))?;
            let to = *indices.get(edge.to).ok_or(GraphError::DanglingEdge(edge.to))?;
            graph.add_edge(
                from,
                to,
                RelationEdge::new(edge.kind, edge.strength, edge.confidence, edge.source_chunk),
            );
        }
        Ok(graph)
    }
}

/// On-disk node/edge-list form of the graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedGraph {
    pub schema_version: u32,
    pub nodes: Vec<SymbolNode>,
    pub edges: Vec<PersistedEdge>,
}

/// One edge in the persisted form, endpoints as node-array indices.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedEdge {
    pub from: usize,
    pub to: usize,
    pub kind: EdgeKind,
    pub strength: f32,
    pub confidence: f32,
    pub source_chunk: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(chunk: &str, symbol: &str, file: &str) -> SymbolNode {
        SymbolNode {
            chunk_id: chunk.to_string(),
            symbol: symbol.to_string(),
            kind: ChunkKind::Function,
            file_path: file.to_string(),
        }
    }

    #[test]
    fn test_add_node_dedup() {
        let mut g = RelationshipGraph::new();
        let a = g.add_node(node("a.ts:1", "foo", "a.ts"));
        let b = g.add_node(node("a.ts:1", "foo", "a.ts"));
        assert_eq!(a, b);
        assert_eq!(g.node_count(), 1);
    }

    #[test]
    fn test_edges_and_neighbors() {
        let mut g = RelationshipGraph::new();
        let a = g.add_node(node("a.ts:1", "caller", "a.ts"));
        let b = g.add_node(node("b.ts:1", "callee", "b.ts"));
        g.add_edge(a, b, RelationEdge::new(EdgeKind::Calls, 0.8, 0.7, "a.ts:1"));

        let out = g.neighbors(a, Direction::Outgoing, &[EdgeKind::Calls], 0.0, 0.0);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].0, b);

        let filtered = g.neighbors(a, Direction::Outgoing, &[EdgeKind::Calls], 0.9, 0.0);
        assert!(filtered.is_empty());

        let incoming = g.neighbors(b, Direction::Incoming, &[], 0.0, 0.0);
        assert_eq!(incoming.len(), 1);
        assert_eq!(incoming[0].0, a);
    }

    #[test]
    fn test_parallel_edges_collapse_to_stronger() {
        let mut g = RelationshipGraph::new();
        let a = g.add_node(node("a.ts:1", "x", "a.ts"));
        let b = g.add_node(node("b.ts:1", "y", "b.ts"));
        g.add_edge(a, b, RelationEdge::new(EdgeKind::Calls, 0.4, 0.5, "a.ts:1"));
        g.add_edge(a, b, RelationEdge::new(EdgeKind::Calls, 0.9, 0.5, "a.ts:1"));
        assert_eq!(g.edge_count(), 1);
        let out = g.neighbors(a, Direction::Outgoing, &[], 0.0, 0.0);
        assert!((out[0].1.strength - 0.9).abs() < f32::EPSILON);
    }

    #[test]
    fn test_callers_of() {
        let mut g = RelationshipGraph::new();
        let a = g.add_node(node("a.ts:1", "alpha", "a.ts"));
        let b = g.add_node(node("b.ts:1", "beta", "b.ts"));
        g.add_edge(a, b, RelationEdge::new(EdgeKind::Calls, 0.8, 0.7, "a.ts:1"));
        assert_eq!(g.callers_of("b.ts:1"), vec!["alpha".to_string()]);
        assert!(g.callers_of("a.ts:1").is_empty());
    }

    #[test]
    fn test_remove_file() {
        let mut g = RelationshipGraph::new();
        let a = g.add_node(node("a.ts:1", "alpha", "a.ts"));
        let b = g.add_node(node("b.ts:1", "beta", "b.ts"));
        g.add_edge(a, b, RelationEdge::new(EdgeKind::Calls, 0.8, 0.7, "a.ts:1"));

        assert_eq!(g.remove_file("a.ts"), 1);
        assert_eq!(g.node_count(), 1);
        assert_eq!(g.edge_count(), 0);
        assert!(g.nodes_for_symbol("alpha").is_empty());
        assert_eq!(g.nodes_for_symbol("beta").len(), 1);
    }

    #[test]
    fn test_persist_roundtrip() {
        let mut g = RelationshipGraph::new();
        let a = g.add_node(node("a.ts:1", "alpha", "a.ts"));
        let b = g.add_node(node("b.ts:1", "beta", "b.ts"));
        g.add_edge(a, b, RelationEdge::new(EdgeKind::Imports, 0.9, 0.9, "a.ts:1"));
        g.add_edge(b, a, RelationEdge::new(EdgeKind::CoChange, 0.5, 0.6, "b.ts:1"));

        let persisted = g.to_persisted();
        let json = serde_json::to_string(&persisted).unwrap();
        let parsed: PersistedGraph = serde_json::from_str(&json).unwrap();
        let restored = RelationshipGraph::from_persisted(parsed).unwrap();

        assert_eq!(restored.node_count(), 2);
        assert_eq!(restored.edge_count(), 2);
        assert_eq!(restored.nodes_for_symbol("alpha").len(), 1);
    }

    #[test]
    fn test_persisted_rejects_wrong_schema() {
        let persisted = PersistedGraph {
            schema_version: 1,
            nodes: vec![],
            edges: vec![],
        };
        assert!(matches!(
            RelationshipGraph::from_persisted(persisted),
            Err(GraphError::SchemaVersion { .. })
        ));
    }

    #[test]
    fn test_cycles_allowed() {
        let mut g = RelationshipGraph::new();
        let a = g.add_node(node("a.ts:1", "a", "a.ts"));
        let b = g.add_node(node("b.ts:1", "b", "b.ts"));
        g.add_edge(a, b, RelationEdge::new(EdgeKind::Calls, 0.8, 0.7, "a.ts:1"));
        g.add_edge(b, a, RelationEdge::new(EdgeKind::Calls, 0.8, 0.7, "b.ts:1"));
        assert_eq!(g.edge_count(), 2);
    }
}
