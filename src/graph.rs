use crate::ir::{Edge, Keyed, Node, RawEdge};
use std::collections::HashMap;

pub const DEFAULT_FUZZY_THRESHOLD: f64 = 90.0;

/// How duplicate edges are collapsed when the graph is assembled.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum DedupMode {
    /// Collapse by exact id, last occurrence wins.
    #[default]
    Exact,
    /// Collapse ids whose similarity ratio exceeds `threshold` (0-100).
    /// Labels in ownership charts are often near-identical ("Co 1", "Co 2"),
    /// so this merges distinct edges and is off unless asked for.
    Fuzzy { threshold: f64 },
}

#[derive(Debug, Clone, Default)]
pub struct Graph {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

impl Graph {
    pub fn new(edges: Vec<Edge>, nodes: Vec<Node>) -> Self {
        Self {
            edges: unique(edges),
            nodes: unique(nodes),
        }
    }

    pub fn with_dedup(edges: Vec<Edge>, nodes: Vec<Node>, mode: DedupMode) -> Self {
        let edges = match mode {
            DedupMode::Exact => unique(edges),
            DedupMode::Fuzzy { threshold } => fuzzy_unique(edges, threshold),
        };
        Self {
            edges,
            nodes: unique(nodes),
        }
    }

    /// Graph whose nodes are the endpoints of `edges`.
    pub fn from_edges(edges: Vec<Edge>) -> Self {
        let edges = unique(edges);
        let nodes = create_nodes_from_edges(&edges);
        Self { nodes, edges }
    }

    pub fn from_raw(raw: &[RawEdge]) -> Self {
        Self::from_edges(raw.iter().map(Edge::from).collect())
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|node| node.id() == id)
    }

    /// Replaces the node list with one synthesized from the edges.
    pub fn synthesize_nodes(&mut self) {
        self.nodes = create_nodes_from_edges(&self.edges);
    }

    /// Edges whose endpoints have no node in the graph.
    pub fn dangling_edges(&self) -> Vec<&Edge> {
        let known: std::collections::HashSet<&str> = self.nodes.iter().map(Node::id).collect();
        self.edges
            .iter()
            .filter(|edge| !known.contains(edge.source()) || !known.contains(edge.target()))
            .collect()
    }

    pub fn raw_edges(&self) -> Vec<RawEdge> {
        self.edges.iter().map(Edge::to_raw).collect()
    }
}

/// One entity per key. Later entries overwrite earlier ones; the slot keeps
/// the position where the key was first seen.
pub fn unique<T: Keyed>(entities: Vec<T>) -> Vec<T> {
    let mut slots: HashMap<String, usize> = HashMap::new();
    let mut out: Vec<T> = Vec::with_capacity(entities.len());
    for entity in entities {
        match slots.get(entity.key()) {
            Some(&idx) => out[idx] = entity,
            None => {
                slots.insert(entity.key().to_string(), out.len());
                out.push(entity);
            }
        }
    }
    out
}

pub fn create_nodes_from_edges(edges: &[Edge]) -> Vec<Node> {
    let mut nodes = Vec::with_capacity(edges.len() * 2);
    for edge in edges {
        nodes.push(Node::new(edge.source()));
        nodes.push(Node::new(edge.target()));
    }
    unique(nodes)
}

/// Similarity of two ids on a 0-100 scale.
///
/// Normalized Levenshtein: one minus the edit distance over the longer
/// length. This is not the indel ratio (`2 * matches / total length`), and
/// near the threshold the two disagree on strings of different lengths, e.g.
/// `"abcd"` vs `"abc"` scores 75 here and about 86 as an indel ratio.
pub fn similarity_ratio(a: &str, b: &str) -> f64 {
    strsim::normalized_levenshtein(a, b) * 100.0
}

/// Keeps the first edge of every cluster of near-identical ids.
pub fn fuzzy_unique(edges: Vec<Edge>, threshold: f64) -> Vec<Edge> {
    let mut kept: Vec<Edge> = Vec::new();
    for edge in edges {
        let duplicate = kept
            .iter()
            .any(|seen| similarity_ratio(edge.id(), seen.id()) > threshold);
        if duplicate {
            tracing::debug!(edge = %edge, "fuzzy dedup dropped edge");
            continue;
        }
        kept.push(edge);
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Tagged {
        key: String,
        value: u32,
    }

    impl Keyed for Tagged {
        fn key(&self) -> &str {
            &self.key
        }
    }

    #[test]
    fn unique_keeps_last_occurrence() {
        let first = Tagged { key: "k".into(), value: 1 };
        let second = Tagged { key: "k".into(), value: 2 };
        let out = unique(vec![first, second.clone()]);
        assert_eq!(out, vec![second]);
    }

    #[test]
    fn unique_preserves_first_seen_order() {
        let items = vec![
            Tagged { key: "a".into(), value: 1 },
            Tagged { key: "b".into(), value: 1 },
            Tagged { key: "a".into(), value: 2 },
        ];
        let out = unique(items);
        assert_eq!(out.len(), 2);
        assert_eq!((out[0].key.as_str(), out[0].value), ("a", 2));
        assert_eq!(out[1].key, "b");
    }

    #[test]
    fn graph_from_edges_has_one_node_per_endpoint() {
        let graph = Graph::from_edges(vec![
            Edge::new("TopCo", "Sub 1"),
            Edge::new("TopCo", "Sub 2"),
            Edge::new("Sub 1", "Sub 2"),
            Edge::new("TopCo", "Sub 1"),
        ]);
        assert_eq!(graph.edges.len(), 3);
        let mut ids: Vec<&str> = graph.nodes.iter().map(Node::id).collect();
        ids.sort();
        assert_eq!(ids, vec!["Sub 1", "Sub 2", "TopCo"]);
        assert!(graph.dangling_edges().is_empty());
    }

    #[test]
    fn new_tolerates_dangling_edges() {
        let graph = Graph::new(vec![Edge::new("a", "b")], vec![Node::new("a")]);
        assert_eq!(graph.nodes.len(), 1);
        assert_eq!(graph.dangling_edges().len(), 1);
    }

    #[test]
    fn empty_input_builds_empty_graph() {
        let graph = Graph::new(Vec::new(), Vec::new());
        assert!(graph.nodes.is_empty());
        assert!(graph.edges.is_empty());
    }

    #[test]
    fn fuzzy_mode_collapses_near_duplicates() {
        let edges = vec![
            Edge::new("Facility 1", "Facility 1 Lenders"),
            Edge::new("Facility 1", "Facility 1 Lender"),
            Edge::new("Owner", "Fund"),
        ];
        let exact = Graph::with_dedup(edges.clone(), Vec::new(), DedupMode::Exact);
        assert_eq!(exact.edges.len(), 3);
        let fuzzy = Graph::with_dedup(
            edges,
            Vec::new(),
            DedupMode::Fuzzy { threshold: DEFAULT_FUZZY_THRESHOLD },
        );
        assert_eq!(fuzzy.edges.len(), 2);
        assert_eq!(fuzzy.edges[0].id(), "Facility 1-Facility 1 Lenders");
    }

    #[test]
    fn similarity_is_normalized_levenshtein() {
        assert_eq!(similarity_ratio("abcd", "abc"), 75.0);
        assert_eq!(similarity_ratio("OpCo A", "OpCo A"), 100.0);
    }

    #[test]
    fn default_dedup_is_exact() {
        assert_eq!(DedupMode::default(), DedupMode::Exact);
    }
}
