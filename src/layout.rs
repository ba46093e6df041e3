use crate::config::LayoutConfig;
use crate::graph::Graph;
use crate::ir::{Direction, Node};
use dagre_rust::{
    GraphConfig as DagreConfig, GraphEdge as DagreEdge, GraphNode as DagreNode,
    layout as dagre_layout,
};
use graphlib_rust::{Graph as DagreGraph, GraphOption};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, PartialEq)]
pub struct EdgeRoute {
    pub from: String,
    pub to: String,
    pub points: Vec<(f32, f32)>,
}

#[derive(Debug, Clone)]
pub struct Layout {
    pub direction: Direction,
    pub edges: Vec<EdgeRoute>,
    pub width: f32,
    pub height: f32,
}

/// Positions every node of `graph` (top-left corner) and routes its edges.
///
/// Edges whose endpoints have no node are left out of the layout.
pub fn compute_layout(graph: &mut Graph, config: &LayoutConfig) -> Layout {
    let applied = assign_positions_dagre(graph, config);
    if !applied && !graph.nodes.is_empty() {
        assign_positions_stacked(graph, config);
    }

    let edges = route_edges(graph);
    let (mut width, mut height) = (0.0f32, 0.0f32);
    for node in &graph.nodes {
        width = width.max(node.x() + node.width() as f32);
        height = height.max(node.y() + node.height() as f32);
    }
    if !graph.nodes.is_empty() {
        width += config.margin;
        height += config.margin;
    }

    Layout {
        direction: config.direction,
        edges,
        width,
        height,
    }
}

fn assign_positions_dagre(graph: &mut Graph, config: &LayoutConfig) -> bool {
    if graph.nodes.is_empty() {
        return false;
    }

    let mut dagre_graph: DagreGraph<DagreConfig, DagreNode, DagreEdge> =
        DagreGraph::new(Some(GraphOption {
            directed: Some(true),
            multigraph: Some(false),
            compound: Some(false),
        }));

    let mut graph_config = DagreConfig::default();
    graph_config.rankdir = Some(dagre_rankdir(config.direction).to_string());
    graph_config.nodesep = Some(config.node_spacing);
    graph_config.ranksep = Some(config.rank_spacing);
    graph_config.marginx = Some(config.margin);
    graph_config.marginy = Some(config.margin);
    dagre_graph.set_graph(graph_config);

    for node in &graph.nodes {
        let mut dagre_node = DagreNode::default();
        dagre_node.width = node.width() as f32;
        dagre_node.height = node.height() as f32;
        dagre_graph.set_node(node.id().to_string(), Some(dagre_node));
    }

    let node_set: HashSet<&str> = graph.nodes.iter().map(Node::id).collect();
    let mut edge_set: HashSet<(&str, &str)> = HashSet::new();
    for edge in &graph.edges {
        if !node_set.contains(edge.source()) || !node_set.contains(edge.target()) {
            continue;
        }
        // Self loops add nothing to ranking.
        if edge.source() == edge.target() || !edge_set.insert((edge.source(), edge.target())) {
            continue;
        }
        let _ = dagre_graph.set_edge(
            &edge.source().to_string(),
            &edge.target().to_string(),
            Some(DagreEdge::default()),
            None,
        );
    }

    dagre_layout::run_layout(&mut dagre_graph);

    let mut applied = false;
    for node in &mut graph.nodes {
        let Some(dagre_node) = dagre_graph.node(&node.id().to_string()) else {
            continue;
        };
        let x = dagre_node.x - node.width() as f32 / 2.0;
        let y = dagre_node.y - node.height() as f32 / 2.0;
        node.set_position(x, y);
        applied = true;
    }
    applied
}

/// Fallback: one node per rank, in graph order.
fn assign_positions_stacked(graph: &mut Graph, config: &LayoutConfig) {
    let mut cursor = config.margin;
    let horizontal = matches!(config.direction, Direction::LeftRight | Direction::RightLeft);
    for node in &mut graph.nodes {
        if horizontal {
            node.set_position(cursor, config.margin);
            cursor += node.width() as f32 + config.rank_spacing;
        } else {
            node.set_position(config.margin, cursor);
            cursor += node.height() as f32 + config.rank_spacing;
        }
    }
}

fn route_edges(graph: &Graph) -> Vec<EdgeRoute> {
    let by_id: HashMap<&str, &Node> = graph.nodes.iter().map(|node| (node.id(), node)).collect();
    graph
        .edges
        .iter()
        .filter_map(|edge| {
            let from = by_id.get(edge.source())?;
            let to = by_id.get(edge.target())?;
            let start = border_point(from, center(to));
            let end = border_point(to, center(from));
            Some(EdgeRoute {
                from: edge.source().to_string(),
                to: edge.target().to_string(),
                points: vec![start, end],
            })
        })
        .collect()
}

fn center(node: &Node) -> (f32, f32) {
    (
        node.x() + node.width() as f32 / 2.0,
        node.y() + node.height() as f32 / 2.0,
    )
}

/// Where the segment from the node's center toward `target` leaves its box.
fn border_point(node: &Node, target: (f32, f32)) -> (f32, f32) {
    let (cx, cy) = center(node);
    let dx = target.0 - cx;
    let dy = target.1 - cy;
    if dx == 0.0 && dy == 0.0 {
        return (cx, cy);
    }
    let half_w = node.width() as f32 / 2.0;
    let half_h = node.height() as f32 / 2.0;
    let scale_x = if dx == 0.0 { f32::INFINITY } else { half_w / dx.abs() };
    let scale_y = if dy == 0.0 { f32::INFINITY } else { half_h / dy.abs() };
    let t = scale_x.min(scale_y).min(1.0);
    (cx + dx * t, cy + dy * t)
}

fn dagre_rankdir(direction: Direction) -> &'static str {
    match direction {
        Direction::TopDown => "tb",
        Direction::BottomTop => "bt",
        Direction::LeftRight => "lr",
        Direction::RightLeft => "rl",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Edge;

    fn chain() -> Graph {
        Graph::from_edges(vec![
            Edge::new("TopCo", "HoldCo"),
            Edge::new("HoldCo", "OpCo 1"),
            Edge::new("HoldCo", "OpCo 2"),
        ])
    }

    #[test]
    fn layout_places_nodes_top_down() {
        let mut graph = chain();
        let layout = compute_layout(&mut graph, &LayoutConfig::default());
        let top = graph.node("TopCo").unwrap();
        let hold = graph.node("HoldCo").unwrap();
        let op1 = graph.node("OpCo 1").unwrap();
        let op2 = graph.node("OpCo 2").unwrap();
        assert!(top.y() < hold.y());
        assert!(hold.y() < op1.y());
        assert!((op1.x() - op2.x()).abs() > 1.0);
        assert!(layout.width > 0.0 && layout.height > 0.0);
        assert_eq!(layout.edges.len(), 3);
    }

    #[test]
    fn left_right_ranks_along_x() {
        let mut graph = chain();
        let config = LayoutConfig {
            direction: Direction::LeftRight,
            ..LayoutConfig::default()
        };
        compute_layout(&mut graph, &config);
        assert!(graph.node("TopCo").unwrap().x() < graph.node("HoldCo").unwrap().x());
    }

    #[test]
    fn dangling_edges_are_not_routed() {
        let mut graph = Graph::new(
            vec![Edge::new("A", "B"), Edge::new("A", "Missing")],
            vec![Node::new("A"), Node::new("B")],
        );
        let layout = compute_layout(&mut graph, &LayoutConfig::default());
        assert_eq!(layout.edges.len(), 1);
        assert_eq!(layout.edges[0].to, "B");
    }

    #[test]
    fn empty_graph_has_no_extent() {
        let mut graph = Graph::default();
        let layout = compute_layout(&mut graph, &LayoutConfig::default());
        assert_eq!(layout.width, 0.0);
        assert!(layout.edges.is_empty());
    }

    #[test]
    fn routes_start_on_box_border() {
        let mut a = Node::new("A");
        a.set_position(0.0, 0.0);
        let (x, y) = border_point(&a, (14.0, 100.0));
        assert_eq!(x, 14.0);
        assert_eq!(y, a.height() as f32);
    }
}
