use crate::graph::Graph;
use crate::ir::{Direction, Edge, Node, Position};
use serde::Serialize;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

#[derive(Debug, Serialize)]
pub struct GraphDump {
    pub direction: String,
    pub nodes: Vec<NodeDump>,
    pub edges: Vec<EdgeDump>,
}

#[derive(Debug, Serialize)]
pub struct NodeDump {
    pub id: String,
    pub position: Position,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Serialize)]
pub struct EdgeDump {
    pub id: String,
    pub source: String,
    pub target: String,
}

impl From<&Node> for NodeDump {
    fn from(node: &Node) -> Self {
        NodeDump {
            id: node.id().to_string(),
            position: Position {
                x: node.x(),
                y: node.y(),
            },
            width: node.width(),
            height: node.height(),
        }
    }
}

impl From<&Edge> for EdgeDump {
    fn from(edge: &Edge) -> Self {
        EdgeDump {
            id: edge.id().to_string(),
            source: edge.source().to_string(),
            target: edge.target().to_string(),
        }
    }
}

impl GraphDump {
    pub fn from_graph(graph: &Graph, direction: Direction) -> Self {
        GraphDump {
            direction: direction.as_token().to_string(),
            nodes: graph.nodes.iter().map(NodeDump::from).collect(),
            edges: graph.edges.iter().map(EdgeDump::from).collect(),
        }
    }
}

pub fn write_graph_dump(path: &Path, graph: &Graph, direction: Direction) -> anyhow::Result<()> {
    let file = File::create(path)?;
    let writer = BufWriter::new(file);
    let dump = GraphDump::from_graph(graph, direction);
    serde_json::to_writer_pretty(writer, &dump)?;
    Ok(())
}
