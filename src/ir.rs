use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

pub const CHAR_WIDTH: u32 = 8;
pub const BASE_PADDING: u32 = 20;
pub const LINE_HEIGHT: u32 = 20;
pub const MAX_NODE_WIDTH: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Direction {
    #[default]
    TopDown,
    LeftRight,
    RightLeft,
    BottomTop,
}

impl Direction {
    pub fn from_token(token: &str) -> Option<Self> {
        match token.to_ascii_uppercase().as_str() {
            "TD" | "TB" => Some(Self::TopDown),
            "LR" => Some(Self::LeftRight),
            "RL" => Some(Self::RightLeft),
            "BT" => Some(Self::BottomTop),
            _ => None,
        }
    }

    pub fn as_token(self) -> &'static str {
        match self {
            Self::TopDown => "TB",
            Self::LeftRight => "LR",
            Self::RightLeft => "RL",
            Self::BottomTop => "BT",
        }
    }
}

/// Anything deduplicated by a string key.
pub trait Keyed {
    fn key(&self) -> &str;
}

/// Wire shape of an edge: ground-truth files and model answers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEdge {
    pub source: String,
    pub target: String,
}

impl RawEdge {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

/// A directed relationship between two labels. Identity is `source-target`.
#[derive(Debug, Clone, Serialize)]
pub struct Edge {
    id: String,
    source: String,
    target: String,
}

impl Edge {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        let source = source.into();
        let target = target.into();
        Self {
            id: format!("{source}-{target}"),
            source,
            target,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Key used for scoring: whitespace removed, lowercased.
    pub fn normalized_key(&self) -> String {
        normalize_key(&self.id)
    }

    pub fn to_raw(&self) -> RawEdge {
        RawEdge::new(self.source.clone(), self.target.clone())
    }

    pub fn to_pretty_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| self.to_string())
    }
}

impl From<RawEdge> for Edge {
    fn from(raw: RawEdge) -> Self {
        Edge::new(raw.source, raw.target)
    }
}

impl From<&RawEdge> for Edge {
    fn from(raw: &RawEdge) -> Self {
        Edge::new(raw.source.clone(), raw.target.clone())
    }
}

impl PartialEq for Edge {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Edge {}

impl Hash for Edge {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl Keyed for Edge {
    fn key(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {} (ID: {})", self.source, self.target, self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

/// A diagram box identified by its label.
#[derive(Debug, Clone, Serialize)]
pub struct Node {
    id: String,
    position: Position,
    width: u32,
    height: u32,
}

impl Node {
    pub fn new(label: impl Into<String>) -> Self {
        let id = label.into();
        let (width, height) = node_dimensions(&id, MAX_NODE_WIDTH);
        Self {
            id,
            position: Position::default(),
            width,
            height,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn x(&self) -> f32 {
        self.position.x
    }

    pub fn y(&self) -> f32 {
        self.position.y
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn set_position(&mut self, x: f32, y: f32) {
        self.position = Position { x, y };
    }

    pub fn set_dimensions(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
    }

    /// Label split into the lines the box height was computed for.
    pub fn label_lines(&self) -> Vec<String> {
        let per_line = max_chars_per_line(self.width) as usize;
        let chars: Vec<char> = self.id.chars().collect();
        if chars.is_empty() {
            return vec![String::new()];
        }
        chars
            .chunks(per_line)
            .map(|chunk| chunk.iter().collect())
            .collect()
    }

    pub fn to_pretty_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| self.id.clone())
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Node {}

impl Hash for Node {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl Keyed for Node {
    fn key(&self) -> &str {
        &self.id
    }
}

fn max_chars_per_line(width: u32) -> u32 {
    let usable = width.saturating_sub(BASE_PADDING).max(1);
    (usable / CHAR_WIDTH).max(1)
}

/// Box size for a label, in the units the layout renderer expects.
pub fn node_dimensions(label: &str, max_width: u32) -> (u32, u32) {
    let len = label.chars().count() as u32;
    let raw_width = len * CHAR_WIDTH + BASE_PADDING;
    let width = raw_width.min(max_width);
    let total_lines = len.div_ceil(max_chars_per_line(width));
    (width, total_lines * LINE_HEIGHT)
}

pub fn normalize_key(id: &str) -> String {
    id.chars()
        .filter(|ch| !ch.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edge_id_joins_endpoints() {
        let pairs = [("a", "b"), ("Co 1 Limited", "Co 2"), ("", ""), ("x", "x")];
        for (a, b) in pairs {
            let forward = Edge::new(a, b);
            assert_eq!(forward.id(), format!("{a}-{b}"));
            let reverse = Edge::new(b, a);
            if a == b {
                assert_eq!(forward.id(), reverse.id());
            } else {
                assert_ne!(forward.id(), reverse.id());
            }
        }
        assert_eq!(Edge::new("", "").id(), "-");
    }

    #[test]
    fn edges_compare_by_id() {
        assert_eq!(Edge::new("a", "b"), Edge::new("a".to_string(), "b"));
        assert_ne!(Edge::new("a", "b"), Edge::new("A", "b"));
    }

    #[test]
    fn single_char_node_dimensions() {
        let node = Node::new("A");
        assert_eq!((node.width(), node.height()), (28, 20));
        assert_eq!((node.x(), node.y()), (0.0, 0.0));
    }

    #[test]
    fn long_label_is_clamped_and_wrapped() {
        let node = Node::new("abcdefghijklmnopqrst");
        assert_eq!(node.width(), 100);
        assert_eq!(node.height(), 40);
        assert_eq!(node.label_lines(), vec!["abcdefghij", "klmnopqrst"]);
    }

    #[test]
    fn empty_label_has_no_lines() {
        assert_eq!(node_dimensions("", MAX_NODE_WIDTH), (20, 0));
    }

    #[test]
    fn normalize_strips_whitespace_and_case() {
        assert_eq!(normalize_key("A -  B"), "a-b");
        assert_eq!(Edge::new("Main Group TopCo", "GroupCo 3").normalized_key(), "maingrouptopco-groupco3");
    }

    #[test]
    fn pretty_json_shapes() {
        let edge: serde_json::Value = serde_json::from_str(&Edge::new("a", "b").to_pretty_json()).unwrap();
        assert_eq!(edge["id"], "a-b");
        assert_eq!(edge["source"], "a");
        let mut node = Node::new("Fund");
        node.set_position(3.0, 4.5);
        let node: serde_json::Value = serde_json::from_str(&node.to_pretty_json()).unwrap();
        assert_eq!(node["position"]["x"], 3.0);
        assert_eq!(node["width"], 52);
        assert_eq!(node["height"], 20);
    }

    #[test]
    fn display_matches_debug_format() {
        assert_eq!(Edge::new("a", "b").to_string(), "a -> b (ID: a-b)");
    }
}
