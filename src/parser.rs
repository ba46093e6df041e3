//! Decoder for the flowchart subset the extraction prompts ask for:
//! a `graph TD` header, `Id["Display Text"]` declarations and `A --> B`
//! relationships, with no subgraphs.

use crate::ir::{Direction, RawEdge};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use thiserror::Error;

static HEADER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(flowchart|graph)(?:\s+(\w+))?\s*$").unwrap());
static OTHER_HEADER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(sequenceDiagram|classDiagram|stateDiagram(-v2)?|erDiagram|gantt|pie|mindmap|journey|gitGraph|timeline)\b").unwrap()
});
static SUBGRAPH_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^subgraph\b\s*(.*)$").unwrap());
static FENCE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^\s*(```|~~~)[A-Za-z0-9_-]*\s*\n(.*?)\n?\s*(```|~~~)\s*$").unwrap());
// A leading `o`/`x` marker only counts when whitespace precedes it, so ids
// such as `HoldCo-->OpCo` keep their last letter.
const ARROW: &str = r"<[-.=ox]*[-=]+[-.=ox]*>|<[-.=ox]*[-=]+|(?:\s[ox])?[-.=]*[-=]+>|(?:\s[ox])?[-.=]*[-=]+";

static PIPE_LABEL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"^(?P<left>.+?)\s*(?P<arrow>{ARROW})\|(?P<label>.+?)\|\s*(?P<right>.+)$"
    ))
    .unwrap()
});
static LABEL_ARROW_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?P<left>.+?)\s*(?P<start><)?(?P<dash1>(?:\s[ox])?[-.=]*[-=]+[-.=ox]*)\s+(?P<label>[^<>=]+?)\s+(?P<dash2>[-.=ox]*[-=]+[-.=ox]*)(?P<end>>)?\s*(?P<right>.+)$",
    )
    .unwrap()
});
static ARROW_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"^(?P<left>.+?)\s*(?P<arrow>{ARROW})\s*(?P<right>.+)$"
    ))
    .unwrap()
});
static ARROW_TOKEN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(ARROW).unwrap());

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("line {line}: subgraphs are not supported ({text})")]
    Subgraph { line: usize, text: String },
    #[error("unsupported diagram type: {0}")]
    UnsupportedKind(String),
    #[error("diagram contains no nodes or edges")]
    Empty,
}

#[derive(Debug, Clone, Default)]
pub struct DecodedDiagram {
    pub direction: Direction,
    /// Declared nodes as (id, display text), in order of first appearance.
    pub nodes: Vec<(String, String)>,
    /// Relationships between display texts.
    pub edges: Vec<RawEdge>,
}

impl DecodedDiagram {
    pub fn labels(&self) -> Vec<String> {
        self.nodes.iter().map(|(_, label)| label.clone()).collect()
    }
}

#[derive(Default)]
struct DecodeState {
    direction: Direction,
    order: Vec<String>,
    labels: HashMap<String, String>,
    edges: Vec<(String, String)>,
}

impl DecodeState {
    fn ensure_node(&mut self, id: &str, label: Option<String>) {
        if !self.labels.contains_key(id) {
            self.order.push(id.to_string());
            self.labels.insert(id.to_string(), id.to_string());
        }
        if let Some(label) = label {
            self.labels.insert(id.to_string(), label);
        }
    }

    fn label_of(&self, id: &str) -> String {
        self.labels.get(id).cloned().unwrap_or_else(|| id.to_string())
    }

    fn finish(self) -> DecodedDiagram {
        let edges = self
            .edges
            .iter()
            .map(|(from, to)| RawEdge::new(self.label_of(from), self.label_of(to)))
            .collect();
        let nodes = self
            .order
            .iter()
            .map(|id| (id.clone(), self.label_of(id)))
            .collect();
        DecodedDiagram {
            direction: self.direction,
            nodes,
            edges,
        }
    }
}

/// Removes a surrounding Markdown code fence, if any.
pub fn strip_code_fence(input: &str) -> &str {
    match FENCE_RE.captures(input).and_then(|caps| caps.get(2)) {
        Some(body) => body.as_str(),
        None => input.trim(),
    }
}

pub fn decode_flowchart(input: &str) -> Result<DecodedDiagram, DecodeError> {
    let mut state = DecodeState::default();
    let body = strip_code_fence(input);

    for (idx, raw_line) in body.lines().enumerate() {
        let line_no = idx + 1;
        let trimmed = raw_line.trim();
        if trimmed.is_empty() || trimmed.starts_with("%%") {
            continue;
        }
        let without_comment = strip_trailing_comment(trimmed);
        for line in split_statements(&without_comment) {
            if let Some(caps) = HEADER_RE.captures(&line) {
                if let Some(dir) = caps.get(2).and_then(|m| Direction::from_token(m.as_str())) {
                    state.direction = dir;
                }
                continue;
            }

            if let Some(caps) = OTHER_HEADER_RE.captures(&line) {
                return Err(DecodeError::UnsupportedKind(caps[1].to_string()));
            }

            if SUBGRAPH_RE.is_match(&line) || line == "end" {
                return Err(DecodeError::Subgraph {
                    line: line_no,
                    text: line,
                });
            }

            if is_ignored_statement(&line) {
                continue;
            }

            if let Some(chain) = split_edge_chain(&line) {
                let mut added = false;
                for edge_line in chain {
                    added |= add_edge(&edge_line, &mut state);
                }
                if added {
                    continue;
                }
            }

            if add_edge(&line, &mut state) {
                continue;
            }

            if let Some((id, label)) = parse_node_only(&line) {
                state.ensure_node(&id, label);
            }
        }
    }

    if state.direction != Direction::TopDown {
        tracing::warn!(
            direction = state.direction.as_token(),
            "diagram is not top-down; decoding anyway"
        );
    }

    if state.order.is_empty() && state.edges.is_empty() {
        return Err(DecodeError::Empty);
    }

    Ok(state.finish())
}

fn is_ignored_statement(line: &str) -> bool {
    line.starts_with("direction ")
        || line.starts_with("classDef")
        || line.starts_with("class ")
        || line.starts_with("style ")
        || line.starts_with("linkStyle")
        || line.starts_with("click ")
        || line.starts_with("accTitle")
        || line.starts_with("accDescr")
        || line.starts_with("title ")
}

fn add_edge(line: &str, state: &mut DecodeState) -> bool {
    let Some((left, right, reversed)) = parse_edge_line(line) else {
        return false;
    };

    let mut source_ids = Vec::new();
    for part in split_fanout(&left) {
        let (id, label) = parse_node_token(part);
        if id.is_empty() {
            continue;
        }
        state.ensure_node(&id, label);
        source_ids.push(id);
    }

    let mut target_ids = Vec::new();
    for part in split_fanout(&right) {
        let (id, label) = parse_node_token(part);
        if id.is_empty() {
            continue;
        }
        state.ensure_node(&id, label);
        target_ids.push(id);
    }

    if source_ids.is_empty() || target_ids.is_empty() {
        return false;
    }

    for from in &source_ids {
        for to in &target_ids {
            if reversed {
                state.edges.push((to.clone(), from.clone()));
            } else {
                state.edges.push((from.clone(), to.clone()));
            }
        }
    }
    true
}

/// Splits `A & B` on the ampersands that sit outside labels.
fn split_fanout(side: &str) -> Vec<&str> {
    let masked = mask_bracket_content(side);
    let mut parts = Vec::new();
    let mut start = 0;
    for (pos, _) in masked.match_indices('&') {
        parts.push(side[start..pos].trim());
        start = pos + 1;
    }
    parts.push(side[start..].trim());
    parts.retain(|part| !part.is_empty());
    parts
}

fn split_statements(line: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0i32;
    let mut quote: Option<char> = None;

    for ch in line.chars() {
        if let Some(q) = quote {
            if ch == q {
                quote = None;
            }
            current.push(ch);
            continue;
        }

        match ch {
            '"' | '\'' => {
                quote = Some(ch);
                current.push(ch);
            }
            '[' | '(' | '{' => {
                depth += 1;
                current.push(ch);
            }
            ']' | ')' | '}' => {
                depth = (depth - 1).max(0);
                current.push(ch);
            }
            ';' if depth == 0 => {
                let trimmed = current.trim();
                if !trimmed.is_empty() {
                    parts.push(trimmed.to_string());
                }
                current.clear();
            }
            _ => current.push(ch),
        }
    }

    let trimmed = current.trim();
    if !trimmed.is_empty() {
        parts.push(trimmed.to_string());
    }
    parts
}

fn strip_trailing_comment(line: &str) -> String {
    let mut quote: Option<char> = None;
    let mut chars = line.chars().peekable();
    let mut out = String::new();
    while let Some(ch) = chars.next() {
        if let Some(q) = quote {
            if ch == q {
                quote = None;
            }
            out.push(ch);
            continue;
        }
        if ch == '"' || ch == '\'' {
            quote = Some(ch);
            out.push(ch);
            continue;
        }
        if ch == '%' && chars.peek() == Some(&'%') {
            break;
        }
        out.push(ch);
    }
    out.trim().to_string()
}

/// Blanks out bracketed and quoted text so arrows inside labels are not
/// mistaken for edges. Byte offsets are preserved.
fn mask_bracket_content(line: &str) -> String {
    let mut result = String::with_capacity(line.len());
    let mut depth = 0i32;
    let mut quote: Option<char> = None;

    for ch in line.chars() {
        let inside = depth > 0 || quote.is_some();
        match ch {
            '"' | '\'' if quote == Some(ch) => {
                quote = None;
                push_masked(&mut result, ch, depth > 0);
            }
            '"' | '\'' if quote.is_none() => {
                quote = Some(ch);
                push_masked(&mut result, ch, depth > 0);
            }
            '[' | '(' | '{' if quote.is_none() => {
                depth += 1;
                push_masked(&mut result, ch, inside);
            }
            ']' | ')' | '}' if quote.is_none() && depth > 0 => {
                depth -= 1;
                push_masked(&mut result, ch, depth > 0);
            }
            _ => push_masked(&mut result, ch, inside),
        }
    }
    result
}

fn push_masked(out: &mut String, ch: char, masked: bool) {
    if masked {
        out.extend(std::iter::repeat_n(' ', ch.len_utf8()));
    } else {
        out.push(ch);
    }
}

fn split_edge_chain(line: &str) -> Option<Vec<String>> {
    let masked = mask_bracket_content(line);
    if LABEL_ARROW_RE.is_match(&masked) {
        return None;
    }

    let matches: Vec<regex::Match> = ARROW_TOKEN_RE.find_iter(&masked).collect();
    if matches.len() < 2 {
        return None;
    }

    let mut nodes: Vec<String> = Vec::with_capacity(matches.len() + 1);
    let mut arrows: Vec<String> = Vec::with_capacity(matches.len());
    let mut last_idx = 0usize;

    for m in matches {
        nodes.push(line[last_idx..m.start()].trim().to_string());
        arrows.push(line[m.start()..m.end()].trim().to_string());
        last_idx = m.end();
    }
    nodes.push(line[last_idx..].trim().to_string());

    // Pipe labels belong to the preceding arrow.
    for i in 1..nodes.len() {
        let trimmed = nodes[i].trim_start();
        if let Some(stripped) = trimmed.strip_prefix('|')
            && let Some(end_idx) = stripped.find('|')
        {
            let label_len = end_idx + 2;
            let label = trimmed[..label_len].to_string();
            let rest = trimmed[label_len..].trim_start().to_string();
            arrows[i - 1].push_str(&label);
            nodes[i] = rest;
        }
    }

    if nodes.iter().any(|node| node.is_empty()) {
        return None;
    }

    Some(
        (0..arrows.len())
            .map(|i| format!("{} {} {}", nodes[i], arrows[i], nodes[i + 1]))
            .collect(),
    )
}

/// Splits an edge statement into (left, right, reversed).
fn parse_edge_line(line: &str) -> Option<(String, String, bool)> {
    let masked = mask_bracket_content(line);
    let extract = |m: regex::Match| -> &str { line[m.start()..m.end()].trim() };

    if let Some(caps) = PIPE_LABEL_RE.captures(&masked) {
        let left = extract(caps.name("left")?);
        let right = extract(caps.name("right")?);
        let arrow = extract(caps.name("arrow")?);
        if !left.is_empty() && !right.is_empty() {
            return Some((left.to_string(), right.to_string(), is_reversed(arrow)));
        }
    }

    if let Some(caps) = LABEL_ARROW_RE.captures(&masked) {
        let left = extract(caps.name("left")?);
        let right = extract(caps.name("right")?);
        let start = caps.name("start").is_some();
        let end = caps.name("end").is_some();
        if !left.is_empty() && !right.is_empty() {
            return Some((left.to_string(), right.to_string(), start && !end));
        }
    }

    let caps = ARROW_RE.captures(&masked)?;
    let left = extract(caps.name("left")?);
    let arrow = extract(caps.name("arrow")?);
    let right = extract(caps.name("right")?);
    if left.is_empty() || right.is_empty() || arrow.is_empty() {
        return None;
    }

    let right_token = match right.strip_prefix('|') {
        Some(stripped) => match stripped.find('|') {
            Some(end) => stripped[end + 1..].trim(),
            None => right,
        },
        None => right,
    };
    if right_token.is_empty() {
        return None;
    }

    Some((left.to_string(), right_token.to_string(), is_reversed(arrow)))
}

fn is_reversed(arrow: &str) -> bool {
    arrow.starts_with('<') && !arrow.ends_with('>')
}

fn parse_node_only(line: &str) -> Option<(String, Option<String>)> {
    let masked = mask_bracket_content(line);
    if masked.contains("--") || masked.contains("==") {
        return None;
    }
    let (id, label) = parse_node_token(line);
    if id.is_empty() { None } else { Some((id, label)) }
}

fn parse_node_token(token: &str) -> (String, Option<String>) {
    let base = token.split(":::").next().unwrap_or("").trim();
    if let Some((id, label)) = split_id_label(base) {
        return (id.to_string(), Some(label));
    }
    let id = base.split_whitespace().next().unwrap_or("").to_string();
    (id, None)
}

fn split_id_label(token: &str) -> Option<(&str, String)> {
    for (open, close) in [('[', ']'), ('(', ')'), ('{', '}')] {
        if let Some(start) = token.find(open)
            && token.ends_with(close)
        {
            let id = token[..start].trim();
            if id.is_empty() {
                continue;
            }
            return Some((id, unwrap_label(&token[start..])));
        }
    }
    if let Some(pos) = token.find('>')
        && token.ends_with(']')
    {
        let id = token[..pos].trim();
        if !id.is_empty() {
            return Some((id, unwrap_label(&token[pos + 1..token.len() - 1])));
        }
    }
    None
}

/// Peels every shape delimiter (`[`, `((`, `[/`, `{{`...) and quotes off a label.
fn unwrap_label(raw: &str) -> String {
    let mut inner = raw.trim();
    loop {
        let trimmed = inner
            .strip_prefix(['[', '(', '{'])
            .and_then(|rest| rest.strip_suffix([']', ')', '}']))
            .or_else(|| {
                inner
                    .strip_prefix(['/', '\\'])
                    .and_then(|rest| rest.strip_suffix(['/', '\\']))
            });
        match trimmed {
            Some(next) => inner = next.trim(),
            None => break,
        }
    }
    strip_quotes(inner)
}

fn strip_quotes(input: &str) -> String {
    let trimmed = input.trim();
    if trimmed.len() >= 2
        && ((trimmed.starts_with('"') && trimmed.ends_with('"'))
            || (trimmed.starts_with('\'') && trimmed.ends_with('\'')))
    {
        trimmed[1..trimmed.len() - 1].trim().to_string()
    } else {
        trimmed.to_string()
    }
}
