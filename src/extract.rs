use crate::config::DiagramDecoder;
use crate::error::{ExtractionError, RegionError};
use crate::ir::RawEdge;
use crate::llm::{ChatClient, ChatMessage, ChatRequest, image_part, text_part};
use crate::parser::{decode_flowchart, strip_code_fence};
use crate::prompt;
use image::DynamicImage;
use serde::Deserialize;
use serde::de::DeserializeOwned;

/// Reads nodes and edges out of one region image.
pub trait StructuredExtractor {
    fn extract_nodes(&self, image: &DynamicImage) -> Result<Vec<String>, RegionError>;

    fn extract_edges(
        &self,
        image: &DynamicImage,
        known_nodes: &[String],
    ) -> Result<Vec<RawEdge>, RegionError>;

    fn extract_edges_as_diagram_text(
        &self,
        image: &DynamicImage,
        known_nodes: &[String],
    ) -> Result<String, RegionError>;

    fn decode_diagram_text(&self, text: &str) -> Result<Vec<RawEdge>, RegionError> {
        let decoded = decode_flowchart(text).map_err(ExtractionError::from)?;
        Ok(decoded.edges)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    NodeList,
    EdgeList,
    DiagramText,
}

impl ResponseKind {
    fn expected(self) -> &'static str {
        match self {
            Self::NodeList => "a node list",
            Self::EdgeList => "an edge list",
            Self::DiagramText => "a diagram",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NodeListResponse {
    #[serde(default)]
    pub reasoning: String,
    pub answer: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EdgeListResponse {
    #[serde(default)]
    pub reasoning: String,
    pub answer: Vec<RawEdge>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DiagramTextResponse {
    #[serde(default)]
    pub reasoning: String,
    pub answer: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExtractorResponse {
    NodeList(NodeListResponse),
    EdgeList(EdgeListResponse),
    DiagramText(DiagramTextResponse),
}

/// Parses model output into the response shape selected by `kind`.
///
/// Accepts the `{reasoning, answer}` object, optionally inside a code fence
/// or surrounded by prose. Node and edge lists may also come back as a bare
/// JSON array.
pub fn parse_response(kind: ResponseKind, text: &str) -> Result<ExtractorResponse, ExtractionError> {
    Ok(match kind {
        ResponseKind::NodeList => ExtractorResponse::NodeList(parse_node_list(text)?),
        ResponseKind::EdgeList => ExtractorResponse::EdgeList(parse_edge_list(text)?),
        ResponseKind::DiagramText => ExtractorResponse::DiagramText(parse_diagram_text(text)?),
    })
}

pub fn parse_node_list(text: &str) -> Result<NodeListResponse, ExtractionError> {
    let parsed: NodeListResponse = parse_answer_object(ResponseKind::NodeList, text)?;
    Ok(NodeListResponse {
        answer: parsed
            .answer
            .into_iter()
            .map(|label| label.trim().to_string())
            .filter(|label| !label.is_empty())
            .collect(),
        ..parsed
    })
}

pub fn parse_edge_list(text: &str) -> Result<EdgeListResponse, ExtractionError> {
    let parsed: EdgeListResponse = parse_answer_object(ResponseKind::EdgeList, text)?;
    Ok(EdgeListResponse {
        answer: parsed
            .answer
            .into_iter()
            .map(|edge| RawEdge::new(edge.source.trim(), edge.target.trim()))
            .collect(),
        ..parsed
    })
}

pub fn parse_diagram_text(text: &str) -> Result<DiagramTextResponse, ExtractionError> {
    let parsed: DiagramTextResponse = parse_answer_object(ResponseKind::DiagramText, text)?;
    Ok(DiagramTextResponse {
        answer: strip_code_fence(&parsed.answer).to_string(),
        ..parsed
    })
}

fn parse_answer_object<T: DeserializeOwned>(
    kind: ResponseKind,
    text: &str,
) -> Result<T, ExtractionError> {
    let body = strip_code_fence(text);
    if body.is_empty() {
        return Err(ExtractionError::EmptyResponse);
    }
    let first_err = match serde_json::from_str::<T>(body) {
        Ok(value) => return Ok(value),
        Err(err) => err,
    };
    if kind != ResponseKind::DiagramText && body.starts_with('[') {
        let wrapped = format!("{{\"answer\": {body}}}");
        if let Ok(value) = serde_json::from_str::<T>(&wrapped) {
            return Ok(value);
        }
    }
    if let (Some(start), Some(end)) = (body.find('{'), body.rfind('}'))
        && start < end
        && let Ok(value) = serde_json::from_str::<T>(&body[start..=end])
    {
        return Ok(value);
    }
    Err(ExtractionError::Json {
        expected: kind.expected(),
        source: first_err,
    })
}

/// Extractor backed by a chat-completions model.
pub struct LlmExtractor<C> {
    client: C,
    decoder: DiagramDecoder,
    structured_diagram: bool,
}

impl<C: ChatClient> LlmExtractor<C> {
    pub fn new(client: C) -> Self {
        Self {
            client,
            decoder: DiagramDecoder::Local,
            structured_diagram: true,
        }
    }

    pub fn with_decoder(mut self, decoder: DiagramDecoder) -> Self {
        self.decoder = decoder;
        self
    }

    pub fn with_structured_diagram(mut self, structured: bool) -> Self {
        self.structured_diagram = structured;
        self
    }

    fn ask(&self, request: ChatRequest) -> Result<String, RegionError> {
        self.client
            .complete(&request)
            .map_err(RegionError::from)?
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| ExtractionError::EmptyResponse.into())
    }

    fn ask_about_image(
        &self,
        prompt: String,
        image: &DynamicImage,
        json_mode: bool,
    ) -> Result<String, RegionError> {
        let image = image_part(image).map_err(ExtractionError::from)?;
        self.ask(ChatRequest {
            messages: vec![ChatMessage::user_parts(vec![text_part(prompt), image])],
            json_mode,
        })
    }
}

impl<C: ChatClient> StructuredExtractor for LlmExtractor<C> {
    fn extract_nodes(&self, image: &DynamicImage) -> Result<Vec<String>, RegionError> {
        let text = self.ask_about_image(prompt::node_prompt(), image, true)?;
        let response = parse_node_list(&text)?;
        tracing::debug!(reasoning = %response.reasoning, nodes = response.answer.len(), "nodes extracted");
        Ok(response.answer)
    }

    fn extract_edges(
        &self,
        image: &DynamicImage,
        known_nodes: &[String],
    ) -> Result<Vec<RawEdge>, RegionError> {
        let text = self.ask_about_image(prompt::edge_prompt(known_nodes), image, true)?;
        let response = parse_edge_list(&text)?;
        tracing::debug!(reasoning = %response.reasoning, edges = response.answer.len(), "edges extracted");
        Ok(response.answer)
    }

    fn extract_edges_as_diagram_text(
        &self,
        image: &DynamicImage,
        known_nodes: &[String],
    ) -> Result<String, RegionError> {
        let prompt = prompt::diagram_prompt(known_nodes, self.structured_diagram);
        let text = self.ask_about_image(prompt, image, self.structured_diagram)?;
        if !self.structured_diagram {
            return Ok(strip_code_fence(&text).to_string());
        }
        Ok(parse_diagram_text(&text)?.answer)
    }

    fn decode_diagram_text(&self, text: &str) -> Result<Vec<RawEdge>, RegionError> {
        let decoded = decode_flowchart(text).map_err(ExtractionError::from)?;
        if self.decoder == DiagramDecoder::Local {
            return Ok(decoded.edges);
        }
        let response = self.ask(ChatRequest {
            messages: vec![
                ChatMessage::system(prompt::decode_system_prompt()),
                ChatMessage::user(prompt::decode_user_prompt(text)),
            ],
            json_mode: true,
        })?;
        Ok(parse_edge_list(&response)?.answer)
    }
}
