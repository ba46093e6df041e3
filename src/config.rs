use crate::error::InputError;
use crate::graph::{DedupMode, DEFAULT_FUZZY_THRESHOLD};
use crate::ir::Direction;
use crate::theme::Theme;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const ENV_API_KEY: &str = "OWNERGRAPH_API_KEY";
pub const ENV_PROJECT_ID: &str = "OWNERGRAPH_PROJECT_ID";
pub const ENV_API_URL: &str = "OWNERGRAPH_API_URL";
pub const ENV_MODEL_ID: &str = "OWNERGRAPH_MODEL_ID";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub api_url: String,
    pub model_id: String,
    pub api_key: Option<String>,
    pub project_id: Option<String>,
    pub timeout_secs: Option<u64>,
    /// Extra request fields copied into every completion call.
    pub params: serde_json::Map<String, serde_json::Value>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:4000/v1".to_string(),
            model_id: "gpt-4o".to_string(),
            api_key: None,
            project_id: None,
            timeout_secs: None,
            params: serde_json::Map::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Endpoint of the region-detection service. `None` keeps the whole image
    /// as a single region.
    pub endpoint: Option<String>,
    pub min_confidence: f32,
    pub timeout_secs: Option<u64>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            min_confidence: 0.25,
            timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionMode {
    /// Ask for node labels, then for edges as JSON.
    #[default]
    Direct,
    /// Ask for a Mermaid diagram and decode it into edges.
    Mermaid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// The first failing region aborts the image.
    #[default]
    Abort,
    /// Failing regions are logged and left out of the graph.
    Skip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagramDecoder {
    /// Parse the Mermaid text locally.
    #[default]
    Local,
    /// Send the Mermaid text back to the model for conversion.
    Llm,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub mode: ExtractionMode,
    pub failure_policy: FailurePolicy,
    pub decoder: DiagramDecoder,
    /// Pass detected node labels to the edge prompt.
    pub use_known_nodes: bool,
    /// Ask for a `{reasoning, answer}` JSON object instead of bare text when
    /// requesting Mermaid output.
    pub structured_diagram: bool,
    pub fuzzy_dedup: bool,
    pub fuzzy_threshold: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            mode: ExtractionMode::Direct,
            failure_policy: FailurePolicy::Abort,
            decoder: DiagramDecoder::Local,
            use_known_nodes: true,
            structured_diagram: true,
            fuzzy_dedup: false,
            fuzzy_threshold: DEFAULT_FUZZY_THRESHOLD,
        }
    }
}

impl PipelineConfig {
    pub fn dedup_mode(&self) -> DedupMode {
        if self.fuzzy_dedup {
            DedupMode::Fuzzy {
                threshold: self.fuzzy_threshold,
            }
        } else {
            DedupMode::Exact
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoutConfig {
    pub direction: Direction,
    pub node_spacing: f32,
    pub rank_spacing: f32,
    pub margin: f32,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            direction: Direction::TopDown,
            node_spacing: 50.0,
            rank_spacing: 50.0,
            margin: 8.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderConfig {
    pub width: f32,
    pub height: f32,
    pub background: String,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            width: 1200.0,
            height: 800.0,
            background: "#FFFFFF".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub llm: LlmConfig,
    pub detector: DetectorConfig,
    pub pipeline: PipelineConfig,
    pub layout: LayoutConfig,
    pub render: RenderConfig,
    pub theme: Theme,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigFile {
    theme: Option<String>,
    llm: Option<LlmConfigFile>,
    detector: Option<DetectorConfigFile>,
    pipeline: Option<PipelineConfigFile>,
    layout: Option<LayoutConfigFile>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LlmConfigFile {
    api_url: Option<String>,
    model_id: Option<String>,
    api_key: Option<String>,
    project_id: Option<String>,
    timeout_secs: Option<u64>,
    params: Option<serde_json::Map<String, serde_json::Value>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DetectorConfigFile {
    endpoint: Option<String>,
    min_confidence: Option<f32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PipelineConfigFile {
    mode: Option<ExtractionMode>,
    failure_policy: Option<FailurePolicy>,
    decoder: Option<DiagramDecoder>,
    use_known_nodes: Option<bool>,
    structured_diagram: Option<bool>,
    fuzzy_dedup: Option<bool>,
    fuzzy_threshold: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LayoutConfigFile {
    direction: Option<String>,
    node_spacing: Option<f32>,
    rank_spacing: Option<f32>,
    margin: Option<f32>,
}

/// Reads the config file (JSON, or JSON5 as a fallback) and applies
/// environment overrides. Without a path the defaults are used.
pub fn load_config(path: Option<&Path>) -> Result<Config, InputError> {
    let mut config = Config::default();
    if let Some(path) = path {
        let contents = std::fs::read_to_string(path).map_err(|source| InputError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let parsed = parse_config_file(&contents)?;
        apply_file(&mut config, parsed)?;
        tracing::debug!(path = %path.display(), "loaded config file");
    }
    apply_env(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

fn parse_config_file(contents: &str) -> Result<ConfigFile, InputError> {
    match serde_json::from_str::<ConfigFile>(contents) {
        Ok(parsed) => Ok(parsed),
        Err(json_err) => json5::from_str::<ConfigFile>(contents)
            .map_err(|json5_err| InputError::Config(format!("{json_err}; as JSON5: {json5_err}"))),
    }
}

fn apply_file(config: &mut Config, parsed: ConfigFile) -> Result<(), InputError> {
    if let Some(theme_name) = parsed.theme.as_deref() {
        config.theme = match theme_name {
            "modern" => Theme::modern(),
            "base" | "default" | "mermaid" => Theme::mermaid_default(),
            other => return Err(InputError::Config(format!("unknown theme `{other}`"))),
        };
        config.render.background = config.theme.background.clone();
    }

    if let Some(llm) = parsed.llm {
        if let Some(v) = llm.api_url {
            config.llm.api_url = v;
        }
        if let Some(v) = llm.model_id {
            config.llm.model_id = v;
        }
        if llm.api_key.is_some() {
            config.llm.api_key = llm.api_key;
        }
        if llm.project_id.is_some() {
            config.llm.project_id = llm.project_id;
        }
        if llm.timeout_secs.is_some() {
            config.llm.timeout_secs = llm.timeout_secs;
        }
        if let Some(v) = llm.params {
            config.llm.params = v;
        }
    }

    if let Some(detector) = parsed.detector {
        if detector.endpoint.is_some() {
            config.detector.endpoint = detector.endpoint;
        }
        if let Some(v) = detector.min_confidence {
            config.detector.min_confidence = v;
        }
        if detector.timeout_secs.is_some() {
            config.detector.timeout_secs = detector.timeout_secs;
        }
    }

    if let Some(pipeline) = parsed.pipeline {
        if let Some(v) = pipeline.mode {
            config.pipeline.mode = v;
        }
        if let Some(v) = pipeline.failure_policy {
            config.pipeline.failure_policy = v;
        }
        if let Some(v) = pipeline.decoder {
            config.pipeline.decoder = v;
        }
        if let Some(v) = pipeline.use_known_nodes {
            config.pipeline.use_known_nodes = v;
        }
        if let Some(v) = pipeline.structured_diagram {
            config.pipeline.structured_diagram = v;
        }
        if let Some(v) = pipeline.fuzzy_dedup {
            config.pipeline.fuzzy_dedup = v;
        }
        if let Some(v) = pipeline.fuzzy_threshold {
            config.pipeline.fuzzy_threshold = v;
        }
    }

    if let Some(layout) = parsed.layout {
        if let Some(token) = layout.direction {
            config.layout.direction = Direction::from_token(&token)
                .ok_or_else(|| InputError::Config(format!("unknown direction `{token}`")))?;
        }
        if let Some(v) = layout.node_spacing {
            config.layout.node_spacing = v;
        }
        if let Some(v) = layout.rank_spacing {
            config.layout.rank_spacing = v;
        }
        if let Some(v) = layout.margin {
            config.layout.margin = v;
        }
    }

    Ok(())
}

fn apply_env(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup(ENV_API_KEY) {
        config.llm.api_key = Some(v);
    }
    if let Some(v) = lookup(ENV_PROJECT_ID) {
        config.llm.project_id = Some(v);
    }
    if let Some(v) = lookup(ENV_API_URL) {
        config.llm.api_url = v;
    }
    if let Some(v) = lookup(ENV_MODEL_ID) {
        config.llm.model_id = v;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_json_config() {
        let parsed = parse_config_file(
            r#"{
                "theme": "modern",
                "llm": { "modelId": "watsonx/llama-3-2-90b-vision-instruct", "params": { "temperature": 0 } },
                "pipeline": { "mode": "mermaid", "failurePolicy": "skip" },
                "layout": { "direction": "LR" }
            }"#,
        )
        .unwrap();
        let mut config = Config::default();
        apply_file(&mut config, parsed).unwrap();
        assert_eq!(config.llm.model_id, "watsonx/llama-3-2-90b-vision-instruct");
        assert_eq!(config.llm.params["temperature"], 0);
        assert_eq!(config.pipeline.mode, ExtractionMode::Mermaid);
        assert_eq!(config.pipeline.failure_policy, FailurePolicy::Skip);
        assert_eq!(config.layout.direction, Direction::LeftRight);
        assert_eq!(config.theme.font_family, Theme::modern().font_family);
    }

    #[test]
    fn falls_back_to_json5() {
        let parsed = parse_config_file("{ detector: { minConfidence: 0.5, }, // trailing\n }").unwrap();
        let mut config = Config::default();
        apply_file(&mut config, parsed).unwrap();
        assert_eq!(config.detector.min_confidence, 0.5);
        assert!(config.detector.endpoint.is_none());
    }

    #[test]
    fn rejects_unknown_direction() {
        let parsed = parse_config_file(r#"{ "layout": { "direction": "sideways" } }"#).unwrap();
        let err = apply_file(&mut Config::default(), parsed).unwrap_err();
        assert!(err.to_string().contains("sideways"));
    }

    #[test]
    fn env_overrides_credentials() {
        let mut config = Config::default();
        apply_env(&mut config, |key| match key {
            ENV_API_KEY => Some("secret".to_string()),
            ENV_MODEL_ID => Some("other-model".to_string()),
            _ => None,
        });
        assert_eq!(config.llm.api_key.as_deref(), Some("secret"));
        assert_eq!(config.llm.model_id, "other-model");
        assert!(config.llm.project_id.is_none());
    }

    #[test]
    fn defaults_are_conservative() {
        let config = Config::default();
        assert_eq!(config.pipeline.failure_policy, FailurePolicy::Abort);
        assert_eq!(config.pipeline.dedup_mode(), DedupMode::Exact);
        assert_eq!(config.pipeline.decoder, DiagramDecoder::Local);
    }
}
