//! Minimal client for an OpenAI-compatible chat-completions endpoint.

use crate::config::LlmConfig;
use crate::error::ServiceError;
use base64::Engine;
use image::DynamicImage;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::io::Cursor;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageUrl {
    pub url: String,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: MessageContent,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn user_parts(parts: Vec<ContentPart>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Parts(parts),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    /// Ask the service to constrain output to a JSON object.
    pub json_mode: bool,
}

/// Anything that can turn a chat request into the assistant's text.
/// `Ok(None)` means the service answered without content.
pub trait ChatClient {
    fn complete(&self, request: &ChatRequest) -> Result<Option<String>, ServiceError>;
}

impl<T: ChatClient + ?Sized> ChatClient for &T {
    fn complete(&self, request: &ChatRequest) -> Result<Option<String>, ServiceError> {
        (**self).complete(request)
    }
}

impl<T: ChatClient + ?Sized> ChatClient for Box<T> {
    fn complete(&self, request: &ChatRequest) -> Result<Option<String>, ServiceError> {
        (**self).complete(request)
    }
}

pub fn text_part(text: impl Into<String>) -> ContentPart {
    ContentPart::Text { text: text.into() }
}

/// PNG-encodes an image into a `data:` URL content part.
pub fn image_part(image: &DynamicImage) -> Result<ContentPart, image::ImageError> {
    let mut png = Vec::new();
    image.write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)?;
    let encoded = base64::engine::general_purpose::STANDARD.encode(&png);
    Ok(ContentPart::ImageUrl {
        image_url: ImageUrl {
            url: format!("data:image/png;base64,{encoded}"),
            detail: "high".to_string(),
        },
    })
}

pub struct HttpChatClient {
    client: Client,
    config: LlmConfig,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    content: Option<String>,
}

impl HttpChatClient {
    pub fn new(config: LlmConfig) -> Result<Self, ServiceError> {
        if config.api_key.as_deref().is_none_or(str::is_empty) {
            return Err(ServiceError::Auth(format!(
                "no API key configured (set {})",
                crate::config::ENV_API_KEY
            )));
        }
        let mut builder = Client::builder();
        if let Some(secs) = config.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let client = builder
            .build()
            .map_err(|e| ServiceError::transport(&config.api_url, e))?;
        Ok(Self { client, config })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.api_url.trim_end_matches('/'))
    }

    fn request_body(&self, request: &ChatRequest) -> Value {
        // Built fresh per call; configured params never alias between requests.
        let mut body: Map<String, Value> = self.config.params.clone();
        body.insert("model".to_string(), json!(self.config.model_id));
        body.insert("messages".to_string(), json!(request.messages));
        if let Some(project_id) = &self.config.project_id {
            body.insert("project_id".to_string(), json!(project_id));
        }
        if request.json_mode {
            body.insert("response_format".to_string(), json!({ "type": "json_object" }));
        }
        Value::Object(body)
    }
}

impl ChatClient for HttpChatClient {
    fn complete(&self, request: &ChatRequest) -> Result<Option<String>, ServiceError> {
        let url = self.endpoint();
        tracing::debug!(model = %self.config.model_id, messages = request.messages.len(), "chat completion request");
        let mut http = self.client.post(&url).json(&self.request_body(request));
        if let Some(key) = &self.config.api_key {
            http = http.bearer_auth(key);
        }
        let response = http.send().map_err(|e| ServiceError::transport(&url, e))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(ServiceError::Status {
                url,
                status: status.as_u16(),
                body,
            });
        }
        let parsed: CompletionResponse = response
            .json()
            .map_err(|e| ServiceError::transport(&url, e))?;
        Ok(parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content))
    }
}
