use std::path::PathBuf;
use thiserror::Error;

/// Bad caller-supplied input. Fatal, never retried.
#[derive(Debug, Error)]
pub enum InputError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("{path}: JSON file must contain a list of edge objects")]
    NotAnArray { path: PathBuf },
    #[error("failed to decode image {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("invalid config: {0}")]
    Config(String),
}

/// The detection or LLM service could not be reached or refused the request.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} returned HTTP {status}: {body}")]
    Status { url: String, status: u16, body: String },
    #[error("missing credentials: {0}")]
    Auth(String),
}

impl ServiceError {
    pub fn transport(url: &str, source: reqwest::Error) -> Self {
        Self::Transport {
            url: url.to_string(),
            source,
        }
    }
}

#[derive(Debug, Error)]
pub enum DetectionError {
    #[error(transparent)]
    Input(#[from] InputError),
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error("malformed detector response: {0}")]
    Malformed(String),
}

/// The model answered, but not in the shape that was asked for.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("model returned no content")]
    EmptyResponse,
    #[error("could not parse {expected} from model output: {source}")]
    Json {
        expected: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("model output is not a valid diagram: {0}")]
    Diagram(#[from] crate::parser::DecodeError),
    #[error("{0}")]
    Invalid(String),
    #[error("failed to encode region image: {0}")]
    Encode(#[from] image::ImageError),
}

/// Anything that can fail while extracting one region.
#[derive(Debug, Error)]
pub enum RegionError {
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
    #[error(transparent)]
    Service(#[from] ServiceError),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Input(#[from] InputError),
    #[error("region detection failed: {0}")]
    Detection(#[from] DetectionError),
    #[error("region {region} failed: {source}")]
    Region {
        region: String,
        #[source]
        source: RegionError,
    },
}
