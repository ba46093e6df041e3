//! Comparison of a predicted edge set against ground truth.

use crate::error::{ExtractionError, InputError, RegionError};
use crate::ir::{Edge, RawEdge};
use crate::llm::{ChatClient, ChatMessage, ChatRequest};
use crate::parser::strip_code_fence;
use crate::prompt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreReport {
    pub true_positives: Vec<String>,
    pub false_positives: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub false_negatives: Vec<String>,
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
}

pub struct EdgeScorer {
    true_edges: Vec<Edge>,
    predicted_edges: Vec<Edge>,
}

impl EdgeScorer {
    pub fn new(true_edges: Vec<Edge>, predicted_edges: Vec<Edge>) -> Self {
        Self {
            true_edges,
            predicted_edges,
        }
    }

    pub fn from_json(true_edges: &[RawEdge], predicted_edges: Vec<Edge>) -> Self {
        Self::new(true_edges.iter().map(Edge::from).collect(), predicted_edges)
    }

    /// Loads ground truth from a JSON file holding an array of
    /// `{source, target}` objects.
    pub fn from_json_file(path: &Path, predicted_edges: Vec<Edge>) -> Result<Self, InputError> {
        let truth = load_edges(path)?;
        Ok(Self::from_json(&truth, predicted_edges))
    }

    pub fn true_edges(&self) -> &[Edge] {
        &self.true_edges
    }

    pub fn predicted_edges(&self) -> &[Edge] {
        &self.predicted_edges
    }

    pub fn validate(&self) -> ScoreReport {
        let truth = key_set(&self.true_edges);
        let predicted = key_set(&self.predicted_edges);

        let true_positives: Vec<String> = truth.intersection(&predicted).cloned().collect();
        let false_positives: Vec<String> = predicted.difference(&truth).cloned().collect();
        let false_negatives: Vec<String> = truth.difference(&predicted).cloned().collect();

        let hits = true_positives.len() as f64;
        let precision = if predicted.is_empty() {
            0.0
        } else {
            hits / predicted.len() as f64
        };
        let recall = if truth.is_empty() {
            0.0
        } else {
            hits / truth.len() as f64
        };
        let f1_score = if precision + recall == 0.0 {
            0.0
        } else {
            2.0 * precision * recall / (precision + recall)
        };

        ScoreReport {
            true_positives,
            false_positives,
            false_negatives,
            precision,
            recall,
            f1_score,
        }
    }

    pub fn true_positive_edges(&self) -> Vec<Edge> {
        let hits = self.matched_keys();
        self.predicted_edges
            .iter()
            .filter(|edge| hits.contains(&edge.normalized_key()))
            .cloned()
            .collect()
    }

    pub fn false_positive_edges(&self) -> Vec<Edge> {
        let hits = self.matched_keys();
        self.predicted_edges
            .iter()
            .filter(|edge| !hits.contains(&edge.normalized_key()))
            .cloned()
            .collect()
    }

    pub fn false_negative_edges(&self) -> Vec<Edge> {
        let hits = self.matched_keys();
        self.true_edges
            .iter()
            .filter(|edge| !hits.contains(&edge.normalized_key()))
            .cloned()
            .collect()
    }

    fn matched_keys(&self) -> BTreeSet<String> {
        let truth = key_set(&self.true_edges);
        key_set(&self.predicted_edges)
            .into_iter()
            .filter(|key| truth.contains(key))
            .collect()
    }
}

fn key_set(edges: &[Edge]) -> BTreeSet<String> {
    edges.iter().map(Edge::normalized_key).collect()
}

/// Reads a JSON array of `{source, target}` objects.
pub fn load_edges(path: &Path) -> Result<Vec<RawEdge>, InputError> {
    let contents = std::fs::read_to_string(path).map_err(|source| InputError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let value: serde_json::Value =
        serde_json::from_str(&contents).map_err(|source| InputError::Json {
            path: path.to_path_buf(),
            source,
        })?;
    if !value.is_array() {
        return Err(InputError::NotAnArray {
            path: path.to_path_buf(),
        });
    }
    serde_json::from_value(value).map_err(|source| InputError::Json {
        path: path.to_path_buf(),
        source,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgeVerdict {
    #[serde(default)]
    pub reasoning: String,
    pub precision_score: f64,
}

/// Asks a model how close two edge lists are, tolerating label drift that
/// exact key matching cannot.
pub struct SimilarityJudge<C> {
    client: C,
}

impl<C: ChatClient> SimilarityJudge<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }

    pub fn judge(&self, truth: &[RawEdge], predicted: &[RawEdge]) -> Result<JudgeVerdict, RegionError> {
        let request = ChatRequest {
            messages: vec![ChatMessage::user(prompt::judge_prompt(truth, predicted))],
            json_mode: true,
        };
        let content = self
            .client
            .complete(&request)?
            .filter(|text| !text.trim().is_empty())
            .ok_or(ExtractionError::EmptyResponse)?;
        let verdict: JudgeVerdict = serde_json::from_str(strip_code_fence(&content)).map_err(
            |source| ExtractionError::Json {
                expected: "a similarity verdict",
                source,
            },
        )?;
        if !(0.0..=1.0).contains(&verdict.precision_score) {
            return Err(ExtractionError::Invalid(format!(
                "precision_score {} is outside [0, 1]",
                verdict.precision_score
            ))
            .into());
        }
        tracing::debug!(score = verdict.precision_score, "similarity verdict");
        Ok(verdict)
    }
}
