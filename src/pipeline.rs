//! Per-image extraction: detect regions, read each one, assemble the graph.

use crate::config::{ExtractionMode, FailurePolicy, PipelineConfig};
use crate::detect::{RegionDetector, load_image};
use crate::error::{PipelineError, RegionError};
use crate::extract::StructuredExtractor;
use crate::graph::Graph;
use crate::ir::{Edge, Node};
use image::DynamicImage;
use serde::Serialize;
use std::fmt;
use std::path::Path;

/// Working state for one cropped region.
#[derive(Debug, Clone)]
pub struct RegionRecord {
    pub image: DynamicImage,
    /// Source file name followed by the region index.
    pub id: String,
    pub nodes: Vec<Node>,
    pub mermaid: Option<String>,
    pub edges: Vec<Edge>,
    pub failed: bool,
}

impl RegionRecord {
    fn node_labels(&self) -> Vec<String> {
        self.nodes.iter().map(|node| node.id().to_string()).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Nodes,
    Edges,
    Convert,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Nodes => "nodes",
            Stage::Edges => "edges",
            Stage::Convert => "convert",
        })
    }
}

/// A region left out of the graph under [`FailurePolicy::Skip`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegionFailure {
    pub region: String,
    pub stage: Stage,
    pub error: String,
}

pub struct Pipeline<D, E> {
    detector: D,
    extractor: E,
    config: PipelineConfig,
    records: Vec<RegionRecord>,
    failures: Vec<RegionFailure>,
}

impl<D: RegionDetector, E: StructuredExtractor> Pipeline<D, E> {
    pub fn new(detector: D, extractor: E, config: PipelineConfig) -> Self {
        Self {
            detector,
            extractor,
            config,
            records: Vec::new(),
            failures: Vec::new(),
        }
    }

    pub fn extractor(&self) -> &E {
        &self.extractor
    }

    pub fn records(&self) -> &[RegionRecord] {
        &self.records
    }

    pub fn failures(&self) -> &[RegionFailure] {
        &self.failures
    }

    /// Detects regions in `path` and prepares one record per crop. Replaces
    /// any state left from a previous image.
    pub fn initiate_image(&mut self, path: &Path) -> Result<usize, PipelineError> {
        self.records.clear();
        self.failures.clear();
        let image = load_image(path)?;
        let regions = self.detector.predict(path)?;
        let crops = self.detector.crop(&image, &regions);
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        tracing::info!(image = %path.display(), regions = crops.len(), "regions detected");

        self.records = crops
            .into_iter()
            .enumerate()
            .map(|(index, image)| RegionRecord {
                image,
                id: format!("{filename}{index}"),
                nodes: Vec::new(),
                mermaid: None,
                edges: Vec::new(),
                failed: false,
            })
            .collect();
        Ok(self.records.len())
    }

    pub fn detect_nodes(&mut self) -> Result<(), PipelineError> {
        for index in 0..self.records.len() {
            if self.records[index].failed {
                continue;
            }
            let result = self.extractor.extract_nodes(&self.records[index].image);
            if let Some(labels) = self.settle(index, Stage::Nodes, result)? {
                let record = &mut self.records[index];
                record.nodes = labels.into_iter().map(Node::new).collect();
                tracing::debug!(region = %record.id, nodes = record.nodes.len(), "nodes detected");
            }
        }
        Ok(())
    }

    /// Direct mode reads edges as JSON; Mermaid mode stores the diagram text
    /// for [`Pipeline::convert_edges`].
    pub fn detect_edges(&mut self) -> Result<(), PipelineError> {
        for index in 0..self.records.len() {
            if self.records[index].failed {
                continue;
            }
            let known = if self.config.use_known_nodes {
                self.records[index].node_labels()
            } else {
                Vec::new()
            };
            let image = &self.records[index].image;
            match self.config.mode {
                ExtractionMode::Direct => {
                    let result = self.extractor.extract_edges(image, &known);
                    if let Some(raw) = self.settle(index, Stage::Edges, result)? {
                        let record = &mut self.records[index];
                        record.edges = raw.into_iter().map(Edge::from).collect();
                        tracing::debug!(region = %record.id, edges = record.edges.len(), "edges detected");
                    }
                }
                ExtractionMode::Mermaid => {
                    let result = self.extractor.extract_edges_as_diagram_text(image, &known);
                    if let Some(text) = self.settle(index, Stage::Edges, result)? {
                        self.records[index].mermaid = Some(text);
                    }
                }
            }
        }
        Ok(())
    }

    pub fn convert_edges(&mut self) -> Result<(), PipelineError> {
        if self.config.mode != ExtractionMode::Mermaid {
            return Ok(());
        }
        for index in 0..self.records.len() {
            let Some(text) = self.records[index].mermaid.clone() else {
                continue;
            };
            let result = self.extractor.decode_diagram_text(&text);
            if let Some(raw) = self.settle(index, Stage::Convert, result)? {
                let record = &mut self.records[index];
                record.edges = raw.into_iter().map(Edge::from).collect();
                tracing::debug!(region = %record.id, edges = record.edges.len(), "diagram converted");
            }
        }
        Ok(())
    }

    /// Assembles every successful region into one graph.
    pub fn graph(&self) -> Graph {
        let live = self.records.iter().filter(|record| !record.failed);
        let mut nodes = Vec::new();
        let mut edges = Vec::new();
        for record in live {
            nodes.extend(record.nodes.iter().cloned());
            edges.extend(record.edges.iter().cloned());
        }
        let mut graph = Graph::with_dedup(edges, nodes, self.config.dedup_mode());
        if self.config.mode == ExtractionMode::Mermaid || graph.nodes.is_empty() {
            graph.synthesize_nodes();
        }
        let dangling = graph.dangling_edges().len();
        if dangling > 0 {
            tracing::debug!(dangling, "edges reference undetected nodes");
        }
        graph
    }

    /// Runs every stage on one image.
    pub fn run(&mut self, path: &Path) -> Result<Graph, PipelineError> {
        self.initiate_image(path)?;
        self.detect_nodes()?;
        self.detect_edges()?;
        self.convert_edges()?;
        let graph = self.graph();
        tracing::info!(
            nodes = graph.nodes.len(),
            edges = graph.edges.len(),
            skipped = self.failures.len(),
            "graph assembled"
        );
        Ok(graph)
    }

    fn settle<T>(
        &mut self,
        index: usize,
        stage: Stage,
        result: Result<T, RegionError>,
    ) -> Result<Option<T>, PipelineError> {
        let err = match result {
            Ok(value) => return Ok(Some(value)),
            Err(err) => err,
        };
        let record = &mut self.records[index];
        match self.config.failure_policy {
            FailurePolicy::Abort => Err(PipelineError::Region {
                region: record.id.clone(),
                source: err,
            }),
            FailurePolicy::Skip => {
                tracing::warn!(region = %record.id, %stage, error = %err, "skipping region");
                record.failed = true;
                self.failures.push(RegionFailure {
                    region: record.id.clone(),
                    stage,
                    error: err.to_string(),
                });
                Ok(None)
            }
        }
    }
}
