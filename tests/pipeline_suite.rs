use std::cell::Cell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use image::{DynamicImage, GenericImageView};
use ownership_graph::config::{ExtractionMode, FailurePolicy, PipelineConfig};
use ownership_graph::detect::{BoundingBox, DetectionRegion, RegionDetector};
use ownership_graph::error::{
    DetectionError, ExtractionError, PipelineError, RegionError, ServiceError,
};
use ownership_graph::extract::StructuredExtractor;
use ownership_graph::ir::RawEdge;
use ownership_graph::parser::decode_flowchart;
use ownership_graph::pipeline::{Pipeline, Stage};
use ownership_graph::score::EdgeScorer;

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

/// Writes a blank 200x100 chart image and returns its path.
fn chart_image(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("ownergraph-suite-{}", std::process::id()));
    std::fs::create_dir_all(&dir).expect("temp dir");
    let path = dir.join(name);
    DynamicImage::new_rgb8(200, 100).save(&path).expect("write image");
    path
}

/// Splits the chart into a 120px-wide left region and an 80px-wide right one.
struct SplitDetector;

impl RegionDetector for SplitDetector {
    fn predict(&self, _image_path: &Path) -> Result<Vec<DetectionRegion>, DetectionError> {
        let region = |xyxy| DetectionRegion {
            label: "cluster".to_string(),
            confidence: 0.9,
            class_id: 0,
            bounding_box: BoundingBox::from_xyxy(xyxy),
        };
        Ok(vec![
            region([0.0, 0.0, 120.0, 100.0]),
            region([120.0, 0.0, 200.0, 100.0]),
        ])
    }
}

/// Answers per region, told apart by crop width.
struct ScriptedExtractor {
    nodes: HashMap<u32, Vec<&'static str>>,
    edges: HashMap<u32, Vec<(&'static str, &'static str)>>,
    diagrams: HashMap<u32, &'static str>,
    failing_width: Option<u32>,
    edge_calls: Cell<usize>,
}

impl ScriptedExtractor {
    fn new() -> Self {
        Self {
            nodes: HashMap::from([
                (120, vec!["Main Group TopCo", "GroupCo 1", "GroupCo 2"]),
                (80, vec!["GroupCo 1", "OpCo A"]),
            ]),
            edges: HashMap::from([
                (
                    120,
                    vec![
                        ("Main Group TopCo", "GroupCo 1"),
                        ("Main Group TopCo", "GroupCo 2"),
                    ],
                ),
                (80, vec![("GroupCo 1", "OpCo A"), ("GroupCo 2", "OpCo B")]),
            ]),
            diagrams: HashMap::from([
                (
                    120,
                    "graph TD\n  T[\"Main Group TopCo\"]\n  G1[\"GroupCo 1\"]\n  T --> G1",
                ),
                (
                    80,
                    "graph TD\n  subgraph Ops\n  G2[\"GroupCo 2\"] --> B[\"OpCo B\"]\n  end",
                ),
            ]),
            failing_width: None,
            edge_calls: Cell::new(0),
        }
    }

    fn failing_on(mut self, width: u32) -> Self {
        self.failing_width = Some(width);
        self
    }
}

impl StructuredExtractor for ScriptedExtractor {
    fn extract_nodes(&self, image: &DynamicImage) -> Result<Vec<String>, RegionError> {
        let width = image.width();
        if self.failing_width == Some(width) {
            return Err(ServiceError::Auth("token expired".to_string()).into());
        }
        Ok(self.nodes[&width].iter().map(|s| s.to_string()).collect())
    }

    fn extract_edges(
        &self,
        image: &DynamicImage,
        known_nodes: &[String],
    ) -> Result<Vec<RawEdge>, RegionError> {
        self.edge_calls.set(self.edge_calls.get() + 1);
        assert!(!known_nodes.is_empty(), "known nodes should be forwarded");
        Ok(self.edges[&image.width()]
            .iter()
            .map(|(s, t)| RawEdge::new(*s, *t))
            .collect())
    }

    fn extract_edges_as_diagram_text(
        &self,
        image: &DynamicImage,
        _known_nodes: &[String],
    ) -> Result<String, RegionError> {
        Ok(self.diagrams[&image.width()].to_string())
    }
}

fn config(mode: ExtractionMode, failure_policy: FailurePolicy) -> PipelineConfig {
    PipelineConfig {
        mode,
        failure_policy,
        ..PipelineConfig::default()
    }
}

#[test]
fn direct_mode_assembles_all_regions() {
    let path = chart_image("direct.png");
    let mut pipeline = Pipeline::new(
        SplitDetector,
        ScriptedExtractor::new(),
        config(ExtractionMode::Direct, FailurePolicy::Abort),
    );
    let graph = pipeline.run(&path).expect("pipeline");

    let ids: Vec<&str> = pipeline.records().iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["direct.png0", "direct.png1"]);
    let widths: Vec<u32> = pipeline.records().iter().map(|r| r.image.width()).collect();
    assert_eq!(widths, vec![120, 80]);

    assert_eq!(graph.edges.len(), 4);
    // Detected nodes are kept as-is, even though "OpCo B" was never detected.
    assert_eq!(graph.nodes.len(), 4);
    assert!(graph.node("OpCo B").is_none());
    assert_eq!(graph.dangling_edges().len(), 1);
    assert!(pipeline.failures().is_empty());
}

#[test]
fn abort_policy_stops_at_first_failing_region() {
    let path = chart_image("abort.png");
    let mut pipeline = Pipeline::new(
        SplitDetector,
        ScriptedExtractor::new().failing_on(80),
        config(ExtractionMode::Direct, FailurePolicy::Abort),
    );
    let err = pipeline.run(&path).unwrap_err();
    match err {
        PipelineError::Region { region, source } => {
            assert_eq!(region, "abort.png1");
            assert!(matches!(source, RegionError::Service(ServiceError::Auth(_))));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn skip_policy_builds_graph_from_remaining_regions() {
    let path = chart_image("skip.png");
    let mut pipeline = Pipeline::new(
        SplitDetector,
        ScriptedExtractor::new().failing_on(120),
        config(ExtractionMode::Direct, FailurePolicy::Skip),
    );
    let graph = pipeline.run(&path).expect("pipeline");

    let failures = pipeline.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].region, "skip.png0");
    assert_eq!(failures[0].stage, Stage::Nodes);
    assert!(failures[0].error.contains("token expired"));

    let keys: Vec<&str> = graph.edges.iter().map(|e| e.id()).collect();
    assert_eq!(keys, vec!["GroupCo 1-OpCo A", "GroupCo 2-OpCo B"]);
    assert_eq!(pipeline.extractor().edge_calls.get(), 1);
}

#[test]
fn mermaid_mode_flags_subgraphs_and_synthesizes_nodes() {
    let path = chart_image("mermaid.png");
    let mut pipeline = Pipeline::new(
        SplitDetector,
        ScriptedExtractor::new(),
        config(ExtractionMode::Mermaid, FailurePolicy::Skip),
    );
    let graph = pipeline.run(&path).expect("pipeline");

    assert_eq!(pipeline.failures().len(), 1);
    assert_eq!(pipeline.failures()[0].stage, Stage::Convert);
    assert_eq!(graph.edges.len(), 1);
    assert_eq!(graph.edges[0].id(), "Main Group TopCo-GroupCo 1");
    let labels: Vec<&str> = graph.nodes.iter().map(|n| n.id()).collect();
    assert_eq!(labels, vec!["Main Group TopCo", "GroupCo 1"]);

    let mut strict = Pipeline::new(
        SplitDetector,
        ScriptedExtractor::new(),
        config(ExtractionMode::Mermaid, FailurePolicy::Abort),
    );
    let err = strict.run(&path).unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Region {
            source: RegionError::Extraction(ExtractionError::Diagram(_)),
            ..
        }
    ));
}

#[test]
fn unreadable_image_is_input_error() {
    let mut pipeline = Pipeline::new(
        SplitDetector,
        ScriptedExtractor::new(),
        PipelineConfig::default(),
    );
    let err = pipeline
        .initiate_image(Path::new("/nonexistent/chart.png"))
        .unwrap_err();
    assert!(matches!(err, PipelineError::Input(_)));
}

#[test]
fn failed_load_clears_previous_image_state() {
    let mut pipeline = Pipeline::new(
        SplitDetector,
        ScriptedExtractor::new(),
        config(ExtractionMode::Direct, FailurePolicy::Abort),
    );
    pipeline.run(&chart_image("first.png")).expect("pipeline");
    assert_eq!(pipeline.records().len(), 2);

    assert!(pipeline.run(Path::new("/nonexistent/second.png")).is_err());
    assert!(pipeline.records().is_empty());
    assert!(pipeline.failures().is_empty());
    assert!(pipeline.graph().edges.is_empty());
}

#[test]
fn decoded_fixture_scores_perfectly_against_ground_truth() {
    let text = std::fs::read_to_string(fixture("ownership.mmd")).expect("fixture");
    let decoded = decode_flowchart(&text).expect("decode");
    let predicted = decoded.edges.iter().map(Into::into).collect();
    let scorer =
        EdgeScorer::from_json_file(&fixture("ground_truth.json"), predicted).expect("truth");
    let report = scorer.validate();
    assert_eq!(report.precision, 1.0);
    assert_eq!(report.recall, 1.0);
    assert_eq!(report.f1_score, 1.0);
}

#[test]
fn ampersand_names_and_compact_arrows_survive_mermaid_mode() {
    let path = chart_image("partners.png");
    let diagram = std::fs::read_to_string(fixture("partners.mmd")).expect("fixture");
    let mut extractor = ScriptedExtractor::new();
    extractor.diagrams = HashMap::from([(120, diagram.leak() as &'static str), (80, "graph TD\n")]);
    let mut pipeline = Pipeline::new(
        SplitDetector,
        extractor,
        config(ExtractionMode::Mermaid, FailurePolicy::Skip),
    );
    let graph = pipeline.run(&path).expect("pipeline");

    // The empty right-hand diagram is skipped, the partners chart is kept whole.
    assert_eq!(pipeline.failures().len(), 1);
    assert!(graph.node("Smith & Sons Holdings").is_some());
    assert!(graph.node("Main Group HoldCo").is_some());
    let scorer = EdgeScorer::from_json_file(&fixture("partners_truth.json"), graph.edges.clone())
        .expect("truth");
    let report = scorer.validate();
    assert_eq!(report.f1_score, 1.0);
    assert!(report.false_positives.is_empty());
}

#[test]
fn subgraph_fixture_is_rejected() {
    let text = std::fs::read_to_string(fixture("subgraph.mmd")).expect("fixture");
    assert!(decode_flowchart(&text).is_err());
}

#[test]
fn non_array_ground_truth_fixture_is_rejected() {
    let err = EdgeScorer::from_json_file(&fixture("not_an_array.json"), Vec::new())
        .err()
        .expect("must fail");
    assert!(err.to_string().contains("list of edge objects"));
}

#[test]
fn whole_image_crop_keeps_dimensions() {
    let image = DynamicImage::new_rgb8(64, 48);
    let region = DetectionRegion {
        label: "diagram".to_string(),
        confidence: 1.0,
        class_id: 0,
        bounding_box: BoundingBox::from_xyxy([0.0, 0.0, 64.0, 48.0]),
    };
    let crops = SplitDetector.crop(&image, &[region]);
    assert_eq!(crops[0].dimensions(), (64, 48));
}
