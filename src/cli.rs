use crate::config::{Config, DiagramDecoder, ExtractionMode, FailurePolicy, load_config};
use crate::detect::{RegionDetector, RemoteDetector, WholeImageDetector};
use crate::extract::LlmExtractor;
use crate::graph::Graph;
use crate::ir::{Direction, Edge, RawEdge};
use crate::layout::compute_layout;
use crate::layout_dump::{GraphDump, write_graph_dump};
use crate::llm::HttpChatClient;
use crate::parser::{decode_flowchart, strip_code_fence};
use crate::pipeline::Pipeline;
use crate::render::{render_svg, write_output_png, write_output_svg};
use crate::score::{EdgeScorer, SimilarityJudge, load_edges};
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "ownergraph",
    version,
    about = "Extract ownership-structure graphs from diagram images"
)]
pub struct Cli {
    /// Config file (JSON or JSON5)
    #[arg(short = 'c', long = "configFile", global = true)]
    pub config: Option<PathBuf>,

    /// Log at debug level (RUST_LOG takes precedence)
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Read the graph out of a diagram image
    Extract(ExtractArgs),
    /// Score predicted edges against ground truth
    Score(ScoreArgs),
    /// Decode a Mermaid flowchart into edges
    Decode(DecodeArgs),
    /// Lay out and render an edge list or Mermaid flowchart
    Layout(LayoutArgs),
}

#[derive(Args, Debug)]
pub struct ExtractArgs {
    /// Diagram image
    pub image: PathBuf,

    #[arg(short = 'm', long = "mode", value_enum)]
    pub mode: Option<ModeArg>,

    /// What to do when a region fails
    #[arg(long = "onFailure", value_enum)]
    pub on_failure: Option<PolicyArg>,

    /// Decode Mermaid output with a second model call instead of locally
    #[arg(long = "llmDecode")]
    pub llm_decode: bool,

    /// Treat the whole image as one region
    #[arg(long = "noCrop")]
    pub no_crop: bool,

    /// Write the graph dump here instead of stdout
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,

    /// Ground-truth edges to score the result against; the report goes to
    /// stdout, so the graph dump needs `--output`
    #[arg(short = 't', long = "truth", requires = "output")]
    pub truth: Option<PathBuf>,

    #[command(flatten)]
    pub render: RenderArgs,
}

#[derive(Args, Debug)]
pub struct ScoreArgs {
    /// Ground-truth edges (JSON array of {source, target})
    #[arg(short = 't', long = "truth")]
    pub truth: PathBuf,

    /// Predicted edges (JSON array of {source, target})
    #[arg(short = 'p', long = "predicted")]
    pub predicted: PathBuf,

    /// Also ask the model for a similarity score
    #[arg(long = "judge")]
    pub judge: bool,
}

#[derive(Args, Debug)]
pub struct DecodeArgs {
    /// Mermaid file or '-' for stdin
    #[arg(short = 'i', long = "input")]
    pub input: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct LayoutArgs {
    /// Edge list (.json) or Mermaid file, '-' for stdin
    #[arg(short = 'i', long = "input")]
    pub input: Option<PathBuf>,

    /// Write the graph dump here instead of stdout
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,

    #[arg(short = 'd', long = "direction")]
    pub direction: Option<String>,

    #[command(flatten)]
    pub render: RenderArgs,
}

#[derive(Args, Debug, Default)]
pub struct RenderArgs {
    /// Also render the laid-out graph as SVG
    #[arg(long = "svg")]
    pub svg: Option<PathBuf>,

    /// Also render the laid-out graph as PNG
    #[arg(long = "png")]
    pub png: Option<PathBuf>,

    /// Width
    #[arg(short = 'w', long = "width")]
    pub width: Option<f32>,

    /// Height
    #[arg(short = 'H', long = "height")]
    pub height: Option<f32>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeArg {
    Direct,
    Mermaid,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyArg {
    Abort,
    Skip,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let config = load_config(cli.config.as_deref())?;
    match cli.command {
        Command::Extract(args) => run_extract(args, config),
        Command::Score(args) => run_score(args, config),
        Command::Decode(args) => run_decode(args),
        Command::Layout(args) => run_layout(args, config),
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn run_extract(args: ExtractArgs, mut config: Config) -> Result<()> {
    if let Some(mode) = args.mode {
        config.pipeline.mode = match mode {
            ModeArg::Direct => ExtractionMode::Direct,
            ModeArg::Mermaid => ExtractionMode::Mermaid,
        };
    }
    if let Some(policy) = args.on_failure {
        config.pipeline.failure_policy = match policy {
            PolicyArg::Abort => FailurePolicy::Abort,
            PolicyArg::Skip => FailurePolicy::Skip,
        };
    }
    if args.llm_decode {
        config.pipeline.decoder = DiagramDecoder::Llm;
    }
    apply_render_args(&mut config, &args.render);

    let detector: Box<dyn RegionDetector> = match (&config.detector.endpoint, args.no_crop) {
        (Some(_), false) => Box::new(RemoteDetector::new(&config.detector)?),
        _ => Box::new(WholeImageDetector),
    };
    let client = HttpChatClient::new(config.llm.clone())?;
    let extractor = LlmExtractor::new(client)
        .with_decoder(config.pipeline.decoder)
        .with_structured_diagram(config.pipeline.structured_diagram);

    let mut pipeline = Pipeline::new(detector, extractor, config.pipeline.clone());
    let mut graph = pipeline
        .run(&args.image)
        .with_context(|| format!("extracting {}", args.image.display()))?;
    for failure in pipeline.failures() {
        eprintln!("skipped region {} ({}): {}", failure.region, failure.stage, failure.error);
    }

    emit_graph(&mut graph, &config, args.output.as_deref(), &args.render)?;

    if let Some(truth) = args.truth {
        let scorer = EdgeScorer::from_json_file(&truth, graph.edges.clone())?;
        println!("{}", serde_json::to_string_pretty(&scorer.validate())?);
    }
    Ok(())
}

fn run_score(args: ScoreArgs, config: Config) -> Result<()> {
    let truth = load_edges(&args.truth)?;
    let predicted = load_edges(&args.predicted)?;
    let scorer = EdgeScorer::from_json(&truth, predicted.iter().map(Edge::from).collect());
    let report = scorer.validate();
    if !args.judge {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let judge = SimilarityJudge::new(HttpChatClient::new(config.llm)?);
    let verdict = judge.judge(&truth, &predicted)?;
    let combined = serde_json::json!({ "report": report, "judge": verdict });
    println!("{}", serde_json::to_string_pretty(&combined)?);
    Ok(())
}

fn run_decode(args: DecodeArgs) -> Result<()> {
    let input = read_input(args.input.as_deref())?;
    let decoded = decode_flowchart(&input)?;
    println!("{}", serde_json::to_string_pretty(&decoded.edges)?);
    Ok(())
}

fn run_layout(args: LayoutArgs, mut config: Config) -> Result<()> {
    if let Some(token) = args.direction.as_deref() {
        config.layout.direction = Direction::from_token(token)
            .ok_or_else(|| anyhow::anyhow!("unknown direction `{token}`"))?;
    }
    apply_render_args(&mut config, &args.render);

    let edges = read_edges(args.input.as_deref())?;
    let mut graph = Graph::from_raw(&edges);
    emit_graph(&mut graph, &config, args.output.as_deref(), &args.render)
}

fn apply_render_args(config: &mut Config, render: &RenderArgs) {
    if let Some(width) = render.width {
        config.render.width = width;
    }
    if let Some(height) = render.height {
        config.render.height = height;
    }
}

/// Lays out `graph`, writes the dump (stdout when no path) and any renders.
fn emit_graph(
    graph: &mut Graph,
    config: &Config,
    output: Option<&Path>,
    render: &RenderArgs,
) -> Result<()> {
    let layout = compute_layout(graph, &config.layout);
    match output {
        Some(path) => write_graph_dump(path, graph, config.layout.direction)?,
        None => {
            let dump = GraphDump::from_graph(graph, config.layout.direction);
            println!("{}", serde_json::to_string_pretty(&dump)?);
        }
    }

    if render.svg.is_none() && render.png.is_none() {
        return Ok(());
    }
    let svg = render_svg(graph, &layout, &config.theme);
    if let Some(path) = render.svg.as_deref() {
        write_output_svg(&svg, Some(path))?;
    }
    if let Some(path) = render.png.as_deref() {
        write_output_png(&svg, path, &config.render)?;
    }
    Ok(())
}

fn read_edges(path: Option<&Path>) -> Result<Vec<RawEdge>> {
    let is_json = path
        .and_then(|p| p.extension())
        .and_then(|e| e.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    if let Some(path) = path.filter(|_| is_json) {
        return Ok(load_edges(path)?);
    }
    let input = read_input(path)?;
    if strip_code_fence(&input).starts_with('[') {
        return Ok(serde_json::from_str(strip_code_fence(&input))?);
    }
    Ok(decode_flowchart(&input)?.edges)
}

fn read_input(path: Option<&Path>) -> Result<String> {
    if let Some(path) = path
        && path != Path::new("-")
    {
        return std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()));
    }
    let mut buf = String::new();
    io::stdin().read_to_string(&mut buf)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_extract_flags() {
        let cli = Cli::try_parse_from([
            "ownergraph",
            "-v",
            "extract",
            "chart.png",
            "--mode",
            "mermaid",
            "--onFailure",
            "skip",
            "--noCrop",
            "--svg",
            "out.svg",
        ])
        .unwrap();
        assert!(cli.verbose);
        let Command::Extract(args) = cli.command else {
            panic!("expected extract");
        };
        assert_eq!(args.image, PathBuf::from("chart.png"));
        assert_eq!(args.mode, Some(ModeArg::Mermaid));
        assert_eq!(args.on_failure, Some(PolicyArg::Skip));
        assert!(args.no_crop);
        assert_eq!(args.render.svg, Some(PathBuf::from("out.svg")));
    }

    #[test]
    fn score_requires_both_files() {
        assert!(Cli::try_parse_from(["ownergraph", "score", "-t", "truth.json"]).is_err());
        let cli =
            Cli::try_parse_from(["ownergraph", "score", "-t", "truth.json", "-p", "pred.json"])
                .unwrap();
        assert!(matches!(cli.command, Command::Score(ScoreArgs { judge: false, .. })));
    }

    #[test]
    fn extract_truth_needs_output_file() {
        let missing_output =
            Cli::try_parse_from(["ownergraph", "extract", "chart.png", "-t", "truth.json"]);
        assert!(missing_output.is_err());
        let cli = Cli::try_parse_from([
            "ownergraph",
            "extract",
            "chart.png",
            "-t",
            "truth.json",
            "-o",
            "graph.json",
        ])
        .unwrap();
        let Command::Extract(args) = cli.command else {
            panic!("expected extract");
        };
        assert_eq!(args.truth, Some(PathBuf::from("truth.json")));
        assert_eq!(args.output, Some(PathBuf::from("graph.json")));
    }

    #[test]
    fn extract_flags_override_config() {
        let mut config = Config::default();
        apply_render_args(
            &mut config,
            &RenderArgs {
                width: Some(640.0),
                ..RenderArgs::default()
            },
        );
        assert_eq!(config.render.width, 640.0);
        assert_eq!(config.render.height, 800.0);
    }
}
