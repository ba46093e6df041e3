#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod detect;
pub mod error;
pub mod extract;
pub mod graph;
pub mod ir;
pub mod layout;
pub mod layout_dump;
pub mod llm;
pub mod parser;
pub mod pipeline;
pub mod prompt;
pub mod render;
pub mod score;
pub mod theme;

#[cfg(feature = "cli")]
pub use cli::run;
pub use graph::Graph;
pub use ir::{Edge, Node, RawEdge};
pub use pipeline::Pipeline;
pub use score::{EdgeScorer, ScoreReport};
