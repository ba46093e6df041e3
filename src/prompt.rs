//! Prompt text for the extraction, decoding and judging calls.

use crate::ir::RawEdge;

const ROLE: &str = "You are an expert in image recognition and in transcribing legal and corporate ownership structures.";

/// Worked example shown with every Mermaid request.
pub const MERMAID_EXAMPLE: &str = r#"graph TD
    A["A"]
    B["B"]
    B_sub["B Sub"]
    C["C"]
    C_sub["C Sub"]

    A --> B
    A --> C
    B --> B_sub
    C --> C_sub"#;

fn reply_format(fields: &[(&str, &str, &str)]) -> String {
    let mut out = String::from("Reply with a single JSON object with these fields:\n");
    for (name, ty, description) in fields {
        out.push_str(&format!("- {name} ({ty}): {description}\n"));
    }
    out
}

fn node_list_format() -> String {
    reply_format(&[
        ("reasoning", "string", "A short justification of the nodes you found."),
        (
            "answer",
            "array of strings",
            "Every detected node, written exactly as its label appears.",
        ),
    ])
}

fn edge_list_format() -> String {
    reply_format(&[
        ("reasoning", "string", "A short justification of the edges you found."),
        (
            "answer",
            "array of {\"source\": string, \"target\": string}",
            "Every edge, with source and target given by node label.",
        ),
    ])
}

fn diagram_format(structured: bool) -> String {
    if structured {
        format!(
            "{}\nExample answer:\n{MERMAID_EXAMPLE}\n",
            reply_format(&[
                (
                    "reasoning",
                    "string",
                    "A short justification that the answer is a valid Mermaid diagram.",
                ),
                ("answer", "string", "The Mermaid diagram."),
            ])
        )
    } else {
        format!(
            "Output:\n- Only a top-down (TD) Mermaid flowchart, without subgraphs.\n- Nothing but the diagram text.\n\nExample of a complete output:\n{MERMAID_EXAMPLE}\n"
        )
    }
}

fn known_nodes_block(known: &[String]) -> String {
    let list = known
        .iter()
        .map(|label| format!("  - {label}"))
        .collect::<Vec<_>>()
        .join("\n");
    format!("These nodes (legal entities) have already been detected in the image:\n{list}\n")
}

pub fn node_prompt() -> String {
    format!(
        "{ROLE}\n\
         Task: the image contains part of a flowchart. List every node (legal entity) in it.\n\
         Nodes may be shapes, text or small illustrations. Connections that leave the image \
         belong to a larger chart and can be ignored.\n\n{}",
        node_list_format()
    )
}

pub fn edge_prompt(known: &[String]) -> String {
    let mut prompt = format!(
        "{ROLE}\n\
         Task: the image contains part of a flowchart. List every edge (a line or arrow \
         connecting two nodes) as a source/target pair.\n"
    );
    if known.is_empty() {
        prompt.push_str(
            "Nodes may be shapes, text or small illustrations. Identify each endpoint by its label.\n",
        );
    } else {
        prompt.push_str(&known_nodes_block(known));
        prompt.push_str("Use these labels, verbatim, for every source and target.\n");
    }
    prompt.push_str("Return edges only, never standalone nodes.\n\n");
    prompt.push_str(&edge_list_format());
    prompt
}

pub fn diagram_prompt(known: &[String], structured: bool) -> String {
    let mut prompt = format!(
        "{ROLE}\n\
         Task: transcribe the flowchart in the image as one Mermaid diagram (no subgroups). \
         Declare every node as Id[\"Label\"] and every relationship as Id --> Id.\n"
    );
    if !known.is_empty() {
        prompt.push_str(&known_nodes_block(known));
        prompt.push_str("Build the diagram from these nodes.\n");
    }
    prompt.push_str(
        "Node labels carry no meaning of their own; do not infer relationships from similar names.\n\n",
    );
    prompt.push_str(&diagram_format(structured));
    prompt
}

pub fn decode_system_prompt() -> String {
    format!(
        "You convert Mermaid diagram definitions into structured JSON. Use each node's display \
         label, not its identifier.\n{}",
        edge_list_format()
    )
}

pub fn decode_user_prompt(diagram: &str) -> String {
    format!("Convert the following Mermaid diagram into JSON:\n\n{diagram}")
}

pub fn judge_prompt(truth: &[RawEdge], predicted: &[RawEdge]) -> String {
    let example_truth = [
        RawEdge::new("owner", "company 1"),
        RawEdge::new("owner", "company 2"),
        RawEdge::new("company 2", "company 3"),
        RawEdge::new("company 2", "company 4"),
        RawEdge::new("entity", "company 1"),
        RawEdge::new("fund", "company 1"),
    ];
    let example_predicted = [
        RawEdge::new("Owner (1)", "company 2"),
        RawEdge::new("company 2", "company 3"),
        RawEdge::new("Company 2", "company 4"),
        RawEdge::new("Company 1", "entity"),
        RawEdge::new("Fund", "company 3"),
    ];
    let render = |edges: &[RawEdge]| serde_json::to_string(edges).unwrap_or_default();
    format!(
        "You validate how closely a predicted list of edges matches a true list of edges.\n\
         Predicted edges come from a language model, so labels may differ slightly in case, \
         punctuation or suffixes.\n\
         Each edge has the shape {{\"source\": string, \"target\": string}}.\n\n\
         Example:\n  true_edges: {}\n  predicted_edges: {}\n  precision_score: 0.67\n\n\
         Input:\n  true_edges: {}\n  predicted_edges: {}\n\n{}",
        render(&example_truth),
        render(&example_predicted),
        render(truth),
        render(predicted),
        reply_format(&[
            ("reasoning", "string", "A short justification of the score."),
            (
                "precision_score",
                "number",
                "Between 0 and 1: how similar the predicted edges are to the true edges.",
            ),
        ])
    )
}
