use std::fmt::Write as _;
use std::path::Path;

use anyhow::{Context, Result};
use log::info;
use serde::Serialize;

use crate::report::GraphDiff;

pub fn to_json<T: Serialize>(value: &T, pretty: bool) -> Result<String> {
    let json = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    Ok(json)
}

/// Writes `contents` to `output`, or to stdout when no path is given.
pub fn emit(contents: &str, output: Option<&Path>) -> Result<()> {
    if let Some(path) = output {
        std::fs::write(path, format!("{contents}\n"))
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!("Output written to: {}", path.display());
    } else {
        println!("{contents}");
    }
    Ok(())
}

/// Unified-diff style listing of graph changes: `+`/`-` per node and edge.
pub fn render_graph_diff(diff: &GraphDiff) -> String {
    if diff.is_empty() {
        return "No changes in the execution graph".to_string();
    }

    let mut output = String::new();
    for node in &diff.removed_nodes {
        let _ = writeln!(output, "- job {} ({})", node.name, node.stage);
    }
    for node in &diff.added_nodes {
        let _ = writeln!(output, "+ job {} ({})", node.name, node.stage);
    }
    for edge in &diff.removed_edges {
        let _ = writeln!(output, "- edge {} -> {}", edge.from, edge.to);
    }
    for edge in &diff.added_edges {
        let _ = writeln!(output, "+ edge {} -> {}", edge.from, edge.to);
    }
    output.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{EdgeExport, NodeExport};

    #[test]
    fn test_render_graph_diff() {
        let diff = GraphDiff {
            added_nodes: vec![NodeExport {
                name: "lint".to_string(),
                stage: "test".to_string(),
            }],
            removed_nodes: vec![],
            added_edges: vec![EdgeExport {
                from: "build".to_string(),
                to: "lint".to_string(),
            }],
            removed_edges: vec![EdgeExport {
                from: "build".to_string(),
                to: "deploy".to_string(),
            }],
        };

        assert_eq!(
            render_graph_diff(&diff),
            "+ job lint (test)\n- edge build -> deploy\n+ edge build -> lint"
        );
    }

    #[test]
    fn test_empty_diff() {
        assert_eq!(
            render_graph_diff(&GraphDiff::default()),
            "No changes in the execution graph"
        );
    }

    #[test]
    fn test_emit_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.json");

        emit("{}", Some(&path)).unwrap();

        assert_eq!(std::fs::read_to_string(path).unwrap(), "{}\n");
    }

    #[test]
    fn test_to_json_compact_and_pretty() {
        let value = serde_json::json!({"a": 1});

        assert_eq!(to_json(&value, false).unwrap(), r#"{"a":1}"#);
        assert!(to_json(&value, true).unwrap().contains('\n'));
    }
}
