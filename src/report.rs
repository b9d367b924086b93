use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphExport {
    pub nodes: Vec<NodeExport>,
    pub edges: Vec<EdgeExport>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeExport {
    pub name: String,
    pub stage: String,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EdgeExport {
    pub from: String,
    pub to: String,
}

/// Differences between two exported execution graphs.
///
/// A node whose stage changed shows up as removed and added.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GraphDiff {
    pub added_nodes: Vec<NodeExport>,
    pub removed_nodes: Vec<NodeExport>,
    pub added_edges: Vec<EdgeExport>,
    pub removed_edges: Vec<EdgeExport>,
}

impl GraphDiff {
    pub fn is_empty(&self) -> bool {
        self.added_nodes.is_empty()
            && self.removed_nodes.is_empty()
            && self.added_edges.is_empty()
            && self.removed_edges.is_empty()
    }
}

pub fn diff_execution_graphs(old: &GraphExport, new: &GraphExport) -> GraphDiff {
    let old_nodes: BTreeSet<&NodeExport> = old.nodes.iter().collect();
    let new_nodes: BTreeSet<&NodeExport> = new.nodes.iter().collect();
    let old_edges: BTreeSet<&EdgeExport> = old.edges.iter().collect();
    let new_edges: BTreeSet<&EdgeExport> = new.edges.iter().collect();

    GraphDiff {
        added_nodes: new_nodes.difference(&old_nodes).map(|n| (*n).clone()).collect(),
        removed_nodes: old_nodes.difference(&new_nodes).map(|n| (*n).clone()).collect(),
        added_edges: new_edges.difference(&old_edges).map(|e| (*e).clone()).collect(),
        removed_edges: old_edges.difference(&new_edges).map(|e| (*e).clone()).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(name: &str, stage: &str) -> NodeExport {
        NodeExport {
            name: name.to_string(),
            stage: stage.to_string(),
        }
    }

    fn edge(from: &str, to: &str) -> EdgeExport {
        EdgeExport {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    #[test]
    fn test_identical_graphs_have_no_diff() {
        let graph = GraphExport {
            nodes: vec![node("a", "build"), node("b", "test")],
            edges: vec![edge("a", "b")],
        };

        assert!(diff_execution_graphs(&graph, &graph).is_empty());
    }

    #[test]
    fn test_added_and_removed_entries() {
        let old = GraphExport {
            nodes: vec![node("a", "build"), node("b", "test")],
            edges: vec![edge("a", "b")],
        };
        let new = GraphExport {
            nodes: vec![node("a", "build"), node("c", "test")],
            edges: vec![edge("a", "c")],
        };

        let diff = diff_execution_graphs(&old, &new);

        assert_eq!(diff.added_nodes, vec![node("c", "test")]);
        assert_eq!(diff.removed_nodes, vec![node("b", "test")]);
        assert_eq!(diff.added_edges, vec![edge("a", "c")]);
        assert_eq!(diff.removed_edges, vec![edge("a", "b")]);
    }

    #[test]
    fn test_export_json_shape() {
        let graph = GraphExport {
            nodes: vec![node("a", "build")],
            edges: vec![edge("a", "b")],
        };

        let json = serde_json::to_value(&graph).unwrap();

        assert_eq!(
            json,
            serde_json::json!({
                "nodes": [{"name": "a", "stage": "build"}],
                "edges": [{"from": "a", "to": "b"}]
            })
        );
    }
}
