//! Dependency Tree Snapshots
//!
//! Point-in-time views of the graph around one node, used by the trace
//! output and available to tooling. Children are deduplicated, so a node
//! reached through several paths is listed once per parent.

use std::collections::HashSet;

use serde::Serialize;

use super::node::NodeId;
use super::store::Graph;

/// Rendering stops after this many lines.
const MAX_RENDERED_LINES: usize = 1000;

/// What a node depends on, recursively.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DependencyTree {
    pub name: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<DependencyTree>,
}

/// Who depends on a node, recursively.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObserverTree {
    pub name: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub observers: Vec<ObserverTree>,
}

impl DependencyTree {
    /// Render the tree as one tab-indented name per line.
    pub fn render(&self) -> String {
        let mut lines = Vec::new();
        self.render_into(&mut lines, 0);
        lines.join("\n")
    }

    fn render_into(&self, lines: &mut Vec<String>, depth: usize) {
        if lines.len() >= MAX_RENDERED_LINES {
            if lines.last().map(String::as_str) != Some("(and many more)") {
                lines.push("(and many more)".to_string());
            }
            return;
        }
        lines.push(format!("{}{}", "\t".repeat(depth), self.name));
        for child in &self.dependencies {
            child.render_into(lines, depth + 1);
        }
    }

    /// Serialize the tree as JSON.
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

impl ObserverTree {
    /// Serialize the tree as JSON.
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

impl Graph {
    pub(crate) fn dependency_tree(&self, id: NodeId) -> Option<DependencyTree> {
        let node = self.get(id)?;
        let mut seen = HashSet::new();
        let dependencies = node
            .observing
            .iter()
            .filter(|dep| seen.insert(**dep))
            .filter_map(|dep| self.dependency_tree(*dep))
            .collect();
        Some(DependencyTree {
            name: node.name.to_string(),
            dependencies,
        })
    }

    pub(crate) fn observer_tree(&self, id: NodeId) -> Option<ObserverTree> {
        let node = self.get(id)?;
        let observers = node
            .observers
            .iter()
            .filter_map(|observer| self.observer_tree(*observer))
            .collect();
        Some(ObserverTree {
            name: node.name.to_string(),
            observers,
        })
    }
}
