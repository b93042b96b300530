//! Text and JSON rendering of a grouped graph

use crate::cluster::Grouping;
use crate::resource::UnitWarning;
use anyhow::Result;
use serde::Serialize;
use std::fmt::Write;

#[derive(Debug, Clone, Serialize)]
pub struct Report<'a> {
    pub domain: &'a str,
    pub region: &'a str,
    pub grouping: &'a Grouping,
    pub warnings: &'a [UnitWarning],
}

impl Report<'_> {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn to_text(&self) -> String {
        let mut out = String::new();
        let region = if self.region.is_empty() { "-" } else { self.region };

        let _ = writeln!(out, "Domain {} in {}", self.domain, region);
        let _ = writeln!(
            out,
            "{} nodes, {} edges, {} warnings",
            self.grouping.node_count(),
            self.grouping.edges.len(),
            self.warnings.len()
        );

        for (cluster, nodes) in &self.grouping.clusters {
            let title = if cluster.is_empty() { "(ungrouped)" } else { cluster };
            let _ = writeln!(out, "\n[{}]", title);
            for node in nodes {
                let _ = write!(out, "  {:<24} {:<32} {}", node.kind(), node.id(), node.name);
                if !node.details.is_empty() {
                    let _ = write!(out, "  ({})", node.details);
                }
                out.push('\n');
            }
        }

        if !self.grouping.edges.is_empty() {
            let _ = writeln!(out, "\nEdges:");
            for edge in &self.grouping.edges {
                let _ = write!(out, "  {} -> {}", edge.from, edge.to);
                if let Some(label) = &edge.label {
                    let _ = write!(out, " [{}]", label);
                }
                out.push('\n');
            }
        }

        if !self.warnings.is_empty() {
            let _ = writeln!(out, "\nWarnings:");
            for warning in self.warnings {
                let _ = writeln!(
                    out,
                    "  {} ({}): {}",
                    warning.unit, warning.class, warning.message
                );
            }
        }

        out
    }
}
