//! Resource filters
//!
//! Parses `Name=<selector>;Value=<values>` expressions into predicates and
//! cuts a graph down to the matching subgraph. Malformed expressions are
//! dropped, never rejected.

use crate::graph::{Graph, Resource, ResourceDigest, ResourceEdge};
use std::collections::HashSet;

const NAME_PREFIX: &str = "Name=";
const VALUE_PREFIX: &str = "Value=";
const TAG_SELECTOR_PREFIX: &str = "tags.";
const TYPE_SELECTOR: &str = "type";
const QUOTE: char = '\'';
const SEPARATOR: char = ':';

/// A single filter predicate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    ByTag { key: String, value: String },
    ByType { kind: String },
}

impl Filter {
    pub fn matches(&self, resource: &Resource) -> bool {
        match self {
            Filter::ByType { kind } => resource.kind() == kind.as_str(),
            Filter::ByTag { key, value } => resource
                .tags
                .iter()
                .any(|(k, v)| k == key && v == value),
        }
    }
}

/// Parse raw filter expressions, skipping anything malformed
pub fn parse_filters<S: AsRef<str>>(expressions: &[S]) -> Vec<Filter> {
    let mut filters = Vec::new();

    for expression in expressions {
        let expression = expression.as_ref();
        let parts: Vec<&str> = expression.split(';').collect();
        if parts.len() != 2 {
            tracing::debug!("Dropping filter without two parts: {}", expression);
            continue;
        }

        let (Some(selector), Some(values)) = (
            parts[0].strip_prefix(NAME_PREFIX),
            parts[1].strip_prefix(VALUE_PREFIX),
        ) else {
            tracing::debug!("Dropping filter with bad prefixes: {}", expression);
            continue;
        };

        let tag_key = selector.strip_prefix(TAG_SELECTOR_PREFIX);
        if selector != TYPE_SELECTOR && tag_key.is_none() {
            tracing::debug!("Dropping filter with unknown selector: {}", selector);
            continue;
        }

        for value in parse_value_list(values) {
            let filter = match tag_key {
                Some(key) => Filter::ByTag {
                    key: key.to_string(),
                    value,
                },
                None => Filter::ByType { kind: value },
            };
            filters.push(filter);
        }
    }

    filters
}

/// Split a `:`-separated value list; single quotes make `:` literal
fn parse_value_list(raw: &str) -> Vec<String> {
    let mut values = Vec::new();
    let mut current = String::new();
    let mut wrapped = false;

    for c in raw.chars() {
        match c {
            QUOTE => wrapped = !wrapped,
            SEPARATOR if !wrapped => {
                if !current.is_empty() {
                    values.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(c),
        }
    }

    if !current.is_empty() {
        values.push(current);
    }

    values
}

/// Keep nodes matching any filter; no filters keeps everything
pub fn filter_nodes(nodes: Vec<Resource>, filters: &[Filter]) -> Vec<Resource> {
    if filters.is_empty() {
        return nodes;
    }

    nodes
        .into_iter()
        .filter(|node| filters.iter().any(|f| f.matches(node)))
        .collect()
}

/// Keep edges whose endpoints both survived node filtering
pub fn filter_edges(kept: &[Resource], edges: Vec<ResourceEdge>) -> Vec<ResourceEdge> {
    let digests: HashSet<&ResourceDigest> = kept.iter().map(|n| &n.digest).collect();

    edges
        .into_iter()
        .filter(|e| digests.contains(&e.from) && digests.contains(&e.to))
        .collect()
}

/// Apply filters to a whole graph
pub fn apply_filters(graph: Graph, filters: &[Filter]) -> Graph {
    if filters.is_empty() {
        return graph;
    }

    let nodes = filter_nodes(graph.nodes, filters);
    let edges = filter_edges(&nodes, graph.edges);
    Graph::new(nodes, edges)
}
