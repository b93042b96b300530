//! Resource graph vocabulary
//!
//! Value types shared by every other module: the digest that identifies a
//! resource, the resource node itself, and the directed edge between two
//! digests. Orderings here exist only to make output reproducible.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// Type prefix carried by synthetic nodes built by the cluster engine
pub const AGGREGATE_TYPE_PREFIX: &str = "aggregate:";

/// Identity of a resource node: `(id, type)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceDigest {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl ResourceDigest {
    pub fn new(id: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
        }
    }
}

impl fmt::Display for ResourceDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// A resource node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub digest: ResourceDigest,
    pub name: String,
    /// Free text, also used by the cluster engine for route-table markers
    #[serde(default)]
    pub details: String,
    /// Coarse category used for default clustering ("network", "compute", ...)
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub tags: Vec<(String, String)>,
    /// Vendor payload the core never interprets
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

impl Resource {
    pub fn new(digest: ResourceDigest, name: impl Into<String>) -> Self {
        Self {
            digest,
            name: name.into(),
            details: String::new(),
            group: String::new(),
            tags: Vec::new(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = details.into();
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.push((key.into(), value.into()));
        self
    }

    pub fn id(&self) -> &str {
        &self.digest.id
    }

    pub fn kind(&self) -> &str {
        &self.digest.kind
    }

    /// Synthetic node produced by the cluster engine
    pub fn is_aggregate(&self) -> bool {
        self.digest.kind.starts_with(AGGREGATE_TYPE_PREFIX)
    }

    /// Sort key: `(group, type, name)`
    pub fn order_key(&self) -> (&str, &str, &str) {
        (&self.group, &self.digest.kind, &self.name)
    }
}

/// Directed relation between two digests
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceEdge {
    pub from: ResourceDigest,
    pub to: ResourceDigest,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl ResourceEdge {
    pub fn new(from: ResourceDigest, to: ResourceDigest) -> Self {
        Self {
            from,
            to,
            label: None,
        }
    }

    pub fn labeled(from: ResourceDigest, to: ResourceDigest, label: impl Into<String>) -> Self {
        Self {
            from,
            to,
            label: Some(label.into()),
        }
    }

    pub fn is_self_loop(&self) -> bool {
        self.from == self.to
    }

    /// Sort key: `(from.type, from.id, to.type, to.id)`
    pub fn order_key(&self) -> (&str, &str, &str, &str) {
        (
            &self.from.kind,
            &self.from.id,
            &self.to.kind,
            &self.to.id,
        )
    }
}

/// Compare nodes by `(group, type, name)`
pub fn compare_nodes(a: &Resource, b: &Resource) -> Ordering {
    a.order_key().cmp(&b.order_key())
}

/// Compare edges by `(from.type, from.id, to.type, to.id)`
pub fn compare_edges(a: &ResourceEdge, b: &ResourceEdge) -> Ordering {
    a.order_key().cmp(&b.order_key())
}

/// A finished resource graph
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Graph {
    pub nodes: Vec<Resource>,
    pub edges: Vec<ResourceEdge>,
}

impl Graph {
    pub fn new(nodes: Vec<Resource>, edges: Vec<ResourceEdge>) -> Self {
        Self { nodes, edges }
    }

    /// Stable sort of nodes and edges; ties keep emission order
    pub fn sort(&mut self) {
        self.nodes.sort_by(compare_nodes);
        self.edges.sort_by(compare_edges);
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
