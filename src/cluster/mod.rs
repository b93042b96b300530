//! Diagram clustering and aggregation
//!
//! Turns a flat (filtered) graph into a rendering-ready grouping: a map from
//! cluster name to nodes plus a rewritten edge set. Every variant is a pure
//! function of its input and idempotent on its own output.
//!
//! # Variants
//!
//! - [`DiagramVariant::Default`] - one cluster per node `group`
//! - [`DiagramVariant::NetworkTopology`] - subnets collapsed into public and
//!   private aggregates, autoscaled instances and the containers running on
//!   them collapsed per autoscaling group
//! - [`DiagramVariant::PrincipalAggregation`] - roles without both a policy
//!   and an assuming principal collapsed per principal

mod network;
mod principal;

use crate::graph::{Resource, ResourceDigest, ResourceEdge, AGGREGATE_TYPE_PREFIX};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

/// Which aggregation heuristics to apply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DiagramVariant {
    #[default]
    Default,
    NetworkTopology,
    PrincipalAggregation,
}

/// Type names and markers the specialized variants look for
#[derive(Debug, Clone)]
pub struct TopologyKinds {
    pub network: String,
    pub subnet: String,
    pub route_table: String,
    pub instance: String,
    pub autoscaling_group: String,
    pub container: String,
    pub role: String,
    pub policy: String,
    /// Route-table details marker for a route to an internet gateway
    pub public_marker: String,
    /// Route-table details marker for the network's main table
    pub main_table_marker: String,
    /// Label of role -> principal edges
    pub assumed_by_label: String,
}

impl Default for TopologyKinds {
    fn default() -> Self {
        Self {
            network: "network".to_string(),
            subnet: "subnet".to_string(),
            route_table: "route_table".to_string(),
            instance: "instance".to_string(),
            autoscaling_group: "autoscaling_group".to_string(),
            container: "container_instance".to_string(),
            role: "role".to_string(),
            policy: "policy".to_string(),
            public_marker: "public: True".to_string(),
            main_table_marker: "default: True".to_string(),
            assumed_by_label: "assumed by".to_string(),
        }
    }
}

/// Cluster name -> nodes, plus the edges to draw between them
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Grouping {
    /// `""` holds ungrouped nodes
    pub clusters: BTreeMap<String, Vec<Resource>>,
    pub edges: Vec<ResourceEdge>,
}

impl Grouping {
    /// All nodes, in cluster order
    pub fn nodes(&self) -> Vec<Resource> {
        self.clusters.values().flatten().cloned().collect()
    }

    pub fn node_count(&self) -> usize {
        self.clusters.values().map(Vec::len).sum()
    }

    pub fn find(&self, id: &str) -> Option<&Resource> {
        self.clusters.values().flatten().find(|n| n.id() == id)
    }
}

/// Nodes and edges after a variant's aggregation pass
struct Aggregated {
    nodes: Vec<Resource>,
    edges: Vec<ResourceEdge>,
}

/// Grouping engine configured with kind names and a renderable-type gate
#[derive(Debug, Clone, Default)]
pub struct Clusterer {
    kinds: TopologyKinds,
    renderable: Option<BTreeSet<String>>,
}

impl Clusterer {
    pub fn new(kinds: TopologyKinds) -> Self {
        Self {
            kinds,
            renderable: None,
        }
    }

    /// Only these types (plus aggregates) are drawn
    pub fn with_renderable<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.renderable = Some(types.into_iter().map(Into::into).collect());
        self
    }

    fn is_renderable(&self, node: &Resource) -> bool {
        node.is_aggregate()
            || self
                .renderable
                .as_ref()
                .map_or(true, |types| types.contains(node.kind()))
    }

    pub fn group(
        &self,
        nodes: &[Resource],
        edges: &[ResourceEdge],
        variant: DiagramVariant,
    ) -> Grouping {
        let edges: Vec<ResourceEdge> = edges
            .iter()
            .filter(|e| !e.is_self_loop())
            .cloned()
            .collect();

        let aggregated = match variant {
            DiagramVariant::Default => Aggregated {
                nodes: nodes.to_vec(),
                edges,
            },
            DiagramVariant::NetworkTopology => network::aggregate(&self.kinds, nodes, &edges),
            DiagramVariant::PrincipalAggregation => {
                let drawn: HashSet<&ResourceDigest> = nodes
                    .iter()
                    .filter(|n| self.is_renderable(n))
                    .map(|n| &n.digest)
                    .collect();
                principal::aggregate(&self.kinds, nodes, &edges, &drawn)
            }
        };

        let nodes: Vec<Resource> = aggregated
            .nodes
            .into_iter()
            .filter(|n| self.is_renderable(n))
            .collect();

        let present: HashSet<&ResourceDigest> = nodes.iter().map(|n| &n.digest).collect();
        let edges = aggregated
            .edges
            .into_iter()
            .filter(|e| present.contains(&e.from) && present.contains(&e.to))
            .collect();

        Grouping {
            clusters: cluster_by_group(nodes),
            edges,
        }
    }
}

/// Group with default kinds and every type renderable
pub fn group(nodes: &[Resource], edges: &[ResourceEdge], variant: DiagramVariant) -> Grouping {
    Clusterer::default().group(nodes, edges, variant)
}

fn cluster_by_group(nodes: Vec<Resource>) -> BTreeMap<String, Vec<Resource>> {
    let mut clusters: BTreeMap<String, Vec<Resource>> = BTreeMap::new();
    for node in nodes {
        clusters.entry(node.group.clone()).or_default().push(node);
    }
    clusters
}

fn aggregate_kind(kind: &str) -> String {
    format!("{}{}", AGGREGATE_TYPE_PREFIX, kind)
}

/// Build an aggregate node listing its members' ids in `details`
fn aggregate_node(digest: ResourceDigest, name: String, members: &[&Resource]) -> Resource {
    let group = members.first().map(|m| m.group.clone()).unwrap_or_default();
    let details = members
        .iter()
        .map(|m| m.id())
        .collect::<Vec<_>>()
        .join(", ");

    Resource::new(digest, name)
        .with_group(group)
        .with_details(details)
}

/// Replace mapped nodes by their aggregates, each emitted at its first
/// member's position
fn emit_nodes(
    nodes: &[Resource],
    mapping: &HashMap<ResourceDigest, Vec<ResourceDigest>>,
    aggregates: &HashMap<ResourceDigest, Resource>,
) -> Vec<Resource> {
    let mut emitted: HashSet<&ResourceDigest> = HashSet::new();
    let mut out = Vec::with_capacity(nodes.len());

    for node in nodes {
        match mapping.get(&node.digest) {
            Some(targets) => {
                for target in targets {
                    if let Some(aggregate) = aggregates.get(target) {
                        if emitted.insert(target) {
                            out.push(aggregate.clone());
                        }
                    }
                }
            }
            None => out.push(node.clone()),
        }
    }

    out
}

/// Redirect edge endpoints through `mapping`
///
/// Edges touching an aggregate are deduplicated; aggregate self-loops are
/// never emitted.
fn rewrite_edges(
    edges: &[ResourceEdge],
    mapping: &HashMap<ResourceDigest, Vec<ResourceDigest>>,
) -> Vec<ResourceEdge> {
    let mut seen: HashSet<ResourceEdge> = HashSet::new();
    let mut out = Vec::with_capacity(edges.len());

    for edge in edges {
        let froms = endpoints(&edge.from, mapping);
        let tos = endpoints(&edge.to, mapping);

        for from in froms {
            for to in tos {
                if from == to {
                    continue;
                }
                let rewritten = ResourceEdge {
                    from: from.clone(),
                    to: to.clone(),
                    label: edge.label.clone(),
                };
                let redirected = *from != edge.from || *to != edge.to;
                if redirected && !seen.insert(rewritten.clone()) {
                    continue;
                }
                out.push(rewritten);
            }
        }
    }

    out
}

fn endpoints<'a>(
    digest: &'a ResourceDigest,
    mapping: &'a HashMap<ResourceDigest, Vec<ResourceDigest>>,
) -> &'a [ResourceDigest] {
    mapping
        .get(digest)
        .map(Vec::as_slice)
        .unwrap_or(std::slice::from_ref(digest))
}
