//! Principal aggregation for permission graphs
//!
//! A role is drawn on its own only when it has both an attached policy and at
//! least one assuming principal. Any other assumed role is folded into one
//! aggregate per assuming principal, and its outgoing edges are replaced by a
//! single "assumed by" edge from the aggregate to that principal.

use super::{aggregate_kind, aggregate_node, emit_nodes, Aggregated, TopologyKinds};
use crate::graph::{Resource, ResourceDigest, ResourceEdge};
use std::collections::{HashMap, HashSet};

pub(super) fn aggregate(
    kinds: &TopologyKinds,
    nodes: &[Resource],
    edges: &[ResourceEdge],
    drawn: &HashSet<&ResourceDigest>,
) -> Aggregated {
    let by_digest: HashMap<&ResourceDigest, &Resource> =
        nodes.iter().map(|n| (&n.digest, n)).collect();

    let mut mapping: HashMap<ResourceDigest, Vec<ResourceDigest>> = HashMap::new();
    let mut order: Vec<&ResourceDigest> = Vec::new();
    let mut members: HashMap<&ResourceDigest, Vec<&Resource>> = HashMap::new();

    for role in nodes.iter().filter(|n| n.kind() == kinds.role) {
        let outgoing = edges.iter().filter(|e| e.from == role.digest);

        let mut has_policy = false;
        let mut principals: Vec<&ResourceDigest> = Vec::new();
        for edge in outgoing {
            // Only a policy that will be drawn keeps the role standalone
            if edge.to.kind == kinds.policy && drawn.contains(&edge.to) {
                has_policy = true;
            }
            if edge.label.as_deref() == Some(kinds.assumed_by_label.as_str())
                && !principals.contains(&&edge.to)
            {
                principals.push(&edge.to);
            }
        }

        // Nothing to fold into, or fully described on its own
        if principals.is_empty() || has_policy {
            continue;
        }

        for principal in principals {
            members
                .entry(principal)
                .or_insert_with(|| {
                    order.push(principal);
                    Vec::new()
                })
                .push(role);
        }
    }

    let role_kind = aggregate_kind(&kinds.role);
    let mut aggregates: HashMap<ResourceDigest, Resource> = HashMap::new();
    let mut synthetic: Vec<ResourceEdge> = Vec::new();

    for principal in &order {
        let roles = &members[*principal];
        let principal_name = by_digest
            .get(*principal)
            .map(|p| p.name.as_str())
            .unwrap_or(principal.id.as_str());

        let digest = ResourceDigest::new(
            format!("{{roles for {}}}", principal.id),
            role_kind.clone(),
        );
        let name = format!("Roles for {} ({})", principal_name, roles.len());

        for role in roles {
            mapping
                .entry(role.digest.clone())
                .or_default()
                .push(digest.clone());
        }

        synthetic.push(ResourceEdge::labeled(
            digest.clone(),
            (*principal).clone(),
            kinds.assumed_by_label.clone(),
        ));
        aggregates.insert(digest.clone(), aggregate_node(digest, name, roles));
    }

    tracing::debug!(
        "Principal aggregation: {} roles folded into {} aggregates",
        mapping.len(),
        aggregates.len()
    );

    let edges = rewrite_folded(edges, &mapping, synthetic);

    Aggregated {
        nodes: emit_nodes(nodes, &mapping, &aggregates),
        edges,
    }
}

/// Drop edges leaving folded roles, redirect edges entering them, then
/// append the synthetic principal edges
fn rewrite_folded(
    edges: &[ResourceEdge],
    mapping: &HashMap<ResourceDigest, Vec<ResourceDigest>>,
    synthetic: Vec<ResourceEdge>,
) -> Vec<ResourceEdge> {
    let mut seen: HashSet<ResourceEdge> = HashSet::new();
    let mut out = Vec::with_capacity(edges.len() + synthetic.len());

    for edge in edges {
        if mapping.contains_key(&edge.from) {
            continue;
        }
        match mapping.get(&edge.to) {
            Some(targets) => {
                for target in targets {
                    let redirected = ResourceEdge {
                        from: edge.from.clone(),
                        to: target.clone(),
                        label: edge.label.clone(),
                    };
                    if seen.insert(redirected.clone()) {
                        out.push(redirected);
                    }
                }
            }
            None => out.push(edge.clone()),
        }
    }

    out.extend(synthetic);
    out
}
