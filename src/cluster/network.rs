//! Network-topology aggregation
//!
//! Subnets are classified public or private by route-table reachability and
//! collapsed into one aggregate per class. Instances in an autoscaling group
//! collapse into one aggregate per group, and container instances backed by
//! those instances collapse into a second aggregate for the same group.

use super::{aggregate_kind, aggregate_node, emit_nodes, rewrite_edges, Aggregated, TopologyKinds};
use crate::graph::{Resource, ResourceDigest, ResourceEdge};
use std::collections::{HashMap, HashSet};

pub const PUBLIC_SUBNET: &str = "{public subnet}";
pub const PRIVATE_SUBNET: &str = "{private subnet}";

fn has_marker(details: &str, marker: &str) -> bool {
    !marker.is_empty() && details.to_lowercase().contains(&marker.to_lowercase())
}

/// Route tables whose details carry the public marker
fn public_tables<'a>(kinds: &TopologyKinds, nodes: &'a [Resource]) -> HashSet<&'a ResourceDigest> {
    nodes
        .iter()
        .filter(|n| n.kind() == kinds.route_table && has_marker(&n.details, &kinds.public_marker))
        .map(|n| &n.digest)
        .collect()
}

/// Networks whose main route table is public
fn networks_with_public_main<'a>(
    kinds: &TopologyKinds,
    nodes: &[Resource],
    edges: &'a [ResourceEdge],
    public: &HashSet<&ResourceDigest>,
) -> HashSet<&'a ResourceDigest> {
    let main_tables: HashSet<&ResourceDigest> = nodes
        .iter()
        .filter(|n| {
            n.kind() == kinds.route_table && has_marker(&n.details, &kinds.main_table_marker)
        })
        .map(|n| &n.digest)
        .collect();

    edges
        .iter()
        .filter(|e| e.to.kind == kinds.network)
        .filter(|e| main_tables.contains(&e.from) && public.contains(&e.from))
        .map(|e| &e.to)
        .collect()
}

fn is_public_subnet(
    kinds: &TopologyKinds,
    subnet: &ResourceDigest,
    edges: &[ResourceEdge],
    public: &HashSet<&ResourceDigest>,
    public_networks: &HashSet<&ResourceDigest>,
) -> bool {
    edges.iter().any(|e| {
        let explicit = e.to == *subnet && public.contains(&e.from);
        let via_main = (e.from == *subnet
            && e.to.kind == kinds.network
            && public_networks.contains(&e.to))
            || (e.to == *subnet
                && e.from.kind == kinds.network
                && public_networks.contains(&e.from));
        explicit || via_main
    })
}

pub(super) fn aggregate(
    kinds: &TopologyKinds,
    nodes: &[Resource],
    edges: &[ResourceEdge],
) -> Aggregated {
    let by_digest: HashMap<&ResourceDigest, &Resource> =
        nodes.iter().map(|n| (&n.digest, n)).collect();

    let mut mapping: HashMap<ResourceDigest, Vec<ResourceDigest>> = HashMap::new();
    let mut aggregates: HashMap<ResourceDigest, Resource> = HashMap::new();

    // Subnets
    let public = public_tables(kinds, nodes);
    let public_networks = networks_with_public_main(kinds, nodes, edges, &public);

    let mut public_subnets: Vec<&Resource> = Vec::new();
    let mut private_subnets: Vec<&Resource> = Vec::new();
    for subnet in nodes.iter().filter(|n| n.kind() == kinds.subnet) {
        if is_public_subnet(kinds, &subnet.digest, edges, &public, &public_networks) {
            public_subnets.push(subnet);
        } else {
            private_subnets.push(subnet);
        }
    }

    let subnet_kind = aggregate_kind(&kinds.subnet);
    for (name, members) in [
        (PUBLIC_SUBNET, &public_subnets),
        (PRIVATE_SUBNET, &private_subnets),
    ] {
        if members.is_empty() {
            continue;
        }
        let digest = ResourceDigest::new(name, subnet_kind.clone());
        for member in members.iter() {
            mapping.insert(member.digest.clone(), vec![digest.clone()]);
        }
        aggregates.insert(
            digest.clone(),
            aggregate_node(digest, name.to_string(), members),
        );
    }

    // Autoscaled instances, first group edge wins
    let mut instance_group: HashMap<&ResourceDigest, &ResourceDigest> = HashMap::new();
    for edge in edges {
        if edge.from.kind == kinds.instance
            && edge.to.kind == kinds.autoscaling_group
            && by_digest.contains_key(&edge.from)
        {
            instance_group.entry(&edge.from).or_insert(&edge.to);
        }
    }

    // Containers backed by autoscaled instances, either edge direction
    let mut container_group: HashMap<&ResourceDigest, &ResourceDigest> = HashMap::new();
    for edge in edges {
        let (container, instance) = if edge.from.kind == kinds.container
            && edge.to.kind == kinds.instance
        {
            (&edge.from, &edge.to)
        } else if edge.to.kind == kinds.container && edge.from.kind == kinds.instance {
            (&edge.to, &edge.from)
        } else {
            continue;
        };

        if !by_digest.contains_key(container) {
            continue;
        }
        if let Some(group) = instance_group.get(instance) {
            container_group.entry(container).or_insert(*group);
        }
    }

    collapse_by_group(
        nodes,
        &by_digest,
        &instance_group,
        &kinds.instance,
        "instances",
        &mut mapping,
        &mut aggregates,
    );
    collapse_by_group(
        nodes,
        &by_digest,
        &container_group,
        &kinds.container,
        "containers",
        &mut mapping,
        &mut aggregates,
    );

    tracing::debug!(
        "Network aggregation: {} public, {} private subnets, {} aggregates",
        public_subnets.len(),
        private_subnets.len(),
        aggregates.len()
    );

    Aggregated {
        nodes: emit_nodes(nodes, &mapping, &aggregates),
        edges: rewrite_edges(edges, &mapping),
    }
}

/// One aggregate per autoscaling group for the members in `membership`
fn collapse_by_group(
    nodes: &[Resource],
    by_digest: &HashMap<&ResourceDigest, &Resource>,
    membership: &HashMap<&ResourceDigest, &ResourceDigest>,
    member_kind: &str,
    noun: &str,
    mapping: &mut HashMap<ResourceDigest, Vec<ResourceDigest>>,
    aggregates: &mut HashMap<ResourceDigest, Resource>,
) {
    let mut order: Vec<&ResourceDigest> = Vec::new();
    let mut members: HashMap<&ResourceDigest, Vec<&Resource>> = HashMap::new();

    for node in nodes {
        if let Some(group) = membership.get(&node.digest) {
            let entry = members.entry(*group).or_insert_with(|| {
                order.push(*group);
                Vec::new()
            });
            entry.push(node);
        }
    }

    for group in order {
        let group_members = &members[group];
        let group_name = by_digest
            .get(group)
            .map(|g| g.name.as_str())
            .unwrap_or(group.id.as_str());

        let digest = ResourceDigest::new(
            format!("{{{} of {}}}", noun, group.id),
            aggregate_kind(member_kind),
        );
        let name = format!("{} {} ({})", group_name, noun, group_members.len());

        for member in group_members {
            mapping.insert(member.digest.clone(), vec![digest.clone()]);
        }
        aggregates.insert(digest.clone(), aggregate_node(digest, name, group_members));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{group, DiagramVariant};

    fn node(id: &str, kind: &str, group: &str) -> Resource {
        Resource::new(ResourceDigest::new(id, kind), id).with_group(group)
    }

    fn edge(from: &Resource, to: &Resource) -> ResourceEdge {
        ResourceEdge::new(from.digest.clone(), to.digest.clone())
    }

    #[test]
    fn test_subnets_split_by_route_table() {
        let vpc = node("vpc-1", "network", "network");
        let rt = node("rtb-1", "route_table", "network")
            .with_details("default: False, public: True");
        let public = node("subnet-pub", "subnet", "network");
        let private = node("subnet-priv", "subnet", "network");
        let vm = node("i-1", "instance", "compute");

        let nodes = vec![vpc.clone(), rt.clone(), public.clone(), private.clone(), vm.clone()];
        let edges = vec![
            edge(&rt, &public),
            edge(&public, &vpc),
            edge(&private, &vpc),
            edge(&vm, &public),
        ];

        let grouping = group(&nodes, &edges, DiagramVariant::NetworkTopology);

        let pub_agg = grouping.find(PUBLIC_SUBNET).unwrap();
        let priv_agg = grouping.find(PRIVATE_SUBNET).unwrap();
        assert!(pub_agg.details.contains("subnet-pub"));
        assert!(priv_agg.details.contains("subnet-priv"));
        assert!(grouping.find("subnet-pub").is_none());

        assert!(grouping
            .edges
            .contains(&ResourceEdge::new(vm.digest.clone(), pub_agg.digest.clone())));
        assert!(grouping
            .edges
            .contains(&ResourceEdge::new(rt.digest.clone(), pub_agg.digest.clone())));
    }

    #[test]
    fn test_main_table_makes_network_subnets_public() {
        let vpc = node("vpc-1", "network", "network");
        let main = node("rtb-main", "route_table", "network")
            .with_details("default: True, public: True");
        let subnet = node("subnet-a", "subnet", "network");
        let edges = vec![edge(&main, &vpc), edge(&subnet, &vpc)];

        let grouping = group(
            &[vpc, main, subnet],
            &edges,
            DiagramVariant::NetworkTopology,
        );
        assert!(grouping.find(PUBLIC_SUBNET).is_some());
        assert!(grouping.find(PRIVATE_SUBNET).is_none());
    }

    #[test]
    fn test_non_main_public_table_on_network_is_ignored() {
        let vpc = node("vpc-1", "network", "network");
        let rt = node("rtb-x", "route_table", "network")
            .with_details("default: False, public: True");
        let subnet = node("subnet-a", "subnet", "network");
        let edges = vec![edge(&rt, &vpc), edge(&subnet, &vpc)];

        let grouping = group(&[vpc, rt, subnet], &edges, DiagramVariant::NetworkTopology);
        assert!(grouping.find(PRIVATE_SUBNET).is_some());
    }

    #[test]
    fn test_autoscaled_instances_and_containers_collapse() {
        let asg = node("asg-web", "autoscaling_group", "compute");
        let vm1 = node("i-1", "instance", "compute");
        let vm2 = node("i-2", "instance", "compute");
        let lone = node("i-3", "instance", "compute");
        let c1 = node("ci-1", "container_instance", "containers");
        let c2 = node("ci-2", "container_instance", "containers");
        let cluster = node("ecs-1", "container_cluster", "containers");

        let nodes = vec![
            asg.clone(),
            vm1.clone(),
            vm2.clone(),
            lone.clone(),
            c1.clone(),
            c2.clone(),
            cluster.clone(),
        ];
        let edges = vec![
            edge(&vm1, &asg),
            edge(&vm2, &asg),
            edge(&c1, &vm1),
            edge(&vm2, &c2),
            edge(&c1, &cluster),
            edge(&c2, &cluster),
        ];

        let grouping = group(&nodes, &edges, DiagramVariant::NetworkTopology);

        let instances = grouping.find("{instances of asg-web}").unwrap();
        assert_eq!(instances.name, "asg-web instances (2)");
        assert_eq!(instances.details, "i-1, i-2");
        let containers = grouping.find("{containers of asg-web}").unwrap();
        assert_eq!(containers.details, "ci-1, ci-2");
        assert!(grouping.find("i-3").is_some());

        // Both container edges to the cluster fold into one
        let to_cluster: Vec<_> = grouping
            .edges
            .iter()
            .filter(|e| e.to == cluster.digest)
            .collect();
        assert_eq!(to_cluster.len(), 1);
        assert_eq!(to_cluster[0].from, containers.digest);

        // Instance -> group edges become one aggregate -> group edge
        assert!(grouping
            .edges
            .contains(&ResourceEdge::new(instances.digest.clone(), asg.digest.clone())));
        // Containers -> instances become aggregate -> aggregate
        assert!(grouping.edges.contains(&ResourceEdge::new(
            containers.digest.clone(),
            instances.digest.clone()
        )));
        assert!(grouping.edges.iter().all(|e| e.from != e.to));
    }

    #[test]
    fn test_network_grouping_is_idempotent() {
        let vpc = node("vpc-1", "network", "network");
        let rt = node("rtb-1", "route_table", "network").with_details("public: True");
        let s1 = node("subnet-1", "subnet", "network");
        let s2 = node("subnet-2", "subnet", "network");
        let asg = node("asg-1", "autoscaling_group", "compute");
        let vm = node("i-1", "instance", "compute");
        let nodes = vec![vpc.clone(), rt.clone(), s1.clone(), s2.clone(), asg.clone(), vm.clone()];
        let edges = vec![
            edge(&rt, &s1),
            edge(&s1, &vpc),
            edge(&s2, &vpc),
            edge(&vm, &asg),
            edge(&vm, &s2),
        ];

        let once = group(&nodes, &edges, DiagramVariant::NetworkTopology);
        let twice = group(&once.nodes(), &once.edges, DiagramVariant::NetworkTopology);
        assert_eq!(once, twice);
    }
}
