//! Snapshot provider
//!
//! Replays a recorded inventory as provider units. A snapshot file (JSON, or
//! YAML by `.yaml`/`.yml` extension) lists units with the nodes and edges
//! they produce, an optional failure to simulate, and policy documents that
//! are emitted only when they reference the snapshot's network.

use super::availability::AvailabilityProbe;
use super::error::{RegistryError, UnitError};
use super::registry::{UnitContext, UnitRegistry};
use super::unit::{EdgeAccumulator, ProviderUnit};
use crate::graph::{Resource, ResourceDigest, ResourceEdge};
use crate::membership::{references_network, resolve_network, StaticNetwork};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Type of network nodes policy edges point to
pub const NETWORK_KIND: &str = "network";
/// Type given to policy nodes
pub const POLICY_KIND: &str = "policy";

/// A recorded inventory
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub domain: String,
    /// Network that policy documents are scanned against
    #[serde(default)]
    pub network: Option<StaticNetwork>,
    /// Services offered in the region; gating is off when absent
    #[serde(default)]
    pub available_services: Option<Vec<String>>,
    #[serde(default)]
    pub units: Vec<UnitSnapshot>,
}

/// One unit's recorded output
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnitSnapshot {
    pub name: String,
    #[serde(default)]
    pub service: Option<String>,
    #[serde(default)]
    pub nodes: Vec<Resource>,
    #[serde(default)]
    pub edges: Vec<ResourceEdge>,
    #[serde(default)]
    pub failure: Option<SimulatedFailure>,
    #[serde(default)]
    pub policies: Vec<PolicyDocument>,
    /// Artificial latency before the unit answers
    #[serde(default)]
    pub delay_ms: u64,
}

/// Failure a unit reports instead of its nodes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SimulatedFailure {
    Unavailable { service: String, reason: String },
    UnexpectedResponse { message: String },
    Upstream { code: String, message: String },
    Other { message: String },
}

impl SimulatedFailure {
    fn to_error(&self) -> UnitError {
        match self {
            SimulatedFailure::Unavailable { service, reason } => UnitError::Unavailable {
                service: service.clone(),
                reason: reason.clone(),
            },
            SimulatedFailure::UnexpectedResponse { message } => {
                UnitError::UnexpectedResponse(message.clone())
            }
            SimulatedFailure::Upstream { code, message } => UnitError::upstream(code, message),
            SimulatedFailure::Other { message } => UnitError::Other(anyhow::anyhow!("{}", message)),
        }
    }
}

/// Free-text policy attached to some resource
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyDocument {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub document: String,
}

impl Snapshot {
    /// Load a snapshot, choosing the parser from the file extension
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read snapshot {}", path.display()))?;

        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        );

        let snapshot: Snapshot = if is_yaml {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse YAML snapshot {}", path.display()))?
        } else {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON snapshot {}", path.display()))?
        };

        tracing::info!(
            "Loaded snapshot {} with {} units",
            path.display(),
            snapshot.units.len()
        );
        Ok(snapshot)
    }

    /// Register every unit under `domain`
    pub fn register(&self, registry: &mut UnitRegistry, domain: &str) -> Result<(), RegistryError> {
        let network = self.network.clone().map(Arc::new);
        for unit in &self.units {
            let name = unit.name.clone();
            let unit = Arc::new(unit.clone());
            let network = network.clone();
            registry.register(domain, &name, move |ctx: &UnitContext| -> Box<dyn ProviderUnit> {
                Box::new(SnapshotUnit::new(unit.clone(), network.clone(), ctx.clone()))
            })?;
        }
        Ok(())
    }

    /// Probe answering from `available_services`, if recorded
    pub fn probe(&self) -> Option<SnapshotProbe> {
        self.available_services.clone().map(SnapshotProbe)
    }
}

/// Provider unit replaying a [`UnitSnapshot`]
pub struct SnapshotUnit {
    def: Arc<UnitSnapshot>,
    network: Option<Arc<StaticNetwork>>,
    ctx: UnitContext,
    accumulated: EdgeAccumulator,
}

impl SnapshotUnit {
    pub fn new(
        def: Arc<UnitSnapshot>,
        network: Option<Arc<StaticNetwork>>,
        ctx: UnitContext,
    ) -> Self {
        Self {
            def,
            network,
            ctx,
            accumulated: EdgeAccumulator::new(),
        }
    }

    /// Policy nodes with evidence of referencing the network
    async fn policy_nodes(&self) -> Result<Vec<Resource>, UnitError> {
        let Some(recorded) = self.network.as_deref() else {
            return Ok(Vec::new());
        };
        if self.def.policies.is_empty() {
            return Ok(Vec::new());
        }

        let network = resolve_network(
            &self.ctx.memory,
            &recorded.id,
            async { Ok::<_, anyhow::Error>(recorded.endpoints.clone()) },
            async { Ok::<_, anyhow::Error>(recorded.subnets.clone()) },
        )
        .await?;
        let network_digest = ResourceDigest::new(network.id.clone(), NETWORK_KIND);

        let mut nodes = Vec::new();
        for policy in &self.def.policies {
            let evidence = references_network(&policy.document, &network);
            if !evidence.is_match() {
                tracing::debug!("Policy {} does not reference {}", policy.id, network.id);
                continue;
            }

            let name = if policy.name.is_empty() {
                policy.id.clone()
            } else {
                policy.name.clone()
            };
            let node = Resource::new(ResourceDigest::new(policy.id.clone(), POLICY_KIND), name)
                .with_group("security")
                .with_details(evidence.label());

            self.accumulated.push(ResourceEdge::labeled(
                node.digest.clone(),
                network_digest.clone(),
                evidence.label(),
            ));
            nodes.push(node);
        }
        Ok(nodes)
    }
}

#[async_trait]
impl ProviderUnit for SnapshotUnit {
    fn name(&self) -> &str {
        &self.def.name
    }

    fn required_service(&self) -> Option<&str> {
        self.def.service.as_deref()
    }

    async fn produce_nodes(&self) -> Result<Vec<Resource>, UnitError> {
        if self.def.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.def.delay_ms)).await;
        }

        if let Some(failure) = &self.def.failure {
            return Err(failure.to_error());
        }

        self.accumulated.clear();
        let mut nodes = self.def.nodes.clone();
        nodes.extend(self.policy_nodes().await?);
        Ok(nodes)
    }

    fn produce_edges(&self) -> Vec<ResourceEdge> {
        let mut edges = self.def.edges.clone();
        edges.extend(self.accumulated.snapshot());
        edges
    }
}

/// Availability probe backed by a recorded service list
#[derive(Debug, Clone)]
pub struct SnapshotProbe(Vec<String>);

#[async_trait]
impl AvailabilityProbe for SnapshotProbe {
    async fn services(&self, _region: &str) -> Result<Vec<String>> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;

    const YAML: &str = r#"
region: eu-west-1
domain: network
network:
  id: vpc-0abc
  subnets: ["10.0.64.0/18"]
available_services: [ec2]
units:
  - name: subnets
    service: ec2
    nodes:
      - digest: { id: subnet-1, type: subnet }
        name: app
        group: network
  - name: buckets
    policies:
      - id: bucket-a-policy
        document: '{"Condition": {"IpAddress": {"aws:SourceIp": "10.0.0.0/16"}}}'
      - id: bucket-b-policy
        document: '{"Statement": []}'
  - name: iot
    failure: { kind: upstream, code: OptInRequired, message: nope }
"#;

    fn context() -> UnitContext {
        UnitContext::new(
            "eu-west-1",
            Arc::new(MemoryCache::default()),
            Arc::new(MemoryCache::default()),
        )
    }

    #[test]
    fn test_load_yaml_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inventory.yaml");
        std::fs::write(&path, YAML).unwrap();

        let snapshot = Snapshot::load(&path).unwrap();
        assert_eq!(snapshot.units.len(), 3);
        assert_eq!(snapshot.units[0].nodes[0].kind(), "subnet");
        assert!(matches!(
            snapshot.units[2].failure,
            Some(SimulatedFailure::Upstream { .. })
        ));
    }

    #[test]
    fn test_load_rejects_malformed_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inventory.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(Snapshot::load(&path).is_err());
    }

    #[tokio::test]
    async fn test_only_referencing_policies_are_emitted() {
        let snapshot: Snapshot = serde_yaml::from_str(YAML).unwrap();
        let mut registry = UnitRegistry::new();
        snapshot.register(&mut registry, "network").unwrap();

        let units = registry.discover("network", &context()).unwrap();
        let buckets = units.iter().find(|u| u.name() == "buckets").unwrap();

        let nodes = buckets.produce_nodes().await.unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].id(), "bucket-a-policy");
        assert_eq!(nodes[0].details, "source ip reference");

        let edges = buckets.produce_edges();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].to, ResourceDigest::new("vpc-0abc", NETWORK_KIND));
    }

    #[tokio::test]
    async fn test_simulated_failure_is_returned() {
        let snapshot: Snapshot = serde_yaml::from_str(YAML).unwrap();
        let mut registry = UnitRegistry::new();
        snapshot.register(&mut registry, "network").unwrap();

        let units = registry.discover("network", &context()).unwrap();
        let iot = units.iter().find(|u| u.name() == "iot").unwrap();
        let err = iot.produce_nodes().await.unwrap_err();
        assert_eq!(err.class(), crate::resource::FailureClass::Environment);
    }
}
