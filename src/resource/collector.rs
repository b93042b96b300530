//! Collection engine
//!
//! Runs provider units under a bounded pool, isolates recoverable failures
//! per unit, and merges the results into one sorted [`Graph`].

use super::availability::AvailabilityGate;
use super::error::{CollectError, FailureClass, UnitError};
use super::unit::ProviderUnit;
use crate::graph::{Graph, Resource, ResourceDigest, ResourceEdge};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::Instrument;
use uuid::Uuid;

/// Default number of units in flight at once
pub const DEFAULT_POOL_SIZE: usize = 15;

/// Name used for warnings not tied to a unit
const AVAILABILITY_WARNING_UNIT: &str = "availability";

/// A unit that contributed nothing, and why
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitWarning {
    pub unit: String,
    pub class: FailureClass,
    pub message: String,
}

/// Result of a collection run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Collection {
    pub graph: Graph,
    pub warnings: Vec<UnitWarning>,
}

enum Outcome {
    Produced {
        nodes: Vec<Resource>,
        edges: Vec<ResourceEdge>,
    },
    Skipped(UnitWarning),
    Failed(UnitError),
    NotRun,
}

struct Gate {
    gate: AvailabilityGate,
    region: String,
}

/// Configured collection engine
pub struct Collector {
    pool_size: usize,
    domain: String,
    gate: Option<Gate>,
}

impl Default for Collector {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_SIZE)
    }
}

impl Collector {
    pub fn new(pool_size: usize) -> Self {
        Self {
            pool_size: pool_size.max(1),
            domain: String::new(),
            gate: None,
        }
    }

    /// Domain name recorded on the run's tracing span
    pub fn for_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = domain.into();
        self
    }

    /// Skip units whose required service is missing in `region`
    pub fn with_gate(mut self, gate: AvailabilityGate, region: impl Into<String>) -> Self {
        self.gate = Some(Gate {
            gate,
            region: region.into(),
        });
        self
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Run every unit and merge their output
    ///
    /// Units are ordered by name before dispatch. When two units emit the
    /// same digest the later one in that order wins, whatever the completion
    /// order. Only an unclassified failure aborts the run.
    pub async fn collect(
        &self,
        mut units: Vec<Box<dyn ProviderUnit>>,
    ) -> Result<Collection, CollectError> {
        let span = tracing::info_span!(
            "collect",
            run_id = %Uuid::new_v4(),
            domain = %self.domain
        );

        units.sort_by(|a, b| a.name().cmp(b.name()));
        self.run(units).instrument(span).await
    }

    async fn run(&self, units: Vec<Box<dyn ProviderUnit>>) -> Result<Collection, CollectError> {
        let mut warnings = Vec::new();
        let available = self.available_services(&mut warnings).await;

        tracing::info!(
            "Collecting {} units with pool size {}",
            units.len(),
            self.pool_size
        );

        let abort = AtomicBool::new(false);
        let mut outcomes: Vec<(usize, Outcome)> = stream::iter(units.iter().enumerate())
            .map(|(index, unit)| {
                let abort = &abort;
                let available = available.as_ref();
                async move { (index, run_unit(unit.as_ref(), available, abort).await) }
            })
            .buffer_unordered(self.pool_size)
            .collect()
            .await;
        outcomes.sort_by_key(|(index, _)| *index);

        let mut nodes: Vec<Resource> = Vec::new();
        let mut positions: HashMap<ResourceDigest, usize> = HashMap::new();
        let mut edges: Vec<ResourceEdge> = Vec::new();

        for (index, outcome) in outcomes {
            let unit = units[index].name();
            match outcome {
                Outcome::Produced {
                    nodes: produced,
                    edges: accumulated,
                } => {
                    tracing::debug!(
                        "Unit {} produced {} nodes and {} edges",
                        unit,
                        produced.len(),
                        accumulated.len()
                    );
                    for node in produced {
                        match positions.get(&node.digest) {
                            Some(&at) => nodes[at] = node,
                            None => {
                                positions.insert(node.digest.clone(), nodes.len());
                                nodes.push(node);
                            }
                        }
                    }
                    edges.extend(accumulated);
                }
                Outcome::Skipped(warning) => {
                    tracing::info!("Skipping unit {}: {}", unit, warning.message);
                    warnings.push(warning);
                }
                Outcome::Failed(error) => {
                    let class = error.class();
                    if class.is_fatal() {
                        tracing::error!("Unit {} failed: {}", unit, error.describe());
                        return Err(CollectError::Fatal {
                            unit: unit.to_string(),
                            source: error,
                        });
                    }
                    match class {
                        FailureClass::Environment => {
                            tracing::info!("Unit {} not available: {}", unit, error.describe())
                        }
                        _ => tracing::warn!("Unit {} skipped: {}", unit, error.describe()),
                    }
                    warnings.push(UnitWarning {
                        unit: unit.to_string(),
                        class,
                        message: error.describe(),
                    });
                }
                Outcome::NotRun => {}
            }
        }

        let mut graph = Graph::new(nodes, edges);
        graph.sort();

        tracing::info!(
            "Collected {} nodes, {} edges, {} warnings",
            graph.nodes.len(),
            graph.edges.len(),
            warnings.len()
        );

        Ok(Collection { graph, warnings })
    }

    /// `None` disables gating, either by configuration or after a probe failure
    async fn available_services(
        &self,
        warnings: &mut Vec<UnitWarning>,
    ) -> Option<BTreeSet<String>> {
        let gate = self.gate.as_ref()?;
        match gate.gate.available_services(&gate.region).await {
            Ok(services) => Some(services),
            Err(e) => {
                tracing::warn!("Availability probe failed, gating disabled: {:#}", e);
                warnings.push(UnitWarning {
                    unit: AVAILABILITY_WARNING_UNIT.to_string(),
                    class: FailureClass::UpstreamShape,
                    message: format!("availability probe failed: {}", e),
                });
                None
            }
        }
    }
}

async fn run_unit(
    unit: &dyn ProviderUnit,
    available: Option<&BTreeSet<String>>,
    abort: &AtomicBool,
) -> Outcome {
    if abort.load(Ordering::SeqCst) {
        tracing::debug!("Not dispatching unit {} after fatal failure", unit.name());
        return Outcome::NotRun;
    }

    if let (Some(service), Some(available)) = (unit.required_service(), available) {
        if !available.contains(service) {
            return Outcome::Skipped(UnitWarning {
                unit: unit.name().to_string(),
                class: FailureClass::Environment,
                message: format!("service {} is not available in this region", service),
            });
        }
    }

    tracing::debug!("Dispatching unit {}", unit.name());
    match unit.produce_nodes().await {
        Ok(nodes) => Outcome::Produced {
            nodes,
            edges: unit.produce_edges(),
        },
        Err(error) => {
            if error.class().is_fatal() {
                abort.store(true, Ordering::SeqCst);
            }
            Outcome::Failed(error)
        }
    }
}

/// Collect with default settings and the given pool size
pub async fn collect(
    units: Vec<Box<dyn ProviderUnit>>,
    pool_size: usize,
) -> Result<Collection, CollectError> {
    Collector::new(pool_size).collect(units).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    struct Fixed {
        name: &'static str,
        nodes: Vec<Resource>,
    }

    #[async_trait]
    impl ProviderUnit for Fixed {
        fn name(&self) -> &str {
            self.name
        }

        async fn produce_nodes(&self) -> Result<Vec<Resource>, UnitError> {
            Ok(self.nodes.clone())
        }
    }

    struct Failing {
        name: &'static str,
        error: fn() -> UnitError,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ProviderUnit for Failing {
        fn name(&self) -> &str {
            self.name
        }

        async fn produce_nodes(&self) -> Result<Vec<Resource>, UnitError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err((self.error)())
        }
    }

    fn node(id: &str, name: &str) -> Resource {
        Resource::new(ResourceDigest::new(id, "subnet"), name).with_group("network")
    }

    #[tokio::test]
    async fn test_later_unit_wins_digest_collision() {
        let units: Vec<Box<dyn ProviderUnit>> = vec![
            Box::new(Fixed {
                name: "b",
                nodes: vec![node("s-1", "from b")],
            }),
            Box::new(Fixed {
                name: "a",
                nodes: vec![node("s-1", "from a")],
            }),
        ];

        let collection = collect(units, 4).await.unwrap();
        assert_eq!(collection.graph.nodes.len(), 1);
        assert_eq!(collection.graph.nodes[0].name, "from b");
    }

    #[tokio::test]
    async fn test_recoverable_failures_become_warnings() {
        let calls = Arc::new(AtomicUsize::new(0));
        let units: Vec<Box<dyn ProviderUnit>> = vec![
            Box::new(Failing {
                name: "iot",
                error: || UnitError::upstream("OptInRequired", "not subscribed"),
                calls: calls.clone(),
            }),
            Box::new(Failing {
                name: "lambda",
                error: || UnitError::UnexpectedResponse("missing VpcConfig".into()),
                calls: calls.clone(),
            }),
            Box::new(Fixed {
                name: "subnets",
                nodes: vec![node("s-1", "one")],
            }),
        ];

        let collection = collect(units, 2).await.unwrap();
        assert_eq!(collection.graph.nodes.len(), 1);
        assert_eq!(collection.warnings.len(), 2);
        assert_eq!(collection.warnings[0].unit, "iot");
        assert_eq!(collection.warnings[0].class, FailureClass::Environment);
        assert_eq!(collection.warnings[1].class, FailureClass::UpstreamShape);
    }

    #[tokio::test]
    async fn test_unclassified_failure_aborts_and_names_unit() {
        let calls = Arc::new(AtomicUsize::new(0));
        let units: Vec<Box<dyn ProviderUnit>> = vec![
            Box::new(Fixed {
                name: "a",
                nodes: vec![node("s-1", "one")],
            }),
            Box::new(Failing {
                name: "broken",
                error: || UnitError::Other(anyhow::anyhow!("invariant violated")),
                calls: calls.clone(),
            }),
        ];

        match collect(units, 1).await {
            Err(CollectError::Fatal { unit, .. }) => assert_eq!(unit, "broken"),
            other => panic!("expected fatal error, got {:?}", other.map(|c| c.graph)),
        }
    }

    #[tokio::test]
    async fn test_no_dispatch_after_fatal_with_serial_pool() {
        let calls = Arc::new(AtomicUsize::new(0));
        let units: Vec<Box<dyn ProviderUnit>> = vec![
            Box::new(Failing {
                name: "a-broken",
                error: || UnitError::upstream("SomethingNew", "?"),
                calls: calls.clone(),
            }),
            Box::new(Failing {
                name: "b-never",
                error: || UnitError::Other(anyhow::anyhow!("unreachable")),
                calls: calls.clone(),
            }),
        ];

        assert!(collect(units, 1).await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_zero_pool_size_is_clamped() {
        let collector = Collector::new(0);
        assert_eq!(collector.pool_size(), 1);
        let units: Vec<Box<dyn ProviderUnit>> = vec![Box::new(Fixed {
            name: "a",
            nodes: vec![node("s-1", "one")],
        })];
        assert_eq!(collector.collect(units).await.unwrap().graph.nodes.len(), 1);
    }
}
