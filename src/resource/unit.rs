//! Provider unit interface

use super::error::UnitError;
use crate::graph::{Resource, ResourceEdge};
use async_trait::async_trait;
use parking_lot::Mutex;

/// An independent collector for one resource kind
///
/// The collector always awaits `produce_nodes` before calling
/// `produce_edges` on the same unit, so a unit may record edges while
/// producing nodes and hand them back afterwards.
#[async_trait]
pub trait ProviderUnit: Send + Sync {
    /// Stable name; units run and merge in name order
    fn name(&self) -> &str;

    /// Service this unit depends on, checked by the availability gate
    fn required_service(&self) -> Option<&str> {
        None
    }

    async fn produce_nodes(&self) -> Result<Vec<Resource>, UnitError>;

    fn produce_edges(&self) -> Vec<ResourceEdge> {
        Vec::new()
    }
}

/// Edge buffer filled during `produce_nodes`
#[derive(Debug, Default)]
pub struct EdgeAccumulator {
    edges: Mutex<Vec<ResourceEdge>>,
}

impl EdgeAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, edge: ResourceEdge) {
        self.edges.lock().push(edge);
    }

    /// Current contents, left in place so repeated calls agree
    pub fn snapshot(&self) -> Vec<ResourceEdge> {
        self.edges.lock().clone()
    }

    pub fn clear(&self) {
        self.edges.lock().clear();
    }
}
