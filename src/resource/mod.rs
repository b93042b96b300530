//! Resource collection layer
//!
//! Provider units are registered statically per domain, discovered in name
//! order, and run concurrently by the [`Collector`], which merges their output
//! into one deterministic [`Graph`](crate::graph::Graph).
//!
//! # Architecture
//!
//! - [`unit`] - The [`ProviderUnit`] trait every collector implements
//! - [`registry`] - Domain to named unit factories, with injected caches
//! - [`collector`] - Bounded concurrent execution, failure isolation, merge
//! - [`availability`] - Skips units whose service is missing in a region
//! - [`error`] - Unit errors and their [`FailureClass`]
//! - [`snapshot`] - Units replayed from a recorded inventory file
//!
//! # Example
//!
//! ```ignore
//! use cloudmap::resource::{Collector, Snapshot, UnitContext, UnitRegistry};
//!
//! async fn run(snapshot: &Snapshot, ctx: &UnitContext) -> anyhow::Result<()> {
//!     let mut registry = UnitRegistry::new();
//!     snapshot.register(&mut registry, "network")?;
//!     let units = registry.discover("network", ctx)?;
//!     let collection = Collector::default().collect(units).await?;
//!     println!("{} nodes", collection.graph.nodes.len());
//!     Ok(())
//! }
//! ```

pub mod availability;
pub mod collector;
pub mod error;
pub mod registry;
pub mod snapshot;
pub mod unit;

pub use availability::{AvailabilityGate, AvailabilityProbe, DEFAULT_AVAILABILITY_TTL};
pub use collector::{collect, Collection, Collector, UnitWarning, DEFAULT_POOL_SIZE};
pub use error::{classify_code, CollectError, FailureClass, RegistryError, UnitError};
pub use registry::{UnitContext, UnitFactory, UnitRegistry};
pub use snapshot::{Snapshot, SnapshotProbe, SnapshotUnit};
pub use unit::{EdgeAccumulator, ProviderUnit};
