//! Availability gating
//!
//! Units that depend on a service are skipped, without being called, when
//! the service does not exist in the region. The set of available services
//! changes rarely and is memoized in the persistent cache.

use crate::cache::{cache_key, Cache, CacheExt};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

/// Seven days
pub const DEFAULT_AVAILABILITY_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Source of truth for which services a region offers
#[async_trait]
pub trait AvailabilityProbe: Send + Sync {
    async fn services(&self, region: &str) -> Result<Vec<String>>;
}

/// Memoizing front for an [`AvailabilityProbe`]
pub struct AvailabilityGate {
    probe: Arc<dyn AvailabilityProbe>,
    cache: Arc<dyn Cache>,
    ttl: Duration,
}

impl AvailabilityGate {
    pub fn new(probe: Arc<dyn AvailabilityProbe>, cache: Arc<dyn Cache>) -> Self {
        Self {
            probe,
            cache,
            ttl: DEFAULT_AVAILABILITY_TTL,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Services available in `region`, from cache when possible
    pub async fn available_services(&self, region: &str) -> Result<BTreeSet<String>> {
        let key = cache_key("services", &[region]);
        if let Some(hit) = self.cache.get_as::<BTreeSet<String>>(&key) {
            tracing::debug!("Availability for {} served from cache", region);
            return Ok(hit);
        }

        let services: BTreeSet<String> = self.probe.services(region).await?.into_iter().collect();
        tracing::info!("Probed {} available services in {}", services.len(), region);
        self.cache.set_as(&key, &services, self.ttl);
        Ok(services)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingProbe {
        calls: AtomicUsize,
        services: Vec<String>,
    }

    #[async_trait]
    impl AvailabilityProbe for CountingProbe {
        async fn services(&self, _region: &str) -> Result<Vec<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.services.clone())
        }
    }

    struct FailingProbe;

    #[async_trait]
    impl AvailabilityProbe for FailingProbe {
        async fn services(&self, region: &str) -> Result<Vec<String>> {
            anyhow::bail!("no endpoint for {}", region)
        }
    }

    #[test]
    fn test_probe_is_memoized_per_region() {
        let probe = Arc::new(CountingProbe {
            calls: AtomicUsize::new(0),
            services: vec!["ec2".into(), "iot".into()],
        });
        let cache: Arc<dyn Cache> = Arc::new(MemoryCache::default());
        let gate = AvailabilityGate::new(probe.clone(), cache.clone());

        let first = tokio_test::block_on(gate.available_services("eu-west-1")).unwrap();
        let second = tokio_test::block_on(gate.available_services("eu-west-1")).unwrap();
        assert_eq!(first, second);
        assert!(first.contains("iot"));
        assert_eq!(probe.calls.load(Ordering::SeqCst), 1);

        tokio_test::block_on(gate.available_services("us-east-1")).unwrap();
        assert_eq!(probe.calls.load(Ordering::SeqCst), 2);
        assert!(cache.get("services:eu-west-1").is_some());
    }

    #[test]
    fn test_probe_failure_is_returned_and_not_cached() {
        let cache: Arc<dyn Cache> = Arc::new(MemoryCache::default());
        let gate = AvailabilityGate::new(Arc::new(FailingProbe), cache.clone());

        assert!(tokio_test::block_on(gate.available_services("eu-west-1")).is_err());
        assert!(cache.get("services:eu-west-1").is_none());
    }
}
