//! Unit Registry - statically registered provider units per domain
//!
//! Units are registered by name under a domain ("network", "security", ...)
//! at startup. Discovery instantiates every unit of a domain against a shared
//! [`UnitContext`] and returns them sorted by name.

use super::error::RegistryError;
use super::unit::ProviderUnit;
use crate::cache::{Cache, MemoryCache};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Everything a unit factory may capture
#[derive(Clone)]
pub struct UnitContext {
    pub region: String,
    /// Request-scoped memoization, shared by all units of one run
    pub memory: Arc<MemoryCache>,
    /// Cross-run memoization
    pub persistent: Arc<dyn Cache>,
}

impl UnitContext {
    pub fn new(
        region: impl Into<String>,
        memory: Arc<MemoryCache>,
        persistent: Arc<dyn Cache>,
    ) -> Self {
        Self {
            region: region.into(),
            memory,
            persistent,
        }
    }
}

impl fmt::Debug for UnitContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitContext")
            .field("region", &self.region)
            .field("memory_entries", &self.memory.len())
            .finish_non_exhaustive()
    }
}

/// Builds one unit for a run
pub type UnitFactory = Box<dyn Fn(&UnitContext) -> Box<dyn ProviderUnit> + Send + Sync>;

/// Domain -> unit name -> factory
#[derive(Default)]
pub struct UnitRegistry {
    domains: BTreeMap<String, BTreeMap<String, UnitFactory>>,
}

impl UnitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory; names are unique within a domain
    pub fn register<F>(&mut self, domain: &str, name: &str, factory: F) -> Result<(), RegistryError>
    where
        F: Fn(&UnitContext) -> Box<dyn ProviderUnit> + Send + Sync + 'static,
    {
        let units = self.domains.entry(domain.to_string()).or_default();
        if units.contains_key(name) {
            return Err(RegistryError::DuplicateUnit {
                domain: domain.to_string(),
                unit: name.to_string(),
            });
        }
        units.insert(name.to_string(), Box::new(factory));
        tracing::debug!("Registered unit {} in domain {}", name, domain);
        Ok(())
    }

    /// All registered domains, sorted
    pub fn domains(&self) -> Vec<&str> {
        self.domains.keys().map(String::as_str).collect()
    }

    /// Instantiate every unit of `domain`, sorted by unit name
    pub fn discover(
        &self,
        domain: &str,
        ctx: &UnitContext,
    ) -> Result<Vec<Box<dyn ProviderUnit>>, RegistryError> {
        let Some(factories) = self.domains.get(domain) else {
            return Err(RegistryError::UnknownDomain(domain.to_string()));
        };

        let mut units: Vec<Box<dyn ProviderUnit>> =
            factories.values().map(|factory| factory(ctx)).collect();
        units.sort_by(|a, b| a.name().cmp(b.name()));

        tracing::debug!(
            "Discovered {} units for domain {} in {}",
            units.len(),
            domain,
            ctx.region
        );
        Ok(units)
    }
}

impl fmt::Debug for UnitRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: BTreeMap<&str, Vec<&str>> = self
            .domains
            .iter()
            .map(|(domain, units)| (domain.as_str(), units.keys().map(String::as_str).collect()))
            .collect();
        f.debug_struct("UnitRegistry").field("domains", &names).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Resource;
    use crate::resource::UnitError;
    use async_trait::async_trait;

    struct Named(String);

    #[async_trait]
    impl ProviderUnit for Named {
        fn name(&self) -> &str {
            &self.0
        }

        async fn produce_nodes(&self) -> Result<Vec<Resource>, UnitError> {
            Ok(Vec::new())
        }
    }

    fn context() -> UnitContext {
        UnitContext::new(
            "eu-west-1",
            Arc::new(MemoryCache::default()),
            Arc::new(MemoryCache::default()),
        )
    }

    fn named(name: &'static str) -> impl Fn(&UnitContext) -> Box<dyn ProviderUnit> + Send + Sync {
        move |_: &UnitContext| -> Box<dyn ProviderUnit> { Box::new(Named(name.to_string())) }
    }

    #[test]
    fn test_discover_sorts_by_name() {
        let mut registry = UnitRegistry::new();
        registry.register("network", "subnets", named("subnets")).unwrap();
        registry.register("network", "endpoints", named("endpoints")).unwrap();
        registry.register("network", "route_tables", named("route_tables")).unwrap();

        let units = registry.discover("network", &context()).unwrap();
        let names: Vec<&str> = units.iter().map(|u| u.name()).collect();
        assert_eq!(names, vec!["endpoints", "route_tables", "subnets"]);
    }

    #[test]
    fn test_duplicate_name_is_rejected() {
        let mut registry = UnitRegistry::new();
        registry.register("network", "subnets", named("subnets")).unwrap();
        let err = registry
            .register("network", "subnets", named("subnets"))
            .unwrap_err();
        assert_eq!(
            err,
            RegistryError::DuplicateUnit {
                domain: "network".into(),
                unit: "subnets".into()
            }
        );

        // Same name in another domain is fine
        registry.register("security", "subnets", named("subnets")).unwrap();
        assert_eq!(registry.domains(), vec!["network", "security"]);
    }

    #[test]
    fn test_unknown_domain() {
        let registry = UnitRegistry::new();
        assert!(matches!(
            registry.discover("nope", &context()),
            Err(RegistryError::UnknownDomain(_))
        ));
    }
}
