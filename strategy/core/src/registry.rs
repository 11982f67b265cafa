//! Adapter Registry
//!
//! Catalog of registered adapters, their descriptors and their health
//! records. Registration creates the descriptor binding and the health record
//! together, and unregistration removes both, so every registered adapter has
//! exactly one health record at all times.
//!
//! Iteration order is registration order. Ranking relies on it to break ties
//! deterministically.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::adapter::{ModelAdapter, ModelDescriptor, SystemResources, Tier};
use crate::error::{StrategyError, StrategyResult};
use crate::health::{AdapterHealth, HealthCell};

/// Runtime binding of a descriptor to a live adapter
pub struct AdapterHandle {
    descriptor: Arc<ModelDescriptor>,
    adapter: Arc<dyn ModelAdapter>,
    health: Arc<HealthCell>,
}

impl AdapterHandle {
    /// Adapter id
    #[must_use]
    pub fn id(&self) -> &str {
        &self.descriptor.id
    }

    /// Declared capabilities
    #[must_use]
    pub fn descriptor(&self) -> &ModelDescriptor {
        &self.descriptor
    }

    /// The callable adapter
    #[must_use]
    pub fn adapter(&self) -> Arc<dyn ModelAdapter> {
        Arc::clone(&self.adapter)
    }

    /// Health slot of this adapter
    #[must_use]
    pub fn health_cell(&self) -> &Arc<HealthCell> {
        &self.health
    }

    /// Current health record
    #[must_use]
    pub fn health(&self) -> AdapterHealth {
        self.health.snapshot()
    }
}

impl std::fmt::Debug for AdapterHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterHandle")
            .field("id", &self.descriptor.id)
            .field("tier", &self.descriptor.tier)
            .finish_non_exhaustive()
    }
}

/// Registry of adapters in registration order
#[derive(Default)]
pub struct AdapterRegistry {
    handles: RwLock<Vec<Arc<AdapterHandle>>>,
}

impl AdapterRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under `descriptor`.
    ///
    /// # Errors
    ///
    /// Returns `StrategyError::InvalidDescriptor` if a required field is empty
    /// or the id is already registered.
    pub fn register(
        &self,
        descriptor: ModelDescriptor,
        adapter: Arc<dyn ModelAdapter>,
    ) -> StrategyResult<()> {
        descriptor.validate()?;

        let mut handles = self.handles.write();
        if handles.iter().any(|h| h.id() == descriptor.id) {
            return Err(StrategyError::InvalidDescriptor(format!(
                "adapter '{}' is already registered",
                descriptor.id
            )));
        }

        tracing::info!(
            adapter = %descriptor.id,
            tier = %descriptor.tier,
            requires_internet = descriptor.requires_internet,
            "Registered adapter"
        );

        let health = Arc::new(HealthCell::new(descriptor.id.clone()));
        handles.push(Arc::new(AdapterHandle {
            descriptor: Arc::new(descriptor),
            adapter,
            health,
        }));
        Ok(())
    }

    /// Register an adapter using the descriptor it reports
    ///
    /// # Errors
    ///
    /// Same as [`register`](Self::register).
    pub fn register_adapter(&self, adapter: Arc<dyn ModelAdapter>) -> StrategyResult<()> {
        let descriptor = adapter.capabilities();
        self.register(descriptor, adapter)
    }

    /// Remove an adapter and its health record. Returns `true` if it existed.
    pub fn unregister(&self, id: &str) -> bool {
        let mut handles = self.handles.write();
        let before = handles.len();
        handles.retain(|h| h.id() != id);
        let removed = handles.len() != before;
        if removed {
            tracing::info!(adapter = %id, "Unregistered adapter");
        }
        removed
    }

    /// Look up an adapter
    ///
    /// # Errors
    ///
    /// Returns `StrategyError::ModelNotFound` if `id` is not registered.
    pub fn get(&self, id: &str) -> StrategyResult<Arc<AdapterHandle>> {
        self.handles
            .read()
            .iter()
            .find(|h| h.id() == id)
            .cloned()
            .ok_or_else(|| StrategyError::ModelNotFound(id.to_string()))
    }

    /// Whether `id` is registered
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.handles.read().iter().any(|h| h.id() == id)
    }

    /// All handles in registration order
    #[must_use]
    pub fn all(&self) -> Vec<Arc<AdapterHandle>> {
        self.handles.read().clone()
    }

    /// All ids in registration order
    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        self.handles.read().iter().map(|h| h.id().to_string()).collect()
    }

    /// Current health of `id`, `None` if not registered
    #[must_use]
    pub fn health(&self, id: &str) -> Option<AdapterHealth> {
        self.handles
            .read()
            .iter()
            .find(|h| h.id() == id)
            .map(|h| h.health())
    }

    /// Health records of every adapter, in registration order
    #[must_use]
    pub fn all_health(&self) -> Vec<AdapterHealth> {
        self.handles.read().iter().map(|h| h.health()).collect()
    }

    /// Number of registered adapters
    #[must_use]
    pub fn len(&self) -> usize {
        self.handles.read().len()
    }

    /// Whether no adapter is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handles.read().is_empty()
    }

    /// Ids of adapters that may run on this system, in registration order.
    ///
    /// Excludes adapters whose tier exceeds `system_tier`, adapters needing
    /// the internet while offline mode is enforced, and adapters whose
    /// resource requirements are not met.
    #[must_use]
    pub fn eligible_for(
        &self,
        system_tier: Tier,
        offline_mode_enforced: bool,
        system_resources: &SystemResources,
    ) -> Vec<String> {
        self.handles
            .read()
            .iter()
            .filter(|h| {
                let d = h.descriptor();
                if !system_tier.permits(d.tier) {
                    tracing::trace!(adapter = %d.id, tier = %d.tier, "Excluded by tier");
                    return false;
                }
                if offline_mode_enforced && d.requires_internet {
                    tracing::trace!(adapter = %d.id, "Excluded by offline mode");
                    return false;
                }
                if !d.resources.satisfied_by(system_resources) {
                    tracing::trace!(adapter = %d.id, "Excluded by resource requirements");
                    return false;
                }
                true
            })
            .map(|h| h.id().to_string())
            .collect()
    }
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("adapters", &self.ids())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::ResourceRequirements;
    use crate::health::HealthStatus;
    use crate::test_utils::ScriptedAdapter;

    fn register(registry: &AdapterRegistry, descriptor: ModelDescriptor) {
        let adapter = ScriptedAdapter::new(&descriptor.id);
        registry.register(descriptor, adapter).unwrap();
    }

    #[test]
    fn test_register_creates_health_record() {
        let registry = AdapterRegistry::new();
        register(&registry, ModelDescriptor::new("a", "A"));

        let health = registry.health("a").unwrap();
        assert_eq!(health.status, HealthStatus::Unknown);
        assert!(!health.available);
        assert_eq!(registry.all_health().len(), registry.len());
    }

    #[test]
    fn test_register_rejects_invalid_and_duplicate() {
        let registry = AdapterRegistry::new();
        let bad = ModelDescriptor::new("", "Nameless");
        assert!(matches!(
            registry.register(bad, ScriptedAdapter::new("x")),
            Err(StrategyError::InvalidDescriptor(_))
        ));

        register(&registry, ModelDescriptor::new("a", "A"));
        let dup = registry.register(ModelDescriptor::new("a", "A again"), ScriptedAdapter::new("a"));
        assert!(dup.is_err());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_register_adapter_uses_capabilities() {
        let registry = AdapterRegistry::new();
        let adapter = ScriptedAdapter::with_descriptor(
            ModelDescriptor::new("self-described", "Self").with_tier(Tier::Pro),
        );
        registry.register_adapter(adapter).unwrap();
        assert_eq!(registry.get("self-described").unwrap().descriptor().tier, Tier::Pro);
    }

    #[test]
    fn test_get_unknown() {
        let registry = AdapterRegistry::new();
        assert!(matches!(
            registry.get("missing"),
            Err(StrategyError::ModelNotFound(id)) if id == "missing"
        ));
    }

    #[test]
    fn test_unregister_removes_health() {
        let registry = AdapterRegistry::new();
        register(&registry, ModelDescriptor::new("a", "A"));
        assert!(registry.unregister("a"));
        assert!(registry.health("a").is_none());
        assert!(!registry.unregister("a"));
    }

    #[test]
    fn test_tier_monotonicity() {
        let registry = AdapterRegistry::new();
        register(
            &registry,
            ModelDescriptor::new("ent", "Enterprise").with_tier(Tier::Enterprise),
        );
        let resources = SystemResources::default();

        assert!(registry.eligible_for(Tier::Core, false, &resources).is_empty());
        assert!(registry.eligible_for(Tier::Pro, false, &resources).is_empty());
        assert_eq!(
            registry.eligible_for(Tier::Enterprise, false, &resources),
            vec!["ent".to_string()]
        );
    }

    #[test]
    fn test_offline_and_resource_filtering() {
        let registry = AdapterRegistry::new();
        register(&registry, ModelDescriptor::new("cloud", "Cloud").with_internet(true));
        register(
            &registry,
            ModelDescriptor::new("gpu", "GPU").with_resources(ResourceRequirements::new(1000, 1, 8000)),
        );
        register(
            &registry,
            ModelDescriptor::new("cpu", "CPU").with_resources(ResourceRequirements::new(1000, 1, 0)),
        );
        let resources = SystemResources {
            ram_mb: 4000,
            cpu_cores: 2,
            gpu_mb: 0,
        };

        assert_eq!(
            registry.eligible_for(Tier::Core, true, &resources),
            vec!["cpu".to_string()]
        );
        assert_eq!(
            registry.eligible_for(Tier::Core, false, &resources),
            vec!["cloud".to_string(), "cpu".to_string()]
        );
    }
}
