//! Strategy Runtime
//!
//! Builds every component once from a [`StrategyConfig`] and shares them by
//! `Arc`. Nothing in the crate relies on global state; embedders construct a
//! runtime at startup and pass it (or its parts) to whoever needs them.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::adapter::{ModelAdapter, ModelDescriptor, ModelResponse};
use crate::cache::ResponseCache;
use crate::config::StrategyConfig;
use crate::error::StrategyResult;
use crate::events::{EventBus, StrategyEvent};
use crate::failover::{FailoverGroupRegistry, FailoverManager, FailoverPolicyEngine};
use crate::health::{HealthMonitor, MetricsAnalyzer};
use crate::metrics::{CallStats, FailoverLedger};
use crate::persistence::PersistenceGateway;
use crate::registry::AdapterRegistry;
use crate::security::SecurityValidator;
use crate::strategy::{CallOptions, ModelStrategyManager, RequestContext};

/// Builder for [`StrategyRuntime`]
#[must_use]
pub struct StrategyRuntimeBuilder {
    config: StrategyConfig,
    persistence: Option<Arc<dyn PersistenceGateway>>,
    security: Option<Arc<dyn SecurityValidator>>,
    events: EventBus,
}

impl StrategyRuntimeBuilder {
    /// Persist failover snapshots through `gateway`
    pub fn with_persistence(mut self, gateway: Arc<dyn PersistenceGateway>) -> Self {
        self.persistence = Some(gateway);
        self
    }

    /// Validate every request with `validator`
    pub fn with_security(mut self, validator: Arc<dyn SecurityValidator>) -> Self {
        self.security = Some(validator);
        self
    }

    /// Publish on an existing bus
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    /// Construct every component
    pub fn build(self) -> StrategyRuntime {
        let Self {
            config,
            persistence,
            security,
            events,
        } = self;

        let registry = Arc::new(AdapterRegistry::new());
        let cache = Arc::new(ResponseCache::new(config.cache.clone()));
        let call_stats = Arc::new(CallStats::new());
        let ledger = Arc::new(
            FailoverLedger::new(
                config.failover.max_history,
                config.failover.snapshot_history,
            )
            .with_retained_snapshots(config.failover.retained_snapshots),
        );

        let analyzer: Arc<dyn MetricsAnalyzer> = call_stats.clone();
        let monitor = Arc::new(
            HealthMonitor::new(Arc::clone(&registry), config.health.clone(), events.clone())
                .with_analyzer(analyzer),
        );

        let failover = Arc::new(
            FailoverManager::new(
                Arc::clone(&registry),
                FailoverPolicyEngine::new(config.failover.policies.clone()),
                FailoverGroupRegistry::new(config.failover.groups.clone()),
                Arc::clone(&ledger),
                events.clone(),
            )
            .with_probe_timeout(config.health.probe_timeout()),
        );

        let mut manager = ModelStrategyManager::new(
            config.clone(),
            Arc::clone(&registry),
            Arc::clone(&cache),
            events.clone(),
        )
        .with_failover(Arc::clone(&failover))
        .with_call_stats(Arc::clone(&call_stats));
        if let Some(validator) = security {
            manager = manager.with_security(validator);
        }

        StrategyRuntime {
            config,
            registry,
            cache,
            call_stats,
            monitor,
            ledger,
            failover,
            manager: Arc::new(manager),
            persistence,
            events,
            persist_task: Mutex::new(None),
        }
    }
}

/// All strategy components wired together
pub struct StrategyRuntime {
    config: StrategyConfig,
    registry: Arc<AdapterRegistry>,
    cache: Arc<ResponseCache>,
    call_stats: Arc<CallStats>,
    monitor: Arc<HealthMonitor>,
    ledger: Arc<FailoverLedger>,
    failover: Arc<FailoverManager>,
    manager: Arc<ModelStrategyManager>,
    persistence: Option<Arc<dyn PersistenceGateway>>,
    events: EventBus,
    persist_task: Mutex<Option<JoinHandle<()>>>,
}

impl StrategyRuntime {
    /// Start building a runtime
    pub fn builder(config: StrategyConfig) -> StrategyRuntimeBuilder {
        StrategyRuntimeBuilder {
            config,
            persistence: None,
            security: None,
            events: EventBus::default(),
        }
    }

    /// Runtime without persistence or security hook
    #[must_use]
    pub fn new(config: StrategyConfig) -> Self {
        Self::builder(config).build()
    }

    /// Restore persisted failover state, start health probing and periodic
    /// persistence. Restore failures are logged and ignored. Persisted state
    /// is merged only on the first call; later calls restart the tasks.
    pub async fn initialize(&self) {
        if let Some(gateway) = &self.persistence {
            self.ledger.load_latest(gateway.as_ref()).await;

            if let Some(period) = self.config.failover.persist_interval() {
                let task = self.ledger.spawn_persistence(Arc::clone(gateway), period);
                if let Some(previous) = self.persist_task.lock().replace(task) {
                    previous.abort();
                }
            }
        }

        self.monitor.start();
        tracing::info!(
            adapters = self.registry.len(),
            tier = %self.config.system_tier,
            offline_mode = self.config.offline_mode,
            "Strategy runtime initialized"
        );
    }

    /// Stop background tasks and persist a final snapshot
    pub async fn shutdown(&self) {
        self.monitor.stop();
        let task = self.persist_task.lock().take();
        if let Some(task) = task {
            task.abort();
        }
        if let Some(gateway) = &self.persistence {
            self.ledger.persist(gateway.as_ref()).await;
        }
        tracing::info!("Strategy runtime shut down");
    }

    /// Register an adapter. A running monitor starts probing it immediately.
    ///
    /// # Errors
    ///
    /// Returns `StrategyError::InvalidDescriptor` for bad or duplicate
    /// descriptors.
    pub fn register(
        &self,
        descriptor: ModelDescriptor,
        adapter: Arc<dyn ModelAdapter>,
    ) -> StrategyResult<()> {
        let id = descriptor.id.clone();
        self.registry.register(descriptor, adapter)?;
        if self.monitor.is_running() {
            self.monitor.watch(&id);
        }
        Ok(())
    }

    /// Best adapter for `context`
    ///
    /// # Errors
    ///
    /// See [`ModelStrategyManager::select_model`].
    pub fn select_model(&self, context: &RequestContext) -> StrategyResult<String> {
        self.manager.select_model(context)
    }

    /// Invoke an adapter with fallback
    ///
    /// # Errors
    ///
    /// See [`ModelStrategyManager::call_model`].
    pub async fn call_model(&self, options: CallOptions) -> StrategyResult<ModelResponse> {
        self.manager.call_model(options).await
    }

    /// Configuration in use
    #[must_use]
    pub fn config(&self) -> &StrategyConfig {
        &self.config
    }

    /// Adapter registry
    #[must_use]
    pub fn registry(&self) -> &Arc<AdapterRegistry> {
        &self.registry
    }

    /// Response cache
    #[must_use]
    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    /// Per-adapter call statistics
    #[must_use]
    pub fn call_stats(&self) -> &Arc<CallStats> {
        &self.call_stats
    }

    /// Health monitor
    #[must_use]
    pub fn monitor(&self) -> &Arc<HealthMonitor> {
        &self.monitor
    }

    /// Failover ledger
    #[must_use]
    pub fn ledger(&self) -> &Arc<FailoverLedger> {
        &self.ledger
    }

    /// Failover manager
    #[must_use]
    pub fn failover(&self) -> &Arc<FailoverManager> {
        &self.failover
    }

    /// Strategy manager
    #[must_use]
    pub fn manager(&self) -> &Arc<ModelStrategyManager> {
        &self.manager
    }

    /// Event bus
    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Subscribe to strategy events
    #[must_use]
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<StrategyEvent> {
        self.events.subscribe()
    }
}

impl std::fmt::Debug for StrategyRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyRuntime")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("monitor", &self.monitor)
            .finish_non_exhaustive()
    }
}
