//! Health Monitor
//!
//! Probes every registered adapter on a fixed interval, folds the probe and
//! the latest call metrics into the adapter's [`AdapterHealth`] record and
//! publishes a [`StrategyEvent::HealthUpdate`] when availability flips.
//!
//! Each adapter gets its own background task. A tick that finds the previous
//! probe of the same adapter still running is skipped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::record::{AdapterHealth, HealthMetrics, HealthStatus, HealthTransition};
use crate::adapter::ModelAdapter;
use crate::config::HealthConfig;
use crate::error::StrategyResult;
use crate::events::{EventBus, StrategyEvent};
use crate::registry::AdapterRegistry;

// ============================================================================
// Metrics Analyzer
// ============================================================================

/// Aggregated call metrics of one adapter
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AdapterMetrics {
    /// Requests sent to the adapter
    pub total_requests: u64,
    /// Requests that succeeded
    pub successful_requests: u64,
    /// Requests that failed
    pub failed_requests: u64,
    /// Average latency in milliseconds
    pub average_latency_ms: f64,
}

impl AdapterMetrics {
    /// Convert to health metrics, `None` when no request was observed
    #[must_use]
    pub fn to_health_metrics(&self) -> Option<HealthMetrics> {
        if self.total_requests == 0 {
            return None;
        }
        let total = self.total_requests as f64;
        Some(HealthMetrics {
            success_rate: self.successful_requests as f64 / total,
            average_latency_ms: self.average_latency_ms,
            error_rate: self.failed_requests as f64 / total,
        })
    }
}

/// Source of live call metrics consumed by the monitor
#[async_trait]
pub trait MetricsAnalyzer: Send + Sync {
    /// Metrics for `adapter_id`, `None` if unavailable
    async fn adapter_metrics(&self, adapter_id: &str) -> Option<AdapterMetrics>;
}

// ============================================================================
// Summary
// ============================================================================

/// Number of adapters per health status
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthSummary {
    /// Not probed yet
    pub unknown: usize,
    /// Healthy
    pub healthy: usize,
    /// Degraded
    pub degraded: usize,
    /// Warning
    pub warning: usize,
    /// Critical
    pub critical: usize,
}

impl HealthSummary {
    fn count(&mut self, status: HealthStatus) {
        match status {
            HealthStatus::Unknown => self.unknown += 1,
            HealthStatus::Healthy => self.healthy += 1,
            HealthStatus::Degraded => self.degraded += 1,
            HealthStatus::Warning => self.warning += 1,
            HealthStatus::Critical => self.critical += 1,
        }
    }

    /// Total adapters counted
    #[must_use]
    pub fn total(&self) -> usize {
        self.unknown + self.healthy + self.degraded + self.warning + self.critical
    }
}

// ============================================================================
// Availability Check
// ============================================================================

/// Ask `adapter` whether it is available, bounded by `timeout`.
///
/// The check runs on its own task, so a panicking adapter only fails the
/// check. Panics and timeouts count as unavailable.
pub(crate) async fn check_availability(
    adapter_id: &str,
    adapter: Arc<dyn ModelAdapter>,
    timeout: Duration,
) -> bool {
    let mut check = tokio::spawn(async move { adapter.is_available().await });
    match tokio::time::timeout(timeout, &mut check).await {
        Ok(Ok(available)) => available,
        Ok(Err(e)) => {
            tracing::warn!(adapter = %adapter_id, error = %e, "Availability probe panicked");
            false
        }
        Err(_) => {
            check.abort();
            tracing::warn!(
                adapter = %adapter_id,
                timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                "Availability probe timed out"
            );
            false
        }
    }
}

// ============================================================================
// Monitor
// ============================================================================

/// Periodic health prober
pub struct HealthMonitor {
    registry: Arc<AdapterRegistry>,
    analyzer: Option<Arc<dyn MetricsAnalyzer>>,
    config: HealthConfig,
    events: EventBus,
    tasks: Mutex<HashMap<String, JoinHandle<()>>>,
    active: AtomicBool,
}

impl HealthMonitor {
    /// Create a monitor over `registry`
    #[must_use]
    pub fn new(registry: Arc<AdapterRegistry>, config: HealthConfig, events: EventBus) -> Self {
        Self {
            registry,
            analyzer: None,
            config,
            events,
            tasks: Mutex::new(HashMap::new()),
            active: AtomicBool::new(false),
        }
    }

    /// Attach a metrics analyzer
    #[must_use]
    pub fn with_analyzer(mut self, analyzer: Arc<dyn MetricsAnalyzer>) -> Self {
        self.analyzer = Some(analyzer);
        self
    }

    /// Thresholds in use
    #[must_use]
    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    /// Probe one adapter and update its record.
    ///
    /// Returns `Ok(None)` when a probe of the same adapter is already running.
    ///
    /// # Errors
    ///
    /// Returns `StrategyError::ModelNotFound` if `adapter_id` is not registered.
    pub async fn check_adapter(&self, adapter_id: &str) -> StrategyResult<Option<AdapterHealth>> {
        let handle = self.registry.get(adapter_id)?;
        let cell = Arc::clone(handle.health_cell());

        let Some(_gate) = cell.try_begin_probe() else {
            tracing::debug!(adapter = %adapter_id, "Previous probe still running, skipping tick");
            return Ok(None);
        };

        let available = self.probe(adapter_id, handle.adapter()).await;
        let metrics = self.fetch_metrics(adapter_id).await;

        let (record, transition) =
            cell.update(|health| health.apply_probe(available, metrics, &self.config));
        self.announce(&record, transition, true);

        Ok(Some(record))
    }

    /// Probe every registered adapter concurrently
    pub async fn check_all(&self) -> Vec<AdapterHealth> {
        let ids = self.registry.ids();
        let checks = ids.iter().map(|id| self.check_adapter(id));
        futures::future::join_all(checks)
            .await
            .into_iter()
            .filter_map(|result| result.ok().flatten())
            .collect()
    }

    /// Apply an externally reported health observation.
    ///
    /// # Errors
    ///
    /// Returns `StrategyError::ModelNotFound` if `adapter_id` is not registered.
    pub fn report_health(
        &self,
        adapter_id: &str,
        available: bool,
        metrics: Option<HealthMetrics>,
    ) -> StrategyResult<AdapterHealth> {
        let handle = self.registry.get(adapter_id)?;
        let (record, transition) = handle
            .health_cell()
            .update(|health| health.apply_probe(available, metrics, &self.config));
        self.announce(&record, transition, false);
        Ok(record)
    }

    /// Start one probing task per registered adapter
    pub fn start(self: &Arc<Self>) {
        self.active.store(true, Ordering::SeqCst);
        for id in self.registry.ids() {
            self.watch(&id);
        }
        tracing::info!(
            adapters = self.tasks.lock().len(),
            interval_ms = self.config.check_interval_ms,
            "Health monitoring started"
        );
    }

    /// Start probing `adapter_id` if it is not watched yet
    pub fn watch(self: &Arc<Self>, adapter_id: &str) {
        let mut tasks = self.tasks.lock();
        if tasks.get(adapter_id).is_some_and(|t| !t.is_finished()) {
            return;
        }

        let monitor: Weak<Self> = Arc::downgrade(self);
        let id = adapter_id.to_string();
        let period = self.config.check_interval();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let Some(monitor) = monitor.upgrade() else {
                    break;
                };
                if monitor.check_adapter(&id).await.is_err() {
                    tracing::debug!(adapter = %id, "Adapter unregistered, stopping probe task");
                    break;
                }
            }
        });
        tasks.insert(adapter_id.to_string(), task);
    }

    /// Stop all probing tasks
    pub fn stop(&self) {
        self.active.store(false, Ordering::SeqCst);
        let tasks: Vec<_> = self.tasks.lock().drain().collect();
        if tasks.is_empty() {
            return;
        }
        for (_, task) in &tasks {
            task.abort();
        }
        tracing::info!(adapters = tasks.len(), "Health monitoring stopped");
    }

    /// Whether monitoring was started and not stopped since
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Count adapters per status
    #[must_use]
    pub fn summary(&self) -> HealthSummary {
        let mut summary = HealthSummary::default();
        for health in self.registry.all_health() {
            summary.count(health.status);
        }
        summary
    }

    async fn probe(&self, adapter_id: &str, adapter: Arc<dyn ModelAdapter>) -> bool {
        check_availability(adapter_id, adapter, self.config.probe_timeout()).await
    }

    async fn fetch_metrics(&self, adapter_id: &str) -> Option<HealthMetrics> {
        let analyzer = self.analyzer.as_ref()?;
        match analyzer.adapter_metrics(adapter_id).await {
            Some(metrics) => metrics.to_health_metrics(),
            None => {
                tracing::debug!(adapter = %adapter_id, "No metrics available, keeping previous");
                None
            }
        }
    }

    fn announce(&self, record: &AdapterHealth, transition: HealthTransition, from_probe: bool) {
        if transition.status_changed {
            if matches!(record.status, HealthStatus::Warning | HealthStatus::Critical) {
                tracing::warn!(
                    adapter = %record.adapter_id,
                    from = transition.previous_status.as_str(),
                    to = record.status.as_str(),
                    consecutive_failures = record.consecutive_failures,
                    "Adapter health changed"
                );
            } else {
                tracing::info!(
                    adapter = %record.adapter_id,
                    from = transition.previous_status.as_str(),
                    to = record.status.as_str(),
                    "Adapter health changed"
                );
            }
        }

        if transition.availability_changed || (!from_probe && transition.status_changed) {
            self.events.publish(StrategyEvent::HealthUpdate {
                adapter_id: record.adapter_id.clone(),
                health: record.clone(),
                availability_changed: transition.availability_changed,
                timestamp: record.last_check.unwrap_or_else(Utc::now),
            });
        }
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        for (_, task) in self.tasks.get_mut().drain() {
            task.abort();
        }
    }
}

impl std::fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("config", &self.config)
            .field("watched", &self.tasks.lock().len())
            .finish_non_exhaustive()
    }
}
