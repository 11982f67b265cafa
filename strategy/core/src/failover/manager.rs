//! Failover Manager
//!
//! Resolves a substitute for a failed adapter and records the outcome.
//!
//! # Resolution
//!
//! 1. Find the first enabled group containing the source. No group, no target.
//! 2. Pick the highest-priority policy matching the source's health and the
//!    failure context. No policy, no target.
//! 3. Run the policy's target strategy over usable adapters (available and
//!    not critical). The source is never a candidate.
//!
//! Executing a failover asks the target directly whether it is available;
//! the recorded duration is the time that check took.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use super::groups::{FailoverGroup, FailoverGroupRegistry};
use super::policy::{FailoverContext, FailoverPolicyEngine, TargetStrategy};
use crate::events::{EventBus, StrategyEvent};
use crate::config::HealthConfig;
use crate::health::{check_availability, AdapterHealth, HealthMetrics};
use crate::metrics::{FailoverEvent, FailoverLedger};
use crate::registry::AdapterRegistry;

/// Weight of the success rate in the best-performer score
pub const SUCCESS_WEIGHT: f64 = 0.5;
/// Weight of the error rate in the best-performer score
pub const ERROR_WEIGHT: f64 = 0.3;
/// Weight of the normalized latency in the best-performer score
pub const LATENCY_WEIGHT: f64 = 0.2;
/// Latency that counts as 1.0 in the best-performer score
const LATENCY_SCALE_MS: f64 = 10_000.0;

/// Best-performer score of a set of metrics
#[must_use]
pub fn performance_score(metrics: &HealthMetrics) -> f64 {
    SUCCESS_WEIGHT * metrics.success_rate
        - ERROR_WEIGHT * metrics.error_rate
        - LATENCY_WEIGHT * (metrics.average_latency_ms / LATENCY_SCALE_MS)
}

/// Policy-driven failover resolution and bookkeeping
pub struct FailoverManager {
    registry: Arc<AdapterRegistry>,
    engine: FailoverPolicyEngine,
    groups: FailoverGroupRegistry,
    ledger: Arc<FailoverLedger>,
    check_timeout: Duration,
    events: EventBus,
}

impl FailoverManager {
    /// Create a manager
    #[must_use]
    pub fn new(
        registry: Arc<AdapterRegistry>,
        engine: FailoverPolicyEngine,
        groups: FailoverGroupRegistry,
        ledger: Arc<FailoverLedger>,
        events: EventBus,
    ) -> Self {
        Self {
            registry,
            engine,
            groups,
            ledger,
            check_timeout: HealthConfig::default().probe_timeout(),
            events,
        }
    }

    /// Bound the availability check of a failover target
    #[must_use]
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.check_timeout = timeout;
        self
    }

    /// Policy engine
    #[must_use]
    pub fn engine(&self) -> &FailoverPolicyEngine {
        &self.engine
    }

    /// Group registry
    #[must_use]
    pub fn groups(&self) -> &FailoverGroupRegistry {
        &self.groups
    }

    /// Failover history and counters
    #[must_use]
    pub fn ledger(&self) -> &Arc<FailoverLedger> {
        &self.ledger
    }

    /// Find a substitute for `source`, `None` if resolution fails at any step
    #[must_use]
    pub fn resolve_target(&self, source: &str, context: &FailoverContext) -> Option<String> {
        let Some(group) = self.groups.group_for(source) else {
            tracing::debug!(adapter = %source, "No enabled failover group for adapter");
            return None;
        };

        let health = self
            .registry
            .health(source)
            .unwrap_or_else(|| AdapterHealth::new(source));
        let Some(policy) = self.engine.evaluate(&health, context) else {
            tracing::debug!(adapter = %source, reason = %context.reason, "No failover policy matched");
            return None;
        };
        let strategy = policy.target_strategy()?;

        let target = match strategy {
            TargetStrategy::NextInGroup => self.next_in_group(source, &group),
            TargetStrategy::BestPerformer => self.best_performer(source, &group),
            TargetStrategy::Specific { adapter_id } => {
                (adapter_id != source && self.is_usable(adapter_id)).then(|| adapter_id.clone())
            }
            TargetStrategy::FallbackChain { chain } => chain
                .iter()
                .filter(|id| group.contains(id))
                .find(|id| id.as_str() != source && self.is_usable(id))
                .cloned(),
        };

        match &target {
            Some(target) => tracing::debug!(
                source = %source,
                target = %target,
                policy = %policy.id,
                "Resolved failover target"
            ),
            None => tracing::debug!(
                source = %source,
                policy = %policy.id,
                "Failover strategy found no usable target"
            ),
        }
        target
    }

    /// Record a failover from `source` to `target`.
    ///
    /// The failover succeeds when the target is usable by its health record
    /// and answers an availability check within the probe timeout. The event
    /// is appended to the ledger and published either way. Snapshots are
    /// persisted by the runtime, never on this path.
    pub async fn execute_failover(
        &self,
        source: &str,
        target: &str,
        context: &FailoverContext,
    ) -> FailoverEvent {
        let started = Instant::now();
        let success =
            target != source && self.is_usable(target) && self.check_target(target).await;
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let event = FailoverEvent::new(
            source,
            target,
            context.reason.clone(),
            context.task_type.clone(),
            success,
            duration_ms,
        );

        if success {
            tracing::info!(source = %source, target = %target, reason = %context.reason, "Failover executed");
        } else {
            tracing::warn!(source = %source, target = %target, reason = %context.reason, "Failover target not usable");
        }

        self.ledger.record(event.clone()).await;
        self.events.publish(StrategyEvent::Failover(event.clone()));
        event
    }

    /// Resolve and execute in one step, returning the target on success
    pub async fn failover(&self, source: &str, context: &FailoverContext) -> Option<String> {
        let target = self.resolve_target(source, context)?;
        let event = self.execute_failover(source, &target, context).await;
        event.success.then_some(target)
    }

    async fn check_target(&self, target: &str) -> bool {
        let Ok(handle) = self.registry.get(target) else {
            return false;
        };
        check_availability(target, handle.adapter(), self.check_timeout).await
    }

    fn is_usable(&self, adapter_id: &str) -> bool {
        self.registry
            .health(adapter_id)
            .is_some_and(|health| health.is_usable())
    }

    fn next_in_group(&self, source: &str, group: &FailoverGroup) -> Option<String> {
        let start = group.position(source)?;
        let len = group.members.len();
        (1..len)
            .map(|offset| &group.members[(start + offset) % len])
            .find(|id| id.as_str() != source && self.is_usable(id))
            .cloned()
    }

    fn best_performer(&self, source: &str, group: &FailoverGroup) -> Option<String> {
        let mut best: Option<(&String, f64)> = None;
        for id in group.members.iter().filter(|id| id.as_str() != source) {
            let Some(health) = self.registry.health(id).filter(AdapterHealth::is_usable) else {
                continue;
            };
            let score = performance_score(&health.metrics);
            // Strict comparison keeps the first of equal scores
            if best.is_none_or(|(_, top)| score > top) {
                best = Some((id, score));
            }
        }
        best.map(|(id, _)| id.clone())
    }
}

impl std::fmt::Debug for FailoverManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FailoverManager")
            .field("engine", &self.engine)
            .field("groups", &self.groups)
            .finish_non_exhaustive()
    }
}
