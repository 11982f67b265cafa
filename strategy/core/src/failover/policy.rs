//! Failover Policies
//!
//! A policy is a list of conditions and a list of actions. The engine picks
//! the highest-priority enabled policy whose every condition holds for the
//! failed adapter and the failure context. An empty condition list always
//! matches.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::config::DEFAULT_CRITICAL_FAILURES;
use crate::health::AdapterHealth;

/// Why and for what a failover is being considered
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailoverContext {
    /// Failure reason (e.g. `timeout`, `invocation_error`)
    pub reason: String,
    /// Task type of the request being served
    pub task_type: Option<String>,
}

impl FailoverContext {
    /// Create a context
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            task_type: None,
        }
    }

    /// Set the task type
    #[must_use]
    pub fn with_task_type(mut self, task_type: impl Into<String>) -> Self {
        self.task_type = Some(task_type.into());
        self
    }
}

/// A single policy condition
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FailoverCondition {
    /// Adapter availability equals `value`
    Availability {
        /// Expected availability
        value: bool,
    },
    /// Error rate is at least `threshold`
    ErrorRate {
        /// Minimum error rate
        threshold: f64,
    },
    /// Consecutive failed probes are at least `threshold`
    ConsecutiveFailures {
        /// Minimum failures
        threshold: u32,
    },
    /// Failure reason equals `value`
    Reason {
        /// Expected reason
        value: String,
    },
    /// Task type equals `value`
    TaskType {
        /// Expected task type
        value: String,
    },
}

impl FailoverCondition {
    /// Whether the condition holds
    #[must_use]
    pub fn matches(&self, health: &AdapterHealth, context: &FailoverContext) -> bool {
        match self {
            Self::Availability { value } => health.available == *value,
            Self::ErrorRate { threshold } => health.metrics.error_rate >= *threshold,
            Self::ConsecutiveFailures { threshold } => health.consecutive_failures >= *threshold,
            Self::Reason { value } => context.reason == *value,
            Self::TaskType { value } => context.task_type.as_deref() == Some(value.as_str()),
        }
    }
}

/// How a failover target is chosen
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum TargetStrategy {
    /// Next usable member after the source, wrapping around
    NextInGroup,
    /// Usable member with the best success/error/latency score
    BestPerformer,
    /// One named adapter
    Specific {
        /// Target adapter
        adapter_id: String,
    },
    /// First usable adapter of an explicit list
    FallbackChain {
        /// Ordered candidates
        chain: Vec<String>,
    },
}

/// Policy action
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FailoverAction {
    /// Move traffic to a target chosen by `target`
    Failover {
        /// Target selection strategy
        target: TargetStrategy,
    },
}

/// A condition/action failover rule
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FailoverPolicy {
    /// Policy id
    pub id: String,
    /// Higher priorities are evaluated first
    pub priority: i32,
    /// Disabled policies never match
    #[serde(default = "enabled_default")]
    pub enabled: bool,
    /// All must hold
    #[serde(default)]
    pub conditions: Vec<FailoverCondition>,
    /// Actions, the first failover action wins
    pub actions: Vec<FailoverAction>,
}

fn enabled_default() -> bool {
    true
}

impl FailoverPolicy {
    /// Create an enabled policy without conditions or actions
    pub fn new(id: impl Into<String>, priority: i32) -> Self {
        Self {
            id: id.into(),
            priority,
            enabled: true,
            conditions: Vec::new(),
            actions: Vec::new(),
        }
    }

    /// Add a condition
    #[must_use]
    pub fn when(mut self, condition: FailoverCondition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Add a failover action
    #[must_use]
    pub fn failover_to(mut self, target: TargetStrategy) -> Self {
        self.actions.push(FailoverAction::Failover { target });
        self
    }

    /// Enable or disable the policy
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Built-in policies for the default critical threshold
    #[must_use]
    pub fn defaults() -> Vec<Self> {
        Self::defaults_for(DEFAULT_CRITICAL_FAILURES)
    }

    /// Built-in policies: adapters with at least `critical_failures` failed
    /// probes in a row go to the best performer, everything else rotates
    /// through the group.
    #[must_use]
    pub fn defaults_for(critical_failures: u32) -> Vec<Self> {
        vec![
            Self::new("persistent-failure", 100)
                .when(FailoverCondition::ConsecutiveFailures {
                    threshold: critical_failures,
                })
                .failover_to(TargetStrategy::BestPerformer),
            Self::new("default", 0).failover_to(TargetStrategy::NextInGroup),
        ]
    }

    /// Whether the policy applies
    #[must_use]
    pub fn matches(&self, health: &AdapterHealth, context: &FailoverContext) -> bool {
        self.enabled && self.conditions.iter().all(|c| c.matches(health, context))
    }

    /// Target strategy of the first failover action
    #[must_use]
    pub fn target_strategy(&self) -> Option<&TargetStrategy> {
        self.actions.iter().find_map(|action| match action {
            FailoverAction::Failover { target } => Some(target),
        })
    }
}

/// Evaluates policies in priority order
#[derive(Debug, Default)]
pub struct FailoverPolicyEngine {
    policies: RwLock<Vec<FailoverPolicy>>,
}

impl FailoverPolicyEngine {
    /// Create an engine over `policies`
    #[must_use]
    pub fn new(policies: Vec<FailoverPolicy>) -> Self {
        let engine = Self::default();
        engine.reload(policies);
        engine
    }

    /// Replace the policy set
    pub fn reload(&self, mut policies: Vec<FailoverPolicy>) {
        // Stable sort keeps configuration order among equal priorities
        policies.sort_by(|a, b| b.priority.cmp(&a.priority));
        tracing::debug!(policies = policies.len(), "Loaded failover policies");
        *self.policies.write() = policies;
    }

    /// Policies in evaluation order
    #[must_use]
    pub fn policies(&self) -> Vec<FailoverPolicy> {
        self.policies.read().clone()
    }

    /// Highest-priority enabled policy matching `health` and `context`
    #[must_use]
    pub fn evaluate(&self, health: &AdapterHealth, context: &FailoverContext) -> Option<FailoverPolicy> {
        self.policies
            .read()
            .iter()
            .find(|policy| policy.matches(health, context))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HealthConfig;

    fn failing_health(failures: u32) -> AdapterHealth {
        let mut health = AdapterHealth::new("a");
        for _ in 0..failures {
            health.apply_probe(false, None, &HealthConfig::default());
        }
        health
    }

    #[test]
    fn test_conditions() {
        let health = failing_health(3);
        let ctx = FailoverContext::new("timeout").with_task_type("code");

        assert!(FailoverCondition::Availability { value: false }.matches(&health, &ctx));
        assert!(FailoverCondition::ConsecutiveFailures { threshold: 3 }.matches(&health, &ctx));
        assert!(!FailoverCondition::ConsecutiveFailures { threshold: 4 }.matches(&health, &ctx));
        assert!(FailoverCondition::ErrorRate { threshold: 0.0 }.matches(&health, &ctx));
        assert!(FailoverCondition::Reason { value: "timeout".into() }.matches(&health, &ctx));
        assert!(FailoverCondition::TaskType { value: "code".into() }.matches(&health, &ctx));
        assert!(!FailoverCondition::TaskType { value: "chat".into() }
            .matches(&health, &FailoverContext::new("timeout")));
    }

    #[test]
    fn test_highest_priority_match_wins() {
        let engine = FailoverPolicyEngine::new(FailoverPolicy::defaults());
        let ctx = FailoverContext::new("invocation_error");

        let policy = engine.evaluate(&failing_health(1), &ctx).unwrap();
        assert_eq!(policy.id, "default");
        assert_eq!(policy.target_strategy(), Some(&TargetStrategy::NextInGroup));

        let policy = engine.evaluate(&failing_health(5), &ctx).unwrap();
        assert_eq!(policy.id, "persistent-failure");
        assert_eq!(policy.target_strategy(), Some(&TargetStrategy::BestPerformer));
    }

    #[test]
    fn test_disabled_and_unmatched_policies() {
        let engine = FailoverPolicyEngine::new(vec![
            FailoverPolicy::new("off", 10)
                .failover_to(TargetStrategy::BestPerformer)
                .with_enabled(false),
            FailoverPolicy::new("timeouts", 5)
                .when(FailoverCondition::Reason { value: "timeout".into() })
                .failover_to(TargetStrategy::NextInGroup),
        ]);
        let health = failing_health(1);
        assert!(engine.evaluate(&health, &FailoverContext::new("invocation_error")).is_none());
        assert_eq!(
            engine.evaluate(&health, &FailoverContext::new("timeout")).unwrap().id,
            "timeouts"
        );
    }

    #[test]
    fn test_reload_orders_by_priority() {
        let engine = FailoverPolicyEngine::default();
        engine.reload(vec![
            FailoverPolicy::new("low", 1),
            FailoverPolicy::new("high", 9),
            FailoverPolicy::new("low-second", 1),
        ]);
        let ids: Vec<String> = engine.policies().into_iter().map(|p| p.id).collect();
        assert_eq!(ids, vec!["high", "low", "low-second"]);
    }

    #[test]
    fn test_policy_from_config_json() {
        let policy: FailoverPolicy = serde_json::from_value(serde_json::json!({
            "id": "chain",
            "priority": 50,
            "conditions": [{"type": "error_rate", "threshold": 0.5}],
            "actions": [{"type": "failover", "target": {"strategy": "fallback_chain", "chain": ["b", "c"]}}]
        }))
        .unwrap();
        assert!(policy.enabled);
        assert_eq!(
            policy.target_strategy(),
            Some(&TargetStrategy::FallbackChain {
                chain: vec!["b".into(), "c".into()]
            })
        );
    }
}
