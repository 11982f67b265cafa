//! Integration tests for selection, invocation, caching and failover
//!
//! These drive the public API through [`StrategyRuntime`] with in-process
//! mock adapters, covering:
//! - Offline filtering and health-aware selection
//! - Response caching and expiry
//! - Timeouts, panics and the fallback search
//! - Policy-driven failover inside a group
//! - Persistence of failover history across runtimes

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use serde_json::Value;
use tokio::sync::broadcast::Receiver;
use tokio_test::{assert_err, assert_ok};

use strategy_core::persistence::{PersistenceResult, StoredEntry};
use strategy_core::{
    AccessPolicy, AdapterError, AdapterRequest, CacheConfig, CallOptions, FailoverCondition,
    FailoverGroup, FailoverPolicy, FilePersistence, HealthStatus, ModelDescriptor,
    PersistenceError, PersistenceGateway, RequestContext, StrategyConfig, StrategyError,
    StrategyEvent, StrategyRuntime, TargetStrategy, Tier,
};

use common::{init_tracing, Behavior, MockAdapter};

fn drain(rx: &mut Receiver<StrategyEvent>) -> Vec<StrategyEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn register(runtime: &StrategyRuntime, adapter: &Arc<MockAdapter>) {
    runtime
        .register(adapter.descriptor(), adapter.clone())
        .expect("registration should succeed");
}

// =============================================================================
// Selection
// =============================================================================

#[tokio::test]
async fn test_offline_mode_selects_local_adapter() {
    init_tracing();
    let runtime = StrategyRuntime::new(StrategyConfig::default().with_offline_mode(true));

    let cloud = MockAdapter::new(
        ModelDescriptor::new("cloud", "Cloud")
            .with_strengths(["code"])
            .with_internet(true),
        Behavior::Echo,
    );
    let local = MockAdapter::echo("local");
    register(&runtime, &cloud);
    register(&runtime, &local);

    let selected = runtime.select_model(&RequestContext::new("code")).unwrap();
    assert_eq!(selected, "local");
}

#[tokio::test]
async fn test_tier_and_critical_health_exclude_adapters() {
    init_tracing();
    let runtime = StrategyRuntime::new(StrategyConfig::default().with_system_tier(Tier::Pro));

    let enterprise = MockAdapter::new(
        ModelDescriptor::new("enterprise", "Enterprise").with_tier(Tier::Enterprise),
        Behavior::Echo,
    );
    let first = MockAdapter::echo("first");
    let second = MockAdapter::echo("second");
    register(&runtime, &enterprise);
    register(&runtime, &first);
    register(&runtime, &second);

    assert_eq!(runtime.select_model(&RequestContext::default()).unwrap(), "first");

    let threshold = runtime.config().health.critical_failure_threshold;
    for _ in 0..threshold {
        runtime.monitor().report_health("first", false, None).unwrap();
    }
    assert_eq!(
        runtime.registry().health("first").unwrap().status,
        HealthStatus::Critical
    );
    assert_eq!(runtime.select_model(&RequestContext::default()).unwrap(), "second");
}

#[tokio::test]
async fn test_no_eligible_model_publishes_error_event() {
    init_tracing();
    let runtime = StrategyRuntime::new(StrategyConfig::default());
    let mut events = runtime.subscribe();

    let err = runtime
        .select_model(&RequestContext::new("code"))
        .unwrap_err();
    assert!(matches!(err, StrategyError::NoEligibleModel { .. }));

    let published = drain(&mut events);
    assert_eq!(published.len(), 1);
    assert!(matches!(
        &published[0],
        StrategyEvent::Error { kind, adapter_id: None, .. } if kind == "no_eligible_model"
    ));
}

// =============================================================================
// Caching
// =============================================================================

#[tokio::test]
async fn test_cache_hit_returns_stored_response() {
    init_tracing();
    let runtime = StrategyRuntime::new(StrategyConfig::default());
    let adapter = MockAdapter::echo("local");
    register(&runtime, &adapter);

    let options = CallOptions::new("local", AdapterRequest::new("hello"));
    let first = runtime.call_model(options.clone()).await.unwrap();
    let second = runtime.call_model(options).await.unwrap();

    assert!(!first.metadata.cached);
    assert!(second.metadata.cached);
    assert_eq!(second.text, first.text);
    assert_eq!(adapter.calls(), 1);

    let stats = runtime.call_stats().get("local").unwrap();
    assert_eq!(stats.requests.get(), 1);
    assert_eq!(stats.cache_hits.get(), 1);
    assert_eq!(runtime.cache().stats().hits, 1);
}

#[tokio::test(start_paused = true)]
async fn test_expired_entry_is_not_served() {
    init_tracing();
    let config = StrategyConfig::default().with_cache(CacheConfig {
        enabled: true,
        max_size: 10,
        ttl_ms: 1_000,
    });
    let runtime = StrategyRuntime::new(config);
    let adapter = MockAdapter::echo("local");
    register(&runtime, &adapter);

    let options = CallOptions::new("local", AdapterRequest::new("hello"));
    runtime.call_model(options.clone()).await.unwrap();
    assert!(runtime.call_model(options.clone()).await.unwrap().metadata.cached);

    tokio::time::advance(Duration::from_millis(1_000)).await;

    let refreshed = runtime.call_model(options).await.unwrap();
    assert!(!refreshed.metadata.cached);
    assert_eq!(adapter.calls(), 2);
}

#[tokio::test]
async fn test_streaming_and_bypass_skip_cache() {
    init_tracing();
    let runtime = StrategyRuntime::new(StrategyConfig::default());
    let adapter = MockAdapter::echo("local");
    register(&runtime, &adapter);

    let streaming = CallOptions::new("local", AdapterRequest::new("hi").with_stream(true));
    runtime.call_model(streaming.clone()).await.unwrap();
    runtime.call_model(streaming).await.unwrap();

    let bypass = CallOptions::new("local", AdapterRequest::new("hi")).bypass_cache();
    runtime.call_model(bypass.clone()).await.unwrap();
    runtime.call_model(bypass).await.unwrap();

    assert_eq!(adapter.calls(), 4);
    assert!(runtime.cache().is_empty());
}

// =============================================================================
// Security
// =============================================================================

#[tokio::test]
async fn test_security_denial_never_reaches_adapter() {
    init_tracing();
    let runtime = StrategyRuntime::builder(StrategyConfig::default())
        .with_security(Arc::new(AccessPolicy::new().block("cloud")))
        .build();
    let cloud = MockAdapter::echo("cloud");
    let local = MockAdapter::echo("local");
    register(&runtime, &cloud);
    register(&runtime, &local);

    let err = assert_err!(
        runtime
            .call_model(CallOptions::new("cloud", AdapterRequest::new("secret")))
            .await
    );
    assert!(matches!(err, StrategyError::SecurityDenied { ref adapter_id, .. } if adapter_id == "cloud"));
    assert_eq!(cloud.calls(), 0);
    assert_eq!(local.calls(), 0);
    assert!(runtime.cache().is_empty());

    let allowed = assert_ok!(
        runtime
            .call_model(CallOptions::new("cloud", AdapterRequest::new("secret")).bypass_security())
            .await
    );
    assert_eq!(allowed.metadata.model_id, "cloud");
}

// =============================================================================
// Fallback
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_timeout_falls_back_to_alternate() {
    init_tracing();
    let config = StrategyConfig::default().with_call_timeout(Some(Duration::from_millis(100)));
    let runtime = StrategyRuntime::new(config);
    let slow = MockAdapter::new(
        ModelDescriptor::new("slow", "Slow"),
        Behavior::Slow(Duration::from_secs(10)),
    );
    let fast = MockAdapter::echo("fast");
    register(&runtime, &slow);
    register(&runtime, &fast);

    let response = runtime
        .call_model(CallOptions::new("slow", AdapterRequest::new("ping")))
        .await
        .unwrap();

    assert_eq!(response.metadata.model_id, "fast");
    assert!(response.metadata.fallback);
    assert_eq!(response.metadata.original_model_id.as_deref(), Some("slow"));
    assert_eq!(response.text, "fast: ping");

    let slow_stats = runtime.call_stats().get("slow").unwrap();
    assert_eq!(slow_stats.timeouts.get(), 1);
    assert_eq!(slow_stats.failures.get(), 1);
}

#[tokio::test]
async fn test_exhausted_fallbacks_report_both_errors() {
    init_tracing();
    let runtime = StrategyRuntime::new(StrategyConfig::default());
    let primary = MockAdapter::failing("primary");
    let backup = MockAdapter::new(
        ModelDescriptor::new("backup", "Backup"),
        Behavior::Fail(AdapterError::ConnectionFailed("refused".into())),
    );
    register(&runtime, &primary);
    register(&runtime, &backup);
    let mut events = runtime.subscribe();

    let err = runtime
        .call_model(CallOptions::new("primary", AdapterRequest::new("ping")))
        .await
        .unwrap_err();

    match err {
        StrategyError::AllFallbacksFailed {
            original_model_id,
            original,
            last,
        } => {
            assert_eq!(original_model_id, "primary");
            assert!(matches!(*original, StrategyError::AdapterInvocation { ref adapter_id, .. } if adapter_id == "primary"));
            let last = last.expect("backup was attempted");
            assert!(matches!(*last, StrategyError::AdapterInvocation { ref adapter_id, .. } if adapter_id == "backup"));
        }
        other => panic!("unexpected error: {other}"),
    }

    assert_eq!(backup.calls(), 1);
    assert!(runtime.cache().is_empty());

    let kinds: Vec<String> = drain(&mut events)
        .into_iter()
        .filter_map(|event| match event {
            StrategyEvent::Error { kind, .. } => Some(kind),
            _ => None,
        })
        .collect();
    assert_eq!(kinds, vec!["adapter_invocation", "all_fallbacks_failed"]);
}

#[tokio::test]
async fn test_adapter_panic_becomes_internal_error() {
    init_tracing();
    let runtime = StrategyRuntime::new(StrategyConfig::default());
    let adapter = MockAdapter::new(ModelDescriptor::new("fragile", "Fragile"), Behavior::Panic);
    register(&runtime, &adapter);

    let err = runtime
        .call_model(CallOptions::new("fragile", AdapterRequest::new("boom")))
        .await
        .unwrap_err();

    match err {
        StrategyError::AllFallbacksFailed { original, last, .. } => {
            assert!(matches!(
                *original,
                StrategyError::AdapterInvocation {
                    source: AdapterError::Internal(_),
                    ..
                }
            ));
            assert!(last.is_none());
        }
        other => panic!("unexpected error: {other}"),
    }

    // The runtime keeps serving after the panic
    adapter.set_behavior(Behavior::Echo);
    let response = runtime
        .call_model(CallOptions::new("fragile", AdapterRequest::new("again")))
        .await
        .unwrap();
    assert_eq!(response.text, "fragile: again");
}

#[tokio::test]
async fn test_unknown_adapter_is_not_found() {
    init_tracing();
    let runtime = StrategyRuntime::new(StrategyConfig::default());
    let err = runtime
        .call_model(CallOptions::new("ghost", AdapterRequest::new("hi")))
        .await
        .unwrap_err();
    assert!(matches!(err, StrategyError::ModelNotFound(ref id) if id == "ghost"));
}

// =============================================================================
// Policy Failover
// =============================================================================

fn grouped_config() -> StrategyConfig {
    let mut policies = FailoverPolicy::defaults();
    policies.push(
        FailoverPolicy::new("errors-to-z", 200)
            .when(FailoverCondition::Reason {
                value: "invocation_error".into(),
            })
            .failover_to(TargetStrategy::Specific {
                adapter_id: "z".into(),
            }),
    );
    StrategyConfig::default()
        .with_groups(vec![FailoverGroup::new("primary", ["x", "y", "z"])])
        .with_policies(policies)
}

#[tokio::test]
async fn test_policy_target_is_tried_before_ranked_candidates() {
    init_tracing();
    let runtime = StrategyRuntime::new(grouped_config());
    let x = MockAdapter::failing("x");
    let y = MockAdapter::echo("y");
    let z = MockAdapter::echo("z");
    for adapter in [&x, &y, &z] {
        register(&runtime, adapter);
    }
    runtime.monitor().check_all().await;
    let mut events = runtime.subscribe();

    let response = runtime
        .call_model(CallOptions::new("x", AdapterRequest::new("task")))
        .await
        .unwrap();

    assert_eq!(response.metadata.model_id, "z");
    assert!(response.metadata.fallback);
    assert_eq!(y.calls(), 0);

    let metrics = runtime.ledger().metrics().await;
    assert_eq!(metrics.total_failovers, 1);
    assert_eq!(metrics.successful_failovers, 1);
    assert_eq!(metrics.by_target.get("z"), Some(&1));
    assert_eq!(metrics.by_reason.get("invocation_error"), Some(&1));

    let failovers: Vec<_> = drain(&mut events)
        .into_iter()
        .filter_map(|event| match event {
            StrategyEvent::Failover(event) => Some(event),
            _ => None,
        })
        .collect();
    assert_eq!(failovers.len(), 1);
    assert_eq!(failovers[0].source, "x");
    assert_eq!(failovers[0].target, "z");
}

#[tokio::test(start_paused = true)]
async fn test_timeout_reason_uses_group_rotation() {
    init_tracing();
    let config = grouped_config().with_call_timeout(Some(Duration::from_millis(50)));
    let runtime = StrategyRuntime::new(config);
    let x = MockAdapter::new(
        ModelDescriptor::new("x", "x"),
        Behavior::Slow(Duration::from_secs(5)),
    );
    let y = MockAdapter::echo("y");
    let z = MockAdapter::echo("z");
    for adapter in [&x, &y, &z] {
        register(&runtime, adapter);
    }
    runtime.monitor().check_all().await;

    let response = runtime
        .call_model(CallOptions::new("x", AdapterRequest::new("task")))
        .await
        .unwrap();

    assert_eq!(response.metadata.model_id, "y");
    let history = runtime.ledger().history().await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].reason, "timeout");
    assert_eq!(history[0].target, "y");
}

// =============================================================================
// Health Events
// =============================================================================

#[tokio::test]
async fn test_probes_publish_availability_flips() {
    init_tracing();
    let runtime = StrategyRuntime::new(StrategyConfig::default());
    let adapter = MockAdapter::echo("local");
    register(&runtime, &adapter);
    let mut events = runtime.subscribe();

    runtime.monitor().check_all().await;
    runtime.monitor().check_all().await;
    adapter.set_available(false);
    runtime.monitor().check_all().await;

    let flips: Vec<bool> = drain(&mut events)
        .into_iter()
        .filter_map(|event| match event {
            StrategyEvent::HealthUpdate { health, .. } => Some(health.available),
            _ => None,
        })
        .collect();
    assert_eq!(flips, vec![true, false]);
    assert_eq!(
        runtime.registry().health("local").unwrap().status,
        HealthStatus::Degraded
    );
}

// =============================================================================
// Persistence
// =============================================================================

#[tokio::test]
async fn test_failover_history_survives_restart() -> anyhow::Result<()> {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let config = StrategyConfig::default()
        .with_groups(vec![FailoverGroup::new("pair", ["x", "y"])]);

    {
        let runtime = StrategyRuntime::builder(config.clone())
            .with_persistence(Arc::new(FilePersistence::new(dir.path())))
            .build();
        register(&runtime, &MockAdapter::failing("x"));
        register(&runtime, &MockAdapter::echo("y"));
        runtime.initialize().await;
        runtime.monitor().check_all().await;

        let response = runtime
            .call_model(CallOptions::new("x", AdapterRequest::new("task")))
            .await?;
        assert_eq!(response.metadata.model_id, "y");
        runtime.shutdown().await;
    }

    let restarted = StrategyRuntime::builder(config)
        .with_persistence(Arc::new(FilePersistence::new(dir.path())))
        .build();
    restarted.initialize().await;

    let metrics = restarted.ledger().metrics().await;
    assert_eq!(metrics.total_failovers, 1);
    assert_eq!(metrics.by_source.get("x"), Some(&1));
    let history = restarted.ledger().history().await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].target, "y");

    restarted.shutdown().await;
    Ok(())
}

/// Store whose backend is gone; counts how often it was asked to save
#[derive(Default)]
struct UnreachableStore {
    saves: AtomicUsize,
}

#[async_trait]
impl PersistenceGateway for UnreachableStore {
    async fn save(&self, _: &str, _: &str, _: &Value) -> PersistenceResult<()> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        Err(PersistenceError::Backend("connection refused".into()))
    }

    async fn list(&self, _: &str) -> PersistenceResult<Vec<StoredEntry>> {
        Err(PersistenceError::Backend("connection refused".into()))
    }

    async fn load(&self, _: &str, _: &str) -> PersistenceResult<Value> {
        Err(PersistenceError::Backend("connection refused".into()))
    }

    async fn delete(&self, _: &str, _: &str) -> PersistenceResult<()> {
        Err(PersistenceError::Backend("connection refused".into()))
    }
}

#[tokio::test(start_paused = true)]
async fn test_failover_completes_with_unreachable_store() {
    init_tracing();
    let mut config = StrategyConfig::default()
        .with_groups(vec![FailoverGroup::new("pair", ["x", "y"])]);
    config.failover.persist_interval_ms = 100;
    let store = Arc::new(UnreachableStore::default());

    let runtime = StrategyRuntime::builder(config)
        .with_persistence(store.clone())
        .build();
    register(&runtime, &MockAdapter::failing("x"));
    register(&runtime, &MockAdapter::echo("y"));
    runtime.initialize().await;
    runtime.monitor().check_all().await;
    let mut events = runtime.subscribe();

    let response = runtime
        .call_model(CallOptions::new("x", AdapterRequest::new("task")))
        .await
        .unwrap();
    assert_eq!(response.metadata.model_id, "y");

    // Let the periodic task hit the store a few times
    tokio::time::sleep(Duration::from_millis(250)).await;
    runtime.shutdown().await;
    assert!(store.saves.load(Ordering::SeqCst) >= 2);

    let metrics = runtime.ledger().metrics().await;
    assert_eq!(metrics.total_failovers, 1);
    assert_eq!(metrics.successful_failovers, 1);
    assert_eq!(runtime.ledger().history().await.len(), 1);

    let failovers = drain(&mut events)
        .into_iter()
        .filter(|event| matches!(event, StrategyEvent::Failover(e) if e.success))
        .count();
    assert_eq!(failovers, 1);
}
