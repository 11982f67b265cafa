//! Strategy Metrics
//!
//! Two kinds of bookkeeping live here:
//!
//! - [`FailoverLedger`]: the bounded failover history and its aggregate
//!   counters. Appends go through one async mutex so counters and history
//!   always agree. Snapshots are persisted periodically, pruned to the most
//!   recent few, and merged back once on startup.
//! - [`CallStats`]: lock-free per-adapter request counters fed by every
//!   adapter invocation. They back the [`MetricsAnalyzer`] the health monitor
//!   reads.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use crate::health::{AdapterMetrics, MetricsAnalyzer};
use crate::persistence::PersistenceGateway;

/// Namespace failover snapshots are stored under
pub const FAILOVER_NAMESPACE: &str = "failover";

/// Snapshots kept in the gateway unless configured otherwise
pub const DEFAULT_RETAINED_SNAPSHOTS: usize = 10;

const SNAPSHOT_PREFIX: &str = "snapshot-";

// ============================================================================
// Failover Events
// ============================================================================

/// One executed (or attempted) failover
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FailoverEvent {
    /// Event id
    pub id: Uuid,
    /// Adapter that failed
    pub source: String,
    /// Adapter traffic moved to
    pub target: String,
    /// Why the failover happened
    pub reason: String,
    /// Task type of the request being served
    pub task_type: Option<String>,
    /// When the failover happened
    pub timestamp: DateTime<Utc>,
    /// Whether the target was usable
    pub success: bool,
    /// Time spent executing the failover
    pub duration_ms: u64,
}

impl FailoverEvent {
    /// Create an event stamped now
    pub fn new(
        source: impl Into<String>,
        target: impl Into<String>,
        reason: impl Into<String>,
        task_type: Option<String>,
        success: bool,
        duration_ms: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            source: source.into(),
            target: target.into(),
            reason: reason.into(),
            task_type,
            timestamp: Utc::now(),
            success,
            duration_ms,
        }
    }
}

/// Aggregate failover counters
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FailoverMetrics {
    /// Failovers attempted
    pub total_failovers: u64,
    /// Failovers whose target was usable
    pub successful_failovers: u64,
    /// Failovers whose target was not usable
    pub failed_failovers: u64,
    /// Failovers away from each adapter
    pub by_source: BTreeMap<String, u64>,
    /// Failovers onto each adapter
    pub by_target: BTreeMap<String, u64>,
    /// Failovers per reason
    pub by_reason: BTreeMap<String, u64>,
    /// Sum of failover durations
    pub total_duration_ms: u64,
    /// Mean failover duration
    pub average_duration_ms: f64,
    /// Most recent failover
    pub last_failover: Option<DateTime<Utc>>,
}

impl FailoverMetrics {
    fn record(&mut self, event: &FailoverEvent) {
        self.total_failovers += 1;
        if event.success {
            self.successful_failovers += 1;
        } else {
            self.failed_failovers += 1;
        }
        *self.by_source.entry(event.source.clone()).or_default() += 1;
        *self.by_target.entry(event.target.clone()).or_default() += 1;
        *self.by_reason.entry(event.reason.clone()).or_default() += 1;
        self.total_duration_ms += event.duration_ms;
        self.last_failover = self.last_failover.max(Some(event.timestamp));
        self.recompute_average();
    }

    /// Add `other`'s counters to these
    pub fn merge(&mut self, other: &FailoverMetrics) {
        self.total_failovers += other.total_failovers;
        self.successful_failovers += other.successful_failovers;
        self.failed_failovers += other.failed_failovers;
        for (key, count) in &other.by_source {
            *self.by_source.entry(key.clone()).or_default() += count;
        }
        for (key, count) in &other.by_target {
            *self.by_target.entry(key.clone()).or_default() += count;
        }
        for (key, count) in &other.by_reason {
            *self.by_reason.entry(key.clone()).or_default() += count;
        }
        self.total_duration_ms += other.total_duration_ms;
        self.last_failover = self.last_failover.max(other.last_failover);
        self.recompute_average();
    }

    fn recompute_average(&mut self) {
        self.average_duration_ms = if self.total_failovers == 0 {
            0.0
        } else {
            self.total_duration_ms as f64 / self.total_failovers as f64
        };
    }
}

/// Persisted state of the ledger
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FailoverSnapshot {
    /// When the snapshot was taken
    pub timestamp: DateTime<Utc>,
    /// Aggregate counters
    pub metrics: FailoverMetrics,
    /// Most recent events, oldest first
    pub history: Vec<FailoverEvent>,
}

// ============================================================================
// Failover Ledger
// ============================================================================

#[derive(Debug, Default)]
struct LedgerState {
    history: VecDeque<FailoverEvent>,
    metrics: FailoverMetrics,
}

/// Bounded failover history with aggregate counters
#[derive(Debug)]
pub struct FailoverLedger {
    state: Mutex<LedgerState>,
    max_history: usize,
    snapshot_history: usize,
    retained_snapshots: usize,
    restored: AtomicBool,
}

impl FailoverLedger {
    /// Create a ledger keeping at most `max_history` events and persisting the
    /// last `snapshot_history` of them
    #[must_use]
    pub fn new(max_history: usize, snapshot_history: usize) -> Self {
        Self {
            state: Mutex::new(LedgerState::default()),
            max_history,
            snapshot_history,
            retained_snapshots: DEFAULT_RETAINED_SNAPSHOTS,
            restored: AtomicBool::new(false),
        }
    }

    /// Keep at most `count` snapshots in the gateway (at least one)
    #[must_use]
    pub fn with_retained_snapshots(mut self, count: usize) -> Self {
        self.retained_snapshots = count.max(1);
        self
    }

    /// Append an event, dropping the oldest when over capacity
    pub async fn record(&self, event: FailoverEvent) {
        let mut state = self.state.lock().await;
        state.metrics.record(&event);
        state.history.push_back(event);
        while state.history.len() > self.max_history {
            state.history.pop_front();
        }
    }

    /// Current counters
    pub async fn metrics(&self) -> FailoverMetrics {
        self.state.lock().await.metrics.clone()
    }

    /// Events in memory, oldest first
    pub async fn history(&self) -> Vec<FailoverEvent> {
        self.state.lock().await.history.iter().cloned().collect()
    }

    /// Counters plus the most recent events
    pub async fn snapshot(&self) -> FailoverSnapshot {
        let state = self.state.lock().await;
        let skip = state.history.len().saturating_sub(self.snapshot_history);
        FailoverSnapshot {
            timestamp: Utc::now(),
            metrics: state.metrics.clone(),
            history: state.history.iter().skip(skip).cloned().collect(),
        }
    }

    /// Merge a persisted snapshot into the in-flight state.
    ///
    /// Counters are added. Persisted events not already present are placed
    /// before the in-memory ones, then the history is trimmed to capacity.
    pub async fn restore(&self, snapshot: FailoverSnapshot) {
        let mut state = self.state.lock().await;
        state.metrics.merge(&snapshot.metrics);

        let mut merged: VecDeque<FailoverEvent> = snapshot
            .history
            .into_iter()
            .filter(|old| !state.history.iter().any(|e| e.id == old.id))
            .collect();
        merged.extend(state.history.drain(..));
        while merged.len() > self.max_history {
            merged.pop_front();
        }
        state.history = merged;
    }

    /// Save a snapshot through `gateway`, then delete all but the most
    /// recent retained snapshots. Failures are logged and reported as
    /// `false`; in-memory state stays authoritative.
    pub async fn persist(&self, gateway: &dyn PersistenceGateway) -> bool {
        let snapshot = self.snapshot().await;
        let key = format!(
            "{SNAPSHOT_PREFIX}{:013}",
            snapshot.timestamp.timestamp_millis()
        );

        let value = match serde_json::to_value(&snapshot) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to serialize failover snapshot");
                return false;
            }
        };

        match gateway.save(FAILOVER_NAMESPACE, &key, &value).await {
            Ok(()) => {
                tracing::debug!(
                    key = %key,
                    events = snapshot.history.len(),
                    "Persisted failover snapshot"
                );
                self.prune(gateway).await;
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to persist failover snapshot");
                false
            }
        }
    }

    async fn prune(&self, gateway: &dyn PersistenceGateway) {
        let mut entries = match gateway.list(FAILOVER_NAMESPACE).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to list failover snapshots for pruning");
                return;
            }
        };
        entries.retain(|e| e.filename.starts_with(SNAPSHOT_PREFIX));
        if entries.len() <= self.retained_snapshots {
            return;
        }

        entries.sort_by(|a, b| (a.timestamp, &a.filename).cmp(&(b.timestamp, &b.filename)));
        let excess = entries.len() - self.retained_snapshots;
        for entry in entries.into_iter().take(excess) {
            if let Err(e) = gateway.delete(FAILOVER_NAMESPACE, &entry.filename).await {
                tracing::warn!(file = %entry.filename, error = %e, "Failed to prune failover snapshot");
            }
        }
    }

    /// Restore from the most recent persisted snapshot, if any. Failures are
    /// logged and reported as `false`.
    ///
    /// A ledger merges at most one snapshot: its own later snapshots already
    /// contain the restored counters.
    pub async fn load_latest(&self, gateway: &dyn PersistenceGateway) -> bool {
        if self.restored.load(Ordering::Acquire) {
            tracing::debug!("Failover state already restored");
            return false;
        }

        let entries = match gateway.list(FAILOVER_NAMESPACE).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to list failover snapshots");
                return false;
            }
        };

        let Some(latest) = entries
            .into_iter()
            .max_by(|a, b| (a.timestamp, &a.filename).cmp(&(b.timestamp, &b.filename)))
        else {
            tracing::debug!("No persisted failover snapshot");
            return false;
        };

        let snapshot = match gateway.load(FAILOVER_NAMESPACE, &latest.filename).await {
            Ok(value) => serde_json::from_value::<FailoverSnapshot>(value),
            Err(e) => {
                tracing::warn!(file = %latest.filename, error = %e, "Failed to load failover snapshot");
                return false;
            }
        };

        match snapshot {
            Ok(snapshot) => {
                tracing::info!(
                    file = %latest.filename,
                    failovers = snapshot.metrics.total_failovers,
                    "Restored failover state"
                );
                self.restore(snapshot).await;
                self.restored.store(true, Ordering::Release);
                true
            }
            Err(e) => {
                tracing::warn!(file = %latest.filename, error = %e, "Discarding corrupt failover snapshot");
                false
            }
        }
    }

    /// Persist a snapshot every `period` until the task is aborted
    pub fn spawn_persistence(
        self: &Arc<Self>,
        gateway: Arc<dyn PersistenceGateway>,
        period: Duration,
    ) -> JoinHandle<()> {
        let ledger = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // First tick completes immediately; nothing to persist yet
            ticker.tick().await;
            loop {
                ticker.tick().await;
                ledger.persist(gateway.as_ref()).await;
            }
        })
    }
}

// ============================================================================
// Call Statistics
// ============================================================================

/// A simple atomic counter
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    /// Increment by one
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment by `n`
    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    /// Current value
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Counters for one adapter
#[derive(Debug, Default)]
pub struct AdapterCallStats {
    /// Invocations
    pub requests: Counter,
    /// Successful invocations
    pub successes: Counter,
    /// Failed invocations
    pub failures: Counter,
    /// Timed-out invocations (also counted as failures)
    pub timeouts: Counter,
    /// Sum of latencies of all invocations
    pub total_latency_ms: Counter,
    /// Responses served from the cache
    pub cache_hits: Counter,
}

impl AdapterCallStats {
    /// Snapshot as analyzer metrics
    #[must_use]
    pub fn summary(&self) -> AdapterMetrics {
        let total = self.requests.get();
        AdapterMetrics {
            total_requests: total,
            successful_requests: self.successes.get(),
            failed_requests: self.failures.get(),
            average_latency_ms: if total == 0 {
                0.0
            } else {
                self.total_latency_ms.get() as f64 / total as f64
            },
        }
    }
}

/// Per-adapter invocation counters
#[derive(Debug, Default)]
pub struct CallStats {
    adapters: DashMap<String, Arc<AdapterCallStats>>,
}

impl CallStats {
    /// Create empty statistics
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, adapter_id: &str) -> Arc<AdapterCallStats> {
        if let Some(stats) = self.adapters.get(adapter_id) {
            return Arc::clone(stats.value());
        }
        Arc::clone(
            self.adapters
                .entry(adapter_id.to_string())
                .or_default()
                .value(),
        )
    }

    /// Record a successful invocation
    pub fn record_success(&self, adapter_id: &str, latency_ms: u64) {
        let stats = self.entry(adapter_id);
        stats.requests.inc();
        stats.successes.inc();
        stats.total_latency_ms.add(latency_ms);
    }

    /// Record a failed invocation
    pub fn record_failure(&self, adapter_id: &str, latency_ms: u64, timed_out: bool) {
        let stats = self.entry(adapter_id);
        stats.requests.inc();
        stats.failures.inc();
        if timed_out {
            stats.timeouts.inc();
        }
        stats.total_latency_ms.add(latency_ms);
    }

    /// Record a cache hit (no latency accounted)
    pub fn record_cache_hit(&self, adapter_id: &str) {
        self.entry(adapter_id).cache_hits.inc();
    }

    /// Counters of one adapter
    #[must_use]
    pub fn get(&self, adapter_id: &str) -> Option<Arc<AdapterCallStats>> {
        self.adapters.get(adapter_id).map(|s| Arc::clone(s.value()))
    }

    /// Analyzer metrics of one adapter
    #[must_use]
    pub fn summary(&self, adapter_id: &str) -> Option<AdapterMetrics> {
        self.get(adapter_id).map(|s| s.summary())
    }
}

#[async_trait]
impl MetricsAnalyzer for CallStats {
    async fn adapter_metrics(&self, adapter_id: &str) -> Option<AdapterMetrics> {
        self.summary(adapter_id)
    }
}
