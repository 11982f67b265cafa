//! Strategy Configuration
//!
//! Every recognized option and its default, resolved once at initialization.
//! Components receive the sections they need by value; nothing reads
//! configuration lazily at call time.
//!
//! # Environment Overrides
//!
//! [`StrategyConfig::from_env`] starts from the defaults and overrides single
//! fields from `STRATEGY_*` variables:
//!
//! - `STRATEGY_SYSTEM_TIER`: `core`, `pro` or `enterprise`
//! - `STRATEGY_OFFLINE_MODE`: `1`/`true` to force offline-only selection
//! - `STRATEGY_RAM_MB`, `STRATEGY_CPU_CORES`, `STRATEGY_GPU_MB`: host resources
//! - `STRATEGY_CALL_TIMEOUT_MS`: default adapter call timeout
//! - `STRATEGY_HEALTH_INTERVAL_MS`, `STRATEGY_HEALTH_PROBE_TIMEOUT_MS`
//! - `STRATEGY_ERROR_RATE_THRESHOLD`, `STRATEGY_LATENCY_THRESHOLD_MS`
//! - `STRATEGY_WARNING_FAILURES`, `STRATEGY_CRITICAL_FAILURES`
//! - `STRATEGY_CACHE_ENABLED`, `STRATEGY_CACHE_MAX_SIZE`, `STRATEGY_CACHE_TTL_MS`
//! - `STRATEGY_FAILOVER_ENABLED`, `STRATEGY_FAILOVER_MAX_HISTORY`,
//!   `STRATEGY_PERSIST_INTERVAL_MS`, `STRATEGY_RETAINED_SNAPSHOTS`
//!
//! The default failover policies key off the critical failure threshold, so
//! overriding `STRATEGY_CRITICAL_FAILURES` moves them along with it.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::adapter::{SystemResources, Tier};
use crate::failover::{FailoverGroup, FailoverPolicy};
use crate::metrics::DEFAULT_RETAINED_SNAPSHOTS;

/// Consecutive failed probes before an adapter is critical
pub const DEFAULT_CRITICAL_FAILURES: u32 = 5;

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn env_flag(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}

// ============================================================================
// Health
// ============================================================================

/// Health monitoring thresholds and timing
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Interval between probes of one adapter
    pub check_interval_ms: u64,
    /// Probes taking longer than this count as unavailable
    pub probe_timeout_ms: u64,
    /// Error rate above which an available adapter is degraded
    pub error_rate_threshold: f64,
    /// Average latency above which an available adapter is degraded
    pub latency_threshold_ms: f64,
    /// Consecutive failures before `warning`
    pub warning_failure_threshold: u32,
    /// Consecutive failures before `critical`
    pub critical_failure_threshold: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            check_interval_ms: 60_000,
            probe_timeout_ms: 5_000,
            error_rate_threshold: 0.1,
            latency_threshold_ms: 2_000.0,
            warning_failure_threshold: 2,
            critical_failure_threshold: DEFAULT_CRITICAL_FAILURES,
        }
    }
}

impl HealthConfig {
    /// Probe interval as a Duration
    #[must_use]
    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms.max(1))
    }

    /// Probe timeout as a Duration
    #[must_use]
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

// ============================================================================
// Cache
// ============================================================================

/// Response cache settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Whether responses are cached at all
    pub enabled: bool,
    /// Maximum number of entries before LRU eviction
    pub max_size: usize,
    /// Time-to-live of one entry
    pub ttl_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_size: 1000,
            ttl_ms: 60 * 60 * 1000, // 1 hour
        }
    }
}

impl CacheConfig {
    /// TTL as a Duration
    #[must_use]
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

// ============================================================================
// Failover
// ============================================================================

/// Failover policies, groups and history settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FailoverConfig {
    /// Whether policy-driven failover runs before the ranked fallback search
    pub enabled: bool,
    /// Condition/action policies
    pub policies: Vec<FailoverPolicy>,
    /// Groups of interchangeable adapters
    pub groups: Vec<FailoverGroup>,
    /// Maximum failover events kept in memory
    pub max_history: usize,
    /// Number of recent events included in persisted snapshots
    pub snapshot_history: usize,
    /// Interval between persisted snapshots (0 disables the periodic task)
    pub persist_interval_ms: u64,
    /// Snapshots kept in the gateway; older ones are pruned after each save
    #[serde(default = "default_retained_snapshots")]
    pub retained_snapshots: usize,
}

fn default_retained_snapshots() -> usize {
    DEFAULT_RETAINED_SNAPSHOTS
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            policies: FailoverPolicy::defaults(),
            groups: Vec::new(),
            max_history: 1000,
            snapshot_history: 100,
            persist_interval_ms: 5 * 60 * 1000, // 5 minutes
            retained_snapshots: default_retained_snapshots(),
        }
    }
}

impl FailoverConfig {
    /// Persist interval, `None` when periodic persistence is disabled
    #[must_use]
    pub fn persist_interval(&self) -> Option<Duration> {
        (self.persist_interval_ms > 0).then(|| Duration::from_millis(self.persist_interval_ms))
    }
}

// ============================================================================
// Full Configuration
// ============================================================================

/// Complete strategy configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Tier of this deployment
    pub system_tier: Tier,
    /// Force offline-only selection for every request
    pub offline_mode: bool,
    /// Resources of the host
    pub system_resources: SystemResources,
    /// Default timeout for adapter calls (`None` = wait indefinitely)
    pub call_timeout_ms: Option<u64>,
    /// Health monitoring
    pub health: HealthConfig,
    /// Response cache
    pub cache: CacheConfig,
    /// Failover
    pub failover: FailoverConfig,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            system_tier: Tier::Core,
            offline_mode: false,
            system_resources: SystemResources::default(),
            call_timeout_ms: Some(120_000),
            health: HealthConfig::default(),
            cache: CacheConfig::default(),
            failover: FailoverConfig::default(),
        }
    }
}

impl StrategyConfig {
    /// Create a configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create configuration from environment variables with fallback to defaults
    #[must_use]
    pub fn from_env() -> Self {
        let default = Self::default();
        let health = HealthConfig {
            check_interval_ms: env_parse("STRATEGY_HEALTH_INTERVAL_MS")
                .unwrap_or(default.health.check_interval_ms),
            probe_timeout_ms: env_parse("STRATEGY_HEALTH_PROBE_TIMEOUT_MS")
                .unwrap_or(default.health.probe_timeout_ms),
            error_rate_threshold: env_parse("STRATEGY_ERROR_RATE_THRESHOLD")
                .unwrap_or(default.health.error_rate_threshold),
            latency_threshold_ms: env_parse("STRATEGY_LATENCY_THRESHOLD_MS")
                .unwrap_or(default.health.latency_threshold_ms),
            warning_failure_threshold: env_parse("STRATEGY_WARNING_FAILURES")
                .unwrap_or(default.health.warning_failure_threshold),
            critical_failure_threshold: env_parse("STRATEGY_CRITICAL_FAILURES")
                .unwrap_or(default.health.critical_failure_threshold),
        };
        Self {
            system_tier: env_parse("STRATEGY_SYSTEM_TIER").unwrap_or(default.system_tier),
            offline_mode: env_flag("STRATEGY_OFFLINE_MODE").unwrap_or(default.offline_mode),
            system_resources: SystemResources {
                ram_mb: env_parse("STRATEGY_RAM_MB").unwrap_or(default.system_resources.ram_mb),
                cpu_cores: env_parse("STRATEGY_CPU_CORES")
                    .unwrap_or(default.system_resources.cpu_cores),
                gpu_mb: env_parse("STRATEGY_GPU_MB").unwrap_or(default.system_resources.gpu_mb),
            },
            call_timeout_ms: env_parse("STRATEGY_CALL_TIMEOUT_MS").or(default.call_timeout_ms),
            health: health.clone(),
            cache: CacheConfig {
                enabled: env_flag("STRATEGY_CACHE_ENABLED").unwrap_or(default.cache.enabled),
                max_size: env_parse("STRATEGY_CACHE_MAX_SIZE").unwrap_or(default.cache.max_size),
                ttl_ms: env_parse("STRATEGY_CACHE_TTL_MS").unwrap_or(default.cache.ttl_ms),
            },
            failover: FailoverConfig {
                enabled: env_flag("STRATEGY_FAILOVER_ENABLED")
                    .unwrap_or(default.failover.enabled),
                max_history: env_parse("STRATEGY_FAILOVER_MAX_HISTORY")
                    .unwrap_or(default.failover.max_history),
                persist_interval_ms: env_parse("STRATEGY_PERSIST_INTERVAL_MS")
                    .unwrap_or(default.failover.persist_interval_ms),
                retained_snapshots: env_parse("STRATEGY_RETAINED_SNAPSHOTS")
                    .unwrap_or(default.failover.retained_snapshots),
                policies: FailoverPolicy::defaults_for(health.critical_failure_threshold),
                ..default.failover
            },
        }
    }

    /// Set the system tier
    #[must_use]
    pub fn with_system_tier(mut self, tier: Tier) -> Self {
        self.system_tier = tier;
        self
    }

    /// Enable or disable process-wide offline mode
    #[must_use]
    pub fn with_offline_mode(mut self, offline: bool) -> Self {
        self.offline_mode = offline;
        self
    }

    /// Set host resources
    #[must_use]
    pub fn with_system_resources(mut self, resources: SystemResources) -> Self {
        self.system_resources = resources;
        self
    }

    /// Set the default adapter call timeout
    #[must_use]
    pub fn with_call_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.call_timeout_ms = timeout.map(|t| u64::try_from(t.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Replace the health section
    ///
    /// Policies still at their defaults follow the new critical threshold;
    /// custom policies are left alone.
    #[must_use]
    pub fn with_health(mut self, health: HealthConfig) -> Self {
        if self.failover.policies
            == FailoverPolicy::defaults_for(self.health.critical_failure_threshold)
        {
            self.failover.policies =
                FailoverPolicy::defaults_for(health.critical_failure_threshold);
        }
        self.health = health;
        self
    }

    /// Replace the cache section
    #[must_use]
    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    /// Replace the failover policies
    #[must_use]
    pub fn with_policies(mut self, policies: Vec<FailoverPolicy>) -> Self {
        self.failover.policies = policies;
        self
    }

    /// Replace the failover groups
    #[must_use]
    pub fn with_groups(mut self, groups: Vec<FailoverGroup>) -> Self {
        self.failover.groups = groups;
        self
    }

    /// Default call timeout as a Duration
    #[must_use]
    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout_ms.map(Duration::from_millis)
    }
}
