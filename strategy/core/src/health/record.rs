//! Adapter Health Records
//!
//! One [`AdapterHealth`] per registered adapter, wrapped in a [`HealthCell`]
//! that serializes writes for that adapter only. Status is always derived
//! from the latest probe, the consecutive-failure count and live metrics.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::HealthConfig;

/// Derived health classification
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Not probed yet
    #[default]
    Unknown,
    /// Available and performing within thresholds
    Healthy,
    /// Available but slow or erroring, or briefly unavailable
    Degraded,
    /// Unavailable for several consecutive probes
    Warning,
    /// Unavailable past the critical threshold
    Critical,
}

impl HealthStatus {
    /// Lowercase name
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

/// Recent performance of an adapter
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct HealthMetrics {
    /// Fraction of successful requests (0.0 - 1.0)
    pub success_rate: f64,
    /// Average latency in milliseconds
    pub average_latency_ms: f64,
    /// Fraction of failed requests (0.0 - 1.0)
    pub error_rate: f64,
}

impl Default for HealthMetrics {
    fn default() -> Self {
        Self {
            success_rate: 1.0,
            average_latency_ms: 0.0,
            error_rate: 0.0,
        }
    }
}

/// Health record of one adapter
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AdapterHealth {
    /// Adapter this record belongs to
    pub adapter_id: String,
    /// Result of the latest availability probe
    pub available: bool,
    /// Derived status
    pub status: HealthStatus,
    /// Unavailable probes in a row
    pub consecutive_failures: u32,
    /// When the latest probe or update happened
    pub last_check: Option<DateTime<Utc>>,
    /// Latest known metrics
    pub metrics: HealthMetrics,
}

/// What changed in one health update
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HealthTransition {
    /// Status before the update
    pub previous_status: HealthStatus,
    /// Availability flipped
    pub availability_changed: bool,
    /// Status changed
    pub status_changed: bool,
}

impl AdapterHealth {
    /// Initial record: unknown and unavailable
    pub fn new(adapter_id: impl Into<String>) -> Self {
        Self {
            adapter_id: adapter_id.into(),
            available: false,
            status: HealthStatus::Unknown,
            consecutive_failures: 0,
            last_check: None,
            metrics: HealthMetrics::default(),
        }
    }

    /// Whether the adapter may be chosen as a failover target
    #[must_use]
    pub fn is_usable(&self) -> bool {
        self.available && self.status != HealthStatus::Critical
    }

    /// Apply a probe result and recompute the status.
    ///
    /// `metrics` replaces the stored metrics when present; `None` keeps the
    /// previous values.
    pub fn apply_probe(
        &mut self,
        available: bool,
        metrics: Option<HealthMetrics>,
        thresholds: &HealthConfig,
    ) -> HealthTransition {
        let previous_status = self.status;
        let previously_available = self.available;

        if available {
            self.consecutive_failures = 0;
        } else {
            self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        }
        self.available = available;
        if let Some(metrics) = metrics {
            self.metrics = metrics;
        }
        self.last_check = Some(Utc::now());
        self.status = self.derive_status(thresholds);

        HealthTransition {
            previous_status,
            availability_changed: previously_available != self.available,
            status_changed: previous_status != self.status,
        }
    }

    fn derive_status(&self, thresholds: &HealthConfig) -> HealthStatus {
        if !self.available {
            if self.consecutive_failures >= thresholds.critical_failure_threshold {
                HealthStatus::Critical
            } else if self.consecutive_failures >= thresholds.warning_failure_threshold {
                HealthStatus::Warning
            } else {
                HealthStatus::Degraded
            }
        } else if self.metrics.error_rate > thresholds.error_rate_threshold
            || self.metrics.average_latency_ms > thresholds.latency_threshold_ms
        {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }
}

/// Per-adapter health slot.
///
/// The record mutex serializes writes for this adapter; the probe gate keeps
/// two probes of the same adapter from overlapping.
#[derive(Debug)]
pub struct HealthCell {
    record: Mutex<AdapterHealth>,
    probe_gate: tokio::sync::Mutex<()>,
}

impl HealthCell {
    /// Create a cell holding the initial record for `adapter_id`
    pub fn new(adapter_id: impl Into<String>) -> Self {
        Self {
            record: Mutex::new(AdapterHealth::new(adapter_id)),
            probe_gate: tokio::sync::Mutex::new(()),
        }
    }

    /// Copy of the current record
    #[must_use]
    pub fn snapshot(&self) -> AdapterHealth {
        self.record.lock().clone()
    }

    /// Apply an update under the record lock, returning the new record
    pub fn update<F>(&self, f: F) -> (AdapterHealth, HealthTransition)
    where
        F: FnOnce(&mut AdapterHealth) -> HealthTransition,
    {
        let mut record = self.record.lock();
        let transition = f(&mut record);
        (record.clone(), transition)
    }

    /// Claim the probe gate, `None` if a probe is already running
    pub fn try_begin_probe(&self) -> Option<tokio::sync::MutexGuard<'_, ()>> {
        self.probe_gate.try_lock().ok()
    }
}
