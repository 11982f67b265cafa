//! Health Monitoring
//!
//! Per-adapter health records and the monitor that keeps them current.

pub mod monitor;
pub mod record;

pub(crate) use monitor::check_availability;
pub use monitor::{AdapterMetrics, HealthMonitor, HealthSummary, MetricsAnalyzer};
pub use record::{AdapterHealth, HealthCell, HealthMetrics, HealthStatus, HealthTransition};
