//! Strategy Core - Adapter Routing for Model Backends
//!
//! This crate decides which model adapter serves a request, invokes it with a
//! timeout, caches the response and fails over to an alternative when the
//! adapter misbehaves. It knows nothing about concrete backends: anything that
//! implements [`ModelAdapter`] can be registered.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        StrategyRuntime                           │
//! │                                                                  │
//! │   RequestContext ──► ModelStrategyManager ──► CallOptions        │
//! │                        │        │       │                        │
//! │             ┌──────────┘        │       └──────────┐             │
//! │             ▼                   ▼                  ▼             │
//! │     ┌──────────────┐   ┌───────────────┐   ┌───────────────┐     │
//! │     │   Adapter    │   │ ResponseCache │   │   Failover    │     │
//! │     │   Registry   │   │ (LRU + TTL)   │   │   Manager     │     │
//! │     └──────┬───────┘   └───────────────┘   └───────┬───────┘     │
//! │            │                                       │             │
//! │            ▼                                       ▼             │
//! │     ┌──────────────┐                       ┌───────────────┐     │
//! │     │    Health    │                       │ FailoverLedger│     │
//! │     │   Monitor    │                       │ + Persistence │     │
//! │     └──────────────┘                       └───────────────┘     │
//! │                                                                  │
//! │                 EventBus (failover, health, error)               │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`StrategyRuntime`]: Builds and owns every component
//! - [`ModelStrategyManager`]: Selection, invocation and fallback
//! - [`AdapterRegistry`]: Registered adapters with their health records
//! - [`HealthMonitor`]: Periodic availability probes
//! - [`FailoverManager`]: Policy driven failover within groups
//! - [`ResponseCache`]: LRU response cache with TTL
//!
//! # Quick Start
//!
//! ```ignore
//! use strategy_core::{
//!     AdapterRequest, CallOptions, ModelDescriptor, RequestContext, StrategyConfig,
//!     StrategyRuntime,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let runtime = StrategyRuntime::new(StrategyConfig::from_env());
//!     runtime
//!         .register(ModelDescriptor::new("local-llm", "Local LLM"), my_adapter())
//!         .unwrap();
//!     runtime.initialize().await;
//!
//!     let context = RequestContext::new("code").with_language("en");
//!     let adapter_id = runtime.select_model(&context).unwrap();
//!     let response = runtime
//!         .call_model(CallOptions::new(adapter_id, AdapterRequest::new("fn main")))
//!         .await
//!         .unwrap();
//!     println!("{}", response.text);
//!
//!     runtime.shutdown().await;
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`adapter`]: Adapter trait, descriptors, requests and responses
//! - [`registry`]: Adapter registry and eligibility filtering
//! - [`cache`]: Response cache
//! - [`health`]: Health records and monitor
//! - [`failover`]: Policies, groups and the failover manager
//! - [`strategy`]: Scoring, selection and invocation
//! - [`metrics`]: Call statistics and the failover ledger
//! - [`persistence`]: Snapshot storage
//! - [`security`]: Pre-invocation request validation
//! - [`events`]: Broadcast bus for strategy events
//! - [`runtime`]: Component wiring

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod adapter;
pub mod cache;
pub mod config;
pub mod error;
pub mod events;
pub mod failover;
pub mod health;
pub mod metrics;
pub mod persistence;
pub mod registry;
pub mod runtime;
pub mod security;
pub mod strategy;

#[cfg(test)]
mod test_utils;

// Re-exports for convenience
pub use adapter::{
    AdapterError, AdapterRequest, ModelAdapter, ModelDescriptor, ModelResponse, RawResponse,
    ResourceRequirements, ResponseMetadata, SystemResources, Tier,
};
pub use cache::{CacheStats, ResponseCache};
pub use config::{CacheConfig, FailoverConfig, HealthConfig, StrategyConfig};
pub use error::{ErrorKind, PersistenceError, StrategyError, StrategyResult};
pub use events::{EventBus, StrategyEvent};
pub use registry::{AdapterHandle, AdapterRegistry};
pub use runtime::{StrategyRuntime, StrategyRuntimeBuilder};
pub use security::{AccessPolicy, SecurityValidator};
pub use strategy::{CallOptions, ModelStrategyManager, RequestContext};

// Health exports
pub use health::{AdapterHealth, HealthMetrics, HealthMonitor, HealthStatus, HealthSummary};

// Failover exports
pub use failover::{
    FailoverCondition, FailoverContext, FailoverGroup, FailoverGroupRegistry, FailoverManager,
    FailoverPolicy, FailoverPolicyEngine, TargetStrategy,
};
pub use metrics::{CallStats, FailoverEvent, FailoverLedger, FailoverMetrics, FailoverSnapshot};

// Persistence exports
pub use persistence::{FilePersistence, MemoryPersistence, PersistenceGateway};
