//! Strategy Events
//!
//! Health updates, failovers and errors are published as messages on an
//! [`EventBus`]. Observers subscribe to the bus; publishing never depends on
//! anyone listening.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, Receiver, Sender};
use tokio_stream::wrappers::BroadcastStream;

use crate::error::{ErrorKind, StrategyError};
use crate::health::AdapterHealth;
use crate::metrics::FailoverEvent;

/// Default channel capacity
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Events produced by the strategy core
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StrategyEvent {
    /// A failover was executed
    Failover(FailoverEvent),

    /// An adapter's availability flipped
    HealthUpdate {
        /// Adapter whose health changed
        adapter_id: String,
        /// Record after the update
        health: AdapterHealth,
        /// Always true for probe-driven updates; explicit reports may set false
        availability_changed: bool,
        /// When the update happened
        timestamp: DateTime<Utc>,
    },

    /// A caller-visible error
    Error {
        /// Error kind name
        kind: String,
        /// Error message
        message: String,
        /// Adapter involved, if any
        adapter_id: Option<String>,
    },
}

impl StrategyEvent {
    /// Build an error event from a strategy error
    #[must_use]
    pub fn error(err: &StrategyError, adapter_id: Option<&str>) -> Self {
        Self::Error {
            kind: err.kind().as_str().to_string(),
            message: err.to_string(),
            adapter_id: adapter_id.map(str::to_string),
        }
    }

    /// Short name of the event type
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Failover(_) => "failover",
            Self::HealthUpdate { .. } => "health_update",
            Self::Error { .. } => "error",
        }
    }

    /// Whether this is an error event of `kind`
    #[must_use]
    pub fn is_error_kind(&self, kind: ErrorKind) -> bool {
        matches!(self, Self::Error { kind: k, .. } if k == kind.as_str())
    }
}

/// Broadcast bus for [`StrategyEvent`]s
#[derive(Clone, Debug)]
pub struct EventBus {
    sender: Sender<StrategyEvent>,
}

impl EventBus {
    /// Create a bus with the given channel capacity
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event, returning how many subscribers received it
    pub fn publish(&self, event: StrategyEvent) -> usize {
        tracing::trace!(event = event.name(), "Publishing strategy event");
        // No subscribers is not an error
        self.sender.send(event).unwrap_or(0)
    }

    /// Subscribe to events published from now on
    #[must_use]
    pub fn subscribe(&self) -> Receiver<StrategyEvent> {
        self.sender.subscribe()
    }

    /// Subscribe as a `Stream`. Lagged receivers yield an error item.
    #[must_use]
    pub fn stream(&self) -> BroadcastStream<StrategyEvent> {
        BroadcastStream::new(self.sender.subscribe())
    }

    /// Number of active subscribers
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
