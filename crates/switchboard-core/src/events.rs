//! Routing event bus
//!
//! Fire-and-forget notifications over `tokio::sync::broadcast`. Publishing
//! never blocks and never fails the caller; with no subscribers the event
//! is dropped. Slow subscribers see `RecvError::Lagged` and skip ahead.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, Receiver, Sender};
use tracing::trace;

use crate::catalog::ProviderStatus;
use crate::execution::{AttemptOutcome, ExecutionState};

/// Default channel capacity
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Notifications emitted by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RoutingEvent {
    ProviderRegistered {
        provider_id: String,
        /// `false` when an existing definition was replaced
        new: bool,
    },
    ProviderStatusChanged {
        provider_id: String,
        from: ProviderStatus,
        to: ProviderStatus,
    },
    DecisionMade {
        request_id: String,
        provider_id: String,
        model_id: String,
        score: f64,
        fallbacks: usize,
    },
    AttemptFinished {
        request_id: String,
        provider_id: String,
        model_id: String,
        attempt: usize,
        outcome: AttemptOutcome,
        latency_ms: u64,
    },
    ExecutionCompleted {
        request_id: String,
        state: ExecutionState,
        attempts: usize,
        total_cost: f64,
    },
    MetricsRefreshed {
        providers: usize,
    },
}

/// Broadcast bus for `RoutingEvent`s
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: Sender<RoutingEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl EventBus {
    /// Create a bus with the given channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event to all current subscribers
    pub fn publish(&self, event: RoutingEvent) {
        if self.sender.send(event).is_err() {
            trace!("Event dropped, no subscribers");
        }
    }

    /// Subscribe to events published from now on
    pub fn subscribe(&self) -> Receiver<RoutingEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
