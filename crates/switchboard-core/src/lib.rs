//! Switchboard Core Library
//!
//! Routes AI requests across multiple providers:
//! - Provider catalog with live performance metrics
//! - Hard-constraint filtering and two-tier composite scoring
//! - Bounded fallback chains with sequential, per-attempt-timed execution
//! - Outcome feedback (EMA) and periodic metrics refresh
//! - Broadcast event notifications

pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod execution;
pub mod routing;
pub mod tracker;

pub use engine::{RoutingEngine, RoutingEngineBuilder};
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::catalog::{
        Capabilities, Model, Pricing, Provider, ProviderCatalog, ProviderSnapshot, ProviderStatus,
        TaskCategory, TokenUsage,
    };
    pub use crate::config::Config;
    pub use crate::engine::RoutingEngine;
    pub use crate::error::{Error, Result};
    pub use crate::events::RoutingEvent;
    pub use crate::execution::{
        ExecutionInterface, ExecutionResult, Invocation, InvocationError, ProviderResponse,
    };
    pub use crate::routing::{Priority, RoutingDecision, RoutingRequest, TaskType};
}
