//! Execution records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::interface::ProviderResponse;
use crate::catalog::TokenUsage;
use crate::routing::{FallbackEntry, RoutingDecision};

/// How a single attempt ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    /// The provider returned an explicit error
    Failure,
    /// The attempt exceeded its time budget
    Timeout,
    /// The caller cancelled the request mid-attempt
    Cancelled,
}

impl AttemptOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// Whether the outcome counts against the provider's success rate
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure | Self::Timeout)
    }
}

impl std::fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failure => write!(f, "failure"),
            Self::Timeout => write!(f, "timeout"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Record of one call to one candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionAttempt {
    pub request_id: String,
    pub provider_id: String,
    pub model_id: String,
    /// 1-based position in the attempt sequence
    pub attempt: usize,
    pub outcome: AttemptOutcome,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Observed latency in milliseconds
    pub latency_ms: u64,
    /// Tokens reported by the provider, if any
    pub usage: Option<TokenUsage>,
    /// Actual cost in USD computed from reported usage
    pub cost: f64,
    /// Error text for failed, timed out, or cancelled attempts
    pub error: Option<String>,
}

/// Lifecycle of one request's execution.
///
/// `Pending -> Attempting -> {Succeeded | Attempting(next) | Exhausted}`,
/// with `Cancelled` reachable from `Pending` or `Attempting`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ExecutionState {
    Pending,
    Attempting {
        provider_id: String,
        model_id: String,
        attempt: usize,
    },
    Succeeded {
        provider_id: String,
        model_id: String,
    },
    Exhausted,
    Cancelled,
}

impl ExecutionState {
    /// Whether no further transitions can happen
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded { .. } | Self::Exhausted | Self::Cancelled
        )
    }
}

impl std::fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Attempting {
                provider_id,
                model_id,
                attempt,
            } => write!(f, "attempting {}/{} (#{})", provider_id, model_id, attempt),
            Self::Succeeded {
                provider_id,
                model_id,
            } => write!(f, "succeeded via {}/{}", provider_id, model_id),
            Self::Exhausted => write!(f, "exhausted"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Successful execution of a routed request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub request_id: String,
    pub response: ProviderResponse,
    /// The candidate that actually served the request; may differ from the
    /// decision's primary
    pub served_by: FallbackEntry,
    /// Every attempt made, in order, ending with the successful one
    pub attempts: Vec<ExecutionAttempt>,
    /// Sum of actual attempt costs, including failed attempts
    pub total_cost: f64,
    /// The routing decision that was executed
    pub decision: RoutingDecision,
}

impl ExecutionResult {
    /// Whether a fallback served the request
    pub fn used_fallback(&self) -> bool {
        self.attempts.len() > 1
    }

    /// Attempts that did not succeed
    pub fn failed_attempts(&self) -> impl Iterator<Item = &ExecutionAttempt> {
        self.attempts.iter().filter(|a| !a.outcome.is_success())
    }
}
