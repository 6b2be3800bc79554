//! Seams to the outside world: the provider call and the clock

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::catalog::TokenUsage;
use crate::routing::{ContentType, TaskType};

/// One provider call the coordinator asks the executor to make
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invocation {
    pub request_id: String,
    pub provider_id: String,
    pub model_id: String,
    /// 1-based attempt number within the request
    pub attempt: usize,
    pub task_type: Option<TaskType>,
    pub content_type: ContentType,
    pub estimated_tokens: TokenUsage,
    pub timeout_ms: u64,
}

/// A successful provider response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderResponse {
    pub content: String,
    /// Tokens actually consumed
    pub usage: TokenUsage,
}

impl ProviderResponse {
    pub fn new(content: impl Into<String>, usage: TokenUsage) -> Self {
        Self {
            content: content.into(),
            usage,
        }
    }
}

/// A provider-reported failure, with partial usage when known
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct InvocationError {
    pub message: String,
    pub usage: Option<TokenUsage>,
}

impl InvocationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            usage: None,
        }
    }

    /// Attach partial token usage
    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = Some(usage);
        self
    }
}

/// Makes the actual call to a provider.
///
/// Implementations must stop work promptly once `cancel` fires. The
/// coordinator also drops the returned future on timeout or cancellation.
#[async_trait]
pub trait ExecutionInterface: Send + Sync {
    async fn invoke(
        &self,
        invocation: &Invocation,
        cancel: CancellationToken,
    ) -> std::result::Result<ProviderResponse, InvocationError>;
}

/// Source of wall-clock time for attempt timestamps and latencies
pub trait ClockSource: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The system clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl ClockSource for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Move the clock forward
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }

    /// Advance by a number of milliseconds
    pub fn advance_ms(&self, ms: i64) {
        self.advance(Duration::milliseconds(ms));
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = to;
    }
}

impl ClockSource for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::default();
        let start = clock.now();
        clock.advance_ms(1500);
        assert_eq!((clock.now() - start).num_milliseconds(), 1500);
    }

    #[test]
    fn test_invocation_error_usage() {
        let err = InvocationError::new("rate limited").with_usage(TokenUsage::new(10, 0));
        assert_eq!(err.to_string(), "rate limited");
        assert_eq!(err.usage, Some(TokenUsage::new(10, 0)));
    }
}
