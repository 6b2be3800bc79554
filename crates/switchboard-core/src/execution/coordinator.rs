//! Execution coordinator
//!
//! Walks a routing decision's attempt order one candidate at a time. Each
//! attempt gets its own timeout budget; a slow primary never eats into a
//! fallback's budget. Every attempt is recorded and fed back to the
//! performance tracker before moving on.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::interface::{
    ClockSource, ExecutionInterface, Invocation, InvocationError, ProviderResponse, SystemClock,
};
use super::types::{AttemptOutcome, ExecutionAttempt, ExecutionResult, ExecutionState};
use crate::catalog::{ProviderCatalog, TokenUsage};
use crate::error::{Error, Result};
use crate::events::{EventBus, RoutingEvent};
use crate::routing::{FallbackEntry, RoutingDecision, RoutingRequest};
use crate::tracker::PerformanceTracker;

/// Execution configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Ceiling on attempts per request, primary included
    pub max_attempts: usize,
    /// Multiplier on estimated latency for the attempt timeout
    pub timeout_safety_factor: f64,
    /// Lower bound on the attempt timeout, in milliseconds
    pub min_attempt_timeout_ms: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            timeout_safety_factor: 3.0,
            min_attempt_timeout_ms: 1000,
        }
    }
}

impl ExecutionConfig {
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.max_attempts == 0 {
            return Err("max_attempts must be at least 1".to_string());
        }
        if !(self.timeout_safety_factor >= 1.0 && self.timeout_safety_factor.is_finite()) {
            return Err(format!(
                "timeout_safety_factor {} must be at least 1",
                self.timeout_safety_factor
            ));
        }
        Ok(())
    }

    /// Time budget for one attempt.
    ///
    /// An explicit `max_latency_ms` on the request wins; otherwise the
    /// candidate's estimate times the safety factor, never below the
    /// configured minimum.
    pub fn attempt_timeout(&self, request: &RoutingRequest, candidate: &FallbackEntry) -> Duration {
        if let Some(max_ms) = request.constraints.max_latency_ms {
            return Duration::from_millis(max_ms);
        }
        let min_ms = self.min_attempt_timeout_ms as f64;
        let scaled = candidate.estimated_latency_ms * self.timeout_safety_factor;
        let ms = if scaled.is_finite() {
            scaled.max(min_ms)
        } else {
            min_ms
        };
        Duration::from_millis(ms.ceil() as u64)
    }
}

/// Runs routing decisions against an `ExecutionInterface`
pub struct ExecutionCoordinator {
    catalog: Arc<ProviderCatalog>,
    executor: Arc<dyn ExecutionInterface>,
    tracker: Arc<PerformanceTracker>,
    clock: Arc<dyn ClockSource>,
    events: Option<EventBus>,
    config: ExecutionConfig,
}

impl std::fmt::Debug for ExecutionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionCoordinator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// What a single attempt produced, before bookkeeping
enum AttemptResult {
    Served(ProviderResponse),
    Failed(InvocationError),
    TimedOut(Duration),
    Cancelled,
}

impl ExecutionCoordinator {
    pub fn new(
        catalog: Arc<ProviderCatalog>,
        executor: Arc<dyn ExecutionInterface>,
        tracker: Arc<PerformanceTracker>,
    ) -> Self {
        Self {
            catalog,
            executor,
            tracker,
            clock: Arc::new(SystemClock),
            events: None,
            config: ExecutionConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ExecutionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn ClockSource>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    /// Execute a routed request, falling back down the chain on failure.
    ///
    /// Returns the first successful response. Fails with
    /// `AllCandidatesExhausted` when every attempted candidate failed, or
    /// `Cancelled` when `cancel` fires first.
    pub async fn run(
        &self,
        request: &RoutingRequest,
        decision: &RoutingDecision,
        cancel: CancellationToken,
    ) -> Result<ExecutionResult> {
        let order: Vec<FallbackEntry> = decision
            .attempt_order()
            .into_iter()
            .take(self.config.max_attempts)
            .collect();

        let mut state = ExecutionState::Pending;
        let mut attempts: Vec<ExecutionAttempt> = Vec::with_capacity(order.len());
        let mut last_error = String::from("no candidates attempted");

        for (idx, candidate) in order.into_iter().enumerate() {
            if cancel.is_cancelled() {
                break;
            }
            let attempt_no = idx + 1;
            self.transition(
                &request.id,
                &mut state,
                ExecutionState::Attempting {
                    provider_id: candidate.provider_id.clone(),
                    model_id: candidate.model_id.clone(),
                    attempt: attempt_no,
                },
            );

            let timeout = self.config.attempt_timeout(request, &candidate);
            let invocation = Invocation {
                request_id: request.id.clone(),
                provider_id: candidate.provider_id.clone(),
                model_id: candidate.model_id.clone(),
                attempt: attempt_no,
                task_type: request.task_type.clone(),
                content_type: request.content_type,
                estimated_tokens: request.estimated_tokens,
                timeout_ms: timeout.as_millis() as u64,
            };

            let started_at = self.clock.now();
            let result = self.invoke(&invocation, timeout, &cancel).await;
            let finished_at = self.clock.now();
            let latency_ms = (finished_at - started_at).num_milliseconds().max(0) as u64;

            let (outcome, usage, error, response) = match result {
                AttemptResult::Served(response) => {
                    (AttemptOutcome::Success, Some(response.usage), None, Some(response))
                }
                AttemptResult::Failed(e) => {
                    let err = Error::ExecutionError {
                        provider_id: candidate.provider_id.clone(),
                        model_id: candidate.model_id.clone(),
                        message: e.message,
                    };
                    (AttemptOutcome::Failure, e.usage, Some(err.to_string()), None)
                }
                AttemptResult::TimedOut(budget) => {
                    let err = Error::ExecutionTimeout {
                        provider_id: candidate.provider_id.clone(),
                        model_id: candidate.model_id.clone(),
                        timeout_ms: budget.as_millis() as u64,
                    };
                    (AttemptOutcome::Timeout, None, Some(err.to_string()), None)
                }
                AttemptResult::Cancelled => (
                    AttemptOutcome::Cancelled,
                    None,
                    Some("cancelled by caller".to_string()),
                    None,
                ),
            };

            let attempt = ExecutionAttempt {
                request_id: request.id.clone(),
                provider_id: candidate.provider_id.clone(),
                model_id: candidate.model_id.clone(),
                attempt: attempt_no,
                outcome,
                started_at,
                finished_at,
                latency_ms,
                usage,
                cost: self.actual_cost(&candidate, usage.as_ref()),
                error,
            };
            self.record(&attempt);
            attempts.push(attempt);

            match response {
                Some(response) => {
                    self.transition(
                        &request.id,
                        &mut state,
                        ExecutionState::Succeeded {
                            provider_id: candidate.provider_id.clone(),
                            model_id: candidate.model_id.clone(),
                        },
                    );
                    let total_cost = attempts.iter().map(|a| a.cost).sum();
                    self.complete(&request.id, &state, attempts.len(), total_cost);

                    info!(
                        request_id = %request.id,
                        provider = %candidate.provider_id,
                        model = %candidate.model_id,
                        attempts = attempts.len(),
                        total_cost = total_cost,
                        "Request served"
                    );
                    return Ok(ExecutionResult {
                        request_id: request.id.clone(),
                        response,
                        served_by: candidate,
                        attempts,
                        total_cost,
                        decision: decision.clone(),
                    });
                }
                None if outcome == AttemptOutcome::Cancelled => break,
                None => {
                    let message = attempts
                        .last()
                        .and_then(|a| a.error.clone())
                        .unwrap_or_default();
                    warn!(
                        request_id = %request.id,
                        provider = %candidate.provider_id,
                        model = %candidate.model_id,
                        outcome = %outcome,
                        error = %message,
                        "Attempt failed, moving to next candidate"
                    );
                    last_error = message;
                }
            }
        }

        let total_cost: f64 = attempts.iter().map(|a| a.cost).sum();
        if cancel.is_cancelled() {
            self.transition(&request.id, &mut state, ExecutionState::Cancelled);
            self.complete(&request.id, &state, attempts.len(), total_cost);
            info!(request_id = %request.id, attempts = attempts.len(), "Request cancelled");
            return Err(Error::Cancelled(request.id.clone()));
        }

        self.transition(&request.id, &mut state, ExecutionState::Exhausted);
        self.complete(&request.id, &state, attempts.len(), total_cost);
        warn!(
            request_id = %request.id,
            attempts = attempts.len(),
            last_error = %last_error,
            "All candidates exhausted"
        );
        Err(Error::AllCandidatesExhausted {
            request_id: request.id.clone(),
            attempts,
            last_error,
            decision: Box::new(decision.clone()),
        })
    }

    async fn invoke(
        &self,
        invocation: &Invocation,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> AttemptResult {
        if let Err(e) = self.catalog.begin_request(&invocation.provider_id) {
            warn!(provider = %invocation.provider_id, error = %e, "Could not track load");
        }

        let call_token = cancel.child_token();
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => AttemptResult::Cancelled,
            outcome = tokio::time::timeout(
                timeout,
                self.executor.invoke(invocation, call_token.clone()),
            ) => match outcome {
                Ok(Ok(response)) => AttemptResult::Served(response),
                Ok(Err(e)) => AttemptResult::Failed(e),
                Err(_) => AttemptResult::TimedOut(timeout),
            },
        };
        // Stop any work the executor spawned for an abandoned call
        call_token.cancel();

        if let Err(e) = self.catalog.end_request(&invocation.provider_id) {
            warn!(provider = %invocation.provider_id, error = %e, "Could not track load");
        }
        result
    }

    fn actual_cost(&self, candidate: &FallbackEntry, usage: Option<&TokenUsage>) -> f64 {
        let Some(usage) = usage else {
            return 0.0;
        };
        self.catalog
            .get(&candidate.provider_id)
            .and_then(|p| p.model(&candidate.model_id).map(|m| p.pricing_for(m)))
            .map_or(0.0, |pricing| pricing.estimate_cost(usage))
    }

    fn record(&self, attempt: &ExecutionAttempt) {
        if let Err(e) = self.tracker.record_attempt(attempt) {
            warn!(provider = %attempt.provider_id, error = %e, "Failed to record attempt");
        }
        self.publish(RoutingEvent::AttemptFinished {
            request_id: attempt.request_id.clone(),
            provider_id: attempt.provider_id.clone(),
            model_id: attempt.model_id.clone(),
            attempt: attempt.attempt,
            outcome: attempt.outcome,
            latency_ms: attempt.latency_ms,
        });
    }

    fn transition(&self, request_id: &str, state: &mut ExecutionState, next: ExecutionState) {
        debug!(request_id = %request_id, from = %state, to = %next, "Execution state");
        *state = next;
    }

    fn complete(&self, request_id: &str, state: &ExecutionState, attempts: usize, total_cost: f64) {
        self.publish(RoutingEvent::ExecutionCompleted {
            request_id: request_id.to_string(),
            state: state.clone(),
            attempts,
            total_cost,
        });
    }

    fn publish(&self, event: RoutingEvent) {
        if let Some(events) = &self.events {
            events.publish(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Model, Pricing, Provider};
    use crate::execution::interface::ManualClock;
    use crate::routing::Router;
    use crate::tracker::TrackerConfig;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Clone, Copy)]
    enum Script {
        Ok,
        Fail,
        Hang,
    }

    /// Executor with a fixed behavior per provider that logs every call
    struct ScriptedExecutor {
        scripts: HashMap<String, Script>,
        calls: Mutex<Vec<String>>,
        clock: Arc<ManualClock>,
    }

    impl ScriptedExecutor {
        fn new(scripts: &[(&str, Script)], clock: Arc<ManualClock>) -> Self {
            Self {
                scripts: scripts.iter().map(|(id, s)| (id.to_string(), *s)).collect(),
                calls: Mutex::new(Vec::new()),
                clock,
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ExecutionInterface for ScriptedExecutor {
        async fn invoke(
            &self,
            invocation: &Invocation,
            cancel: CancellationToken,
        ) -> std::result::Result<ProviderResponse, InvocationError> {
            self.calls.lock().unwrap().push(invocation.provider_id.clone());
            self.clock.advance_ms(250);
            match self.scripts.get(&invocation.provider_id).copied().unwrap_or(Script::Ok) {
                Script::Ok => Ok(ProviderResponse::new("done", TokenUsage::new(1000, 500))),
                Script::Fail => Err(InvocationError::new("upstream 503")
                    .with_usage(TokenUsage::new(1000, 0))),
                Script::Hang => {
                    cancel.cancelled().await;
                    Err(InvocationError::new("aborted"))
                }
            }
        }
    }

    struct Fixture {
        catalog: Arc<ProviderCatalog>,
        router: Router,
        executor: Arc<ScriptedExecutor>,
        coordinator: ExecutionCoordinator,
    }

    /// Providers a, b, c with strictly decreasing scores
    fn fixture(scripts: &[(&str, Script)]) -> Fixture {
        let catalog = Arc::new(
            ProviderCatalog::from_providers(["a", "b", "c"].iter().enumerate().map(|(i, id)| {
                Provider::new(*id, Pricing::new(0.001 * (i + 1) as f64, 0.002))
                    .with_model(Model::new("m"))
            }))
            .unwrap(),
        );
        let clock = Arc::new(ManualClock::default());
        let executor = Arc::new(ScriptedExecutor::new(scripts, Arc::clone(&clock)));
        let tracker = Arc::new(PerformanceTracker::new(
            Arc::clone(&catalog),
            TrackerConfig::default(),
        ));
        let coordinator = ExecutionCoordinator::new(
            Arc::clone(&catalog),
            Arc::clone(&executor) as Arc<dyn ExecutionInterface>,
            tracker,
        )
        .with_clock(clock);
        Fixture {
            router: Router::new(Arc::clone(&catalog)),
            catalog,
            executor,
            coordinator,
        }
    }

    #[tokio::test]
    async fn test_primary_success() {
        let f = fixture(&[]);
        let request = RoutingRequest::new(1000, 500);
        let decision = f.router.route(&request).unwrap();

        let result = f
            .coordinator
            .run(&request, &decision, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.served_by.provider_id, "a");
        assert_eq!(result.attempts.len(), 1);
        assert!(!result.used_fallback());
        assert_eq!(result.attempts[0].latency_ms, 250);
        // 1.0 * 0.001 + 0.5 * 0.002
        assert!((result.total_cost - 0.002).abs() < 1e-12);
        assert_eq!(f.catalog.get("a").unwrap().performance.current_load, 0);
    }

    #[tokio::test]
    async fn test_falls_back_after_failure() {
        let f = fixture(&[("a", Script::Fail)]);
        let request = RoutingRequest::new(1000, 500);
        let decision = f.router.route(&request).unwrap();

        let result = f
            .coordinator
            .run(&request, &decision, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.served_by.provider_id, "b");
        assert_eq!(f.executor.calls(), vec!["a", "b"]);
        assert_eq!(result.attempts[0].outcome, AttemptOutcome::Failure);
        assert_eq!(result.attempts[1].outcome, AttemptOutcome::Success);
        // failed attempt still pays for its reported input tokens
        assert!(result.attempts[0].cost > 0.0);
        assert_eq!(f.catalog.get("a").unwrap().performance.success_rate, 90.0);
    }

    #[tokio::test]
    async fn test_exhaustion_records_every_failure() {
        let f = fixture(&[("a", Script::Fail), ("b", Script::Fail), ("c", Script::Fail)]);
        let request = RoutingRequest::new(1000, 500);
        let decision = f.router.route(&request).unwrap();

        let err = f
            .coordinator
            .run(&request, &decision, CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            Error::AllCandidatesExhausted {
                attempts,
                last_error,
                decision: walked,
                ..
            } => {
                assert_eq!(attempts.len(), 3);
                assert!(last_error.contains("upstream 503"));
                let tried: Vec<&str> = attempts.iter().map(|a| a.provider_id.as_str()).collect();
                assert_eq!(tried, vec!["a", "b", "c"]);
                assert!(attempts.iter().all(|a| a.outcome == AttemptOutcome::Failure));
                assert_eq!(*walked, decision);
            }
            other => panic!("unexpected error: {}", other),
        }
        for id in ["a", "b", "c"] {
            let perf = f.catalog.get(id).unwrap().performance;
            assert_eq!(perf.failed_requests, 1, "{}", id);
        }
    }

    #[tokio::test]
    async fn test_max_attempts_ceiling() {
        let f = fixture(&[("a", Script::Fail), ("b", Script::Fail)]);
        let coordinator = f.coordinator.with_config(ExecutionConfig {
            max_attempts: 2,
            ..Default::default()
        });
        let request = RoutingRequest::new(1000, 500);
        let decision = f.router.route(&request).unwrap();

        let err = coordinator
            .run(&request, &decision, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::AllCandidatesExhausted { ref attempts, .. } if attempts.len() == 2
        ));
        assert_eq!(f.executor.calls(), vec!["a", "b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_triggers_fallback() {
        let f = fixture(&[("a", Script::Hang)]);
        let request = RoutingRequest::new(100, 100).with_max_latency_ms(5_000);
        let decision = f.router.route(&request).unwrap();

        let result = f
            .coordinator
            .run(&request, &decision, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.attempts[0].outcome, AttemptOutcome::Timeout);
        assert!(
            result.attempts[0]
                .error
                .as_deref()
                .unwrap()
                .contains("5000ms")
        );
        assert_eq!(result.served_by.provider_id, "b");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_is_not_a_failure() {
        let f = fixture(&[("a", Script::Hang)]);
        let request = RoutingRequest::new(100, 100);
        let decision = f.router.route(&request).unwrap();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let err = f.coordinator.run(&request, &decision, cancel).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled(_)));

        let perf = f.catalog.get("a").unwrap().performance;
        assert_eq!(perf.success_rate, 100.0);
        assert_eq!(perf.cancelled_requests, 1);
        assert_eq!(perf.current_load, 0);
        assert_eq!(f.executor.calls(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_already_cancelled_makes_no_calls() {
        let f = fixture(&[]);
        let request = RoutingRequest::new(100, 100);
        let decision = f.router.route(&request).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = f.coordinator.run(&request, &decision, cancel).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled(_)));
        assert!(f.executor.calls().is_empty());
    }

    #[test]
    fn test_attempt_timeout_budget() {
        let config = ExecutionConfig::default();
        let entry = FallbackEntry {
            provider_id: "a".into(),
            model_id: "m".into(),
            score: 0.5,
            estimated_cost: 0.0,
            estimated_latency_ms: 2000.0,
            expected_quality: 0.8,
        };

        let plain = RoutingRequest::new(10, 10);
        assert_eq!(config.attempt_timeout(&plain, &entry), Duration::from_millis(6000));

        let bounded = RoutingRequest::new(10, 10).with_max_latency_ms(750);
        assert_eq!(config.attempt_timeout(&bounded, &entry), Duration::from_millis(750));

        let fast = FallbackEntry {
            estimated_latency_ms: 10.0,
            ..entry
        };
        assert_eq!(config.attempt_timeout(&plain, &fast), Duration::from_millis(1000));
    }
}
