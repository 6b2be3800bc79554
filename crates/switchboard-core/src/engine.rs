//! Routing engine
//!
//! The engine wires the catalog, router, tracker, and execution coordinator
//! together behind the public operations: `route`, `execute`,
//! `register_provider`, `update_provider_status`, and `provider_metrics`.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::broadcast::Receiver;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::catalog::{Provider, ProviderCatalog, ProviderSnapshot, ProviderStatus};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::events::{EventBus, RoutingEvent};
use crate::execution::{
    ClockSource, ExecutionCoordinator, ExecutionInterface, ExecutionResult, SystemClock,
};
use crate::routing::{Router, RoutingDecision, RoutingRequest};
use crate::tracker::{
    HealthCheckMetricsSource, MetricsSource, PerformanceTracker, ProviderHealth,
    SimulatedMetricsSource, TrackerMode,
};

/// Builder for [`RoutingEngine`]
pub struct RoutingEngineBuilder {
    config: Config,
    catalog: Option<Arc<ProviderCatalog>>,
    executor: Option<Arc<dyn ExecutionInterface>>,
    clock: Arc<dyn ClockSource>,
    metrics_source: Option<Arc<dyn MetricsSource>>,
    events: EventBus,
}

impl Default for RoutingEngineBuilder {
    fn default() -> Self {
        Self {
            config: Config::default(),
            catalog: None,
            executor: None,
            clock: Arc::new(SystemClock),
            metrics_source: None,
            events: EventBus::default(),
        }
    }
}

impl RoutingEngineBuilder {
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Use this catalog; defaults to the built-in providers
    pub fn catalog(mut self, catalog: Arc<ProviderCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Executor used by `execute`; required
    pub fn executor(mut self, executor: Arc<dyn ExecutionInterface>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn ClockSource>) -> Self {
        self.clock = clock;
        self
    }

    /// Override the metrics source picked from `tracker.mode`
    pub fn metrics_source(mut self, source: Arc<dyn MetricsSource>) -> Self {
        self.metrics_source = Some(source);
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.events = EventBus::new(capacity);
        self
    }

    pub fn build(self) -> Result<RoutingEngine> {
        self.config
            .validate()
            .map_err(|e| Error::ConfigError(e.to_string()))?;
        let executor = self
            .executor
            .ok_or_else(|| Error::ConfigError("an execution interface is required".to_string()))?;
        let catalog = self
            .catalog
            .unwrap_or_else(|| Arc::new(ProviderCatalog::with_defaults()));

        let source: Option<Arc<dyn MetricsSource>> = match self.metrics_source {
            Some(source) => Some(source),
            None => match self.config.tracker.mode {
                TrackerMode::Simulated => Some(Arc::new(SimulatedMetricsSource::new())),
                TrackerMode::HealthCheck => Some(Arc::new(HealthCheckMetricsSource::new(
                    Duration::from_millis(self.config.tracker.health_check_timeout_ms),
                )?)),
                TrackerMode::Disabled => None,
            },
        };

        let mut tracker = PerformanceTracker::new(Arc::clone(&catalog), self.config.tracker.clone())
            .with_events(self.events.clone());
        if let Some(source) = source {
            tracker = tracker.with_source(source);
        }
        let tracker = Arc::new(tracker);

        let router = Router::with_config(Arc::clone(&catalog), self.config.routing.clone());
        let coordinator =
            ExecutionCoordinator::new(Arc::clone(&catalog), executor, Arc::clone(&tracker))
                .with_config(self.config.execution.clone())
                .with_clock(self.clock)
                .with_events(self.events.clone());

        Ok(RoutingEngine {
            catalog,
            router,
            tracker,
            coordinator,
            events: self.events,
            background: Mutex::new(None),
        })
    }
}

struct Background {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Multi-provider routing engine
pub struct RoutingEngine {
    catalog: Arc<ProviderCatalog>,
    router: Router,
    tracker: Arc<PerformanceTracker>,
    coordinator: ExecutionCoordinator,
    events: EventBus,
    background: Mutex<Option<Background>>,
}

impl std::fmt::Debug for RoutingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutingEngine")
            .field("providers", &self.catalog.len())
            .field("router", self.router.config())
            .field("tracker", &self.tracker)
            .finish_non_exhaustive()
    }
}

impl RoutingEngine {
    pub fn builder() -> RoutingEngineBuilder {
        RoutingEngineBuilder::default()
    }

    /// Engine with default configuration over the given catalog and executor
    pub fn new(catalog: Arc<ProviderCatalog>, executor: Arc<dyn ExecutionInterface>) -> Result<Self> {
        Self::builder().catalog(catalog).executor(executor).build()
    }

    pub fn catalog(&self) -> &Arc<ProviderCatalog> {
        &self.catalog
    }

    pub fn tracker(&self) -> &Arc<PerformanceTracker> {
        &self.tracker
    }

    /// Choose a provider and fallbacks for a request. Never calls a provider.
    pub fn route(&self, request: &RoutingRequest) -> Result<RoutingDecision> {
        let decision = self.router.route(request)?;
        self.events.publish(RoutingEvent::DecisionMade {
            request_id: decision.request_id.clone(),
            provider_id: decision.selected_provider.clone(),
            model_id: decision.selected_model.clone(),
            score: decision.score,
            fallbacks: decision.fallback_chain.len(),
        });
        Ok(decision)
    }

    /// Route a request, then run it with fallback.
    ///
    /// The returned result carries the decision; `served_by` names the
    /// candidate that actually answered.
    pub async fn execute(
        &self,
        request: &RoutingRequest,
        cancel: CancellationToken,
    ) -> Result<ExecutionResult> {
        let decision = self.route(request)?;
        self.coordinator.run(request, &decision, cancel).await
    }

    /// Add or update a provider definition.
    ///
    /// Returns `true` if the provider is new.
    pub fn register_provider(&self, provider: Provider) -> Result<bool> {
        let id = provider.id.clone();
        let new = self.catalog.register(provider)?;
        self.events.publish(RoutingEvent::ProviderRegistered {
            provider_id: id,
            new,
        });
        Ok(new)
    }

    /// Change a provider's routing status
    pub fn update_provider_status(&self, provider_id: &str, status: ProviderStatus) -> Result<()> {
        let previous = self.catalog.update_status(provider_id, status)?;
        if previous != status {
            info!(provider = %provider_id, from = %previous, to = %status, "Provider status changed");
            self.events.publish(RoutingEvent::ProviderStatusChanged {
                provider_id: provider_id.to_string(),
                from: previous,
                to: status,
            });
        }
        Ok(())
    }

    /// Point-in-time copy of every provider, in registration order
    pub fn provider_metrics(&self) -> Vec<ProviderSnapshot> {
        self.catalog.snapshot()
    }

    /// Health classification of every provider
    pub fn health_report(&self) -> Vec<ProviderHealth> {
        self.tracker.health_report()
    }

    /// Subscribe to engine events
    pub fn subscribe(&self) -> Receiver<RoutingEvent> {
        self.events.subscribe()
    }

    /// Start the periodic metrics refresh.
    ///
    /// Returns `false` if there is no metrics source or it is already running.
    pub fn start_tracker(&self) -> bool {
        if !self.tracker.has_source() {
            return false;
        }
        let mut background = self.background.lock().unwrap_or_else(PoisonError::into_inner);
        if background.is_some() {
            return false;
        }
        let cancel = CancellationToken::new();
        let handle = Arc::clone(&self.tracker).spawn(cancel.clone());
        *background = Some(Background { cancel, handle });
        true
    }

    /// Stop the periodic refresh and wait for it to finish
    pub async fn shutdown(&self) {
        let background = self
            .background
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(Background { cancel, handle }) = background {
            cancel.cancel();
            if let Err(e) = handle.await {
                warn!(error = %e, "Performance tracker task ended abnormally");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{MetricsSample, Model, Pricing, TokenUsage};
    use crate::execution::{Invocation, InvocationError, ProviderResponse};
    use crate::tracker::ScriptedMetricsSource;
    use async_trait::async_trait;

    struct Echo;

    #[async_trait]
    impl ExecutionInterface for Echo {
        async fn invoke(
            &self,
            invocation: &Invocation,
            _cancel: CancellationToken,
        ) -> std::result::Result<ProviderResponse, InvocationError> {
            Ok(ProviderResponse::new(
                format!("{}/{}", invocation.provider_id, invocation.model_id),
                invocation.estimated_tokens,
            ))
        }
    }

    fn engine() -> RoutingEngine {
        let mut config = Config::default();
        config.tracker.mode = TrackerMode::Disabled;
        RoutingEngine::builder()
            .config(config)
            .executor(Arc::new(Echo))
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_requires_executor() {
        let err = RoutingEngine::builder().build().unwrap_err();
        assert_eq!(err.code(), "E600");
    }

    #[tokio::test]
    async fn test_execute_serves_primary() {
        let engine = engine();
        let request = RoutingRequest::new(500, 200).with_task_type("coding");

        let result = engine.execute(&request, CancellationToken::new()).await.unwrap();
        assert_eq!(result.served_by.provider_id, result.decision.selected_provider);
        assert_eq!(
            result.response.content,
            format!("{}/{}", result.served_by.provider_id, result.served_by.model_id)
        );
    }

    #[tokio::test]
    async fn test_status_change_emits_event_and_reroutes() {
        let engine = engine();
        let mut rx = engine.subscribe();
        let request = RoutingRequest::new(500, 200);

        let first = engine.route(&request).unwrap();
        engine
            .update_provider_status(&first.selected_provider, ProviderStatus::Unavailable)
            .unwrap();
        let second = engine.route(&request).unwrap();
        assert_ne!(first.selected_provider, second.selected_provider);

        assert!(matches!(rx.recv().await.unwrap(), RoutingEvent::DecisionMade { .. }));
        assert!(matches!(
            rx.recv().await.unwrap(),
            RoutingEvent::ProviderStatusChanged { to: ProviderStatus::Unavailable, .. }
        ));
    }

    #[test]
    fn test_register_provider_reports_new() {
        let engine = engine();
        let provider = Provider::new("acme", Pricing::new(0.0001, 0.0001)).with_model(Model::new("a1"));

        assert!(engine.register_provider(provider.clone()).unwrap());
        assert!(!engine.register_provider(provider).unwrap());
        assert!(engine.provider_metrics().iter().any(|s| s.provider.id == "acme"));
    }

    #[test]
    fn test_unknown_provider_status_update() {
        let err = engine()
            .update_provider_status("ghost", ProviderStatus::Degraded)
            .unwrap_err();
        assert!(matches!(err, Error::ProviderNotFound(_)));
    }

    #[test]
    fn test_tracker_not_started_without_source() {
        assert!(!engine().start_tracker());
    }

    #[tokio::test(start_paused = true)]
    async fn test_tracker_lifecycle() {
        let source = Arc::new(ScriptedMetricsSource::new());
        source.push(
            "openai",
            MetricsSample {
                current_load: Some(9),
                ..Default::default()
            },
        );
        let engine = RoutingEngine::builder()
            .executor(Arc::new(Echo))
            .metrics_source(source)
            .build()
            .unwrap();

        assert!(engine.start_tracker());
        assert!(!engine.start_tracker());

        tokio::time::sleep(Duration::from_secs(31)).await;
        let openai = engine
            .provider_metrics()
            .into_iter()
            .find(|s| s.provider.id == "openai")
            .unwrap();
        assert_eq!(openai.provider.performance.current_load, 9);

        engine.shutdown().await;
        assert!(engine.start_tracker());
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_usage_flows_into_cost() {
        let engine = engine();
        let request = RoutingRequest::new(1000, 1000);
        let result = engine.execute(&request, CancellationToken::new()).await.unwrap();

        let provider = engine.catalog().get(&result.served_by.provider_id).unwrap();
        let model = provider.model(&result.served_by.model_id).unwrap();
        let expected = provider
            .pricing_for(model)
            .estimate_cost(&TokenUsage::new(1000, 1000));
        assert_eq!(result.total_cost, expected);
    }
}
