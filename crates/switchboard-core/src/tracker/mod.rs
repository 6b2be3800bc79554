//! Performance tracking
//!
//! Keeps each provider's live metrics representative of recent behavior.
//! Two kinds of writes land here:
//! - Outcome feedback after every execution attempt (EMA on success rate)
//! - Periodic refresh from a pluggable [`MetricsSource`]
//!
//! Both go through the catalog's per-provider lock, so updates for
//! different providers never contend.

mod source;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::catalog::{HealthStatus, ProviderCatalog, ProviderStatus};
use crate::error::{Error, Result};
use crate::events::{EventBus, RoutingEvent};
use crate::execution::{AttemptOutcome, ExecutionAttempt};

pub use source::{
    HealthCheckMetricsSource, MetricsSource, ScriptedMetricsSource, SimulatedMetricsSource,
};

/// Where periodic metrics come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackerMode {
    /// Bounded random walk, for demos and load simulation
    #[default]
    Simulated,
    /// Poll each provider's `health_check_url`
    HealthCheck,
    /// Only outcome feedback; no background refresh
    Disabled,
}

impl std::fmt::Display for TrackerMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Simulated => write!(f, "simulated"),
            Self::HealthCheck => write!(f, "health_check"),
            Self::Disabled => write!(f, "disabled"),
        }
    }
}

impl std::str::FromStr for TrackerMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "simulated" => Ok(Self::Simulated),
            "health_check" => Ok(Self::HealthCheck),
            "disabled" => Ok(Self::Disabled),
            _ => Err(format!("Unknown tracker mode: {}", s)),
        }
    }
}

/// Tracker configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// EMA smoothing factor for success rate and latency
    pub ema_alpha: f64,
    /// Seconds between background refreshes
    pub refresh_interval_secs: u64,
    /// Lower clamp for refreshed reliability and quality
    pub quality_floor: f64,
    pub mode: TrackerMode,
    /// Per-request timeout for health checks, in milliseconds
    pub health_check_timeout_ms: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            ema_alpha: 0.1,
            refresh_interval_secs: 30,
            quality_floor: 0.7,
            mode: TrackerMode::Simulated,
            health_check_timeout_ms: 5000,
        }
    }
}

impl TrackerConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if !(self.ema_alpha > 0.0 && self.ema_alpha <= 1.0) {
            return Err(format!("ema_alpha {} must be in (0, 1]", self.ema_alpha));
        }
        if !(0.0..=1.0).contains(&self.quality_floor) {
            return Err(format!("quality_floor {} is outside [0, 1]", self.quality_floor));
        }
        if self.refresh_interval_secs == 0 {
            return Err("refresh_interval_secs must be at least 1".to_string());
        }
        Ok(())
    }
}

/// One step of an exponential moving average
pub fn ema(previous: f64, sample: f64, alpha: f64) -> f64 {
    previous * (1.0 - alpha) + sample * alpha
}

/// Health summary of one provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderHealth {
    pub provider_id: String,
    pub status: ProviderStatus,
    pub health: HealthStatus,
    pub success_rate: f64,
    pub average_latency_ms: f64,
    pub total_requests: u64,
    pub failed_requests: u64,
    pub cancelled_requests: u64,
}

/// Applies outcome feedback and periodic refreshes to the catalog
pub struct PerformanceTracker {
    catalog: Arc<ProviderCatalog>,
    config: TrackerConfig,
    source: Option<Arc<dyn MetricsSource>>,
    events: Option<EventBus>,
}

impl std::fmt::Debug for PerformanceTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PerformanceTracker")
            .field("config", &self.config)
            .field("source", &self.source.as_ref().map(|s| s.name()))
            .finish()
    }
}

impl PerformanceTracker {
    /// Create a tracker with no metrics source
    pub fn new(catalog: Arc<ProviderCatalog>, config: TrackerConfig) -> Self {
        Self {
            catalog,
            config,
            source: None,
            events: None,
        }
    }

    /// Set the periodic metrics source
    pub fn with_source(mut self, source: Arc<dyn MetricsSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Publish status changes and refresh ticks on this bus
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn has_source(&self) -> bool {
        self.source.is_some()
    }

    /// Fold one attempt's outcome into its provider's metrics.
    ///
    /// Success and failure move the success rate by one EMA step toward
    /// 100 or 0. Successful attempts also fold their base latency (observed
    /// latency minus expected generation time) into `average_latency_ms`.
    /// Cancelled attempts only bump `cancelled_requests`.
    pub fn record_attempt(&self, attempt: &ExecutionAttempt) -> Result<()> {
        let alpha = self.config.ema_alpha;

        let base_latency_ms = if attempt.outcome.is_success() {
            Some(self.base_latency_ms(attempt))
        } else {
            None
        };

        let success_rate = self.catalog.with_performance_mut(&attempt.provider_id, |perf| {
            match attempt.outcome {
                AttemptOutcome::Cancelled => {
                    perf.cancelled_requests += 1;
                }
                outcome => {
                    perf.total_requests += 1;
                    if outcome.is_failure() {
                        perf.failed_requests += 1;
                    }
                    let sample = if outcome.is_success() { 100.0 } else { 0.0 };
                    perf.success_rate = ema(perf.success_rate, sample, alpha).clamp(0.0, 100.0);
                    if let Some(latency) = base_latency_ms {
                        perf.average_latency_ms = ema(perf.average_latency_ms, latency, alpha);
                    }
                }
            }
            perf.success_rate
        })?;

        debug!(
            provider = %attempt.provider_id,
            model = %attempt.model_id,
            outcome = %attempt.outcome,
            latency_ms = attempt.latency_ms,
            success_rate = success_rate,
            "Recorded attempt outcome"
        );
        Ok(())
    }

    fn base_latency_ms(&self, attempt: &ExecutionAttempt) -> f64 {
        let observed = attempt.latency_ms as f64;
        let generation_ms = self
            .catalog
            .get(&attempt.provider_id)
            .and_then(|p| {
                let model = p.model(&attempt.model_id)?;
                let tps = model.performance.tokens_per_second;
                let usage = attempt.usage?;
                (tps > 0.0).then(|| usage.output_tokens as f64 / tps * 1000.0)
            })
            .unwrap_or(0.0);
        (observed - generation_ms).max(0.0)
    }

    /// Poll the metrics source once for every provider.
    ///
    /// Returns the number of providers updated. A failing sample for one
    /// provider is logged and skipped.
    pub async fn refresh(&self) -> Result<usize> {
        let Some(source) = &self.source else {
            return Ok(0);
        };

        let mut updated = 0;
        for snapshot in self.catalog.snapshot() {
            let provider = &snapshot.provider;
            let sample = match source.sample(provider).await {
                Ok(sample) => sample.clamped(self.config.quality_floor),
                Err(e) => {
                    warn!(provider = %provider.id, error = %e, "Metrics sample failed");
                    continue;
                }
            };
            if sample.is_empty() {
                continue;
            }

            let previous = match self.catalog.update_performance(&provider.id, &sample) {
                Ok(previous) => previous,
                Err(e) => {
                    warn!(provider = %provider.id, error = %e, "Metrics sample rejected");
                    continue;
                }
            };
            updated += 1;

            if let Some(status) = sample.status
                && status != previous
            {
                info!(
                    provider = %provider.id,
                    from = %previous,
                    to = %status,
                    "Provider status changed by health check"
                );
                self.publish(RoutingEvent::ProviderStatusChanged {
                    provider_id: provider.id.clone(),
                    from: previous,
                    to: status,
                });
            }
        }

        debug!(source = source.name(), providers = updated, "Metrics refreshed");
        self.publish(RoutingEvent::MetricsRefreshed { providers: updated });
        Ok(updated)
    }

    /// Run `refresh` on the configured interval until `cancel` fires
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let period = self.config.refresh_interval();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // First tick completes immediately
            interval.tick().await;
            info!(interval_secs = period.as_secs(), "Performance tracker started");

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("Performance tracker stopped");
                        break;
                    }
                    _ = interval.tick() => {
                        if let Err(e) = self.refresh().await {
                            warn!(error = %e, "Metrics refresh failed");
                        }
                    }
                }
            }
        })
    }

    /// Health classification of one provider
    pub fn health(&self, provider_id: &str) -> Result<HealthStatus> {
        self.catalog
            .get(provider_id)
            .map(|p| p.performance.health())
            .ok_or_else(|| Error::ProviderNotFound(provider_id.to_string()))
    }

    /// Health of every provider, in registration order
    pub fn health_report(&self) -> Vec<ProviderHealth> {
        self.catalog
            .snapshot()
            .into_iter()
            .map(|s| {
                let perf = &s.provider.performance;
                ProviderHealth {
                    provider_id: s.provider.id.clone(),
                    status: perf.status,
                    health: s.health,
                    success_rate: perf.success_rate,
                    average_latency_ms: perf.average_latency_ms,
                    total_requests: perf.total_requests,
                    failed_requests: perf.failed_requests,
                    cancelled_requests: perf.cancelled_requests,
                }
            })
            .collect()
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
    use crate::catalog::{MetricsSample, Model, Pricing, Provider, TokenUsage};
    use async_trait::async_trait;
    use chrono::Utc;

    fn catalog() -> Arc<ProviderCatalog> {
        Arc::new(
            ProviderCatalog::from_providers([Provider::new("a", Pricing::free())
                .with_model(Model::new("m").with_performance(100.0, 0.8, 0.8))])
            .unwrap(),
        )
    }

    fn attempt(outcome: AttemptOutcome, latency_ms: u64) -> ExecutionAttempt {
        let now = Utc::now();
        ExecutionAttempt {
            request_id: "r".to_string(),
            provider_id: "a".to_string(),
            model_id: "m".to_string(),
            attempt: 1,
            outcome,
            started_at: now,
            finished_at: now,
            latency_ms,
            usage: Some(TokenUsage::new(100, 100)),
            cost: 0.0,
            error: None,
        }
    }

    fn success_rate(catalog: &ProviderCatalog) -> f64 {
        catalog.get("a").unwrap().performance.success_rate
    }

    #[test]
    fn test_single_failure_drops_to_ninety() {
        let catalog = catalog();
        let tracker = PerformanceTracker::new(Arc::clone(&catalog), TrackerConfig::default());

        tracker.record_attempt(&attempt(AttemptOutcome::Failure, 10)).unwrap();
        assert!((success_rate(&catalog) - 90.0).abs() < 1e-9);
    }

    #[test]
    fn test_repeated_failures_decrease_but_stay_non_negative() {
        let catalog = catalog();
        let tracker = PerformanceTracker::new(Arc::clone(&catalog), TrackerConfig::default());

        let mut previous = success_rate(&catalog);
        for _ in 0..10 {
            tracker.record_attempt(&attempt(AttemptOutcome::Timeout, 10)).unwrap();
            let current = success_rate(&catalog);
            assert!(current < previous);
            assert!(current >= 0.0);
            previous = current;
        }
        // 100 * 0.9^10
        assert!((previous - 100.0 * 0.9f64.powi(10)).abs() < 1e-9);

        let perf = catalog.get("a").unwrap().performance;
        assert_eq!(perf.total_requests, 10);
        assert_eq!(perf.failed_requests, 10);
    }

    #[test]
    fn test_cancellation_does_not_touch_success_rate() {
        let catalog = catalog();
        let tracker = PerformanceTracker::new(Arc::clone(&catalog), TrackerConfig::default());

        tracker.record_attempt(&attempt(AttemptOutcome::Cancelled, 10)).unwrap();
        let perf = catalog.get("a").unwrap().performance;
        assert_eq!(perf.success_rate, 100.0);
        assert_eq!(perf.total_requests, 0);
        assert_eq!(perf.cancelled_requests, 1);
    }

    #[test]
    fn test_success_folds_base_latency() {
        let catalog = catalog();
        let tracker = PerformanceTracker::new(Arc::clone(&catalog), TrackerConfig::default());

        // 100 output tokens at 100 tok/s = 1000ms generation; base 200ms
        tracker.record_attempt(&attempt(AttemptOutcome::Success, 1200)).unwrap();
        let perf = catalog.get("a").unwrap().performance;
        assert!((perf.average_latency_ms - (800.0 * 0.9 + 200.0 * 0.1)).abs() < 1e-9);
        assert_eq!(perf.success_rate, 100.0);
    }

    #[test]
    fn test_unknown_provider() {
        let tracker = PerformanceTracker::new(catalog(), TrackerConfig::default());
        let mut a = attempt(AttemptOutcome::Success, 1);
        a.provider_id = "ghost".to_string();
        assert!(matches!(tracker.record_attempt(&a), Err(Error::ProviderNotFound(_))));
        assert!(tracker.health("ghost").is_err());
    }

    #[test]
    fn test_health_follows_success_rate() {
        let catalog = catalog();
        let tracker = PerformanceTracker::new(Arc::clone(&catalog), TrackerConfig::default());
        assert_eq!(tracker.health("a").unwrap(), HealthStatus::Healthy);

        // 100 -> 90 -> 81
        tracker.record_attempt(&attempt(AttemptOutcome::Failure, 1)).unwrap();
        tracker.record_attempt(&attempt(AttemptOutcome::Failure, 1)).unwrap();
        assert_eq!(tracker.health("a").unwrap(), HealthStatus::Degraded);

        let report = tracker.health_report();
        assert_eq!(report.len(), 1);
        assert_eq!(report[0].health, HealthStatus::Degraded);
        // classification never changes routing status
        assert_eq!(report[0].status, ProviderStatus::Available);
    }

    #[tokio::test]
    async fn test_refresh_applies_clamped_samples() {
        let catalog = catalog();
        let source = Arc::new(ScriptedMetricsSource::new());
        source.push(
            "a",
            MetricsSample {
                reliability: Some(0.1),
                quality_score: Some(0.95),
                status: Some(ProviderStatus::Degraded),
                ..Default::default()
            },
        );
        let events = EventBus::default();
        let mut rx = events.subscribe();
        let tracker = PerformanceTracker::new(Arc::clone(&catalog), TrackerConfig::default())
            .with_source(source)
            .with_events(events);

        assert_eq!(tracker.refresh().await.unwrap(), 1);
        let perf = catalog.get("a").unwrap().performance;
        assert_eq!(perf.reliability, 0.7);
        assert_eq!(perf.quality_score, 0.95);
        assert_eq!(perf.status, ProviderStatus::Degraded);

        assert!(matches!(
            rx.recv().await.unwrap(),
            RoutingEvent::ProviderStatusChanged { to: ProviderStatus::Degraded, .. }
        ));
        assert!(matches!(
            rx.recv().await.unwrap(),
            RoutingEvent::MetricsRefreshed { providers: 1 }
        ));

        // queue drained: nothing more to apply
        assert_eq!(tracker.refresh().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_simulated_refresh_keeps_in_flight_load() {
        let catalog = catalog();
        catalog.begin_request("a").unwrap();
        catalog.begin_request("a").unwrap();
        let tracker = PerformanceTracker::new(Arc::clone(&catalog), TrackerConfig::default())
            .with_source(Arc::new(SimulatedMetricsSource::seeded(3)));

        for _ in 0..5 {
            assert_eq!(tracker.refresh().await.unwrap(), 1);
            assert_eq!(catalog.get("a").unwrap().performance.current_load, 2);
        }

        catalog.end_request("a").unwrap();
        tracker.refresh().await.unwrap();
        assert_eq!(catalog.get("a").unwrap().performance.current_load, 1);
    }

    /// Flips the provider's status while its sample is being taken
    struct RacingSource {
        catalog: Arc<ProviderCatalog>,
    }

    #[async_trait]
    impl MetricsSource for RacingSource {
        fn name(&self) -> &'static str {
            "racing"
        }

        async fn sample(&self, provider: &Provider) -> Result<MetricsSample> {
            self.catalog.update_status(&provider.id, ProviderStatus::Degraded)?;
            Ok(MetricsSample {
                status: Some(ProviderStatus::Unavailable),
                ..Default::default()
            })
        }
    }

    #[tokio::test]
    async fn test_status_change_reports_status_at_write_time() {
        let catalog = catalog();
        let events = EventBus::default();
        let mut rx = events.subscribe();
        let tracker = PerformanceTracker::new(Arc::clone(&catalog), TrackerConfig::default())
            .with_source(Arc::new(RacingSource {
                catalog: Arc::clone(&catalog),
            }))
            .with_events(events);

        assert_eq!(tracker.refresh().await.unwrap(), 1);
        match rx.recv().await.unwrap() {
            RoutingEvent::ProviderStatusChanged { from, to, .. } => {
                assert_eq!(from, ProviderStatus::Degraded);
                assert_eq!(to, ProviderStatus::Unavailable);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_refresh_skips_rejected_samples() {
        let catalog = Arc::new(
            ProviderCatalog::from_providers([
                Provider::new("a", Pricing::free()).with_model(Model::new("m")),
                Provider::new("b", Pricing::free()).with_model(Model::new("m")),
            ])
            .unwrap(),
        );
        let source = Arc::new(ScriptedMetricsSource::new());
        // non-finite values are dropped before the write
        source.push(
            "a",
            MetricsSample {
                quality_score: Some(f64::NAN),
                ..Default::default()
            },
        );
        source.push(
            "b",
            MetricsSample {
                average_latency_ms: Some(250.0),
                ..Default::default()
            },
        );
        let tracker = PerformanceTracker::new(Arc::clone(&catalog), TrackerConfig::default())
            .with_source(source);

        assert_eq!(tracker.refresh().await.unwrap(), 1);
        assert_eq!(catalog.get("a").unwrap().performance.quality_score, 0.85);
        assert_eq!(catalog.get("b").unwrap().performance.average_latency_ms, 250.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_loop_refreshes_and_stops() {
        let catalog = catalog();
        let source = Arc::new(ScriptedMetricsSource::new());
        source.push(
            "a",
            MetricsSample {
                average_latency_ms: Some(42.0),
                ..Default::default()
            },
        );
        let config = TrackerConfig {
            refresh_interval_secs: 10,
            ..Default::default()
        };
        let tracker = Arc::new(
            PerformanceTracker::new(Arc::clone(&catalog), config).with_source(source),
        );

        let cancel = CancellationToken::new();
        let handle = Arc::clone(&tracker).spawn(cancel.clone());

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(catalog.get("a").unwrap().performance.average_latency_ms, 42.0);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[test]
    fn test_config_validation() {
        assert!(TrackerConfig::default().validate().is_ok());
        let bad = TrackerConfig {
            ema_alpha: 0.0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
        assert_eq!("health-check".parse::<TrackerMode>().unwrap(), TrackerMode::HealthCheck);
    }
}
