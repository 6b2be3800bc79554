//! Metrics sources for periodic refresh

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::catalog::{MetricsSample, Provider, ProviderStatus};
use crate::error::Result;

/// Produces a fresh metrics sample for a provider
#[async_trait]
pub trait MetricsSource: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Sample current metrics. Fields left `None` are not updated.
    async fn sample(&self, provider: &Provider) -> Result<MetricsSample>;
}

/// Bounded random walk around each provider's current metrics.
///
/// Per refresh: latency moves by up to ±10%, reliability by ±0.02, and
/// quality by ±0.01. Load is left to the in-flight count kept by the
/// coordinator, and status is never changed.
#[derive(Debug)]
pub struct SimulatedMetricsSource {
    rng: Mutex<StdRng>,
}

impl SimulatedMetricsSource {
    /// Seeded from OS entropy
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Deterministic sequence for tests and reproducible simulations
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl Default for SimulatedMetricsSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetricsSource for SimulatedMetricsSource {
    fn name(&self) -> &'static str {
        "simulated"
    }

    async fn sample(&self, provider: &Provider) -> Result<MetricsSample> {
        let perf = &provider.performance;
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);

        let latency = perf.average_latency_ms * (1.0 + rng.gen_range(-0.1..=0.1));
        let reliability = perf.reliability + rng.gen_range(-0.02..=0.02);
        let quality = perf.quality_score + rng.gen_range(-0.01..=0.01);

        Ok(MetricsSample {
            average_latency_ms: Some(latency),
            reliability: Some(reliability),
            quality_score: Some(quality),
            ..Default::default()
        })
    }
}

/// Replays queued samples per provider; empty once a queue is drained
#[derive(Debug, Default)]
pub struct ScriptedMetricsSource {
    queues: Mutex<HashMap<String, VecDeque<MetricsSample>>>,
}

impl ScriptedMetricsSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a sample for a provider
    pub fn push(&self, provider_id: impl Into<String>, sample: MetricsSample) {
        self.queues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(provider_id.into())
            .or_default()
            .push_back(sample);
    }

    /// Samples still queued for a provider
    pub fn remaining(&self, provider_id: &str) -> usize {
        self.queues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(provider_id)
            .map_or(0, VecDeque::len)
    }
}

#[async_trait]
impl MetricsSource for ScriptedMetricsSource {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn sample(&self, provider: &Provider) -> Result<MetricsSample> {
        Ok(self
            .queues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(&provider.id)
            .and_then(VecDeque::pop_front)
            .unwrap_or_default())
    }
}

/// Polls each provider's `health_check_url` with an HTTP GET.
///
/// 2xx marks the provider available and records the round trip as its
/// latency; any other status marks it degraded; a transport error or
/// timeout marks it unavailable. Providers without a URL are skipped.
#[derive(Debug, Clone)]
pub struct HealthCheckMetricsSource {
    client: reqwest::Client,
}

impl HealthCheckMetricsSource {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("switchboard/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl MetricsSource for HealthCheckMetricsSource {
    fn name(&self) -> &'static str {
        "health_check"
    }

    async fn sample(&self, provider: &Provider) -> Result<MetricsSample> {
        let Some(url) = &provider.health_check_url else {
            return Ok(MetricsSample::default());
        };

        let start = Instant::now();
        let sample = match self.client.get(url).send().await {
            Ok(response) if response.status().is_success() => MetricsSample {
                average_latency_ms: Some(start.elapsed().as_secs_f64() * 1000.0),
                status: Some(ProviderStatus::Available),
                ..Default::default()
            },
            Ok(response) => {
                debug!(provider = %provider.id, status = %response.status(), "Health check not OK");
                MetricsSample {
                    status: Some(ProviderStatus::Degraded),
                    ..Default::default()
                }
            }
            Err(e) => {
                debug!(provider = %provider.id, error = %e, "Health check unreachable");
                MetricsSample {
                    status: Some(ProviderStatus::Unavailable),
                    ..Default::default()
                }
            }
        };
        Ok(sample)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Model, Pricing, ProviderPerformance};

    fn provider() -> Provider {
        Provider::new("a", Pricing::free())
            .with_model(Model::new("m"))
            .with_performance(ProviderPerformance {
                average_latency_ms: 1000.0,
                reliability: 0.9,
                quality_score: 0.8,
                max_concurrency: 10,
                ..Default::default()
            })
    }

    #[tokio::test]
    async fn test_simulated_walk_is_bounded() {
        let source = SimulatedMetricsSource::seeded(7);
        let provider = provider();

        for _ in 0..100 {
            let sample = source.sample(&provider).await.unwrap();
            let latency = sample.average_latency_ms.unwrap();
            assert!((899.999..=1100.001).contains(&latency));
            assert!((sample.reliability.unwrap() - 0.9).abs() <= 0.02 + 1e-12);
            assert!((sample.quality_score.unwrap() - 0.8).abs() <= 0.01 + 1e-12);
            assert!(sample.current_load.is_none());
            assert!(sample.status.is_none());
        }
    }

    #[tokio::test]
    async fn test_simulated_seed_is_reproducible() {
        let provider = provider();
        let a = SimulatedMetricsSource::seeded(42).sample(&provider).await.unwrap();
        let b = SimulatedMetricsSource::seeded(42).sample(&provider).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_scripted_source_drains_in_order() {
        let source = ScriptedMetricsSource::new();
        source.push("a", MetricsSample { current_load: Some(1), ..Default::default() });
        source.push("a", MetricsSample { current_load: Some(2), ..Default::default() });

        let provider = provider();
        assert_eq!(source.sample(&provider).await.unwrap().current_load, Some(1));
        assert_eq!(source.remaining("a"), 1);
        assert_eq!(source.sample(&provider).await.unwrap().current_load, Some(2));
        assert!(source.sample(&provider).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_health_check_without_url_is_empty() {
        let source = HealthCheckMetricsSource::new(Duration::from_millis(100)).unwrap();
        assert!(source.sample(&provider()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_health_check_unreachable_marks_unavailable() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let source = HealthCheckMetricsSource::new(Duration::from_millis(500)).unwrap();
        let provider =
            provider().with_health_check_url(format!("http://127.0.0.1:{}/health", port));
        let sample = source.sample(&provider).await.unwrap();
        assert_eq!(sample.status, Some(ProviderStatus::Unavailable));
    }
}
