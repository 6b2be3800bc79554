//! Request router
//!
//! Combines validation, constraint filtering, scoring, and fallback chain
//! construction into a single synchronous `route` call. Routing reads a
//! snapshot of the catalog and never mutates it, so any number of requests
//! may be routed in parallel.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::fallback::{DEFAULT_MAX_FALLBACKS, FallbackChainBuilder, RoutingPlan};
use super::filter::ConstraintFilter;
use super::scorer::RequestScorer;
use super::types::{FallbackEntry, RoutingDecision, RoutingRequest, estimate_cost};
use crate::catalog::{ProviderCatalog, ProviderSnapshot};
use crate::error::{Error, Result};

/// Configuration for the router
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Maximum number of fallbacks behind the primary
    pub max_fallbacks: usize,
    /// Share of the composite score given to task fit
    pub task_weight: f64,
    /// Share of the composite score given to user preference
    pub preference_weight: f64,
    /// Cost (USD) that scores zero when the request sets no `max_cost`
    pub reference_cost_usd: f64,
    /// Throughput that earns a full speed score
    pub reference_tokens_per_second: f64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_fallbacks: DEFAULT_MAX_FALLBACKS,
            task_weight: 0.40,
            preference_weight: 0.05,
            reference_cost_usd: 1.00,
            reference_tokens_per_second: 100.0,
        }
    }
}

impl RouterConfig {
    /// Check that tier weights and reference values are usable
    pub fn validate(&self) -> std::result::Result<(), String> {
        let unit = 0.0..=1.0;
        if !unit.contains(&self.task_weight) {
            return Err(format!("task_weight {} is outside [0, 1]", self.task_weight));
        }
        if !unit.contains(&self.preference_weight) {
            return Err(format!(
                "preference_weight {} is outside [0, 1]",
                self.preference_weight
            ));
        }
        if self.task_weight + self.preference_weight > 1.0 {
            return Err("task_weight + preference_weight must not exceed 1".to_string());
        }
        if !(self.reference_cost_usd > 0.0 && self.reference_cost_usd.is_finite()) {
            return Err("reference_cost_usd must be a positive number".to_string());
        }
        if !(self.reference_tokens_per_second > 0.0 && self.reference_tokens_per_second.is_finite())
        {
            return Err("reference_tokens_per_second must be a positive number".to_string());
        }
        Ok(())
    }
}

/// Routes requests against a shared provider catalog
#[derive(Debug, Clone)]
pub struct Router {
    catalog: Arc<ProviderCatalog>,
    config: RouterConfig,
    filter: ConstraintFilter,
    scorer: RequestScorer,
    chain: FallbackChainBuilder,
}

impl Router {
    /// Create a router with default configuration
    pub fn new(catalog: Arc<ProviderCatalog>) -> Self {
        Self::with_config(catalog, RouterConfig::default())
    }

    /// Create a router with custom configuration
    pub fn with_config(catalog: Arc<ProviderCatalog>, config: RouterConfig) -> Self {
        Self {
            catalog,
            filter: ConstraintFilter::new(),
            scorer: RequestScorer::from_config(&config),
            chain: FallbackChainBuilder::new(config.max_fallbacks),
            config,
        }
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Arc<ProviderCatalog> {
        &self.catalog
    }

    /// Route a request to a primary candidate plus fallbacks
    pub fn route(&self, request: &RoutingRequest) -> Result<RoutingDecision> {
        let snapshot = self.catalog.snapshot();
        validate_request(request, &snapshot)?;

        let outcome = self.filter.filter(&snapshot, request);
        let eligible = outcome.eligible.len();
        if eligible == 0 {
            return Err(Error::NoEligibleProvider {
                request_id: request.id.clone(),
                reason: outcome.summary(),
            });
        }

        let ranked = self.scorer.rank(outcome.eligible, request);
        let plan = self.chain.build(ranked).ok_or_else(|| Error::NoEligibleProvider {
            request_id: request.id.clone(),
            reason: "no candidates after ranking".to_string(),
        })?;

        let decision = self.decide(request, plan, eligible, snapshot.len());

        info!(
            request_id = %decision.request_id,
            provider = %decision.selected_provider,
            model = %decision.selected_model,
            score = decision.score,
            estimated_cost = decision.estimated_cost,
            fallbacks = decision.fallback_chain.len(),
            "Routing decision made"
        );

        Ok(decision)
    }

    fn decide(
        &self,
        request: &RoutingRequest,
        plan: RoutingPlan<'_>,
        eligible: usize,
        providers: usize,
    ) -> RoutingDecision {
        let primary = &plan.primary;
        let fallback_chain: Vec<FallbackEntry> =
            plan.fallbacks.iter().map(FallbackEntry::from).collect();

        for (rank, fallback) in fallback_chain.iter().enumerate() {
            debug!(
                request_id = %request.id,
                rank = rank + 1,
                provider = %fallback.provider_id,
                model = %fallback.model_id,
                score = fallback.score,
                "Fallback candidate"
            );
        }

        RoutingDecision {
            request_id: request.id.clone(),
            selected_provider: primary.candidate.provider().id.clone(),
            selected_model: primary.candidate.model.id.clone(),
            score: primary.score(),
            estimated_cost: primary.candidate.estimated_cost,
            estimated_latency_ms: primary.candidate.estimated_latency_ms,
            expected_quality: primary.candidate.expected_quality,
            breakdown: primary.breakdown,
            reasoning: explain(request, &plan, eligible, providers),
            fallback_chain,
            eligible_candidates: eligible,
            decided_at: Utc::now(),
        }
    }
}

fn explain(
    request: &RoutingRequest,
    plan: &RoutingPlan<'_>,
    eligible: usize,
    providers: usize,
) -> String {
    let primary = &plan.primary;
    let b = &primary.breakdown;

    let mut text = format!(
        "Selected {} with score {:.3} for a {} priority",
        primary.candidate.label(),
        b.composite,
        request.priority
    );
    match &request.task_type {
        Some(task) => text.push_str(&format!(" {} request", task)),
        None => text.push_str(" untyped request"),
    }
    text.push_str(" (");
    if let Some(task) = b.task {
        text.push_str(&format!("task {:.2}, ", task));
    }
    text.push_str(&format!(
        "quality {:.2}, cost {:.2}, performance {:.2}, availability {:.2}, preference {:.2}).",
        b.quality, b.cost, b.performance, b.availability, b.preference
    ));
    text.push_str(&format!(
        " Estimated ${:.6} and {:.0}ms. {} eligible candidate(s) across {} provider(s)",
        primary.candidate.estimated_cost, primary.candidate.estimated_latency_ms, eligible, providers
    ));
    if plan.fallbacks.is_empty() {
        text.push_str("; no fallbacks.");
    } else {
        let labels: Vec<String> = plan.fallbacks.iter().map(|f| f.candidate.label()).collect();
        text.push_str(&format!("; fallbacks: {}.", labels.join(", ")));
    }
    text
}

/// Reject malformed or unsatisfiable requests before filtering
pub fn validate_request(request: &RoutingRequest, snapshot: &[ProviderSnapshot]) -> Result<()> {
    let invalid = |msg: String| Err(Error::InvalidRequest(msg));

    if request.estimated_tokens.is_empty() {
        return invalid("estimated_tokens must be non-zero".to_string());
    }

    let constraints = &request.constraints;
    if let Some(max_cost) = constraints.max_cost
        && !(max_cost.is_finite() && max_cost >= 0.0)
    {
        return invalid(format!("max_cost {} must be a non-negative number", max_cost));
    }
    if constraints.max_latency_ms == Some(0) {
        return invalid("max_latency_ms must be greater than zero".to_string());
    }
    if let Some(min_quality) = constraints.min_quality
        && !(0.0..=1.0).contains(&min_quality)
    {
        return invalid(format!("min_quality {} is outside [0, 1]", min_quality));
    }
    if constraints.required_capabilities.iter().any(|c| c.trim().is_empty()) {
        return invalid("required capability names must be non-empty".to_string());
    }

    if let Some(prefs) = &request.user_preferences
        && let Some(both) = prefs
            .preferred_providers
            .iter()
            .find(|p| prefs.avoided_providers.contains(p))
    {
        return invalid(format!("provider '{}' is both preferred and avoided", both));
    }

    // A budget below every registered pair's cost can never be met,
    // whatever the providers' status.
    if let Some(max_cost) = constraints.max_cost {
        let cheapest = snapshot
            .iter()
            .flat_map(|s| {
                s.provider
                    .models
                    .iter()
                    .map(|m| estimate_cost(&s.provider, m, &request.estimated_tokens))
            })
            .min_by(f64::total_cmp);
        if let Some(cheapest) = cheapest
            && max_cost < cheapest
        {
            return invalid(format!(
                "max_cost ${:.6} is below the cheapest provider estimate ${:.6}",
                max_cost, cheapest
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Model, Pricing, Provider, ProviderStatus, TaskCategory};
    use crate::routing::types::{Priority, TaskType};

    fn router() -> Router {
        Router::new(Arc::new(ProviderCatalog::with_defaults()))
    }

    #[test]
    fn test_route_returns_primary_and_fallbacks() {
        let decision = router()
            .route(&RoutingRequest::new(1000, 500).with_task_type(TaskType::Coding))
            .unwrap();

        assert!(!decision.selected_provider.is_empty());
        assert_eq!(decision.fallback_chain.len(), 3);
        assert!(decision.reasoning.contains("Selected"));
        assert!(decision.breakdown.task.is_some());
        assert!(
            decision
                .fallback_chain
                .iter()
                .all(|f| f.score <= decision.score)
        );
    }

    #[test]
    fn test_reasoning_names_primary_and_fallbacks() {
        let typed = router()
            .route(&RoutingRequest::new(1000, 500).with_task_type(TaskType::Coding))
            .unwrap();
        let primary = format!("{}/{}", typed.selected_provider, typed.selected_model);
        assert!(typed.reasoning.starts_with(&format!("Selected {} with score", primary)));
        assert!(typed.reasoning.contains(&format!(" {} request (task ", TaskType::Coding)));
        let first = &typed.fallback_chain[0];
        assert!(typed.reasoning.contains(&format!(
            "; fallbacks: {}/{}",
            first.provider_id, first.model_id
        )));
        assert!(typed.reasoning.ends_with('.'));

        let untyped = router().route(&RoutingRequest::new(1000, 500)).unwrap();
        assert!(untyped.reasoning.contains(" untyped request (quality "));
    }

    #[test]
    fn test_route_is_deterministic() {
        let router = router();
        let request = RoutingRequest::new(800, 400)
            .with_task_type("analytical")
            .with_priority(Priority::High);

        let first = router.route(&request).unwrap();
        let second = router.route(&request).unwrap();
        assert_eq!(first.selected_provider, second.selected_provider);
        assert_eq!(first.selected_model, second.selected_model);
        assert_eq!(first.fallback_chain, second.fallback_chain);
    }

    #[test]
    fn test_task_fit_dominates() {
        let catalog = ProviderCatalog::from_providers([
            Provider::new("generalist", Pricing::new(0.001, 0.001))
                .with_model(Model::new("g").with_specialization(TaskCategory::Coding, 0.2)),
            Provider::new("coder", Pricing::new(0.001, 0.001))
                .with_model(Model::new("c").with_specialization(TaskCategory::Coding, 0.99)),
        ])
        .unwrap();
        let router = Router::new(Arc::new(catalog));

        let decision = router
            .route(&RoutingRequest::new(500, 500).with_task_type(TaskType::Coding))
            .unwrap();
        assert_eq!(decision.selected_provider, "coder");
    }

    #[test]
    fn test_max_fallbacks_respected() {
        let config = RouterConfig {
            max_fallbacks: 1,
            ..Default::default()
        };
        let router = Router::with_config(Arc::new(ProviderCatalog::with_defaults()), config);

        let decision = router.route(&RoutingRequest::new(100, 100)).unwrap();
        assert_eq!(decision.fallback_chain.len(), 1);
        assert_eq!(decision.attempt_order().len(), 2);
    }

    #[test]
    fn test_no_eligible_provider() {
        let router = router();
        let err = router
            .route(&RoutingRequest::new(100, 100).with_min_quality(0.99))
            .unwrap_err();
        assert!(matches!(err, Error::NoEligibleProvider { .. }));
    }

    #[test]
    fn test_empty_catalog() {
        let router = Router::new(Arc::new(ProviderCatalog::new()));
        let err = router.route(&RoutingRequest::new(100, 100)).unwrap_err();
        match err {
            Error::NoEligibleProvider { reason, .. } => {
                assert_eq!(reason, "no providers registered")
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_all_unavailable() {
        let catalog = Arc::new(ProviderCatalog::with_defaults());
        for id in catalog.provider_ids() {
            catalog.update_status(&id, ProviderStatus::Unavailable).unwrap();
        }
        let err = Router::new(catalog)
            .route(&RoutingRequest::new(100, 100))
            .unwrap_err();
        assert_eq!(err.code(), "E100");
    }

    #[test]
    fn test_invalid_requests() {
        let router = router();
        let cases = [
            RoutingRequest::new(0, 0),
            RoutingRequest::new(10, 10).with_max_cost(f64::NAN),
            RoutingRequest::new(10, 10).with_max_cost(-1.0),
            RoutingRequest::new(10, 10).with_max_latency_ms(0),
            RoutingRequest::new(10, 10).with_min_quality(1.5),
            RoutingRequest::new(10, 10)
                .prefer_provider("openai")
                .avoid_provider("openai"),
        ];
        for request in cases {
            let err = router.route(&request).unwrap_err();
            assert!(
                matches!(err, Error::InvalidRequest(_)),
                "expected InvalidRequest, got {}",
                err
            );
        }
    }

    #[test]
    fn test_budget_below_every_provider_is_invalid() {
        let catalog = ProviderCatalog::from_providers([
            Provider::new("a", Pricing::new(0.01, 0.01)).with_model(Model::new("m"))
        ])
        .unwrap();
        let router = Router::new(Arc::new(catalog));

        // cheapest estimate is 0.02
        let err = router
            .route(&RoutingRequest::new(1000, 1000).with_max_cost(0.001))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));

        // a reachable budget is fine
        assert!(
            router
                .route(&RoutingRequest::new(1000, 1000).with_max_cost(0.05))
                .is_ok()
        );
    }

    #[test]
    fn test_route_does_not_mutate_catalog() {
        let catalog = Arc::new(ProviderCatalog::with_defaults());
        let before = catalog.to_toml_string().unwrap();
        Router::new(Arc::clone(&catalog))
            .route(&RoutingRequest::new(100, 100))
            .unwrap();
        assert_eq!(before, catalog.to_toml_string().unwrap());
    }

    #[test]
    fn test_config_validation() {
        assert!(RouterConfig::default().validate().is_ok());
        let bad = RouterConfig {
            task_weight: 0.9,
            preference_weight: 0.2,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }
}
