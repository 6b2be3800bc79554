//! Hard-constraint filtering
//!
//! Checks run cheapest first and fail fast. A pair that fails any check is
//! excluded outright; nothing here lowers a score instead.

use tracing::debug;

use super::types::{Candidate, RoutingRequest};
use crate::catalog::{ProviderSnapshot, ProviderStatus};

/// Why a `(provider, model)` pair was excluded
#[derive(Debug, Clone, PartialEq)]
pub enum Rejection {
    ProviderNotAvailable(ProviderStatus),
    MissingCapability(String),
    ContextWindowTooSmall { needed: u64, window: u32 },
    OverBudget { estimated: f64, max: f64 },
    TooSlow { estimated_ms: f64, max_ms: u64 },
    BelowQualityFloor { expected: f64, min: f64 },
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ProviderNotAvailable(status) => write!(f, "provider is {}", status),
            Self::MissingCapability(cap) => write!(f, "missing capability '{}'", cap),
            Self::ContextWindowTooSmall { needed, window } => {
                write!(f, "needs {} tokens, context window is {}", needed, window)
            }
            Self::OverBudget { estimated, max } => {
                write!(f, "estimated cost ${:.6} exceeds ${:.6}", estimated, max)
            }
            Self::TooSlow {
                estimated_ms,
                max_ms,
            } => write!(f, "estimated latency {:.0}ms exceeds {}ms", estimated_ms, max_ms),
            Self::BelowQualityFloor { expected, min } => {
                write!(f, "expected quality {:.3} below {:.3}", expected, min)
            }
        }
    }
}

/// Outcome of filtering: the eligible pairs plus a count of rejections by
/// reason, used to explain an empty result
#[derive(Debug, Default)]
pub struct FilterOutcome<'a> {
    pub eligible: Vec<Candidate<'a>>,
    pub rejections: Vec<(String, Rejection)>,
}

impl FilterOutcome<'_> {
    /// Short explanation of why nothing was eligible
    pub fn summary(&self) -> String {
        if self.rejections.is_empty() {
            return "no providers registered".to_string();
        }
        let mut reasons: Vec<String> = self
            .rejections
            .iter()
            .map(|(label, reason)| format!("{}: {}", label, reason))
            .collect();
        reasons.truncate(8);
        reasons.join("; ")
    }
}

/// Removes `(provider, model)` pairs that violate a request's hard limits
#[derive(Debug, Default, Clone, Copy)]
pub struct ConstraintFilter;

impl ConstraintFilter {
    pub fn new() -> Self {
        Self
    }

    /// Filter every `(provider, model)` pair in `providers`
    pub fn filter<'a>(
        &self,
        providers: &'a [ProviderSnapshot],
        request: &RoutingRequest,
    ) -> FilterOutcome<'a> {
        let mut outcome = FilterOutcome::default();

        for snapshot in providers {
            for (model_order, model) in snapshot.provider.models.iter().enumerate() {
                let candidate = Candidate::new(snapshot, model_order, model, request);
                match self.check(&candidate, request) {
                    Ok(()) => outcome.eligible.push(candidate),
                    Err(reason) => {
                        debug!(
                            request_id = %request.id,
                            candidate = %candidate.label(),
                            reason = %reason,
                            "Candidate rejected"
                        );
                        outcome.rejections.push((candidate.label(), reason));
                    }
                }
            }
        }

        outcome
    }

    /// Check one candidate against every constraint, in order
    pub fn check(&self, candidate: &Candidate<'_>, request: &RoutingRequest) -> Result<(), Rejection> {
        let provider = candidate.provider();
        let constraints = &request.constraints;

        if provider.performance.status != ProviderStatus::Available {
            return Err(Rejection::ProviderNotAvailable(provider.performance.status));
        }

        for cap in request.all_required_capabilities() {
            if !provider.capabilities.supports(cap) {
                return Err(Rejection::MissingCapability(cap.to_string()));
            }
        }

        let needed = request.estimated_tokens.total();
        if needed > candidate.model.context_window as u64 {
            return Err(Rejection::ContextWindowTooSmall {
                needed,
                window: candidate.model.context_window,
            });
        }

        if let Some(max) = constraints.max_cost
            && candidate.estimated_cost > max
        {
            return Err(Rejection::OverBudget {
                estimated: candidate.estimated_cost,
                max,
            });
        }

        if let Some(max_ms) = constraints.max_latency_ms
            && candidate.estimated_latency_ms > max_ms as f64
        {
            return Err(Rejection::TooSlow {
                estimated_ms: candidate.estimated_latency_ms,
                max_ms,
            });
        }

        if let Some(min) = constraints.min_quality
            && candidate.expected_quality < min
        {
            return Err(Rejection::BelowQualityFloor {
                expected: candidate.expected_quality,
                min,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Capabilities, Model, Pricing, Provider, ProviderCatalog};
    use crate::routing::types::ContentType;

    fn catalog() -> ProviderCatalog {
        ProviderCatalog::from_providers([
            Provider::new("cheap", Pricing::new(0.0005, 0.0015))
                .with_capabilities(Capabilities::new(4096).with_streaming())
                .with_model(Model::new("small").with_performance(100.0, 0.7, 0.7)),
            Provider::new("premium", Pricing::new(0.01, 0.03))
                .with_capabilities(Capabilities::new(8192).with_streaming().with_vision())
                .with_model(Model::new("large").with_performance(50.0, 0.95, 0.95)),
        ])
        .unwrap()
    }

    fn eligible_labels(snapshot: &[ProviderSnapshot], request: &RoutingRequest) -> Vec<String> {
        ConstraintFilter::new()
            .filter(snapshot, request)
            .eligible
            .iter()
            .map(Candidate::label)
            .collect()
    }

    #[test]
    fn test_unavailable_provider_excluded() {
        let catalog = catalog();
        catalog
            .update_status("premium", ProviderStatus::Unavailable)
            .unwrap();
        let snapshot = catalog.snapshot();

        let labels = eligible_labels(&snapshot, &RoutingRequest::new(100, 100));
        assert_eq!(labels, vec!["cheap/small".to_string()]);
    }

    #[test]
    fn test_degraded_provider_excluded() {
        let catalog = catalog();
        catalog.update_status("cheap", ProviderStatus::Degraded).unwrap();
        let snapshot = catalog.snapshot();

        let labels = eligible_labels(&snapshot, &RoutingRequest::new(100, 100));
        assert_eq!(labels, vec!["premium/large".to_string()]);
    }

    #[test]
    fn test_required_capability() {
        let snapshot = catalog().snapshot();

        let request = RoutingRequest::new(100, 100).require_capability("vision");
        assert_eq!(eligible_labels(&snapshot, &request), vec!["premium/large".to_string()]);

        let image = RoutingRequest::new(100, 100).with_content_type(ContentType::Image);
        assert_eq!(eligible_labels(&snapshot, &image), vec!["premium/large".to_string()]);

        let unknown = RoutingRequest::new(100, 100).require_capability("telepathy");
        assert!(eligible_labels(&snapshot, &unknown).is_empty());
    }

    #[test]
    fn test_max_cost() {
        let snapshot = catalog().snapshot();
        // premium: 1.0 * 0.01 + 0.5 * 0.03 = 0.025; cheap: 0.00125
        let request = RoutingRequest::new(1000, 500).with_max_cost(0.01);
        assert_eq!(eligible_labels(&snapshot, &request), vec!["cheap/small".to_string()]);
    }

    #[test]
    fn test_max_latency() {
        let snapshot = catalog().snapshot();
        // base 800ms; cheap: 800 + 1000/100*1000 = 10800; premium: 800 + 20000
        let request = RoutingRequest::new(100, 1000).with_max_latency_ms(15_000);
        assert_eq!(eligible_labels(&snapshot, &request), vec!["cheap/small".to_string()]);
    }

    #[test]
    fn test_min_quality() {
        let snapshot = catalog().snapshot();
        let request = RoutingRequest::new(100, 100).with_min_quality(0.9);
        assert_eq!(eligible_labels(&snapshot, &request), vec!["premium/large".to_string()]);
    }

    #[test]
    fn test_context_window() {
        let catalog = ProviderCatalog::from_providers([Provider::new("p", Pricing::free())
            .with_model(Model::new("tiny").with_context_window(1000))])
        .unwrap();
        let snapshot = catalog.snapshot();

        let outcome = ConstraintFilter::new().filter(&snapshot, &RoutingRequest::new(900, 200));
        assert!(outcome.eligible.is_empty());
        assert!(matches!(
            outcome.rejections[0].1,
            Rejection::ContextWindowTooSmall { needed: 1100, window: 1000 }
        ));
    }

    #[test]
    fn test_status_checked_before_cost() {
        let catalog = catalog();
        catalog.update_status("premium", ProviderStatus::Unavailable).unwrap();
        let snapshot = catalog.snapshot();

        let outcome =
            ConstraintFilter::new().filter(&snapshot, &RoutingRequest::new(1000, 500).with_max_cost(0.0001));
        let premium = outcome
            .rejections
            .iter()
            .find(|(label, _)| label == "premium/large")
            .unwrap();
        assert_eq!(
            premium.1,
            Rejection::ProviderNotAvailable(ProviderStatus::Unavailable)
        );
        assert!(outcome.summary().contains("premium/large"));
    }
}
