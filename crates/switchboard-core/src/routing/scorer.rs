//! Multi-factor candidate scoring
//!
//! Scoring is two-tier. A task-fit tier (the model's specialization for
//! the request's task type) carries a fixed share of the composite. The
//! rest is an operational tier: cost, quality, performance, and
//! availability, weighted by request priority. A small fixed share goes to
//! explicit user preference.
//!
//! Every sub-score is normalized to `[0, 1]` before weighting, so the
//! composite is in `[0, 1]` as well.

use std::cmp::Ordering;

use super::router::RouterConfig;
use super::types::{Candidate, RoutingRequest, ScoreBreakdown, ScoredCandidate};
use crate::catalog::TaskCategory;

/// Specialization used when a model declares neither the task's category
/// nor a reasoning affinity
pub const NEUTRAL_AFFINITY: f64 = 0.5;

/// Preference sub-score for a provider the caller did not mention
pub const NEUTRAL_PREFERENCE: f64 = 0.5;

/// Operational weights for one priority level. Always sums to 1.0.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriorityWeights {
    pub cost: f64,
    pub quality: f64,
    pub performance: f64,
    pub availability: f64,
}

impl PriorityWeights {
    pub const CRITICAL: Self = Self::new(0.10, 0.20, 0.60, 0.10);
    pub const HIGH: Self = Self::new(0.20, 0.30, 0.40, 0.10);
    pub const MEDIUM: Self = Self::new(0.30, 0.30, 0.30, 0.10);
    pub const LOW: Self = Self::new(0.50, 0.20, 0.20, 0.10);

    const fn new(cost: f64, quality: f64, performance: f64, availability: f64) -> Self {
        Self {
            cost,
            quality,
            performance,
            availability,
        }
    }

    /// Weights for a priority
    pub fn for_priority(priority: super::types::Priority) -> Self {
        use super::types::Priority;
        match priority {
            Priority::Critical => Self::CRITICAL,
            Priority::High => Self::HIGH,
            Priority::Medium => Self::MEDIUM,
            Priority::Low => Self::LOW,
        }
    }

    /// Sum of the four weights
    pub fn sum(&self) -> f64 {
        self.cost + self.quality + self.performance + self.availability
    }
}

/// Computes sub-scores and the composite score of eligible candidates
#[derive(Debug, Clone)]
pub struct RequestScorer {
    task_weight: f64,
    preference_weight: f64,
    reference_cost_usd: f64,
    reference_tokens_per_second: f64,
}

impl Default for RequestScorer {
    fn default() -> Self {
        Self::from_config(&RouterConfig::default())
    }
}

impl RequestScorer {
    /// Create a scorer from router configuration
    pub fn from_config(config: &RouterConfig) -> Self {
        Self {
            task_weight: config.task_weight,
            preference_weight: config.preference_weight,
            reference_cost_usd: config.reference_cost_usd,
            reference_tokens_per_second: config.reference_tokens_per_second,
        }
    }

    /// Score one candidate
    pub fn score(&self, candidate: &Candidate<'_>, request: &RoutingRequest) -> ScoreBreakdown {
        let weights = PriorityWeights::for_priority(request.priority);

        let task = request
            .task_type
            .as_ref()
            .map(|t| self.task_score(candidate, t.category()));
        let quality = candidate.expected_quality.clamp(0.0, 1.0);
        let cost = self.cost_score(candidate, request);
        let performance = self.performance_score(candidate);
        let availability = self.availability_score(candidate);
        let preference = self.preference_score(candidate, request);

        let operational = weights.cost * cost
            + weights.quality * quality
            + weights.performance * performance
            + weights.availability * availability;

        let composite = match task {
            Some(task) => {
                let operational_weight = 1.0 - self.task_weight - self.preference_weight;
                self.task_weight * task
                    + self.preference_weight * preference
                    + operational_weight * operational
            }
            None => {
                self.preference_weight * preference + (1.0 - self.preference_weight) * operational
            }
        };

        ScoreBreakdown {
            task,
            quality,
            cost,
            performance,
            availability,
            preference,
            operational,
            composite: composite.clamp(0.0, 1.0),
        }
    }

    /// Score and sort candidates, best first.
    ///
    /// Ties break on higher quality, then lower estimated cost, then
    /// provider registration order, then model order within the provider.
    pub fn rank<'a>(
        &self,
        candidates: Vec<Candidate<'a>>,
        request: &RoutingRequest,
    ) -> Vec<ScoredCandidate<'a>> {
        let mut scored: Vec<ScoredCandidate<'a>> = candidates
            .into_iter()
            .map(|candidate| ScoredCandidate {
                breakdown: self.score(&candidate, request),
                candidate,
            })
            .collect();

        scored.sort_by(compare_ranked);
        scored
    }

    fn task_score(&self, candidate: &Candidate<'_>, category: TaskCategory) -> f64 {
        let specialization = &candidate.model.specialization;
        specialization
            .get(category)
            .or_else(|| specialization.get(TaskCategory::Reasoning))
            .unwrap_or(NEUTRAL_AFFINITY)
            .clamp(0.0, 1.0)
    }

    fn cost_score(&self, candidate: &Candidate<'_>, request: &RoutingRequest) -> f64 {
        let reference = request
            .constraints
            .max_cost
            .filter(|c| *c > 0.0)
            .unwrap_or(self.reference_cost_usd);
        if reference <= 0.0 {
            return 0.0;
        }
        (1.0 - candidate.estimated_cost / reference).clamp(0.0, 1.0)
    }

    fn performance_score(&self, candidate: &Candidate<'_>) -> f64 {
        let speed = if self.reference_tokens_per_second > 0.0 {
            (candidate.model.performance.tokens_per_second / self.reference_tokens_per_second)
                .clamp(0.0, 1.0)
        } else {
            0.0
        };
        let headroom = 1.0 - candidate.provider().performance.utilization();
        0.7 * speed + 0.3 * headroom
    }

    fn availability_score(&self, candidate: &Candidate<'_>) -> f64 {
        let perf = &candidate.provider().performance;
        let availability = (perf.availability / 100.0).clamp(0.0, 1.0);
        let success = (perf.success_rate / 100.0).clamp(0.0, 1.0);
        0.4 * availability + 0.6 * success
    }

    fn preference_score(&self, candidate: &Candidate<'_>, request: &RoutingRequest) -> f64 {
        let Some(prefs) = &request.user_preferences else {
            return NEUTRAL_PREFERENCE;
        };
        let id = &candidate.provider().id;
        if prefs.preferred_providers.iter().any(|p| p == id) {
            1.0
        } else if prefs.avoided_providers.iter().any(|p| p == id) {
            0.0
        } else {
            NEUTRAL_PREFERENCE
        }
    }
}

fn compare_ranked(a: &ScoredCandidate<'_>, b: &ScoredCandidate<'_>) -> Ordering {
    b.breakdown
        .composite
        .total_cmp(&a.breakdown.composite)
        .then_with(|| b.breakdown.quality.total_cmp(&a.breakdown.quality))
        .then_with(|| {
            a.candidate
                .estimated_cost
                .total_cmp(&b.candidate.estimated_cost)
        })
        .then_with(|| a.candidate.snapshot.order.cmp(&b.candidate.snapshot.order))
        .then_with(|| a.candidate.model_order.cmp(&b.candidate.model_order))
}
