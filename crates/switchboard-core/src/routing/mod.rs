//! Request routing
//!
//! Turns a `RoutingRequest` into a `RoutingDecision`:
//! - Hard constraints remove candidates outright (`ConstraintFilter`)
//! - Survivors get a two-tier composite score (`RequestScorer`)
//! - The best candidate becomes the primary and the next few form a
//!   bounded fallback chain (`FallbackChainBuilder`)
//!
//! Routing is synchronous and only reads a catalog snapshot.

mod fallback;
mod filter;
mod router;
mod scorer;
mod types;

pub use fallback::{DEFAULT_MAX_FALLBACKS, FallbackChainBuilder, RoutingPlan};
pub use filter::{ConstraintFilter, FilterOutcome, Rejection};
pub use router::{Router, RouterConfig, validate_request};
pub use scorer::{NEUTRAL_AFFINITY, NEUTRAL_PREFERENCE, PriorityWeights, RequestScorer};
pub use types::{
    Candidate, Constraints, ContentType, FallbackEntry, Priority, RoutingDecision, RoutingRequest,
    ScoreBreakdown, ScoredCandidate, TaskType, UserPreferences, estimate_cost,
    estimate_latency_ms, expected_quality,
};
