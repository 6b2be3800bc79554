//! Fallback chain construction

use super::types::ScoredCandidate;

/// Default cap on fallback alternatives behind the primary
pub const DEFAULT_MAX_FALLBACKS: usize = 3;

/// The primary candidate plus a bounded list of alternatives
#[derive(Debug, Clone)]
pub struct RoutingPlan<'a> {
    pub primary: ScoredCandidate<'a>,
    pub fallbacks: Vec<ScoredCandidate<'a>>,
}

impl RoutingPlan<'_> {
    /// Number of candidates the plan can attempt
    pub fn len(&self) -> usize {
        1 + self.fallbacks.len()
    }

    /// A plan always has a primary
    pub fn is_empty(&self) -> bool {
        false
    }
}

/// Splits a ranked candidate list into primary and fallbacks
#[derive(Debug, Clone, Copy)]
pub struct FallbackChainBuilder {
    max_fallbacks: usize,
}

impl Default for FallbackChainBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FALLBACKS)
    }
}

impl FallbackChainBuilder {
    pub fn new(max_fallbacks: usize) -> Self {
        Self { max_fallbacks }
    }

    pub fn max_fallbacks(&self) -> usize {
        self.max_fallbacks
    }

    /// Build a plan from candidates sorted best first.
    ///
    /// Returns `None` for an empty list; the caller reports that as
    /// "no eligible provider".
    pub fn build<'a>(&self, ranked: Vec<ScoredCandidate<'a>>) -> Option<RoutingPlan<'a>> {
        let mut ranked = ranked.into_iter();
        let primary = ranked.next()?;
        let fallbacks = ranked.take(self.max_fallbacks).collect();
        Some(RoutingPlan { primary, fallbacks })
    }
}
