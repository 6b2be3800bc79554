//! Types for request routing
//!
//! A `RoutingRequest` goes in, a `RoutingDecision` comes out. Both are
//! plain values: the request lives for a single routing call and the
//! decision is immutable once produced.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::{
    CAP_AUDIO, CAP_VISION, Model, Provider, ProviderSnapshot, TaskCategory, TokenUsage,
};

/// Kind of work a request asks for.
///
/// Names that do not match a known category are kept verbatim and score
/// with the reasoning affinity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TaskType {
    Coding,
    Creative,
    Analytical,
    Conversational,
    Reasoning,
    Other(String),
}

impl TaskType {
    /// The specialization category used to score this task
    pub fn category(&self) -> TaskCategory {
        match self {
            Self::Coding => TaskCategory::Coding,
            Self::Creative => TaskCategory::Creative,
            Self::Analytical => TaskCategory::Analytical,
            Self::Conversational => TaskCategory::Conversational,
            Self::Reasoning | Self::Other(_) => TaskCategory::Reasoning,
        }
    }
}

impl From<String> for TaskType {
    fn from(s: String) -> Self {
        match s.parse::<TaskCategory>() {
            Ok(TaskCategory::Coding) => Self::Coding,
            Ok(TaskCategory::Creative) => Self::Creative,
            Ok(TaskCategory::Analytical) => Self::Analytical,
            Ok(TaskCategory::Conversational) => Self::Conversational,
            Ok(TaskCategory::Reasoning) => Self::Reasoning,
            Err(_) => Self::Other(s),
        }
    }
}

impl From<&str> for TaskType {
    fn from(s: &str) -> Self {
        Self::from(s.to_string())
    }
}

impl From<TaskType> for String {
    fn from(task: TaskType) -> Self {
        task.to_string()
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Other(name) => write!(f, "{}", name),
            known => write!(f, "{}", known.category()),
        }
    }
}

/// Kind of content carried by a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    #[default]
    Text,
    Code,
    Image,
    Audio,
}

impl ContentType {
    /// Capability a provider must have to accept this content
    pub fn implied_capability(&self) -> Option<&'static str> {
        match self {
            Self::Text | Self::Code => None,
            Self::Image => Some(CAP_VISION),
            Self::Audio => Some(CAP_AUDIO),
        }
    }
}

impl std::str::FromStr for ContentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "code" => Ok(Self::Code),
            "image" => Ok(Self::Image),
            "audio" => Ok(Self::Audio),
            _ => Err(format!("Unknown content type: {}", s)),
        }
    }
}

/// Request priority; selects the operational weight profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Priority {
    /// All priorities, lowest first
    pub const ALL: [Priority; 4] = [Self::Low, Self::Medium, Self::High, Self::Critical];
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            _ => Err(format!("Unknown priority: {}", s)),
        }
    }
}

/// Hard limits a candidate must satisfy
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Constraints {
    /// Maximum estimated cost in USD
    pub max_cost: Option<f64>,
    /// Maximum estimated latency in milliseconds
    pub max_latency_ms: Option<u64>,
    /// Minimum expected quality (0.0 to 1.0)
    pub min_quality: Option<f64>,
    /// Capability flags the provider must support
    #[serde(default)]
    pub required_capabilities: Vec<String>,
}

/// Caller's provider preferences; soft, unlike constraints
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserPreferences {
    #[serde(default)]
    pub preferred_providers: Vec<String>,
    #[serde(default)]
    pub avoided_providers: Vec<String>,
}

/// A request to be routed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingRequest {
    /// Request identifier
    pub id: String,
    /// Task type; `None` skips the task-fit tier
    pub task_type: Option<TaskType>,
    /// Content type
    #[serde(default)]
    pub content_type: ContentType,
    /// Estimated input/output tokens
    pub estimated_tokens: TokenUsage,
    /// Hard constraints
    #[serde(default)]
    pub constraints: Constraints,
    /// Priority
    #[serde(default)]
    pub priority: Priority,
    /// Provider preferences
    #[serde(default)]
    pub user_preferences: Option<UserPreferences>,
}

impl RoutingRequest {
    /// Create a request with a fresh id and the given token estimate
    pub fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            task_type: None,
            content_type: ContentType::Text,
            estimated_tokens: TokenUsage::new(input_tokens, output_tokens),
            constraints: Constraints::default(),
            priority: Priority::Medium,
            user_preferences: None,
        }
    }

    /// Set the request id
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Set the task type
    pub fn with_task_type(mut self, task_type: impl Into<TaskType>) -> Self {
        self.task_type = Some(task_type.into());
        self
    }

    /// Set the content type
    pub fn with_content_type(mut self, content_type: ContentType) -> Self {
        self.content_type = content_type;
        self
    }

    /// Set the priority
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Set maximum cost constraint
    pub fn with_max_cost(mut self, max_cost: f64) -> Self {
        self.constraints.max_cost = Some(max_cost);
        self
    }

    /// Set maximum latency constraint
    pub fn with_max_latency_ms(mut self, max_latency_ms: u64) -> Self {
        self.constraints.max_latency_ms = Some(max_latency_ms);
        self
    }

    /// Set minimum quality constraint
    pub fn with_min_quality(mut self, min_quality: f64) -> Self {
        self.constraints.min_quality = Some(min_quality);
        self
    }

    /// Require a capability
    pub fn require_capability(mut self, capability: impl Into<String>) -> Self {
        self.constraints.required_capabilities.push(capability.into());
        self
    }

    /// Prefer a provider
    pub fn prefer_provider(mut self, provider_id: impl Into<String>) -> Self {
        self.user_preferences
            .get_or_insert_with(UserPreferences::default)
            .preferred_providers
            .push(provider_id.into());
        self
    }

    /// Avoid a provider
    pub fn avoid_provider(mut self, provider_id: impl Into<String>) -> Self {
        self.user_preferences
            .get_or_insert_with(UserPreferences::default)
            .avoided_providers
            .push(provider_id.into());
        self
    }

    /// Capabilities required by constraints plus those implied by content
    pub fn all_required_capabilities(&self) -> Vec<&str> {
        let mut caps: Vec<&str> = self
            .constraints
            .required_capabilities
            .iter()
            .map(String::as_str)
            .collect();
        if let Some(implied) = self.content_type.implied_capability()
            && !caps.contains(&implied)
        {
            caps.push(implied);
        }
        caps
    }
}

/// An eligible-or-not `(provider, model)` pair with per-request estimates
#[derive(Debug, Clone)]
pub struct Candidate<'a> {
    pub snapshot: &'a ProviderSnapshot,
    pub model: &'a Model,
    /// Position of the model within its provider
    pub model_order: usize,
    pub estimated_cost: f64,
    pub estimated_latency_ms: f64,
    pub expected_quality: f64,
}

impl<'a> Candidate<'a> {
    /// Build a candidate, computing fresh estimates for this request
    pub fn new(
        snapshot: &'a ProviderSnapshot,
        model_order: usize,
        model: &'a Model,
        request: &RoutingRequest,
    ) -> Self {
        let provider = &snapshot.provider;
        Self {
            snapshot,
            model,
            model_order,
            estimated_cost: estimate_cost(provider, model, &request.estimated_tokens),
            estimated_latency_ms: estimate_latency_ms(provider, model, &request.estimated_tokens),
            expected_quality: expected_quality(provider, model),
        }
    }

    /// The provider this candidate belongs to
    pub fn provider(&self) -> &'a Provider {
        &self.snapshot.provider
    }

    /// `provider/model` label
    pub fn label(&self) -> String {
        format!("{}/{}", self.snapshot.provider.id, self.model.id)
    }
}

/// Estimated cost in USD of serving `tokens` with `model`
pub fn estimate_cost(provider: &Provider, model: &Model, tokens: &TokenUsage) -> f64 {
    provider.pricing_for(model).estimate_cost(tokens)
}

/// Estimated latency: provider base latency plus generation time
pub fn estimate_latency_ms(provider: &Provider, model: &Model, tokens: &TokenUsage) -> f64 {
    let generation_ms = if model.performance.tokens_per_second > 0.0 {
        tokens.output_tokens as f64 / model.performance.tokens_per_second * 1000.0
    } else {
        f64::INFINITY
    };
    provider.performance.average_latency_ms + generation_ms
}

/// Expected quality: mean of model accuracy, model consistency, and
/// provider quality score
pub fn expected_quality(provider: &Provider, model: &Model) -> f64 {
    (model.performance.accuracy
        + model.performance.consistency
        + provider.performance.quality_score)
        / 3.0
}

/// Normalized sub-scores and the composite score of a candidate
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    /// Task-fit (specialization) score; `None` when the request has no task type
    pub task: Option<f64>,
    pub quality: f64,
    pub cost: f64,
    pub performance: f64,
    pub availability: f64,
    pub preference: f64,
    /// Priority-weighted blend of cost, quality, performance, availability
    pub operational: f64,
    /// Final score in `[0, 1]`
    pub composite: f64,
}

/// A candidate together with its score
#[derive(Debug, Clone)]
pub struct ScoredCandidate<'a> {
    pub candidate: Candidate<'a>,
    pub breakdown: ScoreBreakdown,
}

impl ScoredCandidate<'_> {
    /// Composite score
    pub fn score(&self) -> f64 {
        self.breakdown.composite
    }
}

/// One alternative in the fallback chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackEntry {
    pub provider_id: String,
    pub model_id: String,
    pub score: f64,
    pub estimated_cost: f64,
    pub estimated_latency_ms: f64,
    pub expected_quality: f64,
}

impl From<&ScoredCandidate<'_>> for FallbackEntry {
    fn from(scored: &ScoredCandidate<'_>) -> Self {
        Self {
            provider_id: scored.candidate.provider().id.clone(),
            model_id: scored.candidate.model.id.clone(),
            score: scored.score(),
            estimated_cost: scored.candidate.estimated_cost,
            estimated_latency_ms: scored.candidate.estimated_latency_ms,
            expected_quality: scored.candidate.expected_quality,
        }
    }
}

/// Result of routing a request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub request_id: String,
    pub selected_provider: String,
    pub selected_model: String,
    pub score: f64,
    pub estimated_cost: f64,
    pub estimated_latency_ms: f64,
    pub expected_quality: f64,
    pub breakdown: ScoreBreakdown,
    /// Human-readable trace of why the primary was selected
    pub reasoning: String,
    /// Alternatives in descending score order, excluding the primary
    pub fallback_chain: Vec<FallbackEntry>,
    /// Number of eligible candidates after filtering
    pub eligible_candidates: usize,
    pub decided_at: DateTime<Utc>,
}

impl RoutingDecision {
    /// The primary followed by the fallback chain, in attempt order
    pub fn attempt_order(&self) -> Vec<FallbackEntry> {
        let primary = FallbackEntry {
            provider_id: self.selected_provider.clone(),
            model_id: self.selected_model.clone(),
            score: self.score,
            estimated_cost: self.estimated_cost,
            estimated_latency_ms: self.estimated_latency_ms,
            expected_quality: self.expected_quality,
        };
        std::iter::once(primary)
            .chain(self.fallback_chain.iter().cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Pricing, ProviderPerformance};

    #[test]
    fn test_task_type_parsing() {
        assert_eq!(TaskType::from("coding"), TaskType::Coding);
        assert_eq!(TaskType::from("Chat"), TaskType::Conversational);
        assert_eq!(
            TaskType::from("translation"),
            TaskType::Other("translation".to_string())
        );
    }

    #[test]
    fn test_unmapped_task_type_uses_reasoning() {
        assert_eq!(
            TaskType::from("translation").category(),
            TaskCategory::Reasoning
        );
        assert_eq!(TaskType::Coding.category(), TaskCategory::Coding);
    }

    #[test]
    fn test_task_type_serde_as_string() {
        let json = serde_json::to_string(&TaskType::Analytical).unwrap();
        assert_eq!(json, "\"analytical\"");
        let parsed: TaskType = serde_json::from_str("\"summarize\"").unwrap();
        assert_eq!(parsed, TaskType::Other("summarize".to_string()));
    }

    #[test]
    fn test_content_type_implies_capability() {
        let request = RoutingRequest::new(100, 100)
            .with_content_type(ContentType::Image)
            .require_capability("streaming");
        assert_eq!(request.all_required_capabilities(), vec!["streaming", "vision"]);
    }

    #[test]
    fn test_estimates() {
        let provider = Provider::new("p", Pricing::new(0.005, 0.015)).with_performance(
            ProviderPerformance {
                average_latency_ms: 200.0,
                quality_score: 0.9,
                ..Default::default()
            },
        );
        let model = Model::new("m").with_performance(100.0, 0.8, 0.7);
        let tokens = TokenUsage::new(1000, 500);

        assert_eq!(estimate_cost(&provider, &model, &tokens), 0.005 + 0.0075);
        assert!((estimate_latency_ms(&provider, &model, &tokens) - 5200.0).abs() < 1e-9);
        assert!((expected_quality(&provider, &model) - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_preference_builders() {
        let request = RoutingRequest::new(10, 10)
            .prefer_provider("openai")
            .avoid_provider("local");
        let prefs = request.user_preferences.unwrap();
        assert_eq!(prefs.preferred_providers, vec!["openai".to_string()]);
        assert_eq!(prefs.avoided_providers, vec!["local".to_string()]);
    }
}
