//! Provider and model types held by the catalog
//!
//! Static data (pricing, capabilities, models) is set at registration.
//! Live data (`ProviderPerformance`) is only changed through the catalog's
//! mutation methods.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Capability flag for token streaming
pub const CAP_STREAMING: &str = "streaming";
/// Capability flag for tool / function calling
pub const CAP_FUNCTION_CALLING: &str = "function_calling";
/// Capability flag for image input
pub const CAP_VISION: &str = "vision";
/// Capability flag for audio input
pub const CAP_AUDIO: &str = "audio";
/// Capability flag for structured JSON output
pub const CAP_JSON_MODE: &str = "json_mode";

/// Token counts, used both for estimates and for reported usage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Number of input/prompt tokens
    pub input_tokens: u32,
    /// Number of output/completion tokens
    pub output_tokens: u32,
}

impl TokenUsage {
    /// Create a new token usage record
    pub fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    /// Total tokens (input + output)
    pub fn total(&self) -> u64 {
        self.input_tokens as u64 + self.output_tokens as u64
    }

    /// Whether no tokens are recorded at all
    pub fn is_empty(&self) -> bool {
        self.input_tokens == 0 && self.output_tokens == 0
    }
}

/// Pricing in USD per 1K tokens
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pricing {
    /// Cost per 1K input tokens in USD
    pub input_cost_per_1k: f64,
    /// Cost per 1K output tokens in USD
    pub output_cost_per_1k: f64,
}

impl Pricing {
    /// Create new pricing
    pub fn new(input_cost_per_1k: f64, output_cost_per_1k: f64) -> Self {
        Self {
            input_cost_per_1k,
            output_cost_per_1k,
        }
    }

    /// Free pricing, e.g. for self-hosted models
    pub fn free() -> Self {
        Self::new(0.0, 0.0)
    }

    /// Cost in USD for the given token counts.
    ///
    /// `(input / 1000) * input_cost + (output / 1000) * output_cost`,
    /// computed fresh on every call.
    pub fn estimate_cost(&self, tokens: &TokenUsage) -> f64 {
        let input_cost = (tokens.input_tokens as f64 / 1000.0) * self.input_cost_per_1k;
        let output_cost = (tokens.output_tokens as f64 / 1000.0) * self.output_cost_per_1k;
        input_cost + output_cost
    }
}

/// Static provider capabilities.
///
/// Capabilities are explicit boolean flags. A flag that is absent is
/// unsupported.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Capabilities {
    /// Maximum output tokens per request
    pub max_tokens: u32,
    /// Named capability flags
    #[serde(default)]
    pub flags: BTreeMap<String, bool>,
}

impl Capabilities {
    /// Create capabilities with a max token limit and no flags
    pub fn new(max_tokens: u32) -> Self {
        Self {
            max_tokens,
            flags: BTreeMap::new(),
        }
    }

    /// Set a capability flag
    pub fn with_flag(mut self, name: impl Into<String>, supported: bool) -> Self {
        self.flags.insert(name.into(), supported);
        self
    }

    /// Mark streaming as supported
    pub fn with_streaming(self) -> Self {
        self.with_flag(CAP_STREAMING, true)
    }

    /// Mark function calling as supported
    pub fn with_function_calling(self) -> Self {
        self.with_flag(CAP_FUNCTION_CALLING, true)
    }

    /// Mark image input as supported
    pub fn with_vision(self) -> Self {
        self.with_flag(CAP_VISION, true)
    }

    /// Whether the named capability is supported
    pub fn supports(&self, name: &str) -> bool {
        self.flags.get(name).copied().unwrap_or(false)
    }
}

/// Task categories a model can be specialized for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskCategory {
    Coding,
    Creative,
    Analytical,
    Conversational,
    Reasoning,
}

impl TaskCategory {
    /// All categories in a stable order
    pub const ALL: [TaskCategory; 5] = [
        Self::Coding,
        Self::Creative,
        Self::Analytical,
        Self::Conversational,
        Self::Reasoning,
    ];
}

impl std::fmt::Display for TaskCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Coding => write!(f, "coding"),
            Self::Creative => write!(f, "creative"),
            Self::Analytical => write!(f, "analytical"),
            Self::Conversational => write!(f, "conversational"),
            Self::Reasoning => write!(f, "reasoning"),
        }
    }
}

impl std::str::FromStr for TaskCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "coding" | "code" => Ok(Self::Coding),
            "creative" | "writing" => Ok(Self::Creative),
            "analytical" | "analysis" => Ok(Self::Analytical),
            "conversational" | "chat" => Ok(Self::Conversational),
            "reasoning" => Ok(Self::Reasoning),
            _ => Err(format!("Unknown task category: {}", s)),
        }
    }
}

/// Per-category affinity scores in `[0, 1]`
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Specialization {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coding: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creative: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analytical: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversational: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<f64>,
}

impl Specialization {
    /// Set the affinity for a category
    pub fn with(mut self, category: TaskCategory, score: f64) -> Self {
        let slot = match category {
            TaskCategory::Coding => &mut self.coding,
            TaskCategory::Creative => &mut self.creative,
            TaskCategory::Analytical => &mut self.analytical,
            TaskCategory::Conversational => &mut self.conversational,
            TaskCategory::Reasoning => &mut self.reasoning,
        };
        *slot = Some(score);
        self
    }

    /// Affinity for a category, if one was declared
    pub fn get(&self, category: TaskCategory) -> Option<f64> {
        match category {
            TaskCategory::Coding => self.coding,
            TaskCategory::Creative => self.creative,
            TaskCategory::Analytical => self.analytical,
            TaskCategory::Conversational => self.conversational,
            TaskCategory::Reasoning => self.reasoning,
        }
    }

    fn values(&self) -> impl Iterator<Item = f64> {
        TaskCategory::ALL.into_iter().filter_map(|c| self.get(c))
    }
}

/// Static throughput and quality profile of a model
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPerformance {
    /// Generation throughput
    pub tokens_per_second: f64,
    /// Accuracy (0.0 to 1.0)
    pub accuracy: f64,
    /// Consistency across repeated runs (0.0 to 1.0)
    pub consistency: f64,
}

impl Default for ModelPerformance {
    fn default() -> Self {
        Self {
            tokens_per_second: 50.0,
            accuracy: 0.8,
            consistency: 0.8,
        }
    }
}

/// A selectable model belonging to exactly one provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    /// Model identifier, unique within its provider
    pub id: String,
    /// Display name
    #[serde(default)]
    pub name: String,
    /// Maximum context window in tokens
    pub context_window: u32,
    /// Per-category affinity scores
    #[serde(default)]
    pub specialization: Specialization,
    /// Throughput and quality profile
    #[serde(default)]
    pub performance: ModelPerformance,
    /// Pricing override; the provider's pricing applies when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pricing: Option<Pricing>,
}

impl Model {
    /// Create a new model with default profile
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            context_window: 128_000,
            specialization: Specialization::default(),
            performance: ModelPerformance::default(),
            pricing: None,
        }
    }

    /// Set the display name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set context window
    pub fn with_context_window(mut self, size: u32) -> Self {
        self.context_window = size;
        self
    }

    /// Set the affinity for one task category
    pub fn with_specialization(mut self, category: TaskCategory, score: f64) -> Self {
        self.specialization = self.specialization.with(category, score);
        self
    }

    /// Set the performance profile
    pub fn with_performance(mut self, tokens_per_second: f64, accuracy: f64, consistency: f64) -> Self {
        self.performance = ModelPerformance {
            tokens_per_second,
            accuracy,
            consistency,
        };
        self
    }

    /// Override the provider's pricing for this model
    pub fn with_pricing(mut self, pricing: Pricing) -> Self {
        self.pricing = Some(pricing);
        self
    }
}

/// Provider availability as seen by routing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderStatus {
    #[default]
    Available,
    Degraded,
    Unavailable,
}

impl std::fmt::Display for ProviderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Available => write!(f, "available"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unavailable => write!(f, "unavailable"),
        }
    }
}

impl std::str::FromStr for ProviderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "available" => Ok(Self::Available),
            "degraded" => Ok(Self::Degraded),
            "unavailable" => Ok(Self::Unavailable),
            _ => Err(format!("Unknown provider status: {}", s)),
        }
    }
}

/// Health classification derived from recent success rate.
///
/// Reported to dashboards only; routing eligibility uses `ProviderStatus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Offline,
}

impl HealthStatus {
    /// Success rate (percent) at or above which a provider is healthy
    pub const HEALTHY_THRESHOLD: f64 = 85.0;
    /// Success rate (percent) at or above which a provider is degraded
    pub const DEGRADED_THRESHOLD: f64 = 65.0;

    /// Classify a success-rate percentage
    pub fn from_success_rate(success_rate: f64) -> Self {
        if success_rate >= Self::HEALTHY_THRESHOLD {
            Self::Healthy
        } else if success_rate >= Self::DEGRADED_THRESHOLD {
            Self::Degraded
        } else {
            Self::Offline
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Offline => write!(f, "offline"),
        }
    }
}

/// Live performance block of a provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderPerformance {
    /// Average base latency in milliseconds (time to first response)
    pub average_latency_ms: f64,
    /// Reliability (0.0 to 1.0)
    pub reliability: f64,
    /// Provider-level quality score (0.0 to 1.0)
    pub quality_score: f64,
    /// Requests currently in flight
    pub current_load: u32,
    /// Concurrency ceiling
    pub max_concurrency: u32,
    /// Availability percentage (0 to 100)
    pub availability: f64,
    /// Recency-weighted success rate percentage (0 to 100)
    pub success_rate: f64,
    /// Attempts recorded against this provider
    pub total_requests: u64,
    /// Failed or timed out attempts
    pub failed_requests: u64,
    /// Attempts cancelled by callers
    pub cancelled_requests: u64,
    /// Routing status
    pub status: ProviderStatus,
    /// Last time any live field changed
    pub updated_at: Option<DateTime<Utc>>,
}

impl Default for ProviderPerformance {
    fn default() -> Self {
        Self {
            average_latency_ms: 800.0,
            reliability: 0.95,
            quality_score: 0.85,
            current_load: 0,
            max_concurrency: 100,
            availability: 100.0,
            success_rate: 100.0,
            total_requests: 0,
            failed_requests: 0,
            cancelled_requests: 0,
            status: ProviderStatus::Available,
            updated_at: None,
        }
    }
}

impl ProviderPerformance {
    /// Current load as a fraction of the concurrency ceiling, in `[0, 1]`
    pub fn utilization(&self) -> f64 {
        if self.max_concurrency == 0 {
            return 1.0;
        }
        (self.current_load as f64 / self.max_concurrency as f64).clamp(0.0, 1.0)
    }

    /// Health classification of the current success rate
    pub fn health(&self) -> HealthStatus {
        HealthStatus::from_success_rate(self.success_rate)
    }
}

/// A partial update to a provider's live metrics.
///
/// Unset fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSample {
    pub average_latency_ms: Option<f64>,
    pub reliability: Option<f64>,
    pub quality_score: Option<f64>,
    pub current_load: Option<u32>,
    pub availability: Option<f64>,
    pub status: Option<ProviderStatus>,
}

impl MetricsSample {
    /// Whether the sample carries no data
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Drop non-finite values, then clamp reliability and quality to
    /// `[floor, 1.0]`, availability to `[0, 100]`, and latency to
    /// non-negative.
    pub fn clamped(mut self, floor: f64) -> Self {
        let finite = |v: &f64| v.is_finite();
        self.average_latency_ms = self.average_latency_ms.filter(finite);
        self.reliability = self.reliability.filter(finite);
        self.quality_score = self.quality_score.filter(finite);
        self.availability = self.availability.filter(finite);

        self.reliability = self.reliability.map(|r| r.clamp(floor, 1.0));
        self.quality_score = self.quality_score.map(|q| q.clamp(floor, 1.0));
        self.availability = self.availability.map(|a| a.clamp(0.0, 100.0));
        self.average_latency_ms = self.average_latency_ms.map(|l| l.max(0.0));
        self
    }

    /// Check that every set value is finite and in range
    pub fn validate(&self) -> Result<(), String> {
        if let Some(latency) = self.average_latency_ms
            && !(latency.is_finite() && latency >= 0.0)
        {
            return Err(format!("average_latency_ms {} must be finite and non-negative", latency));
        }
        let unit = 0.0..=1.0;
        if let Some(reliability) = self.reliability
            && !unit.contains(&reliability)
        {
            return Err(format!("reliability {} is outside [0, 1]", reliability));
        }
        if let Some(quality) = self.quality_score
            && !unit.contains(&quality)
        {
            return Err(format!("quality_score {} is outside [0, 1]", quality));
        }
        if let Some(availability) = self.availability
            && !(0.0..=100.0).contains(&availability)
        {
            return Err(format!("availability {} is outside [0, 100]", availability));
        }
        Ok(())
    }

    pub(crate) fn apply_to(&self, perf: &mut ProviderPerformance) {
        if let Some(latency) = self.average_latency_ms {
            perf.average_latency_ms = latency;
        }
        if let Some(reliability) = self.reliability {
            perf.reliability = reliability;
        }
        if let Some(quality) = self.quality_score {
            perf.quality_score = quality;
        }
        if let Some(load) = self.current_load {
            perf.current_load = load;
        }
        if let Some(availability) = self.availability {
            perf.availability = availability;
        }
        if let Some(status) = self.status {
            perf.status = status;
        }
    }
}

/// An upstream AI service exposing one or more models
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provider {
    /// Unique provider identifier
    pub id: String,
    /// Display name
    #[serde(default)]
    pub name: String,
    /// Models offered by this provider
    pub models: Vec<Model>,
    /// Default pricing for the provider's models
    pub pricing: Pricing,
    /// Static capabilities
    #[serde(default)]
    pub capabilities: Capabilities,
    /// Live performance block
    #[serde(default)]
    pub performance: ProviderPerformance,
    /// Endpoint polled by the health-check metrics source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check_url: Option<String>,
}

impl Provider {
    /// Create a new provider with no models
    pub fn new(id: impl Into<String>, pricing: Pricing) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            models: Vec::new(),
            pricing,
            capabilities: Capabilities::new(4096),
            performance: ProviderPerformance::default(),
            health_check_url: None,
        }
    }

    /// Set the display name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Add a model
    pub fn with_model(mut self, model: Model) -> Self {
        self.models.push(model);
        self
    }

    /// Set capabilities
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Set the initial live performance block
    pub fn with_performance(mut self, performance: ProviderPerformance) -> Self {
        self.performance = performance;
        self
    }

    /// Set the initial status
    pub fn with_status(mut self, status: ProviderStatus) -> Self {
        self.performance.status = status;
        self
    }

    /// Set the health-check endpoint
    pub fn with_health_check_url(mut self, url: impl Into<String>) -> Self {
        self.health_check_url = Some(url.into());
        self
    }

    /// Get a model by id
    pub fn model(&self, model_id: &str) -> Option<&Model> {
        self.models.iter().find(|m| m.id == model_id)
    }

    /// Pricing that applies to a model (its override, else the provider's)
    pub fn pricing_for(&self, model: &Model) -> Pricing {
        model.pricing.unwrap_or(self.pricing)
    }

    /// Sorted model ids, used to detect conflicting re-registrations
    pub(crate) fn model_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.models.iter().map(|m| m.id.as_str()).collect();
        ids.sort_unstable();
        ids
    }

    /// Check the static definition for obvious mistakes
    pub fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("provider id must not be empty".to_string());
        }
        if self.models.is_empty() {
            return Err(format!("provider '{}' declares no models", self.id));
        }

        let ids = self.model_ids();
        if ids.windows(2).any(|w| w[0] == w[1]) {
            return Err(format!("provider '{}' declares duplicate model ids", self.id));
        }

        let in_unit = |v: f64| (0.0..=1.0).contains(&v);
        let prices = std::iter::once(self.pricing).chain(self.models.iter().filter_map(|m| m.pricing));
        for pricing in prices {
            let valid = |c: f64| c.is_finite() && c >= 0.0;
            if !(valid(pricing.input_cost_per_1k) && valid(pricing.output_cost_per_1k)) {
                return Err(format!("provider '{}' has negative or non-finite pricing", self.id));
            }
        }

        for model in &self.models {
            if model.id.trim().is_empty() {
                return Err(format!("provider '{}' has a model with an empty id", self.id));
            }
            let perf = &model.performance;
            if !(perf.tokens_per_second > 0.0) || !in_unit(perf.accuracy) || !in_unit(perf.consistency) {
                return Err(format!(
                    "model '{}/{}' has an out-of-range performance profile",
                    self.id, model.id
                ));
            }
            if !model.specialization.values().all(in_unit) {
                return Err(format!(
                    "model '{}/{}' has specialization scores outside [0, 1]",
                    self.id, model.id
                ));
            }
        }

        let perf = &self.performance;
        if !in_unit(perf.reliability) || !in_unit(perf.quality_score) {
            return Err(format!(
                "provider '{}' reliability and quality must be within [0, 1]",
                self.id
            ));
        }
        if !(perf.average_latency_ms.is_finite() && perf.average_latency_ms >= 0.0) {
            return Err(format!(
                "provider '{}' average_latency_ms must be finite and non-negative",
                self.id
            ));
        }
        let percent = |v: f64| (0.0..=100.0).contains(&v);
        if !percent(perf.availability) || !percent(perf.success_rate) {
            return Err(format!(
                "provider '{}' availability and success_rate must be within [0, 100]",
                self.id
            ));
        }

        Ok(())
    }
}

/// Point-in-time copy of a provider, as exported to routing and dashboards
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderSnapshot {
    /// Registration order, used as the final routing tie-break
    pub order: usize,
    /// Copy of the provider
    pub provider: Provider,
    /// Health classification at snapshot time
    pub health: HealthStatus,
    /// When the snapshot was taken
    pub taken_at: DateTime<Utc>,
}
