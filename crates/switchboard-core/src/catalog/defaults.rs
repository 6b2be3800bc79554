//! Built-in provider catalog
//!
//! Prices are USD per 1K tokens.

use super::registry::ProviderCatalog;
use super::types::{
    Capabilities, CAP_AUDIO, CAP_JSON_MODE, Model, Pricing, Provider, ProviderPerformance,
    TaskCategory,
};

/// Default providers, in registration order
pub fn default_providers() -> Vec<Provider> {
    vec![
        Provider::new("openai", Pricing::new(0.005, 0.015))
            .with_name("OpenAI")
            .with_capabilities(
                Capabilities::new(16_384)
                    .with_streaming()
                    .with_function_calling()
                    .with_vision()
                    .with_flag(CAP_AUDIO, true)
                    .with_flag(CAP_JSON_MODE, true),
            )
            .with_performance(ProviderPerformance {
                average_latency_ms: 650.0,
                reliability: 0.97,
                quality_score: 0.92,
                max_concurrency: 200,
                availability: 99.9,
                ..Default::default()
            })
            .with_model(
                Model::new("gpt-4o")
                    .with_name("GPT-4o")
                    .with_context_window(128_000)
                    .with_performance(85.0, 0.92, 0.90)
                    .with_specialization(TaskCategory::Coding, 0.90)
                    .with_specialization(TaskCategory::Creative, 0.85)
                    .with_specialization(TaskCategory::Analytical, 0.90)
                    .with_specialization(TaskCategory::Conversational, 0.90)
                    .with_specialization(TaskCategory::Reasoning, 0.88),
            )
            .with_model(
                Model::new("gpt-4o-mini")
                    .with_name("GPT-4o mini")
                    .with_context_window(128_000)
                    .with_pricing(Pricing::new(0.00015, 0.0006))
                    .with_performance(110.0, 0.82, 0.85)
                    .with_specialization(TaskCategory::Coding, 0.75)
                    .with_specialization(TaskCategory::Creative, 0.70)
                    .with_specialization(TaskCategory::Analytical, 0.72)
                    .with_specialization(TaskCategory::Conversational, 0.85)
                    .with_specialization(TaskCategory::Reasoning, 0.70),
            ),
        Provider::new("anthropic", Pricing::new(0.003, 0.015))
            .with_name("Anthropic")
            .with_capabilities(
                Capabilities::new(8_192)
                    .with_streaming()
                    .with_function_calling()
                    .with_vision(),
            )
            .with_performance(ProviderPerformance {
                average_latency_ms: 800.0,
                reliability: 0.96,
                quality_score: 0.94,
                max_concurrency: 150,
                availability: 99.8,
                ..Default::default()
            })
            .with_model(
                Model::new("claude-sonnet")
                    .with_name("Claude Sonnet")
                    .with_context_window(200_000)
                    .with_performance(75.0, 0.94, 0.93)
                    .with_specialization(TaskCategory::Coding, 0.95)
                    .with_specialization(TaskCategory::Creative, 0.90)
                    .with_specialization(TaskCategory::Analytical, 0.92)
                    .with_specialization(TaskCategory::Conversational, 0.88)
                    .with_specialization(TaskCategory::Reasoning, 0.93),
            )
            .with_model(
                Model::new("claude-haiku")
                    .with_name("Claude Haiku")
                    .with_context_window(200_000)
                    .with_pricing(Pricing::new(0.0008, 0.004))
                    .with_performance(120.0, 0.84, 0.88)
                    .with_specialization(TaskCategory::Coding, 0.78)
                    .with_specialization(TaskCategory::Conversational, 0.85)
                    .with_specialization(TaskCategory::Reasoning, 0.74),
            ),
        Provider::new("google", Pricing::new(0.00125, 0.005))
            .with_name("Google")
            .with_capabilities(
                Capabilities::new(8_192)
                    .with_streaming()
                    .with_function_calling()
                    .with_vision()
                    .with_flag(CAP_AUDIO, true),
            )
            .with_performance(ProviderPerformance {
                average_latency_ms: 700.0,
                reliability: 0.95,
                quality_score: 0.90,
                max_concurrency: 200,
                availability: 99.5,
                ..Default::default()
            })
            .with_model(
                Model::new("gemini-pro")
                    .with_name("Gemini Pro")
                    .with_context_window(1_000_000)
                    .with_performance(90.0, 0.90, 0.87)
                    .with_specialization(TaskCategory::Coding, 0.85)
                    .with_specialization(TaskCategory::Analytical, 0.92)
                    .with_specialization(TaskCategory::Reasoning, 0.88),
            ),
        Provider::new("mistral", Pricing::new(0.002, 0.006))
            .with_name("Mistral")
            .with_capabilities(
                Capabilities::new(8_192)
                    .with_streaming()
                    .with_function_calling(),
            )
            .with_performance(ProviderPerformance {
                average_latency_ms: 550.0,
                reliability: 0.94,
                quality_score: 0.86,
                max_concurrency: 100,
                availability: 99.0,
                ..Default::default()
            })
            .with_model(
                Model::new("mistral-large")
                    .with_name("Mistral Large")
                    .with_context_window(128_000)
                    .with_performance(95.0, 0.86, 0.85)
                    .with_specialization(TaskCategory::Coding, 0.84)
                    .with_specialization(TaskCategory::Conversational, 0.82)
                    .with_specialization(TaskCategory::Reasoning, 0.80),
            ),
        Provider::new("local", Pricing::free())
            .with_name("Local llama.cpp")
            .with_capabilities(Capabilities::new(4_096).with_streaming())
            .with_performance(ProviderPerformance {
                average_latency_ms: 250.0,
                reliability: 0.90,
                quality_score: 0.72,
                max_concurrency: 4,
                availability: 97.0,
                ..Default::default()
            })
            .with_model(
                Model::new("llama-3-8b")
                    .with_name("Llama 3 8B")
                    .with_context_window(8_192)
                    .with_performance(40.0, 0.72, 0.75)
                    .with_specialization(TaskCategory::Coding, 0.60)
                    .with_specialization(TaskCategory::Conversational, 0.75)
                    .with_specialization(TaskCategory::Reasoning, 0.55),
            ),
    ]
}

impl ProviderCatalog {
    /// Create a catalog seeded with the built-in providers
    pub fn with_defaults() -> Self {
        let catalog = Self::new();
        for provider in default_providers() {
            // Invalid built-ins are skipped
            if let Err(e) = catalog.register(provider) {
                tracing::warn!(error = %e, "Skipping invalid built-in provider");
            }
        }
        catalog
    }
}
