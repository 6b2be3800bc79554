//! Provider catalog
//!
//! Holds the set of known providers, their models, static pricing and
//! capabilities, and live performance metrics. The catalog is constructed
//! explicitly and shared by `Arc`; there is no global registry.

mod defaults;
mod registry;
mod types;

pub use defaults::default_providers;
pub use registry::{CatalogFile, ProviderCatalog};
pub use types::{
    CAP_AUDIO, CAP_FUNCTION_CALLING, CAP_JSON_MODE, CAP_STREAMING, CAP_VISION, Capabilities,
    HealthStatus, MetricsSample, Model, ModelPerformance, Pricing, Provider, ProviderPerformance,
    ProviderSnapshot, ProviderStatus, Specialization, TaskCategory, TokenUsage,
};
