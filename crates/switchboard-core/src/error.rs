//! Error types for Switchboard

use thiserror::Error;

use crate::execution::ExecutionAttempt;
use crate::routing::RoutingDecision;

/// Result type alias using Switchboard's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Switchboard error types with stable codes and remediation hints
#[derive(Error, Debug)]
pub enum Error {
    // Routing errors (E100-E199)
    #[error("No eligible provider for request '{request_id}': {reason}")]
    NoEligibleProvider { request_id: String, reason: String },

    /// Carries the decision that was walked and every attempt made
    #[error(
        "All {count} candidate(s) failed for request '{request_id}'. Last error: {last_error}",
        count = .attempts.len()
    )]
    AllCandidatesExhausted {
        request_id: String,
        attempts: Vec<ExecutionAttempt>,
        last_error: String,
        decision: Box<RoutingDecision>,
    },

    #[error("Invalid routing request: {0}")]
    InvalidRequest(String),

    // Execution errors (E200-E299)
    #[error("Provider '{provider_id}' model '{model_id}' timed out after {timeout_ms}ms")]
    ExecutionTimeout {
        provider_id: String,
        model_id: String,
        timeout_ms: u64,
    },

    #[error("Provider '{provider_id}' model '{model_id}' returned an error: {message}")]
    ExecutionError {
        provider_id: String,
        model_id: String,
        message: String,
    },

    #[error("Request '{0}' was cancelled by the caller")]
    Cancelled(String),

    // Catalog errors (E300-E399)
    #[error("Provider '{0}' not found. Run `switchboard providers` to see registered providers.")]
    ProviderNotFound(String),

    #[error("Provider '{0}' is already registered with a different model set")]
    ProviderConflict(String),

    #[error("Invalid provider definition: {0}")]
    InvalidProvider(String),

    #[error("Failed to parse provider catalog: {0}")]
    CatalogParse(String),

    // Health check errors (E400-E499)
    #[error("Health check failed: {0}")]
    HealthCheck(#[from] reqwest::Error),

    // Config errors (E600-E699)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoEligibleProvider { .. } => "E100",
            Self::AllCandidatesExhausted { .. } => "E101",
            Self::InvalidRequest(_) => "E102",
            Self::ExecutionTimeout { .. } => "E200",
            Self::ExecutionError { .. } => "E201",
            Self::Cancelled(_) => "E202",
            Self::ProviderNotFound(_) => "E300",
            Self::ProviderConflict(_) => "E301",
            Self::InvalidProvider(_) => "E302",
            Self::CatalogParse(_) => "E303",
            Self::HealthCheck(_) => "E400",
            Self::ConfigError(_) => "E600",
            Self::Io(_) => "E9999",
        }
    }

    /// Get suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Self::NoEligibleProvider { .. } => Some(
                "Relax the request constraints or wait for providers to recover".to_string(),
            ),
            Self::AllCandidatesExhausted { .. } => {
                Some("Retry with a fresh routing request after a short delay".to_string())
            }
            Self::ProviderNotFound(_) => Some("switchboard providers".to_string()),
            Self::ProviderConflict(id) => Some(format!(
                "Register '{}' with the same model ids, or pick a new provider id",
                id
            )),
            Self::ConfigError(_) => Some("switchboard config list".to_string()),
            _ => None,
        }
    }

    /// Whether this error describes a single failed candidate that the
    /// coordinator recovers from by moving down the fallback chain.
    pub fn is_candidate_failure(&self) -> bool {
        matches!(
            self,
            Self::ExecutionTimeout { .. } | Self::ExecutionError { .. }
        )
    }
}
