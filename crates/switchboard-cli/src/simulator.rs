//! Simulated provider executor for the `simulate` command

use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use switchboard_core::catalog::TokenUsage;
use switchboard_core::execution::{
    ExecutionInterface, Invocation, InvocationError, ProviderResponse,
};
use tokio_util::sync::CancellationToken;

/// Answers every call after a short random delay, failing at a fixed rate
pub struct SimulatedExecutor {
    failure_rate: f64,
    always_fail: HashSet<String>,
    max_delay_ms: u64,
    rng: Mutex<StdRng>,
}

impl SimulatedExecutor {
    pub fn new(failure_rate: f64, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            failure_rate: failure_rate.clamp(0.0, 1.0),
            always_fail: HashSet::new(),
            max_delay_ms: 20,
            rng: Mutex::new(rng),
        }
    }

    /// Make every call to a provider fail
    pub fn with_failing_provider(mut self, provider_id: impl Into<String>) -> Self {
        self.always_fail.insert(provider_id.into());
        self
    }

    pub fn with_max_delay_ms(mut self, max_delay_ms: u64) -> Self {
        self.max_delay_ms = max_delay_ms;
        self
    }

    /// Decide the call's fate up front so the lock is never held across await
    fn roll(&self, invocation: &Invocation) -> (Duration, bool, u32) {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        let delay = Duration::from_millis(rng.gen_range(0..=self.max_delay_ms));
        let fails = self.always_fail.contains(&invocation.provider_id)
            || rng.gen_bool(self.failure_rate);
        let expected = invocation.estimated_tokens.output_tokens;
        let output = if expected == 0 {
            0
        } else {
            rng.gen_range(expected / 2..=expected)
        };
        (delay, fails, output)
    }
}

#[async_trait]
impl ExecutionInterface for SimulatedExecutor {
    async fn invoke(
        &self,
        invocation: &Invocation,
        cancel: CancellationToken,
    ) -> Result<ProviderResponse, InvocationError> {
        let (delay, fails, output_tokens) = self.roll(invocation);

        tokio::select! {
            _ = cancel.cancelled() => {
                return Err(InvocationError::new("cancelled"));
            }
            _ = tokio::time::sleep(delay) => {}
        }

        let input_tokens = invocation.estimated_tokens.input_tokens;
        if fails {
            return Err(
                InvocationError::new(format!("{} returned 503", invocation.provider_id))
                    .with_usage(TokenUsage::new(input_tokens, 0)),
            );
        }
        Ok(ProviderResponse::new(
            format!(
                "[{}/{}] simulated response",
                invocation.provider_id, invocation.model_id
            ),
            TokenUsage::new(input_tokens, output_tokens),
        ))
    }
}
