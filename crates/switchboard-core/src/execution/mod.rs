//! Request execution with fallback
//!
//! The coordinator calls providers through [`ExecutionInterface`], one
//! candidate at a time, until one succeeds or the attempt ceiling is hit.

mod coordinator;
mod interface;
mod types;

pub use coordinator::{ExecutionConfig, ExecutionCoordinator};
pub use interface::{
    ClockSource, ExecutionInterface, Invocation, InvocationError, ManualClock, ProviderResponse,
    SystemClock,
};
pub use types::{AttemptOutcome, ExecutionAttempt, ExecutionResult, ExecutionState};
