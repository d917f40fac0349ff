//! Resilience layer for the Langbase client.
//!
//! Every outbound request runs through a [`ResilientExecutor`], which gates the
//! call on a [`CircuitBreaker`], classifies failures with the
//! [`RetryClassifier`], and waits between attempts according to the
//! [`RetryPolicy`].

mod circuit_breaker;
mod classifier;
mod executor;
mod retry;
mod retry_after;

pub use circuit_breaker::{
    BreakerScope, CallPermit, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerHook,
    CircuitBreakerRegistry, CircuitOpenError, CircuitSnapshot, CircuitState, DEFAULT_MAX_BREAKERS,
};
pub use classifier::{AttemptFailure, FailureKind, Outcome, RetryClassifier};
pub use executor::{ExecutionError, ResilienceConfig, ResilientExecutor};
pub use retry::{RetryConfig, RetryPolicy, RetryStrategy, DEFAULT_RETRY_STATUS_CODES};
pub use retry_after::parse_retry_after;
