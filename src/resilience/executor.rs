//! Resilient executor: circuit gate, attempt, classify, back off, repeat.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::circuit_breaker::{
    BreakerScope, CircuitBreaker, CircuitBreakerConfig, CircuitOpenError, DEFAULT_MAX_BREAKERS,
};
use super::classifier::{AttemptFailure, Outcome, RetryClassifier};
use super::retry::{RetryConfig, RetryPolicy};
use crate::errors::{LangbaseError, LangbaseResult};
use crate::observability::{MetricsCollector, NoopMetricsCollector};

/// Configuration for the whole resilience layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    /// When false, every call makes exactly one attempt with no breaker gating.
    pub enabled: bool,
    /// Retry configuration.
    pub retry: RetryConfig,
    /// Circuit breaker configuration; `None` disables breakers.
    pub circuit_breaker: Option<CircuitBreakerConfig>,
    /// How breakers are shared between requests.
    pub scope: BreakerScope,
    /// Breakers kept per client before idle ones are evicted.
    pub max_breakers: usize,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            retry: RetryConfig::default(),
            circuit_breaker: Some(CircuitBreakerConfig::default()),
            scope: BreakerScope::default(),
            max_breakers: DEFAULT_MAX_BREAKERS,
        }
    }
}

impl ResilienceConfig {
    /// Creates a configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a configuration with the resilience layer switched off.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    /// Sets whether the layer is enabled.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Sets the retry configuration.
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the circuit breaker configuration.
    pub fn circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = Some(config);
        self
    }

    /// Removes circuit breaking, leaving pure retry with backoff.
    pub fn without_circuit_breaker(mut self) -> Self {
        self.circuit_breaker = None;
        self
    }

    /// Sets the breaker scope.
    pub fn scope(mut self, scope: BreakerScope) -> Self {
        self.scope = scope;
        self
    }

    /// Sets how many breakers are kept before idle ones are evicted.
    pub fn max_breakers(mut self, max_breakers: usize) -> Self {
        self.max_breakers = max_breakers;
        self
    }

    /// Checks the configuration invariants.
    pub fn validate(&self) -> LangbaseResult<()> {
        self.retry.validate()?;
        if self.max_breakers == 0 {
            return Err(LangbaseError::configuration("max_breakers must be at least 1"));
        }
        if let Some(breaker) = &self.circuit_breaker {
            breaker.validate()?;
        }
        Ok(())
    }
}

/// Terminal failure of a resilient call.
#[derive(Debug)]
pub enum ExecutionError<E> {
    /// The failure was not retryable and surfaced on first occurrence.
    Failed {
        /// The underlying failure.
        source: E,
        /// Attempts made, including the failed one.
        attempts: u32,
    },
    /// Every allowed attempt failed with a retryable error.
    RetryExhausted {
        /// The last underlying failure.
        source: E,
        /// Attempts made.
        attempts: u32,
    },
    /// The circuit breaker refused further attempts.
    ///
    /// `attempts` is zero when the call was refused up front. When a failed
    /// attempt tripped the breaker, `last` holds that failure.
    CircuitOpen {
        /// The breaker's refusal.
        rejection: CircuitOpenError,
        /// Attempts made before the refusal.
        attempts: u32,
        /// The last underlying failure, if an attempt was made.
        last: Option<E>,
    },
    /// The caller cancelled while the executor was waiting to retry.
    CancelledDuringBackoff {
        /// Attempts made before cancellation.
        attempts: u32,
        /// The failure that triggered the interrupted backoff.
        last: Option<E>,
    },
}

impl<E> ExecutionError<E> {
    /// Number of attempts that reached the operation.
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Failed { attempts, .. }
            | Self::RetryExhausted { attempts, .. }
            | Self::CircuitOpen { attempts, .. }
            | Self::CancelledDuringBackoff { attempts, .. } => *attempts,
        }
    }

    /// Returns the last underlying failure, if an attempt was made.
    pub fn into_source(self) -> Option<E> {
        match self {
            Self::Failed { source, .. } | Self::RetryExhausted { source, .. } => Some(source),
            Self::CircuitOpen { last, .. } | Self::CancelledDuringBackoff { last, .. } => last,
        }
    }
}

impl<E: fmt::Display> fmt::Display for ExecutionError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed { source, .. } => write!(f, "{}", source),
            Self::RetryExhausted { source, attempts } => {
                write!(f, "retries exhausted after {} attempt(s): {}", attempts, source)
            }
            Self::CircuitOpen {
                rejection,
                last: Some(last),
                ..
            } => write!(f, "{} (last failure: {})", rejection, last),
            Self::CircuitOpen { rejection, .. } => write!(f, "{}", rejection),
            Self::CancelledDuringBackoff { attempts, .. } => {
                write!(f, "cancelled during backoff after {} attempt(s)", attempts)
            }
        }
    }
}

impl<E> std::error::Error for ExecutionError<E>
where
    E: std::error::Error + 'static,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Failed { source, .. } | Self::RetryExhausted { source, .. } => Some(source),
            Self::CircuitOpen {
                last: Some(last), ..
            } => Some(last),
            Self::CircuitOpen { rejection, .. } => Some(rejection),
            Self::CancelledDuringBackoff { last, .. } => {
                last.as_ref().map(|e| e as &(dyn std::error::Error + 'static))
            }
        }
    }
}

/// What to do after a failed attempt.
#[derive(Debug)]
enum Step<E> {
    Retry { delay: Duration, error: E },
    Stop(ExecutionError<E>),
}

/// Decides the next step after attempt number `attempt` failed.
fn decide<E, R: Rng + ?Sized>(
    policy: &RetryPolicy,
    outcome: &Outcome,
    attempt: u32,
    error: E,
    rng: &mut R,
) -> Step<E> {
    let config = policy.config();

    if !RetryClassifier::is_retryable(outcome, config) {
        return Step::Stop(ExecutionError::Failed {
            source: error,
            attempts: attempt,
        });
    }
    if !RetryClassifier::should_retry(outcome, attempt, config) {
        return Step::Stop(ExecutionError::RetryExhausted {
            source: error,
            attempts: attempt,
        });
    }

    Step::Retry {
        delay: policy.delay_for_failure(attempt, outcome.retry_after, rng),
        error,
    }
}

/// Runs operations with retry, backoff and optional circuit breaking.
///
/// The executor holds only read-only configuration; breaker state is passed in
/// per call so one executor can serve many endpoints.
#[derive(Clone)]
pub struct ResilientExecutor {
    policy: RetryPolicy,
    enabled: bool,
    metrics: Arc<dyn MetricsCollector>,
}

impl ResilientExecutor {
    /// Creates an executor with the given retry configuration.
    pub fn new(retry: RetryConfig) -> Self {
        Self {
            policy: RetryPolicy::new(retry),
            enabled: true,
            metrics: Arc::new(NoopMetricsCollector),
        }
    }

    /// Creates an executor from a resilience configuration.
    pub fn from_config(config: &ResilienceConfig) -> Self {
        Self {
            enabled: config.enabled,
            ..Self::new(config.retry.clone())
        }
    }

    /// Creates an executor that makes a single attempt and ignores breakers.
    pub fn passthrough() -> Self {
        Self {
            enabled: false,
            ..Self::new(RetryConfig::no_retries())
        }
    }

    /// Sets the metrics collector.
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsCollector>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Returns the retry policy.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Returns true if retries and breaker gating are active.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Executes `operation` until it succeeds, fails permanently, runs out of
    /// attempts, or is rejected by `breaker`.
    ///
    /// `name` labels logs and metrics.
    pub async fn execute<F, Fut, T, E>(
        &self,
        name: &str,
        breaker: Option<&CircuitBreaker>,
        operation: F,
    ) -> Result<T, ExecutionError<E>>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: AttemptFailure + fmt::Display,
    {
        self.run(name, breaker, None, operation).await
    }

    /// Like [`execute`](Self::execute), but `cancel` interrupts the wait
    /// between attempts with [`ExecutionError::CancelledDuringBackoff`].
    pub async fn execute_with_cancellation<F, Fut, T, E>(
        &self,
        name: &str,
        breaker: Option<&CircuitBreaker>,
        cancel: &CancellationToken,
        operation: F,
    ) -> Result<T, ExecutionError<E>>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: AttemptFailure + fmt::Display,
    {
        self.run(name, breaker, Some(cancel), operation).await
    }

    async fn run<F, Fut, T, E>(
        &self,
        name: &str,
        breaker: Option<&CircuitBreaker>,
        cancel: Option<&CancellationToken>,
        operation: F,
    ) -> Result<T, ExecutionError<E>>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: AttemptFailure + fmt::Display,
    {
        if !self.enabled {
            self.metrics.record_attempt(name);
            return match operation().await {
                Ok(value) => {
                    self.metrics.record_success(name, 1);
                    Ok(value)
                }
                Err(error) => {
                    self.metrics.record_permanent_failure(name);
                    Err(ExecutionError::Failed {
                        source: error,
                        attempts: 1,
                    })
                }
            };
        }

        let config = self.policy.config();
        let mut attempt: u32 = 0;
        let mut last: Option<E> = None;

        loop {
            attempt += 1;

            let permit = match breaker.map(CircuitBreaker::try_acquire).transpose() {
                Ok(permit) => permit,
                Err(rejection) => {
                    tracing::warn!(
                        operation = name,
                        attempt,
                        retry_in_ms = rejection.retry_in.map(|d| d.as_millis() as u64),
                        "Circuit open, rejecting call"
                    );
                    self.metrics.record_circuit_rejection(name);
                    return Err(ExecutionError::CircuitOpen {
                        rejection,
                        attempts: attempt - 1,
                        last,
                    });
                }
            };

            tracing::debug!(
                operation = name,
                attempt,
                max_attempts = config.max_attempts,
                probe = permit.as_ref().is_some_and(|p| p.is_probe()),
                "Executing attempt"
            );
            self.metrics.record_attempt(name);

            let error = match operation().await {
                Ok(value) => {
                    if let Some(permit) = permit {
                        permit.record_success();
                    }
                    if attempt > 1 {
                        tracing::info!(operation = name, attempt, "Request succeeded after retry");
                    }
                    self.metrics.record_success(name, attempt);
                    return Ok(value);
                }
                Err(error) => error,
            };

            let outcome = error.outcome();
            if let Some(permit) = permit {
                if RetryClassifier::is_retryable(&outcome, config) {
                    permit.record_failure();
                } else {
                    permit.release();
                }
            }

            let step = decide(&self.policy, &outcome, attempt, error, &mut rand::thread_rng());
            let (delay, error) = match step {
                Step::Retry { delay, error } => (delay, error),
                Step::Stop(stop) => {
                    match &stop {
                        ExecutionError::RetryExhausted { source, attempts } => {
                            tracing::warn!(
                                operation = name,
                                attempts,
                                error = %source,
                                "Retries exhausted"
                            );
                            self.metrics.record_exhausted(name, *attempts);
                        }
                        _ => {
                            tracing::debug!(
                                operation = name,
                                attempt,
                                failure = %outcome,
                                "Failure is not retryable"
                            );
                            self.metrics.record_permanent_failure(name);
                        }
                    }
                    return Err(stop);
                }
            };

            // A breaker that will still refuse once the delay is over makes
            // the wait pointless.
            if let Some(rejection) = breaker.and_then(|b| b.rejection_after(delay)) {
                tracing::warn!(
                    operation = name,
                    attempt,
                    retry_in_ms = rejection.retry_in.map(|d| d.as_millis() as u64),
                    error = %error,
                    "Circuit open, abandoning retries"
                );
                self.metrics.record_circuit_rejection(name);
                return Err(ExecutionError::CircuitOpen {
                    rejection,
                    attempts: attempt,
                    last: Some(error),
                });
            }

            tracing::info!(
                operation = name,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Retrying after failure"
            );
            self.metrics.record_retry(name, delay);

            match cancel {
                Some(token) => {
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => {}
                        _ = tokio::time::sleep(delay) => {}
                    }
                    if token.is_cancelled() {
                        tracing::info!(operation = name, attempt, "Cancelled during backoff");
                        self.metrics.record_cancellation(name);
                        return Err(ExecutionError::CancelledDuringBackoff {
                            attempts: attempt,
                            last: Some(error),
                        });
                    }
                }
                None => tokio::time::sleep(delay).await,
            }
            last = Some(error);
        }
    }
}

impl Default for ResilientExecutor {
    fn default() -> Self {
        Self::from_config(&ResilienceConfig::default())
    }
}

impl fmt::Debug for ResilientExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResilientExecutor")
            .field("policy", &self.policy)
            .field("enabled", &self.enabled)
            .finish()
    }
}
