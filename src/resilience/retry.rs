//! Retry policy: backoff strategies, jitter and delay caps.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

use super::classifier::FailureKind;
use crate::errors::{LangbaseError, LangbaseResult};

/// Backoff strategy used to space out retry attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategy {
    /// `base_delay * multiplier^(attempt - 1)`.
    Exponential,
    /// `base_delay * attempt`.
    Linear,
    /// `base_delay` for every attempt.
    Fixed,
    /// `base_delay * fib(attempt)` with `fib(1) = fib(2) = 1`.
    Fibonacci,
}

impl Default for RetryStrategy {
    fn default() -> Self {
        Self::Exponential
    }
}

/// Status codes retried by default.
pub const DEFAULT_RETRY_STATUS_CODES: [u16; 5] = [429, 500, 502, 503, 504];

/// Retry configuration.
///
/// Time values are `Duration`s in Rust and fractional seconds when
/// (de)serialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first try. Must be at least 1.
    pub max_attempts: u32,
    /// Backoff strategy.
    pub strategy: RetryStrategy,
    /// Base delay fed into the strategy.
    #[serde(with = "duration_secs")]
    pub base_delay: Duration,
    /// Hard cap on any strategy-computed delay.
    #[serde(with = "duration_secs")]
    pub max_delay: Duration,
    /// Growth factor for exponential backoff.
    pub multiplier: f64,
    /// Replace each delay with a uniform draw from `[0, delay]`.
    pub jitter: bool,
    /// Honor server `Retry-After` hints.
    pub respect_retry_after: bool,
    /// Cap applied to server `Retry-After` hints.
    #[serde(with = "duration_secs")]
    pub max_retry_after: Duration,
    /// Status codes that are retried.
    pub retry_on_status_codes: HashSet<u16>,
    /// Failure kinds that are retried.
    pub retry_on_exceptions: HashSet<FailureKind>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            strategy: RetryStrategy::Exponential,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: true,
            respect_retry_after: true,
            max_retry_after: Duration::from_secs(300),
            retry_on_status_codes: DEFAULT_RETRY_STATUS_CODES.into_iter().collect(),
            retry_on_exceptions: [
                FailureKind::Connection,
                FailureKind::Timeout,
                FailureKind::RateLimited,
            ]
            .into_iter()
            .collect(),
        }
    }
}

impl RetryConfig {
    /// Creates a new retry configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a configuration that performs a single attempt.
    pub fn no_retries() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Sets the maximum number of attempts.
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the backoff strategy.
    pub fn strategy(mut self, strategy: RetryStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Sets the base delay.
    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the exponential multiplier.
    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Sets whether to use jitter.
    pub fn jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Sets whether server `Retry-After` hints are honored.
    pub fn respect_retry_after(mut self, respect: bool) -> Self {
        self.respect_retry_after = respect;
        self
    }

    /// Sets the cap on server `Retry-After` hints.
    pub fn max_retry_after(mut self, cap: Duration) -> Self {
        self.max_retry_after = cap;
        self
    }

    /// Replaces the retried status codes.
    pub fn retry_on_status_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.retry_on_status_codes = codes.into_iter().collect();
        self
    }

    /// Replaces the retried failure kinds.
    pub fn retry_on_exceptions(mut self, kinds: impl IntoIterator<Item = FailureKind>) -> Self {
        self.retry_on_exceptions = kinds.into_iter().collect();
        self
    }

    /// Checks the configuration invariants.
    pub fn validate(&self) -> LangbaseResult<()> {
        if self.max_attempts < 1 {
            return Err(LangbaseError::configuration(
                "max_attempts must be at least 1",
            ));
        }
        if self.base_delay.is_zero() {
            return Err(LangbaseError::configuration(
                "base_delay must be greater than zero",
            ));
        }
        if self.max_delay < self.base_delay {
            return Err(LangbaseError::configuration(
                "max_delay must be greater than or equal to base_delay",
            ));
        }
        if self.strategy == RetryStrategy::Exponential
            && !(self.multiplier.is_finite() && self.multiplier > 1.0)
        {
            return Err(LangbaseError::configuration(
                "multiplier must be greater than 1 for exponential backoff",
            ));
        }
        Ok(())
    }
}

/// Computes inter-attempt delays from a [`RetryConfig`].
///
/// Every method is a pure function of the attempt number, the configuration
/// and (for jitter) the supplied random source.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    /// Creates a new retry policy.
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Strategy delay in seconds before the `max_delay` cap.
    ///
    /// `attempt` is 1-based; 0 is treated as 1.
    pub fn uncapped_delay_secs(&self, attempt: u32) -> f64 {
        let attempt = attempt.max(1);
        let base = self.config.base_delay.as_secs_f64();

        match self.config.strategy {
            RetryStrategy::Exponential => {
                let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
                base * self.config.multiplier.powi(exponent)
            }
            RetryStrategy::Linear => base * f64::from(attempt),
            RetryStrategy::Fixed => base,
            RetryStrategy::Fibonacci => base * fibonacci(attempt),
        }
    }

    /// Strategy delay capped at `max_delay`, without jitter.
    pub fn capped_delay(&self, attempt: u32) -> Duration {
        let max = self.config.max_delay;
        let secs = self.uncapped_delay_secs(attempt).min(max.as_secs_f64());
        Duration::try_from_secs_f64(secs).unwrap_or(max)
    }

    /// Delay before the attempt following `attempt`, using `rng` for jitter.
    pub fn delay_with_rng<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let capped = self.capped_delay(attempt);
        if !self.config.jitter || capped.is_zero() {
            return capped;
        }

        let drawn = rng.gen_range(0.0..=capped.as_secs_f64());
        Duration::try_from_secs_f64(drawn).unwrap_or(capped)
    }

    /// Delay before the attempt following `attempt`, using the thread RNG.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.delay_with_rng(attempt, &mut rand::thread_rng())
    }

    /// Delay after a failure, honoring a server wait hint when configured.
    ///
    /// The hint overrides the strategy for this attempt only and is capped at
    /// `max_retry_after`. No jitter is applied to a server hint.
    pub fn delay_for_failure<R: Rng + ?Sized>(
        &self,
        attempt: u32,
        retry_after: Option<Duration>,
        rng: &mut R,
    ) -> Duration {
        match retry_after {
            Some(hint) if self.config.respect_retry_after => hint.min(self.config.max_retry_after),
            _ => self.delay_with_rng(attempt, rng),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

fn fibonacci(n: u32) -> f64 {
    if n <= 2 {
        return 1.0;
    }
    let (mut a, mut b) = (1.0_f64, 1.0_f64);
    for _ in 3..=n {
        let next = a + b;
        a = b;
        b = next;
        if !b.is_finite() {
            break;
        }
    }
    b
}

/// Serde adapter representing a `Duration` as fractional seconds.
pub(crate) mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
