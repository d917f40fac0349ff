//! Retry classification of failed attempts.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use super::retry::{RetryConfig, DEFAULT_RETRY_STATUS_CODES};

/// Kind of failure observed on an attempt, independent of any status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Connection could not be established or was reset.
    Connection,
    /// The attempt timed out.
    Timeout,
    /// The server signalled rate limiting.
    RateLimited,
    /// The server reported an internal failure.
    Server,
    /// The request was rejected as invalid.
    Client,
    /// The response could not be decoded.
    Decode,
    /// Anything else.
    Other,
}

/// Failure kinds retried when neither retry set is configured.
const DEFAULT_RETRY_KINDS: [FailureKind; 2] = [FailureKind::Connection, FailureKind::Timeout];

/// What the classifier sees of a failed attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Outcome {
    /// Status code, if the failure came from a received response.
    pub status: Option<u16>,
    /// Failure kind tag.
    pub kind: Option<FailureKind>,
    /// Server-provided wait hint.
    pub retry_after: Option<Duration>,
}

impl Outcome {
    /// Failure carrying only a status code.
    pub fn status(status: u16) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    /// Failure carrying only a kind tag.
    pub fn kind(kind: FailureKind) -> Self {
        Self {
            kind: Some(kind),
            ..Default::default()
        }
    }

    /// Attaches a server wait hint.
    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.status, self.kind) {
            (Some(status), Some(kind)) => write!(f, "HTTP {} ({:?})", status, kind),
            (Some(status), None) => write!(f, "HTTP {}", status),
            (None, Some(kind)) => write!(f, "{:?} failure", kind),
            (None, None) => f.write_str("unclassified failure"),
        }
    }
}

/// Errors that the executor can classify.
pub trait AttemptFailure {
    /// Returns the classifier view of this failure.
    fn outcome(&self) -> Outcome;
}

impl AttemptFailure for Outcome {
    fn outcome(&self) -> Outcome {
        self.clone()
    }
}

/// Decides whether a failed attempt may be retried.
pub struct RetryClassifier;

impl RetryClassifier {
    /// Returns true if the failure is transient under `config`, ignoring the
    /// attempt budget.
    pub fn is_retryable(outcome: &Outcome, config: &RetryConfig) -> bool {
        if config.retry_on_exceptions.is_empty() && config.retry_on_status_codes.is_empty() {
            return outcome.kind.is_some_and(|k| DEFAULT_RETRY_KINDS.contains(&k))
                || outcome
                    .status
                    .is_some_and(|s| DEFAULT_RETRY_STATUS_CODES.contains(&s));
        }

        if let Some(kind) = outcome.kind {
            if config.retry_on_exceptions.contains(&kind) {
                return true;
            }
        }

        outcome
            .status
            .is_some_and(|s| config.retry_on_status_codes.contains(&s))
    }

    /// Returns true if another attempt should follow attempt number `attempt`.
    pub fn should_retry(outcome: &Outcome, attempt: u32, config: &RetryConfig) -> bool {
        if attempt >= config.max_attempts {
            return false;
        }
        Self::is_retryable(outcome, config)
    }
}
