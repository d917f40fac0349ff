//! Error types for the Langbase client.
//!
//! One crate-wide error enum covers configuration problems, API responses,
//! transport failures and the terminal outcomes of the resilience layer
//! (retry exhaustion, circuit-open rejection, cancellation during backoff).

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::resilience::{
    parse_retry_after, AttemptFailure, ExecutionError, FailureKind, Outcome,
};
use crate::transport::TransportError;

/// Result type alias for Langbase operations.
pub type LangbaseResult<T> = Result<T, LangbaseError>;

/// Response header carrying the server-side request ID.
pub const REQUEST_ID_HEADER: &str = "lb-request-id";

/// Comprehensive error type for Langbase client operations.
#[derive(Debug, Error)]
pub enum LangbaseError {
    /// Configuration error (missing API key, invalid base URL, bad retry settings).
    #[error("Configuration error: {message}")]
    Configuration {
        /// Error message describing the configuration issue.
        message: String,
    },

    /// Request validation failed before anything was sent.
    #[error("Validation error: {message}")]
    Validation {
        /// Error message describing the validation issue.
        message: String,
    },

    /// The API answered with a non-success status.
    #[error("{kind} (HTTP {status}): {message}")]
    Api {
        /// Category derived from the status code.
        kind: ApiErrorKind,
        /// HTTP status code.
        status: u16,
        /// Error message extracted from the response body.
        message: String,
        /// Machine-readable error code, if the body carried one.
        code: Option<String>,
        /// Request ID for support and debugging.
        request_id: Option<String>,
        /// Server-supplied wait hint from `Retry-After`.
        retry_after: Option<Duration>,
    },

    /// Could not reach the API.
    #[error("Connection error: {message}")]
    Connection {
        /// Error message.
        message: String,
    },

    /// The request timed out.
    #[error("Request timed out: {message}")]
    Timeout {
        /// Error message.
        message: String,
    },

    /// Serialization or deserialization failure.
    #[error("Serialization error: {message}")]
    Serialization {
        /// Error message.
        message: String,
    },

    /// Every allowed attempt failed with a retryable error.
    #[error("Retries exhausted after {attempts} attempt(s): {source}")]
    RetryExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// The last underlying failure.
        #[source]
        source: Box<LangbaseError>,
    },

    /// The circuit breaker for this endpoint refused the call.
    #[error("Circuit breaker open for '{endpoint}': service temporarily unavailable")]
    CircuitOpen {
        /// Breaker key (endpoint) that rejected the call.
        endpoint: String,
        /// Time until the breaker admits a probe.
        retry_in: Option<Duration>,
        /// Attempts made before the circuit refused further calls.
        attempts: u32,
        /// The failure that opened the circuit, when this call tripped it.
        #[source]
        source: Option<Box<LangbaseError>>,
    },

    /// The caller cancelled while the client was waiting to retry.
    #[error("Cancelled during backoff after {attempts} attempt(s)")]
    CancelledDuringBackoff {
        /// Number of attempts made before cancellation.
        attempts: u32,
    },
}

/// Category of an API error, derived from the HTTP status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiErrorKind {
    /// 400
    BadRequest,
    /// 401
    Authentication,
    /// 403
    PermissionDenied,
    /// 404
    NotFound,
    /// 409
    Conflict,
    /// 422
    UnprocessableEntity,
    /// 429
    RateLimit,
    /// 5xx
    InternalServer,
    /// Any other non-success status.
    Other,
}

impl ApiErrorKind {
    /// Maps an HTTP status code to its error category.
    pub fn from_status(status: u16) -> Self {
        match status {
            400 => Self::BadRequest,
            401 => Self::Authentication,
            403 => Self::PermissionDenied,
            404 => Self::NotFound,
            409 => Self::Conflict,
            422 => Self::UnprocessableEntity,
            429 => Self::RateLimit,
            s if s >= 500 => Self::InternalServer,
            _ => Self::Other,
        }
    }
}

impl fmt::Display for ApiErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::BadRequest => "Bad request",
            Self::Authentication => "Authentication failed",
            Self::PermissionDenied => "Permission denied",
            Self::NotFound => "Not found",
            Self::Conflict => "Conflict",
            Self::UnprocessableEntity => "Unprocessable entity",
            Self::RateLimit => "Rate limit exceeded",
            Self::InternalServer => "Server error",
            Self::Other => "API error",
        };
        f.write_str(name)
    }
}

impl LangbaseError {
    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        LangbaseError::Configuration {
            message: message.into(),
        }
    }

    /// Creates a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        LangbaseError::Validation {
            message: message.into(),
        }
    }

    /// Builds an API error from a non-success HTTP response.
    ///
    /// The body may be `{"error": {"message": .., "code": ..}}`, a flat
    /// `{"message": ..}` object, or arbitrary text.
    pub fn from_response(status: u16, headers: &HashMap<String, String>, body: &[u8]) -> Self {
        let (message, code) = extract_error_body(body);
        let message = message.unwrap_or_else(|| format!("{} status code (no body)", status));

        let retry_after = header_value(headers, "retry-after")
            .and_then(|value| parse_retry_after(value, chrono::Utc::now()));

        LangbaseError::Api {
            kind: ApiErrorKind::from_status(status),
            status,
            message,
            code,
            request_id: header_value(headers, REQUEST_ID_HEADER).map(str::to_string),
            retry_after,
        }
    }

    /// Returns the HTTP status of the failure, looking through retry exhaustion.
    pub fn status(&self) -> Option<u16> {
        match self {
            LangbaseError::Api { status, .. } => Some(*status),
            LangbaseError::RetryExhausted { source, .. } => source.status(),
            LangbaseError::CircuitOpen {
                source: Some(source),
                ..
            } => source.status(),
            _ => None,
        }
    }

    /// Returns the request ID, if the server supplied one.
    pub fn request_id(&self) -> Option<&str> {
        match self {
            LangbaseError::Api { request_id, .. } => request_id.as_deref(),
            LangbaseError::RetryExhausted { source, .. } => source.request_id(),
            LangbaseError::CircuitOpen {
                source: Some(source),
                ..
            } => source.request_id(),
            _ => None,
        }
    }

    /// Returns the underlying failure for wrapped errors, otherwise `self`.
    pub fn root_cause(&self) -> &LangbaseError {
        match self {
            LangbaseError::RetryExhausted { source, .. }
            | LangbaseError::CircuitOpen {
                source: Some(source),
                ..
            } => source.root_cause(),
            other => other,
        }
    }

    /// Returns true if the call was rejected by an open circuit.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, LangbaseError::CircuitOpen { .. })
    }

    /// Returns true if all retry attempts were used up.
    pub fn is_retry_exhausted(&self) -> bool {
        matches!(self, LangbaseError::RetryExhausted { .. })
    }

    /// Returns true if the caller cancelled the call while it was backing off.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, LangbaseError::CancelledDuringBackoff { .. })
    }
}

impl AttemptFailure for LangbaseError {
    fn outcome(&self) -> Outcome {
        match self {
            LangbaseError::Api {
                kind,
                status,
                retry_after,
                ..
            } => {
                let failure_kind = match kind {
                    ApiErrorKind::RateLimit => FailureKind::RateLimited,
                    ApiErrorKind::InternalServer => FailureKind::Server,
                    ApiErrorKind::Other if *status >= 500 => FailureKind::Server,
                    _ => FailureKind::Client,
                };
                Outcome {
                    status: Some(*status),
                    kind: Some(failure_kind),
                    retry_after: *retry_after,
                }
            }
            LangbaseError::Connection { .. } => Outcome::kind(FailureKind::Connection),
            LangbaseError::Timeout { .. } => Outcome::kind(FailureKind::Timeout),
            LangbaseError::Serialization { .. } => Outcome::kind(FailureKind::Decode),
            _ => Outcome::kind(FailureKind::Other),
        }
    }
}

impl From<ExecutionError<LangbaseError>> for LangbaseError {
    fn from(err: ExecutionError<LangbaseError>) -> Self {
        match err {
            ExecutionError::Failed { source, .. } => source,
            ExecutionError::RetryExhausted { source, attempts } => LangbaseError::RetryExhausted {
                attempts,
                source: Box::new(source),
            },
            ExecutionError::CircuitOpen {
                rejection,
                attempts,
                last,
            } => LangbaseError::CircuitOpen {
                endpoint: rejection.name,
                retry_in: rejection.retry_in,
                attempts,
                source: last.map(Box::new),
            },
            ExecutionError::CancelledDuringBackoff { attempts, .. } => {
                LangbaseError::CancelledDuringBackoff { attempts }
            }
        }
    }
}

impl From<TransportError> for LangbaseError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Timeout { .. } => LangbaseError::Timeout {
                message: err.to_string(),
            },
            TransportError::Connection { message } => LangbaseError::Connection { message },
            TransportError::InvalidResponse { message } => LangbaseError::Connection {
                message: format!("Invalid response: {}", message),
            },
        }
    }
}

impl From<serde_json::Error> for LangbaseError {
    fn from(err: serde_json::Error) -> Self {
        LangbaseError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<url::ParseError> for LangbaseError {
    fn from(err: url::ParseError) -> Self {
        LangbaseError::Configuration {
            message: format!("Invalid URL: {}", err),
        }
    }
}

/// Case-insensitive header lookup.
pub(crate) fn header_value<'a>(headers: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

fn extract_error_body(body: &[u8]) -> (Option<String>, Option<String>) {
    if body.is_empty() {
        return (None, None);
    }

    match serde_json::from_slice::<serde_json::Value>(body) {
        Ok(value) => {
            let error = value.get("error").unwrap_or(&value);
            match error {
                serde_json::Value::String(s) => (Some(s.clone()), None),
                serde_json::Value::Object(map) => {
                    let code = map.get("code").and_then(|c| c.as_str()).map(str::to_string);
                    let message = match map.get("message") {
                        Some(serde_json::Value::String(s)) => Some(s.clone()),
                        Some(other) => Some(other.to_string()),
                        None => Some(error.to_string()),
                    };
                    (message, code)
                }
                other => (Some(other.to_string()), None),
            }
        }
        Err(_) => (Some(String::from_utf8_lossy(body).trim().to_string()), None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::CircuitOpenError;

    fn headers(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(ApiErrorKind::from_status(400), ApiErrorKind::BadRequest);
        assert_eq!(ApiErrorKind::from_status(401), ApiErrorKind::Authentication);
        assert_eq!(ApiErrorKind::from_status(403), ApiErrorKind::PermissionDenied);
        assert_eq!(ApiErrorKind::from_status(404), ApiErrorKind::NotFound);
        assert_eq!(ApiErrorKind::from_status(409), ApiErrorKind::Conflict);
        assert_eq!(ApiErrorKind::from_status(422), ApiErrorKind::UnprocessableEntity);
        assert_eq!(ApiErrorKind::from_status(429), ApiErrorKind::RateLimit);
        assert_eq!(ApiErrorKind::from_status(502), ApiErrorKind::InternalServer);
        assert_eq!(ApiErrorKind::from_status(418), ApiErrorKind::Other);
    }

    #[test]
    fn test_from_response_nested_error_body() {
        let body = br#"{"error": {"message": "Pipe not found", "code": "NOT_FOUND"}}"#;
        let err = LangbaseError::from_response(
            404,
            &headers(&[("lb-request-id", "req_123")]),
            body,
        );

        match err {
            LangbaseError::Api {
                kind,
                status,
                message,
                code,
                request_id,
                retry_after,
            } => {
                assert_eq!(kind, ApiErrorKind::NotFound);
                assert_eq!(status, 404);
                assert_eq!(message, "Pipe not found");
                assert_eq!(code.as_deref(), Some("NOT_FOUND"));
                assert_eq!(request_id.as_deref(), Some("req_123"));
                assert_eq!(retry_after, None);
            }
            other => panic!("Expected Api error, got {:?}", other),
        }
    }

    #[test]
    fn test_from_response_reads_retry_after() {
        let err = LangbaseError::from_response(
            429,
            &headers(&[("Retry-After", "7")]),
            br#"{"message": "slow down"}"#,
        );

        let outcome = err.outcome();
        assert_eq!(outcome.status, Some(429));
        assert_eq!(outcome.kind, Some(FailureKind::RateLimited));
        assert_eq!(outcome.retry_after, Some(Duration::from_secs(7)));
    }

    #[test]
    fn test_from_response_without_body() {
        let err = LangbaseError::from_response(503, &HashMap::new(), b"");
        assert_eq!(
            err.to_string(),
            "Server error (HTTP 503): 503 status code (no body)"
        );
    }

    #[test]
    fn test_from_response_plain_text_body() {
        let err = LangbaseError::from_response(502, &HashMap::new(), b"Bad Gateway\n");
        match err {
            LangbaseError::Api { message, .. } => assert_eq!(message, "Bad Gateway"),
            other => panic!("Expected Api error, got {:?}", other),
        }
    }

    #[test]
    fn test_transport_errors_map_to_failure_kinds() {
        let conn: LangbaseError = TransportError::Connection {
            message: "refused".to_string(),
        }
        .into();
        assert_eq!(conn.outcome().kind, Some(FailureKind::Connection));

        let timeout: LangbaseError = TransportError::Timeout {
            timeout: Duration::from_secs(30),
        }
        .into();
        assert_eq!(timeout.outcome().kind, Some(FailureKind::Timeout));
        assert_eq!(timeout.outcome().status, None);
    }

    #[test]
    fn test_execution_error_conversion() {
        let exhausted: LangbaseError = ExecutionError::RetryExhausted {
            source: LangbaseError::from_response(503, &HashMap::new(), b""),
            attempts: 3,
        }
        .into();
        assert!(exhausted.is_retry_exhausted());
        assert_eq!(exhausted.status(), Some(503));
        assert!(matches!(exhausted.root_cause(), LangbaseError::Api { .. }));

        let failed: LangbaseError = ExecutionError::Failed {
            source: LangbaseError::from_response(400, &HashMap::new(), b""),
            attempts: 1,
        }
        .into();
        assert!(matches!(
            failed,
            LangbaseError::Api {
                kind: ApiErrorKind::BadRequest,
                ..
            }
        ));

        let open: LangbaseError = ExecutionError::<LangbaseError>::CircuitOpen {
            rejection: CircuitOpenError {
                name: "GET /v1/pipes".to_string(),
                retry_in: Some(Duration::from_secs(5)),
            },
            attempts: 0,
            last: None,
        }
        .into();
        assert!(open.is_circuit_open());
        assert_eq!(open.status(), None);

        let tripped: LangbaseError = ExecutionError::CircuitOpen {
            rejection: CircuitOpenError {
                name: "GET /v1/pipes".to_string(),
                retry_in: Some(Duration::from_secs(60)),
            },
            attempts: 1,
            last: Some(LangbaseError::from_response(503, &HashMap::new(), b"")),
        }
        .into();
        assert!(tripped.is_circuit_open());
        assert_eq!(tripped.status(), Some(503));
        assert!(std::error::Error::source(&tripped).is_some());

        let cancelled: LangbaseError = ExecutionError::<LangbaseError>::CancelledDuringBackoff {
            attempts: 2,
            last: None,
        }
        .into();
        assert!(cancelled.is_cancelled());
    }
}
