//! Langbase Client Library
//!
//! A Rust client for the Langbase API built around a resilience layer that
//! decides, for every outbound request, whether and when to retry and whether
//! a failing endpoint should be short-circuited.
//!
//! # Features
//!
//! - **Retry policies**: exponential, linear, fixed and Fibonacci backoff with
//!   full jitter and `Retry-After` support
//! - **Circuit breakers**: per-endpoint (or per-client) breakers with a single
//!   half-open probe
//! - **Cancellation**: abort a wait-then-retry sequence with a
//!   `CancellationToken`
//! - **Observability**: `tracing` events and resilience metrics
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use langbase_client::{LangbaseClient, RetryConfig, RetryStrategy};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = LangbaseClient::builder()
//!         .api_key("lb_your_api_key")
//!         .retry(
//!             RetryConfig::new()
//!                 .max_attempts(5)
//!                 .strategy(RetryStrategy::Fibonacci)
//!                 .base_delay(Duration::from_millis(500)),
//!         )
//!         .build()?;
//!
//!     let pipes: serde_json::Value = client.get("/v1/pipes").await?;
//!     println!("{}", pipes);
//!     Ok(())
//! }
//! ```
//!
//! # Using the executor directly
//!
//! ```rust
//! use langbase_client::resilience::{
//!     CircuitBreaker, CircuitBreakerConfig, FailureKind, Outcome, ResilientExecutor, RetryConfig,
//! };
//!
//! # async fn run() {
//! let executor = ResilientExecutor::new(RetryConfig::new().max_attempts(3));
//! let breaker = CircuitBreaker::named("inventory", CircuitBreakerConfig::default());
//!
//! let result = executor
//!     .execute("inventory", Some(&breaker), || async {
//!         Err::<(), _>(Outcome::kind(FailureKind::Connection))
//!     })
//!     .await;
//! assert!(result.is_err());
//! # }
//! ```

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod auth;
pub mod client;
pub mod config;
pub mod errors;
pub mod observability;
pub mod resilience;
pub mod transport;

pub use client::{LangbaseClient, LangbaseClientBuilder};
pub use config::{LangbaseConfig, LangbaseConfigBuilder};
pub use errors::{ApiErrorKind, LangbaseError, LangbaseResult};
pub use resilience::{
    BreakerScope, CircuitBreakerConfig, CircuitState, ResilienceConfig, RetryConfig,
    RetryStrategy,
};
pub use transport::{HttpMethod, HttpRequest, HttpResponse};

/// Crate version, sent in the `User-Agent` header.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Mock implementations for testing.
#[cfg(any(test, feature = "mocks"))]
pub mod mocks;
