//! Configuration module for the Langbase client.
//!
//! Provides configuration management including API keys, base URLs,
//! timeouts, and the resilience settings applied to every request.

use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use url::Url;

use crate::errors::{LangbaseError, LangbaseResult};
use crate::resilience::{CircuitBreakerConfig, ResilienceConfig, RetryConfig};

/// Default base URL for the Langbase API.
pub const DEFAULT_BASE_URL: &str = "https://api.langbase.com";

/// Default per-attempt request timeout (30 seconds).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for the Langbase client.
#[derive(Clone)]
pub struct LangbaseConfig {
    /// API key for authentication (stored securely).
    pub(crate) api_key: SecretString,
    /// Base URL for API requests.
    pub base_url: String,
    /// Per-attempt request timeout.
    pub timeout: Duration,
    /// Custom headers to include in requests.
    pub custom_headers: Vec<(String, String)>,
    /// Retry and circuit breaker settings.
    pub resilience: ResilienceConfig,
}

impl LangbaseConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> LangbaseConfigBuilder {
        LangbaseConfigBuilder::new()
    }

    /// Creates a configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `LANGBASE_API_KEY` (required): API key for authentication
    /// - `LANGBASE_BASE_URL` (optional): Custom base URL
    /// - `LANGBASE_TIMEOUT` (optional): Request timeout in seconds
    /// - `LANGBASE_MAX_ATTEMPTS` (optional): Attempts per request, including the first
    /// - `LANGBASE_ENABLE_RESILIENCE` (optional): `false`, `0`, `no` or `off`
    ///   disables retries and circuit breaking
    pub fn from_env() -> LangbaseResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> LangbaseResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = lookup("LANGBASE_API_KEY").ok_or_else(|| {
            LangbaseError::configuration("LANGBASE_API_KEY environment variable not set")
        })?;

        let mut builder = LangbaseConfigBuilder::new().api_key(api_key);

        if let Some(base_url) = lookup("LANGBASE_BASE_URL") {
            builder = builder.base_url(base_url);
        }

        if let Some(timeout_str) = lookup("LANGBASE_TIMEOUT") {
            match timeout_str.trim().parse::<f64>().ok().and_then(|secs| {
                Duration::try_from_secs_f64(secs).ok()
            }) {
                Some(timeout) => builder = builder.timeout(timeout),
                None => tracing::warn!(value = %timeout_str, "Ignoring invalid LANGBASE_TIMEOUT"),
            }
        }

        if let Some(attempts_str) = lookup("LANGBASE_MAX_ATTEMPTS") {
            match attempts_str.trim().parse::<u32>() {
                Ok(attempts) => builder = builder.max_attempts(attempts),
                Err(_) => {
                    tracing::warn!(value = %attempts_str, "Ignoring invalid LANGBASE_MAX_ATTEMPTS")
                }
            }
        }

        if let Some(enabled) = lookup("LANGBASE_ENABLE_RESILIENCE") {
            let disabled = matches!(
                enabled.trim().to_ascii_lowercase().as_str(),
                "false" | "0" | "no" | "off"
            );
            if disabled {
                builder = builder.disable_resilience();
            }
        }

        builder.build()
    }

    /// Returns the API key (exposing the secret).
    pub(crate) fn api_key(&self) -> &SecretString {
        &self.api_key
    }

    /// Returns the API key hint (last 4 characters) for debugging.
    pub fn api_key_hint(&self) -> String {
        let key = self.api_key.expose_secret();
        let count = key.chars().count();
        if count > 4 {
            let tail: String = key.chars().skip(count - 4).collect();
            format!("...{}", tail)
        } else {
            "****".to_string()
        }
    }

    /// Returns the full URL for an endpoint.
    pub fn endpoint_url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

impl std::fmt::Debug for LangbaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LangbaseConfig")
            .field("api_key", &"[REDACTED]")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .field("resilience", &self.resilience)
            .finish()
    }
}

/// Builder for `LangbaseConfig`.
#[derive(Default)]
pub struct LangbaseConfigBuilder {
    api_key: Option<String>,
    base_url: Option<String>,
    timeout: Option<Duration>,
    custom_headers: Vec<(String, String)>,
    resilience: ResilienceConfig,
}

impl LangbaseConfigBuilder {
    /// Creates a new configuration builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the API key.
    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Sets the base URL.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Sets the per-attempt request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the timeout in seconds.
    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout = Some(Duration::from_secs(secs));
        self
    }

    /// Adds a custom header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom_headers.push((name.into(), value.into()));
        self
    }

    /// Replaces the whole resilience configuration.
    pub fn resilience(mut self, resilience: ResilienceConfig) -> Self {
        self.resilience = resilience;
        self
    }

    /// Sets the retry configuration.
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.resilience.retry = retry;
        self
    }

    /// Sets the number of attempts per request, including the first.
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.resilience.retry.max_attempts = attempts;
        self
    }

    /// Sets the circuit breaker configuration.
    pub fn circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.resilience.circuit_breaker = Some(config);
        self
    }

    /// Turns off retries and circuit breaking entirely.
    pub fn disable_resilience(mut self) -> Self {
        self.resilience.enabled = false;
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> LangbaseResult<LangbaseConfig> {
        let api_key = self
            .api_key
            .ok_or_else(|| LangbaseError::configuration("API key is required"))?;

        if api_key.trim().is_empty() {
            return Err(LangbaseError::configuration("API key cannot be empty"));
        }

        let base_url = self
            .base_url
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        let parsed = Url::parse(&base_url)?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(LangbaseError::configuration(format!(
                "Base URL must use http or https, got '{}'",
                parsed.scheme()
            )));
        }
        if parsed.scheme() == "http" {
            tracing::warn!(base_url = %base_url, "Base URL does not use HTTPS");
        }

        let timeout = self.timeout.unwrap_or(DEFAULT_TIMEOUT);
        if timeout.is_zero() {
            return Err(LangbaseError::configuration("Timeout must be greater than zero"));
        }

        self.resilience.validate()?;

        Ok(LangbaseConfig {
            api_key: SecretString::new(api_key),
            base_url,
            timeout,
            custom_headers: self.custom_headers,
            resilience: self.resilience,
        })
    }
}
