//! Langbase API client.
//!
//! Every request goes through the resilience layer: the per-endpoint circuit
//! breaker gates it, transient failures are retried with backoff, and the
//! final outcome is mapped onto [`LangbaseError`].

use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::auth::{ApiKeyAuth, AuthProvider};
use crate::config::{LangbaseConfig, LangbaseConfigBuilder};
use crate::errors::{LangbaseError, LangbaseResult};
use crate::observability::{MetricsBreakerHook, MetricsCollector, NoopMetricsCollector};
use crate::resilience::{
    CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState, ResilienceConfig,
    ResilientExecutor, RetryConfig,
};
use crate::transport::{HttpRequest, HttpResponse, HttpTransport, ReqwestTransport};

/// Header carrying the client-generated request ID, shared by all attempts.
pub const CLIENT_REQUEST_ID_HEADER: &str = "X-Request-Id";

/// The main Langbase client.
///
/// # Example
///
/// ```rust,no_run
/// use langbase_client::LangbaseClient;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let client = LangbaseClient::builder()
///         .api_key("lb_your_api_key")
///         .max_attempts(5)
///         .build()?;
///
///     let pipes: serde_json::Value = client.get("/v1/pipes").await?;
///     println!("{}", pipes);
///     Ok(())
/// }
/// ```
pub struct LangbaseClient {
    config: LangbaseConfig,
    transport: Arc<dyn HttpTransport>,
    auth: Arc<dyn AuthProvider>,
    executor: ResilientExecutor,
    breakers: Option<CircuitBreakerRegistry>,
    metrics: Arc<dyn MetricsCollector>,
}

impl LangbaseClient {
    /// Creates a new client builder.
    pub fn builder() -> LangbaseClientBuilder {
        LangbaseClientBuilder::new()
    }

    /// Creates a client from environment variables.
    ///
    /// See [`LangbaseConfig::from_env`] for the variables read.
    pub fn from_env() -> LangbaseResult<Self> {
        let config = LangbaseConfig::from_env()?;
        LangbaseClientBuilder::from_config(config).build()
    }

    /// Creates a client from an API key with default settings.
    pub fn from_api_key(api_key: impl Into<String>) -> LangbaseResult<Self> {
        LangbaseClientBuilder::new().api_key(api_key).build()
    }

    /// Returns the configuration.
    pub fn config(&self) -> &LangbaseConfig {
        &self.config
    }

    /// Returns the metrics collector.
    pub fn metrics(&self) -> &Arc<dyn MetricsCollector> {
        &self.metrics
    }

    /// Returns the state of the breaker guarding `endpoint` (e.g. `GET /v1/pipes`).
    ///
    /// `None` if breakers are disabled or no request has hit that endpoint yet.
    pub fn circuit_state(&self, endpoint: &str) -> Option<CircuitState> {
        self.breakers.as_ref()?.state_of(endpoint)
    }

    /// Returns the states of all breakers created so far.
    pub fn circuit_states(&self) -> Vec<(String, CircuitState)> {
        self.breakers
            .as_ref()
            .map(CircuitBreakerRegistry::states)
            .unwrap_or_default()
    }

    /// Sends a request through the resilience layer.
    ///
    /// Non-2xx responses become [`LangbaseError::Api`] errors.
    #[instrument(skip(self, request), fields(method = %request.method, path = %request.path))]
    pub async fn send(&self, request: HttpRequest) -> LangbaseResult<HttpResponse> {
        self.dispatch(request, None).await
    }

    /// Sends a request, aborting the retry sequence if `cancel` fires while
    /// waiting between attempts.
    #[instrument(skip(self, request, cancel), fields(method = %request.method, path = %request.path))]
    pub async fn send_with_cancellation(
        &self,
        request: HttpRequest,
        cancel: &CancellationToken,
    ) -> LangbaseResult<HttpResponse> {
        self.dispatch(request, Some(cancel)).await
    }

    /// Sends a GET request and decodes the JSON response.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> LangbaseResult<T> {
        let response = self.send(HttpRequest::get(path)).await?;
        decode(&response)
    }

    /// Sends a POST request with a JSON body and decodes the JSON response.
    pub async fn post<B, T>(&self, path: &str, body: &B) -> LangbaseResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let request = HttpRequest::post(path).with_json(body)?;
        let response = self.send(request).await?;
        decode(&response)
    }

    /// Sends a PUT request with a JSON body and decodes the JSON response.
    pub async fn put<B, T>(&self, path: &str, body: &B) -> LangbaseResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let request = HttpRequest::put(path).with_json(body)?;
        let response = self.send(request).await?;
        decode(&response)
    }

    /// Sends a DELETE request and decodes the JSON response.
    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> LangbaseResult<T> {
        let response = self.send(HttpRequest::delete(path)).await?;
        decode(&response)
    }

    async fn dispatch(
        &self,
        request: HttpRequest,
        cancel: Option<&CancellationToken>,
    ) -> LangbaseResult<HttpResponse> {
        let request = self.prepare(request);
        let endpoint = request.endpoint();

        let breaker = if self.executor.is_enabled() {
            self.breakers
                .as_ref()
                .map(|registry| registry.breaker_for(&endpoint))
        } else {
            None
        };

        let operation = || self.attempt(request.clone());

        let result = match cancel {
            Some(token) => {
                self.executor
                    .execute_with_cancellation(&endpoint, breaker.as_deref(), token, operation)
                    .await
            }
            None => {
                self.executor
                    .execute(&endpoint, breaker.as_deref(), operation)
                    .await
            }
        };

        result.map_err(LangbaseError::from)
    }

    async fn attempt(&self, request: HttpRequest) -> LangbaseResult<HttpResponse> {
        let start = std::time::Instant::now();
        let response = self.transport.send(request).await?;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        if response.is_success() {
            tracing::debug!(status = response.status, elapsed_ms, "Response received");
            Ok(response)
        } else {
            let error = LangbaseError::from_response(response.status, &response.headers, &response.body);
            tracing::debug!(status = response.status, elapsed_ms, error = %error, "Error response received");
            Err(error)
        }
    }

    fn prepare(&self, mut request: HttpRequest) -> HttpRequest {
        for (name, value) in &self.config.custom_headers {
            request.headers.insert(name.clone(), value.clone());
        }
        self.auth.apply_auth(&mut request.headers);
        request
            .headers
            .entry(CLIENT_REQUEST_ID_HEADER.to_string())
            .or_insert_with(|| uuid::Uuid::new_v4().to_string());
        request
            .headers
            .entry("User-Agent".to_string())
            .or_insert_with(|| format!("langbase-rust/{}", crate::VERSION));
        if request.timeout.is_none() {
            request.timeout = Some(self.config.timeout);
        }
        request
    }
}

fn decode<T: DeserializeOwned>(response: &HttpResponse) -> LangbaseResult<T> {
    if response.body.is_empty() {
        return Ok(serde_json::from_slice(b"null")?);
    }
    Ok(response.json()?)
}

impl std::fmt::Debug for LangbaseClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LangbaseClient")
            .field("config", &self.config)
            .field("executor", &self.executor)
            .finish()
    }
}

/// Builder for the Langbase client.
pub struct LangbaseClientBuilder {
    config_builder: LangbaseConfigBuilder,
    transport: Option<Arc<dyn HttpTransport>>,
    auth: Option<Arc<dyn AuthProvider>>,
    metrics: Option<Arc<dyn MetricsCollector>>,
}

impl LangbaseClientBuilder {
    /// Creates a new client builder.
    pub fn new() -> Self {
        Self {
            config_builder: LangbaseConfigBuilder::new(),
            transport: None,
            auth: None,
            metrics: None,
        }
    }

    /// Creates a builder from an existing configuration.
    pub fn from_config(config: LangbaseConfig) -> Self {
        let mut config_builder = LangbaseConfigBuilder::new()
            .api_key(config.api_key().expose_secret().clone())
            .base_url(config.base_url)
            .timeout(config.timeout)
            .resilience(config.resilience);
        for (name, value) in config.custom_headers {
            config_builder = config_builder.header(name, value);
        }

        Self {
            config_builder,
            ..Self::new()
        }
    }

    /// Sets the API key.
    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.config_builder = self.config_builder.api_key(api_key);
        self
    }

    /// Sets the base URL.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.config_builder = self.config_builder.base_url(base_url);
        self
    }

    /// Sets the per-attempt request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config_builder = self.config_builder.timeout(timeout);
        self
    }

    /// Adds a header sent with every request.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.config_builder = self.config_builder.header(name, value);
        self
    }

    /// Sets the resilience configuration.
    pub fn resilience(mut self, config: ResilienceConfig) -> Self {
        self.config_builder = self.config_builder.resilience(config);
        self
    }

    /// Sets the retry configuration.
    pub fn retry(mut self, config: RetryConfig) -> Self {
        self.config_builder = self.config_builder.retry(config);
        self
    }

    /// Sets the number of attempts per request, including the first.
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.config_builder = self.config_builder.max_attempts(attempts);
        self
    }

    /// Sets the circuit breaker configuration.
    pub fn circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.config_builder = self.config_builder.circuit_breaker(config);
        self
    }

    /// Turns off retries and circuit breaking.
    pub fn disable_resilience(mut self) -> Self {
        self.config_builder = self.config_builder.disable_resilience();
        self
    }

    /// Sets a custom transport.
    pub fn transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Sets a custom auth provider.
    pub fn auth(mut self, auth: Arc<dyn AuthProvider>) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Sets a custom metrics collector.
    pub fn metrics(mut self, metrics: Arc<dyn MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Builds the client.
    pub fn build(self) -> LangbaseResult<LangbaseClient> {
        let config = self.config_builder.build()?;

        let transport: Arc<dyn HttpTransport> = match self.transport {
            Some(t) => t,
            None => Arc::new(
                ReqwestTransport::new(&config.base_url, config.timeout)
                    .map_err(|e| LangbaseError::configuration(e.to_string()))?,
            ),
        };

        let auth: Arc<dyn AuthProvider> = match self.auth {
            Some(a) => a,
            None => Arc::new(ApiKeyAuth::new(config.api_key().clone())),
        };
        auth.validate()?;

        let metrics: Arc<dyn MetricsCollector> = self
            .metrics
            .unwrap_or_else(|| Arc::new(NoopMetricsCollector));

        let executor =
            ResilientExecutor::from_config(&config.resilience).with_metrics(Arc::clone(&metrics));

        let breakers = config.resilience.circuit_breaker.clone().map(|breaker_config| {
            CircuitBreakerRegistry::new(breaker_config, config.resilience.scope)
                .with_max_breakers(config.resilience.max_breakers)
                .with_hook(Arc::new(MetricsBreakerHook::new(Arc::clone(&metrics))))
        });

        tracing::debug!(
            base_url = %config.base_url,
            resilience = config.resilience.enabled,
            breakers = breakers.is_some(),
            "Langbase client created"
        );

        Ok(LangbaseClient {
            config,
            transport,
            auth,
            executor,
            breakers,
            metrics,
        })
    }
}

impl Default for LangbaseClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
