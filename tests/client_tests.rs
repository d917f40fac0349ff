//! End-to-end client tests against a local mock server.

use langbase_client::{
    ApiErrorKind, CircuitBreakerConfig, CircuitState, LangbaseClient, LangbaseError,
    ResilienceConfig, RetryConfig,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::time::{Duration, Instant};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fast_retry(max_attempts: u32) -> RetryConfig {
    RetryConfig::new()
        .max_attempts(max_attempts)
        .base_delay(Duration::from_millis(10))
        .jitter(false)
}

fn client_for(server: &MockServer, resilience: ResilienceConfig) -> LangbaseClient {
    LangbaseClient::builder()
        .api_key("lb_integration_key")
        .base_url(server.uri())
        .timeout(Duration::from_secs(5))
        .resilience(resilience)
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_recovers_after_transient_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/pipes"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/pipes"))
        .and(header("authorization", "Bearer lb_integration_key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"name": "summarizer"}])))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, ResilienceConfig::new().retry(fast_retry(3)));
    let pipes: serde_json::Value = client.get("/v1/pipes").await.unwrap();

    assert_eq!(pipes[0]["name"], "summarizer");
    assert_eq!(client.circuit_state("GET /v1/pipes"), Some(CircuitState::Closed));
}

#[tokio::test]
async fn test_retry_after_overrides_backoff() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/pipes/run"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/pipes/run"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"completion": "hi"})))
        .mount(&server)
        .await;

    // Without the hint the second attempt would wait a full minute.
    let retry = RetryConfig::new()
        .max_attempts(2)
        .base_delay(Duration::from_secs(60))
        .max_delay(Duration::from_secs(60))
        .jitter(false);
    let client = client_for(&server, ResilienceConfig::new().retry(retry));

    let start = Instant::now();
    let result: serde_json::Value = client
        .post("/v1/pipes/run", &json!({"messages": []}))
        .await
        .unwrap();

    assert_eq!(result["completion"], "hi");
    assert!(start.elapsed() < Duration::from_secs(10));
}

#[tokio::test]
async fn test_client_error_is_returned_immediately() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/pipes/missing"))
        .respond_with(
            ResponseTemplate::new(404)
                .insert_header("lb-request-id", "req_missing")
                .set_body_json(json!({"error": {"message": "Pipe not found", "code": "not_found"}})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, ResilienceConfig::new().retry(fast_retry(5)));
    let err = client
        .get::<serde_json::Value>("/v1/pipes/missing")
        .await
        .unwrap_err();

    match err {
        LangbaseError::Api {
            kind,
            status,
            message,
            request_id,
            ..
        } => {
            assert_eq!(kind, ApiErrorKind::NotFound);
            assert_eq!(status, 404);
            assert_eq!(message, "Pipe not found");
            assert_eq!(request_id.as_deref(), Some("req_missing"));
        }
        other => panic!("Expected Api error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_open_circuit_stops_reaching_server() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/threads"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/memory"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let resilience = ResilienceConfig::new().retry(fast_retry(2)).circuit_breaker(
        CircuitBreakerConfig::new()
            .failure_threshold(2)
            .recovery_timeout(Duration::from_secs(60)),
    );
    let client = client_for(&server, resilience);

    let err = client.get::<serde_json::Value>("/v1/threads").await.unwrap_err();
    assert!(err.is_retry_exhausted());
    assert_eq!(err.status(), Some(500));

    let err = client.get::<serde_json::Value>("/v1/threads").await.unwrap_err();
    assert!(err.is_circuit_open());

    // Other endpoints keep their own breaker.
    let memory: serde_json::Value = client.get("/v1/memory").await.unwrap();
    assert_eq!(memory, json!([]));
    assert_eq!(
        client.circuit_states(),
        vec![
            ("GET /v1/memory".to_string(), CircuitState::Closed),
            ("GET /v1/threads".to_string(), CircuitState::Open),
        ]
    );
}

#[tokio::test]
async fn test_slow_responses_time_out_and_are_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/agents"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .expect(2)
        .mount(&server)
        .await;

    let client = LangbaseClient::builder()
        .api_key("lb_integration_key")
        .base_url(server.uri())
        .timeout(Duration::from_millis(100))
        .resilience(ResilienceConfig::new().retry(fast_retry(2)).without_circuit_breaker())
        .build()
        .unwrap();

    let err = client.get::<serde_json::Value>("/v1/agents").await.unwrap_err();

    assert!(err.is_retry_exhausted());
    assert!(matches!(err.root_cause(), LangbaseError::Timeout { .. }));
}

#[tokio::test]
async fn test_disabled_resilience_sends_once() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/v1/memory/docs"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, ResilienceConfig::disabled());
    let err = client
        .delete::<serde_json::Value>("/v1/memory/docs")
        .await
        .unwrap_err();

    assert_eq!(err.status(), Some(503));
    assert!(!err.is_retry_exhausted());
    assert!(client.circuit_states().is_empty());
}
