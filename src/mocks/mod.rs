//! Mock implementations for testing.
//!
//! `MockTransport` replays scripted responses and transport failures and
//! records every request it receives, so retry behavior can be asserted
//! without a network.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use crate::transport::{HttpRequest, HttpResponse, HttpTransport, TransportError};

/// A scripted transport result.
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Return this response.
    Response(MockResponse),
    /// Fail with this transport error.
    Error(TransportError),
}

/// A mock response.
#[derive(Debug, Clone)]
pub struct MockResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers.
    pub headers: HashMap<String, String>,
    /// Response body.
    pub body: Vec<u8>,
}

impl MockResponse {
    /// Creates a successful JSON response.
    pub fn json<T: serde::Serialize>(value: &T) -> Self {
        let body = serde_json::to_vec(value).unwrap_or_default();
        Self {
            status: 200,
            headers: HashMap::from([(
                "content-type".to_string(),
                "application/json".to_string(),
            )]),
            body,
        }
    }

    /// Creates an error response in the API's error envelope.
    pub fn error(status: u16, message: &str) -> Self {
        let error = serde_json::json!({ "error": { "message": message } });
        Self {
            status,
            ..Self::json(&error)
        }
    }

    /// Creates a response with a status and no body.
    pub fn status(status: u16) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: Vec::new(),
        }
    }

    /// Adds a header.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_string(), value.to_string());
        self
    }
}

/// Mock HTTP transport for testing.
#[derive(Debug, Default)]
pub struct MockTransport {
    replies: Mutex<VecDeque<MockReply>>,
    requests: Mutex<Vec<HttpRequest>>,
    default_reply: Mutex<Option<MockReply>>,
    latency: Mutex<Option<Duration>>,
}

impl MockTransport {
    /// Creates a new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a response.
    pub fn queue(&self, response: MockResponse) {
        self.replies.lock().push_back(MockReply::Response(response));
    }

    /// Queues a JSON response.
    pub fn queue_json<T: serde::Serialize>(&self, value: &T) {
        self.queue(MockResponse::json(value));
    }

    /// Queues an error response.
    pub fn queue_error(&self, status: u16, message: &str) {
        self.queue(MockResponse::error(status, message));
    }

    /// Queues a transport failure.
    pub fn queue_transport_error(&self, error: TransportError) {
        self.replies.lock().push_back(MockReply::Error(error));
    }

    /// Sets the reply used once the queue is empty.
    pub fn set_default(&self, reply: MockReply) {
        *self.default_reply.lock() = Some(reply);
    }

    /// Delays every reply by `latency` (uses the tokio clock).
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = Some(latency);
    }

    /// Gets all recorded requests.
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }

    /// Gets the last recorded request.
    pub fn last_request(&self) -> Option<HttpRequest> {
        self.requests.lock().last().cloned()
    }

    /// Returns the number of requests made.
    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    fn next_reply(&self) -> MockReply {
        self.replies
            .lock()
            .pop_front()
            .or_else(|| self.default_reply.lock().clone())
            .unwrap_or_else(|| {
                MockReply::Error(TransportError::Connection {
                    message: "no mock reply queued".to_string(),
                })
            })
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        self.requests.lock().push(request);
        let reply = self.next_reply();

        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        match reply {
            MockReply::Response(response) => Ok(HttpResponse {
                status: response.status,
                headers: response.headers,
                body: Bytes::from(response.body),
            }),
            MockReply::Error(error) => Err(error),
        }
    }
}
