//! Mock HTTP transport for testing.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::fetch::{HttpRequest, HttpResponse, HttpTransport, TransportError};

type Scripted = Result<HttpResponse, TransportError>;

/// Mock implementation of the HttpTransport trait.
///
/// Responses are scripted per URL (query string excluded):
/// - `push` queues one response, consumed in order
/// - `set_fallback` answers once the queue is empty
/// - anything unscripted gets a 404
///
/// Every request is recorded for assertions.
///
/// # Example
///
/// ```rust,ignore
/// use harvester_core::testing::MockTransport;
///
/// let transport = MockTransport::new();
/// transport.push(url, Ok(HttpResponse::status(503))).await;
/// transport.push(url, Ok(HttpResponse::ok(bytes, "image/png"))).await;
///
/// // ... run the engine ...
/// assert_eq!(transport.request_count(url).await, 2);
/// ```
#[derive(Debug, Default)]
pub struct MockTransport {
    queued: Arc<RwLock<HashMap<String, VecDeque<Scripted>>>>,
    fallbacks: Arc<RwLock<HashMap<String, HttpResponse>>>,
    requests: Arc<RwLock<Vec<HttpRequest>>>,
}

impl MockTransport {
    /// Create a mock transport with nothing scripted.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one response for `url`.
    pub async fn push(&self, url: &str, response: Scripted) {
        self.queued
            .write()
            .await
            .entry(url.to_string())
            .or_default()
            .push_back(response);
    }

    /// Response for `url` once its queue is drained.
    pub async fn set_fallback(&self, url: &str, response: HttpResponse) {
        self.fallbacks
            .write()
            .await
            .insert(url.to_string(), response);
    }

    /// Requests sent to `url`.
    pub async fn requests(&self, url: &str) -> Vec<HttpRequest> {
        self.requests
            .read()
            .await
            .iter()
            .filter(|r| r.url == url)
            .cloned()
            .collect()
    }

    /// Number of requests sent to `url`.
    pub async fn request_count(&self, url: &str) -> usize {
        self.requests.read().await.iter().filter(|r| r.url == url).count()
    }

    /// Number of requests sent to any URL.
    pub async fn total_requests(&self) -> usize {
        self.requests.read().await.len()
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        self.requests.write().await.push(request.clone());

        if let Some(queued) = self
            .queued
            .write()
            .await
            .get_mut(&request.url)
            .and_then(VecDeque::pop_front)
        {
            return queued;
        }

        Ok(self
            .fallbacks
            .read()
            .await
            .get(&request.url)
            .cloned()
            .unwrap_or_else(|| HttpResponse::status(404)))
    }
}
