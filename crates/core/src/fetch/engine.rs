//! Bounded-retry execution of governed HTTP attempts.

use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

use super::error::{message_indicates_rate_limit, FetchError};
use super::mime::{extension_for_mime, normalize_mime};
use super::retry_after::parse_retry_after;
use super::transport::HttpTransport;
use super::types::{DownloadedAsset, HttpRequest, HttpResponse, TransportError};
use crate::governor::{
    origin_of, BandwidthGovernor, GovernorPool, GovernorProfile, RateGovernor, RetryPolicy,
};
use crate::metrics;
use crate::source::ImageVariant;

/// What an attempt fetches. Downloads also consume bandwidth budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchKind {
    Metadata,
    Download,
}

impl FetchKind {
    fn label(self) -> &'static str {
        match self {
            FetchKind::Metadata => "metadata",
            FetchKind::Download => "download",
        }
    }
}

/// Runs HTTP attempts against one origin under its governors.
///
/// Per call: `ATTEMPT -> SUCCESS | RATE_LIMITED | TRANSIENT_FAILURE |
/// FATAL_FAILURE`. Rate-limited and transient outcomes loop back to
/// `ATTEMPT` until `max_retries` is spent; fatal outcomes return at once.
pub struct FetchRetryEngine {
    profile: GovernorProfile,
    policy: RetryPolicy,
    rate: Arc<RateGovernor>,
    bandwidth: Arc<BandwidthGovernor>,
    transport: Arc<dyn HttpTransport>,
}

impl FetchRetryEngine {
    /// Create an engine that uses the retry policy of the rate governor's
    /// profile.
    pub fn new(
        rate: Arc<RateGovernor>,
        bandwidth: Arc<BandwidthGovernor>,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        let profile = rate.profile();
        Self {
            profile,
            policy: profile.retry_policy(),
            rate,
            bandwidth,
            transport,
        }
    }

    /// Override the retry policy.
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn origin(&self) -> &str {
        self.rate.origin()
    }

    /// Engine for the origin of `url`, using the pool's governors for it.
    pub async fn for_url(
        pool: &GovernorPool,
        transport: Arc<dyn HttpTransport>,
        url: &str,
    ) -> Result<Self, FetchError> {
        let origin = origin_of(url).ok_or_else(|| FetchError::Malformed {
            url: url.to_string(),
            message: "URL has no host".to_string(),
        })?;
        Ok(Self::new(
            pool.for_origin(&origin).await,
            pool.bandwidth(),
            transport,
        ))
    }

    /// Execute `attempt` with governed, bounded retries.
    ///
    /// `attempt` is called at most `max_retries + 1` times.
    pub async fn execute<F, Fut>(
        &self,
        kind: FetchKind,
        url: &str,
        mut attempt: F,
    ) -> Result<HttpResponse, FetchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<HttpResponse, TransportError>>,
    {
        let max_retries = self.policy.max_retries;
        let mut retry: u32 = 0;

        loop {
            self.rate.await_slot().await;
            let permit = match kind {
                FetchKind::Download => Some(self.bandwidth.await_capacity().await),
                FetchKind::Metadata => None,
            };

            let attempts = retry + 1;
            let result = attempt().await;
            if kind == FetchKind::Download {
                if let Ok(response) = &result {
                    self.charge_bandwidth(response.body.len() as u64).await;
                }
            }
            drop(permit);

            let wait = match result {
                Ok(response) if response.is_success() => {
                    self.count_attempt(kind, "success");
                    return Ok(response);
                }
                Ok(response) if response.status == 429 => {
                    self.count_attempt(kind, "rate_limited");
                    if retry >= max_retries {
                        return Err(FetchError::RateLimited {
                            url: url.to_string(),
                            attempts,
                        });
                    }
                    let retry_after = response
                        .retry_after
                        .as_deref()
                        .and_then(|value| parse_retry_after(value, Utc::now()));
                    let wait = self.policy.rate_limit_wait(retry_after, retry);
                    self.log_retry(url, "rate_limited", attempts, wait);
                    wait
                }
                Ok(response) if response.status >= 500 => {
                    self.count_attempt(kind, "server_error");
                    if retry >= max_retries {
                        return Err(FetchError::Transient {
                            url: url.to_string(),
                            attempts,
                            message: format!("HTTP {}", response.status),
                        });
                    }
                    let wait = self.policy.backoff(retry);
                    self.log_retry(url, "server_error", attempts, wait);
                    wait
                }
                Ok(response) => {
                    self.count_attempt(kind, "fatal");
                    return Err(FetchError::Http {
                        url: url.to_string(),
                        status: response.status,
                    });
                }
                Err(e) if message_indicates_rate_limit(&e.message) => {
                    // The transport already saw a 429; don't stack another retry layer on it.
                    self.count_attempt(kind, "rate_limited");
                    return Err(FetchError::RateLimited {
                        url: url.to_string(),
                        attempts,
                    });
                }
                Err(e) => {
                    self.count_attempt(kind, "network_error");
                    if retry >= max_retries {
                        return Err(FetchError::Transient {
                            url: url.to_string(),
                            attempts,
                            message: e.message,
                        });
                    }
                    let wait = self.policy.backoff(retry);
                    self.log_retry(url, "network_error", attempts, wait);
                    wait
                }
            };

            sleep(wait).await;
            retry += 1;
        }
    }

    /// Fetch and decode a JSON document.
    pub async fn fetch_json<T: DeserializeOwned>(&self, request: &HttpRequest) -> Result<T, FetchError> {
        let response = self
            .execute(FetchKind::Metadata, &request.url, || self.transport.send(request))
            .await?;

        serde_json::from_slice(&response.body).map_err(|e| FetchError::Malformed {
            url: request.url.clone(),
            message: e.to_string(),
        })
    }

    /// Download one variant, hash it, and pause politely afterwards.
    pub async fn download(&self, variant: &ImageVariant) -> Result<DownloadedAsset, FetchError> {
        let request = HttpRequest::get(&variant.url);
        let response = self
            .execute(FetchKind::Download, &variant.url, || self.transport.send(&request))
            .await?;

        if response.body.is_empty() {
            return Err(FetchError::Malformed {
                url: variant.url.clone(),
                message: "empty body".to_string(),
            });
        }

        let mime = response
            .content_type
            .as_deref()
            .map(normalize_mime)
            .filter(|mime| mime.starts_with("image/"))
            .unwrap_or_else(|| normalize_mime(&variant.mime));

        let file_size_bytes = response.body.len() as u64;
        let content_hash = sha256_hex(&response.body);
        let file_extension = extension_for_mime(&mime).to_string();

        debug!(
            url = %variant.url,
            bytes = file_size_bytes,
            hash = %content_hash,
            "Download complete"
        );

        let pause = self.policy.courtesy_delay();
        if !pause.is_zero() {
            sleep(pause).await;
        }

        Ok(DownloadedAsset {
            variant: variant.clone(),
            bytes: response.body,
            content_hash,
            file_extension,
            file_size_bytes,
            mime,
        })
    }

    /// Charge every received download body, error bodies included.
    async fn charge_bandwidth(&self, bytes: u64) {
        self.bandwidth.record_transfer(bytes).await;
        metrics::BYTES_DOWNLOADED.inc_by(bytes);
    }

    fn count_attempt(&self, kind: FetchKind, result: &str) {
        metrics::FETCH_ATTEMPTS
            .with_label_values(&[kind.label(), result])
            .inc();
    }

    fn log_retry(&self, url: &str, reason: &'static str, attempts: u32, wait: Duration) {
        metrics::FETCH_RETRIES.with_label_values(&[reason]).inc();
        warn!(
            url = %url,
            origin = %self.rate.origin(),
            profile = ?self.profile,
            reason,
            attempt = attempts,
            max_retries = self.policy.max_retries,
            wait_ms = wait.as_millis() as u64,
            "Retrying request"
        );
    }
}

/// Lowercase sha256 hex digest.
pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}
