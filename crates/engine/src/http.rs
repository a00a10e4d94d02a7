//! Retrying HTTP session.
//!
//! One [`HttpSession`] per transfer. It owns a cookie-keeping
//! `reqwest::Client`, retries idempotent GETs with exponential backoff and
//! bounds every network wait with the configured timeout. Chunk POSTs go
//! through [`HttpSession::post_multipart`], which makes exactly one attempt;
//! the upload engine runs its own retry loop over the buffered chunk.

use std::future::Future;
use std::time::Duration;

use bytes::Bytes;
use reqwest::StatusCode;
use reqwest::multipart::Form;
use tracing::{debug, warn};

use gfm_transfer::TransferSpec;

use crate::config::ServiceConfig;
use crate::error::EngineError;

const USER_AGENT: &str = concat!("gfm-engine/", env!("CARGO_PKG_VERSION"));

/// Retry budget for idempotent requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub retries: u32,
    /// Delay before the first retry; doubled for each further retry.
    pub backoff_factor: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: gfm_transfer::DEFAULT_RETRIES,
            backoff_factor: gfm_transfer::DEFAULT_BACKOFF_FACTOR,
        }
    }
}

impl RetryPolicy {
    pub fn from_spec(spec: &TransferSpec) -> Self {
        Self {
            retries: spec.retries,
            backoff_factor: spec.backoff_factor,
        }
    }

    /// Total attempts including the first one.
    pub fn max_attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }

    /// Delay before retry number `retry` (1-based): `factor * 2^(retry - 1)`.
    pub fn delay(&self, retry: u32) -> Duration {
        let shift = retry.saturating_sub(1).min(31);
        self.backoff_factor.saturating_mul(1u32 << shift)
    }
}

/// Statuses worth retrying: throttling and transient server failures.
pub fn is_retryable_status(status: StatusCode) -> bool {
    matches!(status.as_u16(), 429 | 500 | 502 | 503 | 504)
}

/// Outcome of a single attempt inside the retry loop.
enum Attempt {
    Retry(String),
    Fail(EngineError),
}

/// Server reply to a single multipart POST.
#[derive(Debug)]
pub struct PostReply {
    pub status: StatusCode,
    pub body: Bytes,
    /// Names of cookies set by this response.
    pub cookies: Vec<String>,
}

/// Cookie-keeping HTTP client with retries and timeouts.
#[derive(Clone)]
pub struct HttpSession {
    client: reqwest::Client,
    policy: RetryPolicy,
    timeout: Duration,
    mute: bool,
}

impl HttpSession {
    /// Creates a session using the transfer's timeout and retry settings.
    pub fn new(spec: &TransferSpec, service: &ServiceConfig) -> Result<Self, EngineError> {
        let mut builder = reqwest::Client::builder()
            .cookie_store(true)
            .connect_timeout(spec.timeout)
            .user_agent(USER_AGENT);
        for (host, addr) in &service.resolve {
            builder = builder.resolve(host, *addr);
        }
        let client = builder
            .build()
            .map_err(|e| EngineError::Internal(format!("HTTP client: {e}")))?;

        Ok(Self {
            client,
            policy: RetryPolicy::from_spec(spec),
            timeout: spec.timeout,
            mute: spec.mute,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// GETs `url` and returns the body as text.
    ///
    /// Connection failures, timeouts, retryable statuses and body read
    /// failures are retried. Any other non-success status fails at once.
    pub async fn get_text(&self, url: &str, stage: &'static str) -> Result<String, EngineError> {
        self.with_retry(url, stage, move || self.try_get_text(url, stage))
            .await
    }

    /// GETs `url` and returns the response once its headers arrived.
    ///
    /// The body is left for the caller to stream; body reads are not retried.
    pub async fn get_stream(
        &self,
        url: &str,
        stage: &'static str,
    ) -> Result<reqwest::Response, EngineError> {
        self.with_retry(url, stage, move || self.try_get_headers(url, stage))
            .await
    }

    /// Reads the next body chunk of `resp`, bounded by the idle timeout.
    pub async fn next_chunk(&self, resp: &mut reqwest::Response) -> Result<Option<Bytes>, String> {
        match tokio::time::timeout(self.timeout, resp.chunk()).await {
            Ok(Ok(chunk)) => Ok(chunk),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("no data for {:?}", self.timeout)),
        }
    }

    /// POSTs a multipart form once, waiting at most `budget` for the reply.
    ///
    /// `Err` carries the reason of a transport failure or timeout.
    pub async fn post_multipart(
        &self,
        url: &str,
        form: Form,
        budget: Duration,
    ) -> Result<PostReply, String> {
        let exchange = async {
            let resp = self
                .client
                .post(url)
                .multipart(form)
                .send()
                .await
                .map_err(|e| e.to_string())?;
            let status = resp.status();
            let cookies = resp.cookies().map(|c| c.name().to_string()).collect();
            let body = resp.bytes().await.map_err(|e| e.to_string())?;
            Ok::<_, String>(PostReply {
                status,
                body,
                cookies,
            })
        };
        match tokio::time::timeout(budget, exchange).await {
            Ok(reply) => reply,
            Err(_) => Err(format!("timed out after {budget:?}")),
        }
    }

    async fn try_get_headers(
        &self,
        url: &str,
        stage: &'static str,
    ) -> Result<reqwest::Response, Attempt> {
        let resp = match tokio::time::timeout(self.timeout, self.client.get(url).send()).await {
            Ok(Ok(resp)) => resp,
            Ok(Err(e)) => return Err(Attempt::Retry(e.to_string())),
            Err(_) => return Err(Attempt::Retry(format!("timed out after {:?}", self.timeout))),
        };

        let status = resp.status();
        if is_retryable_status(status) {
            return Err(Attempt::Retry(format!("HTTP {status}")));
        }
        if !status.is_success() {
            return Err(Attempt::Fail(EngineError::Transport {
                stage,
                url: url.to_string(),
                attempts: 1,
                reason: format!("HTTP {status}"),
            }));
        }
        Ok(resp)
    }

    async fn try_get_text(&self, url: &str, stage: &'static str) -> Result<String, Attempt> {
        let resp = self.try_get_headers(url, stage).await?;
        match tokio::time::timeout(self.timeout, resp.text()).await {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(e)) => Err(Attempt::Retry(e.to_string())),
            Err(_) => Err(Attempt::Retry(format!(
                "body timed out after {:?}",
                self.timeout
            ))),
        }
    }

    async fn with_retry<T, F, Fut>(
        &self,
        url: &str,
        stage: &'static str,
        mut op: F,
    ) -> Result<T, EngineError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, Attempt>>,
    {
        let max_attempts = self.policy.max_attempts();
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(Attempt::Fail(e)) => return Err(e),
                Err(Attempt::Retry(reason)) => {
                    if attempt >= max_attempts {
                        return Err(EngineError::Transport {
                            stage,
                            url: url.to_string(),
                            attempts: attempt,
                            reason,
                        });
                    }
                    let delay = self.policy.delay(attempt);
                    if self.mute {
                        debug!(%url, stage, attempt, ?delay, %reason, "retrying request");
                    } else {
                        warn!(%url, stage, attempt, ?delay, %reason, "retrying request");
                    }
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
