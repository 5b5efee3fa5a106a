//! Rate-limited, cursor-paginated API walker.
//!
//! The walker knows nothing about channels or messages. It issues GET
//! requests through a [`Transport`], retries rate limits and transient
//! failures with backoff, and hands back JSON pages along with the
//! continuation cursor.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::time::sleep;
use tracing::{debug, warn};
use url::Url;

use crate::progress::Reporter;

/// A response as seen by the walker, before any JSON decoding.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    /// Parsed `Retry-After` header, in seconds.
    pub retry_after: Option<u64>,
    pub body: String,
}

impl RawResponse {
    pub fn json(body: Value) -> Self {
        Self {
            status: 200,
            retry_after: None,
            body: body.to_string(),
        }
    }

    pub fn rate_limited(retry_after: Option<u64>) -> Self {
        Self {
            status: 429,
            retry_after,
            body: String::new(),
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            retry_after: None,
            body: String::new(),
        }
    }

    fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// HTTP seam. One GET per call, no retries.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, endpoint: &str, params: &[(String, String)]) -> Result<RawResponse>;
}

/// reqwest-backed transport with bearer authentication.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: Url,
    token: String,
}

impl HttpTransport {
    pub fn new(base_url: &str, token: &str, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url).context("invalid workspace API base URL")?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url,
            token: token.to_string(),
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, endpoint: &str, params: &[(String, String)]) -> Result<RawResponse> {
        let url = self
            .base_url
            .join(endpoint)
            .with_context(|| format!("invalid endpoint {}", endpoint))?;

        let response = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .query(params)
            .send()
            .await?;

        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        let body = response.text().await?;

        Ok(RawResponse {
            status,
            retry_after,
            body,
        })
    }
}

/// Retry budget for a single page fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3 }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    /// Wait before the next attempt when the server gives no hint:
    /// `2^attempt` seconds, attempt counted from 0.
    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_secs(1u64 << attempt.min(10))
    }
}

/// Where the continuation cursor lives in requests and responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CursorField {
    /// Query parameter carrying the cursor.
    pub param: &'static str,
    /// JSON pointer to the next cursor in a response body.
    pub pointer: &'static str,
}

impl Default for CursorField {
    fn default() -> Self {
        Self {
            param: "cursor",
            pointer: "/response_metadata/next_cursor",
        }
    }
}

/// A paginated request: endpoint, fixed parameters, and cursor location.
#[derive(Debug, Clone)]
pub struct PageRequest {
    pub endpoint: String,
    pub params: Vec<(String, String)>,
    pub cursor: CursorField,
}

impl PageRequest {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            params: Vec::new(),
            cursor: CursorField::default(),
        }
    }

    pub fn param(mut self, key: &str, value: impl ToString) -> Self {
        self.params.push((key.to_string(), value.to_string()));
        self
    }
}

/// One decoded response page. An empty page stands in for a fetch that
/// never succeeded.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    body: Value,
}

impl Page {
    pub fn new(body: Value) -> Self {
        Self { body }
    }

    pub fn empty() -> Self {
        Self { body: Value::Null }
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_null()
    }

    pub fn body(&self) -> &Value {
        &self.body
    }

    pub fn parse<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.body.clone()).context("unexpected response shape")
    }

    fn cursor(&self, field: &CursorField) -> Option<String> {
        self.body
            .pointer(field.pointer)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string)
    }
}

pub struct ApiWalker {
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
}

impl ApiWalker {
    pub fn new(transport: Arc<dyn Transport>, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    /// Fetch a single page, retrying within the policy budget. Never fails:
    /// an exhausted budget yields [`Page::empty`] and a warning.
    pub async fn fetch(
        &self,
        endpoint: &str,
        params: &[(String, String)],
        reporter: &Reporter<'_>,
    ) -> Page {
        let attempts = self.policy.max_attempts.max(1);

        for attempt in 0..attempts {
            let wait = match self.transport.get(endpoint, params).await {
                Ok(response) if response.status == 429 => {
                    let wait = response
                        .retry_after
                        .map(Duration::from_secs)
                        .unwrap_or_else(|| self.policy.backoff(attempt));
                    warn!(
                        "{}: rate limited, waiting {:?} (attempt {}/{})",
                        endpoint,
                        wait,
                        attempt + 1,
                        attempts
                    );
                    wait
                }
                Ok(response) if response.is_success() => {
                    match serde_json::from_str::<Value>(&response.body) {
                        Ok(body) => return Page::new(body),
                        Err(err) => {
                            warn!("{}: undecodable response body: {}", endpoint, err);
                            self.policy.backoff(attempt)
                        }
                    }
                }
                Ok(response) => {
                    warn!(
                        "{}: HTTP {} (attempt {}/{})",
                        endpoint,
                        response.status,
                        attempt + 1,
                        attempts
                    );
                    self.policy.backoff(attempt)
                }
                Err(err) => {
                    warn!(
                        "{}: request failed: {} (attempt {}/{})",
                        endpoint,
                        err,
                        attempt + 1,
                        attempts
                    );
                    self.policy.backoff(attempt)
                }
            };

            if attempt + 1 < attempts {
                if wait >= Duration::from_secs(1) {
                    reporter.log(&format!(
                        "Rate limited or unavailable, waiting {}s...",
                        wait.as_secs()
                    ));
                }
                sleep(wait).await;
            }
        }

        warn!("{}: giving up after {} attempts", endpoint, attempts);
        reporter.log(&format!(
            "⚠️ {} failed after {} attempts, continuing",
            endpoint, attempts
        ));
        Page::empty()
    }

    /// Lazy page sequence for `request`.
    pub fn pages<'a>(&'a self, request: PageRequest, reporter: &'a Reporter<'a>) -> Pages<'a> {
        Pages {
            walker: self,
            reporter,
            request,
            cursor: None,
            done: false,
        }
    }
}

/// Restartable cursor walk. Ends after a page without a continuation cursor.
pub struct Pages<'a> {
    walker: &'a ApiWalker,
    reporter: &'a Reporter<'a>,
    request: PageRequest,
    cursor: Option<String>,
    done: bool,
}

impl<'a> Pages<'a> {
    pub async fn next_page(&mut self) -> Option<Page> {
        if self.done {
            return None;
        }

        let mut params = self.request.params.clone();
        if let Some(cursor) = &self.cursor {
            params.push((self.request.cursor.param.to_string(), cursor.clone()));
        }

        let page = self
            .walker
            .fetch(&self.request.endpoint, &params, self.reporter)
            .await;

        self.cursor = page.cursor(&self.request.cursor);
        if self.cursor.is_none() {
            self.done = true;
        }
        debug!(
            "{}: page fetched (more: {})",
            self.request.endpoint, !self.done
        );
        Some(page)
    }

    /// Start the walk again from the first page.
    pub fn restart(&mut self) {
        self.cursor = None;
        self.done = false;
    }
}
