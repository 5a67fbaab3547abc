//! Authenticated HTTP session.
//!
//! Wraps a pooled `reqwest::Client`, injecting bearer tokens on every
//! request and absorbing transient failures: a 401 triggers one token
//! refresh and retry, 429/503 retry with capped exponential backoff, and
//! transport errors consume the same retry budget.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Method;
use reqwest::Response;
use reqwest::StatusCode;
use reqwest::header::ACCEPT;
use reqwest::header::HeaderMap;
use reqwest::header::HeaderValue;
use tracing::debug;
use tracing::warn;

use super::ConcurrencyLimiter;
use super::RetryConfig;
use crate::auth::TokenProvider;
use crate::error::ApiError;
use crate::error::Error;

/// Default Accept header for OData JSON responses.
const ACCEPT_JSON: &str = "application/json;odata.metadata=minimal";

/// Accept header for the raw `$metadata` document.
const ACCEPT_XML: &str = "application/xml";

/// Options controlling session construction.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Per-request timeout.
    pub timeout: Duration,
    /// Whether to verify TLS certificates.
    pub verify_ssl: bool,
    /// Retry policy for transient failures.
    pub retry: RetryConfig,
    /// Maximum concurrent in-flight requests.
    pub max_concurrent_requests: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            verify_ssl: true,
            retry: RetryConfig::default(),
            max_concurrent_requests: 10,
        }
    }
}

/// A request to be sent through the session.
#[derive(Debug, Clone)]
pub struct SessionRequest {
    /// HTTP method.
    pub method: Method,
    /// Absolute URL.
    pub url: String,
    /// JSON body, when present.
    pub body: Option<serde_json::Value>,
    /// Request the XML Accept header instead of OData JSON.
    pub accept_xml: bool,
    /// Optional `If-Match` header value.
    pub if_match: Option<String>,
    /// Ask the server to return the affected record.
    pub prefer_representation: bool,
}

impl SessionRequest {
    /// Creates a GET request.
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    /// Creates a POST request.
    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    /// Creates a request with the given method.
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            body: None,
            accept_xml: false,
            if_match: None,
            prefer_representation: false,
        }
    }

    /// Attaches a JSON body.
    pub fn json(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Requests the XML Accept header (for `$metadata`).
    pub fn accept_xml(mut self) -> Self {
        self.accept_xml = true;
        self
    }

    /// Sets the `If-Match` header.
    pub fn if_match(mut self, etag: Option<String>) -> Self {
        self.if_match = etag;
        self
    }

    /// Asks the server to return the affected record.
    pub fn prefer_representation(mut self) -> Self {
        self.prefer_representation = true;
        self
    }
}

/// Authenticated HTTP session shared by all operations of one client.
pub struct HttpSession {
    http: reqwest::Client,
    base_url: String,
    token_provider: Arc<dyn TokenProvider>,
    retry: RetryConfig,
    limiter: ConcurrencyLimiter,
}

impl HttpSession {
    /// Creates a session for the given environment.
    pub fn new(
        base_url: impl Into<String>,
        token_provider: Arc<dyn TokenProvider>,
        options: SessionOptions,
    ) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .timeout(options.timeout)
            .danger_accept_invalid_certs(!options.verify_ssl)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: base_url.into(),
            token_provider,
            retry: options.retry,
            limiter: ConcurrencyLimiter::new(options.max_concurrent_requests),
        })
    }

    /// Returns the base URL of the environment.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Sends a request, injecting the bearer token and retrying transient
    /// failures.
    ///
    /// Returns the raw response once a non-retryable status arrives; status
    /// interpretation is left to the caller.
    pub async fn send(&self, request: SessionRequest) -> Result<Response, Error> {
        let _permit = self.limiter.acquire().await;

        let mut refreshed = false;
        let mut attempt: u32 = 0;

        loop {
            let token = self.token_provider.get_token(&self.base_url).await?;

            let mut headers = HeaderMap::new();
            let accept = if request.accept_xml {
                ACCEPT_XML
            } else {
                ACCEPT_JSON
            };
            headers.insert(ACCEPT, HeaderValue::from_static(accept));
            headers.insert("OData-MaxVersion", HeaderValue::from_static("4.0"));
            headers.insert("OData-Version", HeaderValue::from_static("4.0"));
            if let Some(etag) = &request.if_match {
                if let Ok(value) = HeaderValue::from_str(etag) {
                    headers.insert("If-Match", value);
                }
            }
            if request.prefer_representation {
                headers.insert("Prefer", HeaderValue::from_static("return=representation"));
            }

            let mut builder = self
                .http
                .request(request.method.clone(), &request.url)
                .headers(headers)
                .bearer_auth(&token.access_token);

            if let Some(body) = &request.body {
                builder = builder.json(body);
            }

            let result = builder.send().await;

            match result {
                Ok(response) => {
                    let status = response.status();

                    if status == StatusCode::UNAUTHORIZED && !refreshed {
                        debug!(url = %request.url, "401 received, refreshing token");
                        self.token_provider.invalidate().await;
                        refreshed = true;
                        continue;
                    }

                    let transient = status == StatusCode::TOO_MANY_REQUESTS
                        || status == StatusCode::SERVICE_UNAVAILABLE;
                    if transient
                        && self.retry.retry_on_status
                        && attempt + 1 < self.retry.max_attempts
                    {
                        let delay = retry_after(&response)
                            .unwrap_or_else(|| self.retry.delay_for(attempt));
                        warn!(
                            url = %request.url,
                            status = status.as_u16(),
                            delay_ms = delay.as_millis() as u64,
                            "transient status, backing off"
                        );
                        attempt += 1;
                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    return Ok(response);
                }
                Err(err) => {
                    if self.retry.retry_on_network && attempt + 1 < self.retry.max_attempts {
                        let delay = self.retry.delay_for(attempt);
                        warn!(
                            url = %request.url,
                            error = %err,
                            delay_ms = delay.as_millis() as u64,
                            "network error, backing off"
                        );
                        attempt += 1;
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return Err(Error::Api(ApiError::Network(err)));
                }
            }
        }
    }
}

/// Reads a `Retry-After: <seconds>` header, capped at the retry policy's
/// maximum delay upstream.
fn retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get("Retry-After")?
        .to_str()
        .ok()?
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}
