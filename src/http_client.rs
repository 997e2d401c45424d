//! HTTP Client Module
//!
//! Provides the HTTP plumbing shared by every source:
//! - Request and connect timeouts
//! - Rate-limit handling: on 429 sleep for `Retry-After` (or a fallback) and
//!   resend the same request, a bounded number of times
//! - Per-source request pacing
//! - Per-source auth headers
//!
//! Any other failure is returned to the caller unchanged.

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, RETRY_AFTER};
use reqwest::{Client, Request, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{Result, SyncError};
use crate::metrics;

/// Configuration for the HTTP client
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Request timeout
    pub request_timeout: Duration,
    /// Connection timeout
    pub connect_timeout: Duration,
    /// How many times a rate-limited request is resent
    pub max_rate_limit_retries: u32,
    /// Wait used when a 429 carries no usable `Retry-After`
    pub rate_limit_fallback: Duration,
    /// User agent string
    pub user_agent: String,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(10),
            max_rate_limit_retries: 5,
            rate_limit_fallback: Duration::from_secs(2),
            user_agent: format!("dashboard-sync/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl HttpClientConfig {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            request_timeout: config.http_timeout()?,
            max_rate_limit_retries: config.max_rate_limit_retries,
            rate_limit_fallback: config.rate_limit_fallback()?,
            ..Default::default()
        })
    }
}

/// Shared HTTP client with rate-limit retry
pub struct ResilientHttpClient {
    /// Inner reqwest client
    client: Client,
    /// Configuration
    config: HttpClientConfig,
}

impl ResilientHttpClient {
    /// Creates a new HTTP client
    pub fn new(config: HttpClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .user_agent(&config.user_agent)
            .gzip(true)
            .brotli(true)
            .build()?;

        Ok(Self { client, config })
    }

    /// Creates a client with default configuration
    pub fn with_defaults() -> Result<Self> {
        Self::new(HttpClientConfig::default())
    }

    /// Gets the inner reqwest client
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Executes a request, resending it after a wait whenever the platform
    /// answers 429. The response is returned whatever its status.
    pub async fn execute<F>(&self, source: &str, build_request: F) -> Result<Response>
    where
        F: Fn() -> std::result::Result<Request, reqwest::Error>,
    {
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let request = build_request()?;

            debug!(
                source = %source,
                method = %request.method(),
                url = %request.url(),
                attempt,
                "Executing HTTP request"
            );

            let response = self.client.execute(request).await?;
            let status = response.status();
            metrics::record_http_request(source, status.as_u16());

            if !Self::is_rate_limited(status) {
                return Ok(response);
            }

            if attempt > self.config.max_rate_limit_retries {
                return Err(SyncError::RateLimited { attempts: attempt });
            }

            let wait = retry_after(response.headers()).unwrap_or(self.config.rate_limit_fallback);
            warn!(
                source = %source,
                attempt,
                wait_secs = wait.as_secs_f64(),
                "Rate limited, waiting before retry"
            );
            metrics::record_rate_limit_wait(source);
            tokio::time::sleep(wait).await;
        }
    }

    /// Checks if a status code is a rate-limit signal
    fn is_rate_limited(status: StatusCode) -> bool {
        status == StatusCode::TOO_MANY_REQUESTS
    }
}

/// Parses a delta-seconds `Retry-After` header.
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Turns a non-2xx response into an `ApiError` carrying the body.
pub async fn ensure_success(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(SyncError::ApiError {
        code: status.to_string(),
        message: body.chars().take(500).collect(),
    })
}

/// Source-specific HTTP client with auth headers and request pacing
pub struct SourceHttpClient {
    /// Shared base client
    client: Arc<ResilientHttpClient>,
    /// Minimum spacing between requests, if any
    pacer: Option<DefaultDirectRateLimiter>,
    /// Headers sent with every request
    headers: HeaderMap,
    /// Source identifier
    source_id: String,
}

impl SourceHttpClient {
    /// Creates a new source-specific client
    pub fn new(client: Arc<ResilientHttpClient>, source_id: &str) -> Self {
        Self {
            client,
            pacer: None,
            headers: HeaderMap::new(),
            source_id: source_id.to_string(),
        }
    }

    /// Spaces requests at least `interval` apart. A zero interval disables pacing.
    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.pacer = Quota::with_period(interval).map(RateLimiter::direct);
        self
    }

    /// Sends `Authorization: Bearer <token>` with every request
    pub fn with_bearer(self, token: &str) -> Result<Self> {
        self.with_header(AUTHORIZATION, &format!("Bearer {token}"))
    }

    /// Sends an extra header with every request
    pub fn with_header(mut self, name: HeaderName, value: &str) -> Result<Self> {
        let value = HeaderValue::from_str(value).map_err(|e| SyncError::InvalidConfig {
            key: name.to_string(),
            message: e.to_string(),
        })?;
        self.headers.insert(name, value);
        Ok(self)
    }

    /// Executes a GET request; the response is returned whatever its status
    pub async fn get(&self, url: &str) -> Result<Response> {
        self.get_with_query(url, &[] as &[(&str, &str)]).await
    }

    /// Executes a GET request with query parameters
    pub async fn get_with_query<T: serde::Serialize + ?Sized>(
        &self,
        url: &str,
        query: &T,
    ) -> Result<Response> {
        if let Some(pacer) = &self.pacer {
            pacer.until_ready().await;
        }

        self.client
            .execute(&self.source_id, || {
                self.client
                    .inner()
                    .get(url)
                    .headers(self.headers.clone())
                    .query(query)
                    .build()
            })
            .await
    }

    /// GET that requires a 2xx and decodes the JSON body
    pub async fn get_json<R, T>(&self, url: &str, query: &T) -> Result<R>
    where
        R: DeserializeOwned,
        T: serde::Serialize + ?Sized,
    {
        let response = ensure_success(self.get_with_query(url, query).await?).await?;
        let text = response.text().await?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Gets the source ID
    pub fn source_id(&self) -> &str {
        &self.source_id
    }
}
