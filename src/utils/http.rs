//! HTTP client utilities.

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use nonzero_ext::nonzero;
use reqwest::{header, Client, RequestBuilder, Response, StatusCode};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use super::retry::{with_retry, RetryConfig};
use crate::sources::SourceError;

/// Longest slice of an error body kept in error messages
const ERROR_BODY_LIMIT: usize = 200;

/// Settings for one adapter's HTTP client
#[derive(Debug, Clone, PartialEq)]
pub struct HttpSettings {
    /// User-Agent header
    pub user_agent: String,
    /// Per-request timeout
    pub timeout: Duration,
    /// Requests allowed per second against this database
    pub requests_per_second: u32,
    /// Retry policy for transient failures
    pub retry: RetryConfig,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            user_agent: concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")).to_string(),
            timeout: Duration::from_secs(10),
            requests_per_second: 3,
            retry: RetryConfig::default(),
        }
    }
}

/// Rate-limited HTTP client owned by a single adapter
///
/// The limiter is the only state that outlives a request. Clones share it, so
/// every call to the same database draws from one budget.
#[derive(Clone)]
pub struct HttpClient {
    client: Arc<Client>,
    limiter: Arc<DefaultDirectRateLimiter>,
    retry: RetryConfig,
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("client", &self.client)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl HttpClient {
    /// Create a new HTTP client from settings
    pub fn new(settings: &HttpSettings) -> Result<Self, SourceError> {
        let client = Client::builder()
            .user_agent(settings.user_agent.as_str())
            .timeout(settings.timeout)
            .connect_timeout(settings.timeout.min(Duration::from_secs(10)))
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| SourceError::Network(format!("Failed to create HTTP client: {}", e)))?;

        let per_second = NonZeroU32::new(settings.requests_per_second).unwrap_or(nonzero!(1u32));

        Ok(Self {
            client: Arc::new(client),
            limiter: Arc::new(RateLimiter::direct(Quota::per_second(per_second))),
            retry: settings.retry,
        })
    }

    /// GET a URL with query parameters and return the body
    pub async fn get_text(&self, url: &str, params: &[(&str, String)]) -> Result<String, SourceError> {
        self.send(|| self.client.get(url).query(params)).await
    }

    /// POST a form and return the body
    pub async fn post_form_text(
        &self,
        url: &str,
        form: &[(&str, String)],
    ) -> Result<String, SourceError> {
        self.send(|| self.client.post(url).form(form)).await
    }

    async fn send<B>(&self, build: B) -> Result<String, SourceError>
    where
        B: Fn() -> RequestBuilder,
    {
        with_retry(self.retry, || {
            let request = build();
            let limiter = Arc::clone(&self.limiter);
            async move {
                limiter.until_ready().await;
                let response = request.send().await?;
                read_body(response).await
            }
        })
        .await
    }
}

/// Map the response status onto the error taxonomy and read the body
async fn read_body(response: Response) -> Result<String, SourceError> {
    let status = response.status();

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get(header::RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<u64>().ok());
        return Err(SourceError::RateLimited { retry_after });
    }

    if status.is_server_error() || status.is_client_error() {
        let body = response.text().await.unwrap_or_default();
        let message: String = body.chars().take(ERROR_BODY_LIMIT).collect();
        let status = status.as_u16();
        return Err(if (500..600).contains(&status) {
            SourceError::Server { status, message }
        } else {
            SourceError::Client { status, message }
        });
    }

    Ok(response.text().await?)
}
