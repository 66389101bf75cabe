//! Page fetcher for the Travis CI v2 API.
//!
//! Each call owns its retry budget: a request is attempted at most
//! `max_retries + 1` times with the same cursor before it fails.

use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, error, warn};
use url::Url;

use super::types::{BuildsPage, JobEnvelope, JobRecord, PageRequest};

/// Media type selecting the v2 API.
pub const TRAVIS_ACCEPT: &str = "application/vnd.travis-ci.2+json";

/// Longest delay between two attempts, whatever the base delay.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Terminal failure of one page or job request.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FetchError {
    #[error("JSON fetch failed too many times for {url}. Last error after {attempts} attempts: {reason}")]
    ExhaustedRetries {
        url: String,
        attempts: u32,
        reason: String,
    },

    #[error("Malformed response from {url}: {reason}")]
    MalformedResponse { url: String, reason: String },

    #[error("Invalid request URL '{value}': {reason}")]
    InvalidUrl { value: String, reason: String },
}

/// Bounded retry policy applied to every request independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts allowed after the first one fails.
    pub max_retries: u32,
    /// Delay before the first retry, doubled for each later one. Zero retries immediately.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::ZERO,
        }
    }
}

impl RetryPolicy {
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay to wait after the given failed attempt (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        if self.base_delay.is_zero() {
            return Duration::ZERO;
        }
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(MAX_RETRY_DELAY)
            .min(MAX_RETRY_DELAY)
    }
}

/// Source of build pages and jobs.
///
/// The sync engine only talks to this trait, so it can run against the live
/// API or against an in-memory fixture.
#[async_trait]
pub trait BuildSource: Send + Sync {
    /// Fetch one page of builds.
    async fn fetch_page(&self, request: &PageRequest) -> Result<BuildsPage, FetchError>;

    /// Fetch a single job by id.
    async fn fetch_job(&self, job_id: u64) -> Result<JobRecord, FetchError>;
}

/// HTTP client for one repository's view of the Travis CI API.
#[derive(Debug, Clone)]
pub struct TravisClient {
    http: reqwest::Client,
    api_base: Url,
    credential: Option<String>,
    user_agent: String,
    retry: RetryPolicy,
}

impl TravisClient {
    /// Create a client rooted at `api_base`.
    ///
    /// `credential` is sent as `Authorization: token ...` when present; pass
    /// `None` for public repositories.
    pub fn new(
        api_base: &str,
        credential: Option<String>,
        user_agent: impl Into<String>,
        retry: RetryPolicy,
        timeout: Option<Duration>,
    ) -> Result<Self, FetchError> {
        // A trailing slash keeps `Url::join` from dropping a path prefix.
        let normalized = format!("{}/", api_base.trim_end_matches('/'));
        let api_base = Url::parse(&normalized).map_err(|e| FetchError::InvalidUrl {
            value: api_base.to_string(),
            reason: e.to_string(),
        })?;

        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build().map_err(|e| FetchError::InvalidUrl {
            value: api_base.to_string(),
            reason: format!("failed to build HTTP client: {e}"),
        })?;

        Ok(Self {
            http,
            api_base,
            credential: credential.filter(|c| !c.trim().is_empty()),
            user_agent: user_agent.into(),
            retry,
        })
    }

    /// Absolute URL for a page request.
    pub fn page_url(&self, request: &PageRequest) -> Result<Url, FetchError> {
        let mut url = self.join(&request.path)?;
        if let Some(after_number) = request.after_number {
            url.query_pairs_mut()
                .append_pair("after_number", &after_number.to_string());
        }
        Ok(url)
    }

    fn join(&self, path: &str) -> Result<Url, FetchError> {
        self.api_base
            .join(path.trim_start_matches('/'))
            .map_err(|e| FetchError::InvalidUrl {
                value: path.to_string(),
                reason: e.to_string(),
            })
    }

    fn request(&self, url: Url) -> reqwest::RequestBuilder {
        let builder = self
            .http
            .get(url)
            .header("Accept", TRAVIS_ACCEPT)
            .header("User-Agent", &self.user_agent);

        match &self.credential {
            Some(token) => builder.header("Authorization", format!("token {}", token)),
            None => builder,
        }
    }

    /// GET `url` and decode the body, retrying transport errors and non-2xx statuses.
    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, FetchError> {
        let max_attempts = self.retry.max_attempts();
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            let reason = match self.request(url.clone()).send().await {
                Ok(response) if response.status().is_success() => match response.bytes().await {
                    Ok(body) => {
                        debug!(url = %url, attempt, "Travis request succeeded");
                        return serde_json::from_slice(&body).map_err(|e| {
                            error!(url = %url, error = %e, "Travis response did not match expected shape");
                            FetchError::MalformedResponse {
                                url: url.to_string(),
                                reason: e.to_string(),
                            }
                        });
                    }
                    Err(e) => format!("failed to read response body: {e}"),
                },
                Ok(response) => format!("HTTP {}", response.status()),
                Err(e) => e.to_string(),
            };

            if attempt >= max_attempts {
                error!(
                    url = %url,
                    attempts = attempt,
                    reason = %reason,
                    "Travis request failed, retries exhausted"
                );
                return Err(FetchError::ExhaustedRetries {
                    url: url.to_string(),
                    attempts: attempt,
                    reason,
                });
            }

            counter!("travis_fetch_retries_total").increment(1);
            let delay = self.retry.delay_after(attempt);
            warn!(
                url = %url,
                attempt,
                max_attempts,
                reason = %reason,
                "Travis request failed. Retrying after {:?}",
                delay
            );
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[async_trait]
impl BuildSource for TravisClient {
    async fn fetch_page(&self, request: &PageRequest) -> Result<BuildsPage, FetchError> {
        let url = self.page_url(request)?;
        self.get_json(url).await
    }

    async fn fetch_job(&self, job_id: u64) -> Result<JobRecord, FetchError> {
        let url = self.join(&format!("jobs/{job_id}"))?;
        let envelope: JobEnvelope = self.get_json(url).await?;
        Ok(envelope.job)
    }
}
