//! GitHub OAuth and Travis CI token exchange.
//!
//! The browser never sees the GitHub client secret: the server issues the
//! `state`, builds the authorize URL, and trades the returned code for a
//! GitHub token and then a Travis CI token.

use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use lru::LruCache;
use rand::Rng;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;
use utoipa::ToSchema;

use crate::config::AppConfig;
use crate::connectors::travis::TRAVIS_ACCEPT;

/// Characters of a state used as its lookup key; the rest is compared in constant time.
const STATE_SELECTOR_LEN: usize = 12;

/// Errors raised while running the OAuth exchange
#[derive(Debug, Error)]
pub enum OAuthError {
    #[error("OAuth state is unknown or expired")]
    InvalidState,

    #[error("Authorization code is missing")]
    MissingCode,

    #[error("GitHub OAuth is not configured")]
    NotConfigured,

    #[error("{service} token exchange failed: {message}")]
    Upstream {
        service: String,
        status: Option<u16>,
        message: String,
    },

    #[error("Network error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("URL parsing error: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// Generate a cryptographically secure random state token
pub fn generate_secure_state() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill(&mut bytes);
    base64_url::encode(&bytes)
}

struct PendingState {
    state: String,
    expires_at: Instant,
}

/// Bounded store of issued OAuth states.
///
/// States expire after the configured TTL and are consumed on successful
/// validation. When full, the least recently issued state is evicted.
pub struct StateStore {
    ttl: Duration,
    entries: Mutex<LruCache<String, PendingState>>,
}

impl StateStore {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            ttl,
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Issue and remember a fresh state.
    pub fn issue(&self) -> String {
        let state = generate_secure_state();
        self.remember(state.clone());
        state
    }

    fn remember(&self, state: String) {
        let selector = selector_of(&state).to_string();
        let pending = PendingState {
            state,
            expires_at: Instant::now() + self.ttl,
        };
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.put(selector, pending);
    }

    /// Check a state returned by the browser, consuming it when valid.
    pub fn validate(&self, candidate: &str) -> Result<(), OAuthError> {
        let candidate = candidate.trim();
        if candidate.len() < STATE_SELECTOR_LEN {
            return Err(OAuthError::InvalidState);
        }

        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let selector = selector_of(candidate);

        let Some(pending) = entries.peek(selector) else {
            debug!("OAuth state not found");
            return Err(OAuthError::InvalidState);
        };

        if pending.expires_at <= Instant::now() {
            entries.pop(selector);
            debug!("OAuth state expired");
            return Err(OAuthError::InvalidState);
        }

        if !bool::from(pending.state.as_bytes().ct_eq(candidate.as_bytes())) {
            warn!("OAuth state mismatch");
            return Err(OAuthError::InvalidState);
        }

        entries.pop(selector);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn selector_of(state: &str) -> &str {
    let end = state
        .char_indices()
        .nth(STATE_SELECTOR_LEN)
        .map(|(idx, _)| idx)
        .unwrap_or(state.len());
    &state[..end]
}

/// GitHub token response
#[derive(Debug, Deserialize)]
struct GitHubTokenResponse {
    access_token: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// Travis CI token response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TravisTokenResponse {
    pub access_token: String,
}

/// Client for the GitHub and Travis CI token endpoints
#[derive(Debug, Clone)]
pub struct OAuthClient {
    http: reqwest::Client,
    client_id: String,
    client_secret: String,
    redirect_uri: Option<String>,
    scopes: String,
    github_oauth_base: String,
    travis_public_base: String,
    travis_private_base: String,
    user_agent: String,
}

impl OAuthClient {
    /// Build from configuration; `None` when GitHub credentials are missing.
    pub fn from_config(config: &AppConfig) -> Option<Self> {
        let client_id = config.github_client_id.clone()?;
        let client_secret = config.github_client_secret.clone()?;

        Some(Self {
            http: reqwest::Client::new(),
            client_id,
            client_secret,
            redirect_uri: config.github_redirect_uri.clone(),
            scopes: config.github_scopes.clone(),
            github_oauth_base: config.github_oauth_base.trim_end_matches('/').to_string(),
            travis_public_base: config.travis.public_api_base.trim_end_matches('/').to_string(),
            travis_private_base: config.travis.private_api_base.trim_end_matches('/').to_string(),
            user_agent: config.travis.user_agent.clone(),
        })
    }

    /// GitHub authorize URL carrying `state`.
    pub fn authorize_url(&self, state: &str) -> Result<Url, OAuthError> {
        let mut url = Url::parse(&format!(
            "{}/login/oauth/authorize",
            self.github_oauth_base
        ))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("client_id", &self.client_id);
            if let Some(redirect_uri) = &self.redirect_uri {
                query.append_pair("redirect_uri", redirect_uri);
            }
            query.append_pair("scope", &self.scopes);
            query.append_pair("state", state);
        }
        Ok(url)
    }

    /// Trade a GitHub authorization code for a GitHub access token.
    pub async fn exchange_code(&self, code: &str) -> Result<String, OAuthError> {
        if code.trim().is_empty() {
            return Err(OAuthError::MissingCode);
        }

        let mut params = vec![
            ("client_id", self.client_id.clone()),
            ("client_secret", self.client_secret.clone()),
            ("code", code.to_string()),
        ];
        if let Some(redirect_uri) = &self.redirect_uri {
            params.push(("redirect_uri", redirect_uri.clone()));
        }

        let response = self
            .http
            .post(format!("{}/login/oauth/access_token", self.github_oauth_base))
            .header("Accept", "application/json")
            .header("User-Agent", &self.user_agent)
            .form(&params)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OAuthError::Upstream {
                service: "github".to_string(),
                status: Some(status.as_u16()),
                message: body,
            });
        }

        // GitHub reports a bad code with 200 and an `error` field.
        let token: GitHubTokenResponse = response.json().await?;
        match (token.access_token, token.error) {
            (Some(access_token), None) if !access_token.is_empty() => Ok(access_token),
            (_, error) => Err(OAuthError::Upstream {
                service: "github".to_string(),
                status: Some(status.as_u16()),
                message: token
                    .error_description
                    .or(error)
                    .unwrap_or_else(|| "no access token returned".to_string()),
            }),
        }
    }

    /// Trade a GitHub access token for a Travis CI access token.
    pub async fn travis_token(
        &self,
        github_token: &str,
        is_private: bool,
    ) -> Result<TravisTokenResponse, OAuthError> {
        let base = if is_private {
            &self.travis_private_base
        } else {
            &self.travis_public_base
        };

        let response = self
            .http
            .post(format!("{}/auth/github", base))
            .header("Accept", TRAVIS_ACCEPT)
            .header("User-Agent", &self.user_agent)
            .json(&serde_json::json!({ "github_token": github_token }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OAuthError::Upstream {
                service: "travis".to_string(),
                status: Some(status.as_u16()),
                message: body,
            });
        }

        Ok(response.json().await?)
    }

    /// Full code → GitHub token → Travis token exchange.
    pub async fn exchange_for_travis_token(
        &self,
        code: &str,
        is_private: bool,
    ) -> Result<TravisTokenResponse, OAuthError> {
        let github_token = self.exchange_code(code).await?;
        let travis = self.travis_token(&github_token, is_private).await?;
        info!(is_private, "Exchanged GitHub code for Travis CI token");
        Ok(travis)
    }
}
