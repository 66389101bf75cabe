//! Configuration loading for the Travis CI connector.
//!
//! Loads layered `.env` files and environment variables prefixed with
//! `TRAVIS_WDC_`, producing a typed [`AppConfig`].

use std::{collections::BTreeMap, env, net::SocketAddr, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::connectors::travis::RetryPolicy;

/// Environment variable prefix shared by every setting.
pub const ENV_PREFIX: &str = "TRAVIS_WDC_";

/// Application configuration derived from `TRAVIS_WDC_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct AppConfig {
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default = "default_api_bind_addr")]
    pub api_bind_addr: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub static_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github_client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github_client_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github_redirect_uri: Option<String>,
    #[serde(default = "default_github_oauth_base")]
    pub github_oauth_base: String,
    #[serde(default = "default_github_scopes")]
    pub github_scopes: String,
    #[serde(default)]
    pub oauth_state: OAuthStateConfig,
    #[serde(default)]
    pub travis: TravisConfig,
}

/// Settings for outbound Travis CI API calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct TravisConfig {
    /// API root for public repositories.
    ///
    /// Environment variable: `TRAVIS_WDC_TRAVIS_PUBLIC_API_BASE`
    #[serde(default = "default_travis_public_api_base")]
    pub public_api_base: String,

    /// API root for private repositories.
    ///
    /// Environment variable: `TRAVIS_WDC_TRAVIS_PRIVATE_API_BASE`
    #[serde(default = "default_travis_private_api_base")]
    pub private_api_base: String,

    /// Row budget applied when the connection does not carry a `Limit`.
    #[serde(default = "default_row_limit")]
    pub default_row_limit: u64,

    /// Number of builds the API returns per page.
    #[serde(default = "default_items_per_page")]
    pub items_per_page: u64,

    /// Additional attempts after the first failed request for one page.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay between attempts; 0 retries immediately.
    #[serde(default)]
    pub retry_backoff_ms: u64,

    /// Upper bound on page requests in flight at once.
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,

    /// Optional whole-request timeout; unset leaves the HTTP client default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout_secs: Option<u64>,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

/// Lifetime and capacity of issued OAuth `state` values.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct OAuthStateConfig {
    #[serde(default = "default_oauth_state_ttl_seconds")]
    pub ttl_seconds: u64,
    #[serde(default = "default_oauth_state_capacity")]
    pub capacity: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            api_bind_addr: default_api_bind_addr(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            static_dir: None,
            github_client_id: None,
            github_client_secret: None,
            github_redirect_uri: None,
            github_oauth_base: default_github_oauth_base(),
            github_scopes: default_github_scopes(),
            oauth_state: OAuthStateConfig::default(),
            travis: TravisConfig::default(),
        }
    }
}

impl Default for TravisConfig {
    fn default() -> Self {
        Self {
            public_api_base: default_travis_public_api_base(),
            private_api_base: default_travis_private_api_base(),
            default_row_limit: default_row_limit(),
            items_per_page: default_items_per_page(),
            max_retries: default_max_retries(),
            retry_backoff_ms: 0,
            max_concurrent_requests: default_max_concurrent_requests(),
            request_timeout_secs: None,
            user_agent: default_user_agent(),
        }
    }
}

impl Default for OAuthStateConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_oauth_state_ttl_seconds(),
            capacity: default_oauth_state_capacity(),
        }
    }
}

impl TravisConfig {
    /// Validate pagination and retry bounds
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.items_per_page == 0 {
            return Err(ConfigError::InvalidItemsPerPage {
                value: self.items_per_page,
            });
        }

        if self.default_row_limit < self.items_per_page {
            return Err(ConfigError::InvalidRowLimit {
                value: self.default_row_limit,
                items_per_page: self.items_per_page,
            });
        }

        if self.max_retries > 20 {
            return Err(ConfigError::InvalidMaxRetries {
                value: self.max_retries,
            });
        }

        if self.max_concurrent_requests == 0 || self.max_concurrent_requests > 100 {
            return Err(ConfigError::InvalidConcurrency {
                value: self.max_concurrent_requests,
            });
        }

        for base in [&self.public_api_base, &self.private_api_base] {
            if url::Url::parse(base).is_err() {
                return Err(ConfigError::InvalidUrl {
                    field: "travis api base".to_string(),
                    value: base.clone(),
                });
            }
        }

        Ok(())
    }

    /// Per-request retry policy derived from these settings.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.retry_backoff_ms),
        }
    }

    /// API root for a repository's visibility.
    pub fn api_base(&self, is_private: bool) -> &str {
        if is_private {
            &self.private_api_base
        } else {
            &self.public_api_base
        }
    }
}

impl OAuthStateConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ttl_seconds < 60 || self.ttl_seconds > 86400 {
            return Err(ConfigError::InvalidOAuthStateTtl {
                value: self.ttl_seconds,
            });
        }
        if self.capacity == 0 {
            return Err(ConfigError::InvalidOAuthStateCapacity {
                value: self.capacity,
            });
        }
        Ok(())
    }
}

impl AppConfig {
    /// Returns the configured bind address as a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        self.api_bind_addr.parse()
    }

    /// Returns a redacted JSON representation (secrets are redacted).
    pub fn redacted_json(&self) -> serde_json::Result<String> {
        let mut config = self.clone();
        if config.github_client_id.is_some() {
            config.github_client_id = Some("[REDACTED]".to_string());
        }
        if config.github_client_secret.is_some() {
            config.github_client_secret = Some("[REDACTED]".to_string());
        }
        serde_json::to_string_pretty(&config)
    }

    /// Whether GitHub OAuth credentials are present.
    pub fn oauth_enabled(&self) -> bool {
        self.github_client_id.is_some() && self.github_client_secret.is_some()
    }

    /// Validates the configuration, returning an error if required settings are missing.
    pub fn validate(&self) -> Result<(), ConfigError> {
        // GitHub credentials are only required outside local/test
        if !matches!(self.profile.as_str(), "local" | "test") {
            if self.github_client_id.is_none() {
                return Err(ConfigError::MissingGitHubClientId);
            }
            if self.github_client_secret.is_none() {
                return Err(ConfigError::MissingGitHubClientSecret);
            }
        }

        if url::Url::parse(&self.github_oauth_base).is_err() {
            return Err(ConfigError::InvalidUrl {
                field: "github oauth base".to_string(),
                value: self.github_oauth_base.clone(),
            });
        }

        if let Some(redirect) = &self.github_redirect_uri
            && url::Url::parse(redirect).is_err()
        {
            return Err(ConfigError::InvalidUrl {
                field: "github redirect uri".to_string(),
                value: redirect.clone(),
            });
        }

        if !matches!(self.log_format.as_str(), "json" | "pretty") {
            return Err(ConfigError::InvalidLogFormat {
                value: self.log_format.clone(),
            });
        }

        self.travis.validate()?;
        self.oauth_state.validate()?;

        Ok(())
    }
}

fn default_profile() -> String {
    "local".to_string()
}

fn default_api_bind_addr() -> String {
    "0.0.0.0:9001".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_github_oauth_base() -> String {
    "https://github.com".to_string()
}

fn default_github_scopes() -> String {
    "read:org user:email repo_deployment repo:status write:repo_hook repo".to_string()
}

fn default_travis_public_api_base() -> String {
    "https://api.travis-ci.org".to_string()
}

fn default_travis_private_api_base() -> String {
    "https://api.travis-ci.com".to_string()
}

fn default_row_limit() -> u64 {
    2500
}

fn default_items_per_page() -> u64 {
    25
}

fn default_max_retries() -> u32 {
    5
}

fn default_max_concurrent_requests() -> usize {
    25
}

fn default_user_agent() -> String {
    format!("TravisWebDataConnector/{}", env!("CARGO_PKG_VERSION"))
}

fn default_oauth_state_ttl_seconds() -> u64 {
    900 // 15 minutes
}

fn default_oauth_state_capacity() -> usize {
    1024
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load environment file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        source: dotenvy::Error,
    },
    #[error("invalid api bind address '{value}': {source}")]
    InvalidBindAddr {
        value: String,
        source: std::net::AddrParseError,
    },
    #[error("GitHub client ID is missing; set TRAVIS_WDC_GITHUB_CLIENT_ID")]
    MissingGitHubClientId,
    #[error("GitHub client secret is missing; set TRAVIS_WDC_GITHUB_CLIENT_SECRET")]
    MissingGitHubClientSecret,
    #[error("invalid {field} '{value}'")]
    InvalidUrl { field: String, value: String },
    #[error("log format must be 'json' or 'pretty', got '{value}'")]
    InvalidLogFormat { value: String },
    #[error("items per page must be positive, got {value}")]
    InvalidItemsPerPage { value: u64 },
    #[error("default row limit ({value}) must be at least one page ({items_per_page})")]
    InvalidRowLimit { value: u64, items_per_page: u64 },
    #[error("max retries must be at most 20, got {value}")]
    InvalidMaxRetries { value: u32 },
    #[error("max concurrent requests must be between 1 and 100, got {value}")]
    InvalidConcurrency { value: usize },
    #[error("oauth state ttl must be between 60 and 86400 seconds, got {value}")]
    InvalidOAuthStateTtl { value: u64 },
    #[error("oauth state capacity must be positive, got {value}")]
    InvalidOAuthStateCapacity { value: usize },
}

/// Loads configuration using layered `.env` files and `TRAVIS_WDC_*` env vars.
pub struct ConfigLoader {
    base_dir: PathBuf,
}

impl ConfigLoader {
    /// Creates a new loader rooted at the current working directory.
    pub fn new() -> Self {
        Self {
            base_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// Creates a loader rooted at the provided directory (useful for tests).
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Loads `.env`, `.env.local`, `.env.{profile}`, `.env.{profile}.local`,
    /// then the process environment, later layers winning.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let (mut layered, profile_hint) = self.collect_layered_env()?;

        // Overlay process environment last so it wins.
        for (key, value) in env::vars() {
            if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                layered.insert(stripped.to_string(), value);
            }
        }

        let profile = take_non_empty(&mut layered, "PROFILE").unwrap_or(profile_hint);
        let api_bind_addr =
            take_non_empty(&mut layered, "API_BIND_ADDR").unwrap_or_else(default_api_bind_addr);
        let log_level = take_non_empty(&mut layered, "LOG_LEVEL").unwrap_or_else(default_log_level);
        let log_format =
            take_non_empty(&mut layered, "LOG_FORMAT").unwrap_or_else(default_log_format);
        let static_dir = take_non_empty(&mut layered, "STATIC_DIR").map(PathBuf::from);

        let github_client_id = take_non_empty(&mut layered, "GITHUB_CLIENT_ID");
        let github_client_secret = take_non_empty(&mut layered, "GITHUB_CLIENT_SECRET");
        let github_redirect_uri = take_non_empty(&mut layered, "GITHUB_REDIRECT_URI");
        let github_oauth_base = take_non_empty(&mut layered, "GITHUB_OAUTH_BASE")
            .map(|base| base.trim_end_matches('/').to_string())
            .unwrap_or_else(default_github_oauth_base);
        let github_scopes =
            take_non_empty(&mut layered, "GITHUB_SCOPES").unwrap_or_else(default_github_scopes);

        let oauth_state = OAuthStateConfig {
            ttl_seconds: take_parsed(&mut layered, "OAUTH_STATE_TTL_SECONDS")
                .unwrap_or_else(default_oauth_state_ttl_seconds),
            capacity: take_parsed(&mut layered, "OAUTH_STATE_CAPACITY")
                .unwrap_or_else(default_oauth_state_capacity),
        };

        let travis = TravisConfig {
            public_api_base: take_non_empty(&mut layered, "TRAVIS_PUBLIC_API_BASE")
                .map(|base| base.trim_end_matches('/').to_string())
                .unwrap_or_else(default_travis_public_api_base),
            private_api_base: take_non_empty(&mut layered, "TRAVIS_PRIVATE_API_BASE")
                .map(|base| base.trim_end_matches('/').to_string())
                .unwrap_or_else(default_travis_private_api_base),
            default_row_limit: take_parsed(&mut layered, "TRAVIS_DEFAULT_ROW_LIMIT")
                .unwrap_or_else(default_row_limit),
            items_per_page: take_parsed(&mut layered, "TRAVIS_ITEMS_PER_PAGE")
                .unwrap_or_else(default_items_per_page),
            max_retries: take_parsed(&mut layered, "TRAVIS_MAX_RETRIES")
                .unwrap_or_else(default_max_retries),
            retry_backoff_ms: take_parsed(&mut layered, "TRAVIS_RETRY_BACKOFF_MS").unwrap_or(0),
            max_concurrent_requests: take_parsed(&mut layered, "TRAVIS_MAX_CONCURRENT_REQUESTS")
                .unwrap_or_else(default_max_concurrent_requests),
            request_timeout_secs: take_parsed(&mut layered, "TRAVIS_REQUEST_TIMEOUT_SECS"),
            user_agent: take_non_empty(&mut layered, "TRAVIS_USER_AGENT")
                .unwrap_or_else(default_user_agent),
        };

        let config = AppConfig {
            profile,
            api_bind_addr,
            log_level,
            log_format,
            static_dir,
            github_client_id,
            github_client_secret,
            github_redirect_uri,
            github_oauth_base,
            github_scopes,
            oauth_state,
            travis,
        };

        config.validate()?;

        match config.bind_addr() {
            Ok(_) => Ok(config),
            Err(source) => Err(ConfigError::InvalidBindAddr {
                value: config.api_bind_addr.clone(),
                source,
            }),
        }
    }

    fn collect_layered_env(&self) -> Result<(BTreeMap<String, String>, String), ConfigError> {
        let mut values = BTreeMap::new();

        self.merge_dotenv(self.base_dir.join(".env"), &mut values)?;
        self.merge_dotenv(self.base_dir.join(".env.local"), &mut values)?;

        let profile = env::var(format!("{ENV_PREFIX}PROFILE"))
            .ok()
            .or_else(|| values.get("PROFILE").cloned())
            .unwrap_or_else(default_profile);

        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}", &profile)),
            &mut values,
        )?;
        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}.local", &profile)),
            &mut values,
        )?;

        Ok((values, profile))
    }

    fn merge_dotenv(
        &self,
        path: PathBuf,
        values: &mut BTreeMap<String, String>,
    ) -> Result<(), ConfigError> {
        match dotenvy::from_path_iter(&path) {
            Ok(iter) => {
                for item in iter {
                    let (key, value) = item.map_err(|source| ConfigError::EnvFile {
                        path: path.clone(),
                        source,
                    })?;
                    if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                        values.insert(stripped.to_string(), value);
                    }
                }
                Ok(())
            }
            Err(dotenvy::Error::Io(ref io_err))
                if io_err.kind() == std::io::ErrorKind::NotFound =>
            {
                Ok(())
            }
            Err(err) => Err(ConfigError::EnvFile { path, source: err }),
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn take_non_empty(layered: &mut BTreeMap<String, String>, key: &str) -> Option<String> {
    layered
        .remove(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn take_parsed<T: std::str::FromStr>(layered: &mut BTreeMap<String, String>, key: &str) -> Option<T> {
    layered.remove(key).and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.travis.default_row_limit, 2500);
        assert_eq!(config.travis.items_per_page, 25);
        assert_eq!(config.travis.max_retries, 5);
    }

    #[test]
    fn test_production_profile_requires_github_credentials() {
        let config = AppConfig {
            profile: "production".to_string(),
            ..AppConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingGitHubClientId)
        ));

        let config = AppConfig {
            profile: "production".to_string(),
            github_client_id: Some("id".to_string()),
            github_client_secret: Some("secret".to_string()),
            ..AppConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_travis_bounds_validation() {
        let mut travis = TravisConfig {
            items_per_page: 0,
            ..TravisConfig::default()
        };
        assert!(travis.validate().is_err());

        travis.items_per_page = 25;
        travis.default_row_limit = 10;
        assert!(travis.validate().is_err());

        travis.default_row_limit = 2500;
        travis.max_concurrent_requests = 0;
        assert!(travis.validate().is_err());

        travis.max_concurrent_requests = 8;
        assert!(travis.validate().is_ok());
    }

    #[test]
    fn test_api_base_follows_visibility() {
        let travis = TravisConfig::default();
        assert_eq!(travis.api_base(true), "https://api.travis-ci.com");
        assert_eq!(travis.api_base(false), "https://api.travis-ci.org");
    }

    #[test]
    fn test_redacted_json_hides_secrets() {
        let config = AppConfig {
            github_client_id: Some("client-id-value".to_string()),
            github_client_secret: Some("client-secret-value".to_string()),
            ..AppConfig::default()
        };
        let json = config.redacted_json().unwrap();
        assert!(!json.contains("client-secret-value"));
        assert!(!json.contains("client-id-value"));
        assert!(json.contains("[REDACTED]"));
    }
}
