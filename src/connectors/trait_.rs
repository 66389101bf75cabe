//! Host contract definitions
//!
//! Defines the connection data the host stores and the sink the connector
//! hands rows to.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use utoipa::ToSchema;

use crate::connectors::travis::{SyncContext, SyncError};

/// Receiver for one table refresh.
///
/// A refresh calls `register_data` exactly once. On failure it first calls
/// `abort_with_error` once, then `register_data` with no rows.
pub trait DataSink<T>: Send {
    fn register_data(&mut self, rows: Vec<T>);

    fn abort_with_error(&mut self, reason: &str);
}

/// Sink that keeps whatever the connector hands it.
#[derive(Debug)]
pub struct RecordingSink<T> {
    pub rows: Option<Vec<T>>,
    pub register_calls: usize,
    pub abort_reason: Option<String>,
    pub abort_calls: usize,
}

impl<T> Default for RecordingSink<T> {
    fn default() -> Self {
        Self {
            rows: None,
            register_calls: 0,
            abort_reason: None,
            abort_calls: 0,
        }
    }
}

impl<T> RecordingSink<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_aborted(&self) -> bool {
        self.abort_reason.is_some()
    }

    pub fn into_rows(self) -> Vec<T> {
        self.rows.unwrap_or_default()
    }
}

impl<T: Send> DataSink<T> for RecordingSink<T> {
    fn register_data(&mut self, rows: Vec<T>) {
        self.register_calls += 1;
        self.rows = Some(rows);
    }

    fn abort_with_error(&mut self, reason: &str) {
        self.abort_calls += 1;
        self.abort_reason = Some(reason.to_string());
    }
}

/// Connection settings as the host stores them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "PascalCase")]
pub struct ConnectionData {
    /// Repository in `owner/repo` form.
    #[serde(default)]
    pub repo_slug: String,
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub is_private: bool,
    /// Row budget; the host sends the form field as a string.
    #[serde(default, deserialize_with = "deserialize_limit")]
    pub limit: Option<u64>,
}

const SLUG_PATTERN: &str = r"^[A-Za-z0-9_.-]+/[A-Za-z0-9_.-]+$";

fn slug_pattern() -> Option<&'static Regex> {
    static SLUG: OnceLock<Option<Regex>> = OnceLock::new();
    SLUG.get_or_init(|| match Regex::new(SLUG_PATTERN) {
        Ok(re) => Some(re),
        Err(err) => {
            tracing::error!(error = %err, "RepoSlug pattern failed to compile");
            None
        }
    })
    .as_ref()
}

impl ConnectionData {
    /// Check the slug shape and that private repositories come with a token.
    pub fn validate(&self, credential: Option<&str>) -> Result<(), SyncError> {
        let slug = self.repo_slug.trim();
        if slug.is_empty() {
            return Err(SyncError::InvalidConnection(
                "RepoSlug is required".to_string(),
            ));
        }
        if !slug_pattern().is_some_and(|re| re.is_match(slug)) {
            return Err(SyncError::InvalidConnection(format!(
                "RepoSlug '{slug}' must look like owner/repo"
            )));
        }
        if self.is_private && credential.is_none_or(|c| c.trim().is_empty()) {
            return Err(SyncError::MissingCredential {
                slug: slug.to_string(),
            });
        }
        Ok(())
    }

    /// Row budget, falling back to `default_limit` when unset or zero.
    pub fn row_limit(&self, default_limit: u64) -> u64 {
        self.limit.filter(|l| *l > 0).unwrap_or(default_limit)
    }

    /// Validate and turn into the context a sync runs with.
    pub fn into_context(
        self,
        credential: Option<String>,
        default_limit: u64,
    ) -> Result<SyncContext, SyncError> {
        self.validate(credential.as_deref())?;
        let row_limit = self.row_limit(default_limit);
        Ok(SyncContext {
            slug: self.repo_slug.trim().to_string(),
            is_private: self.is_private,
            row_limit,
            credential: if self.is_private { credential } else { None },
        })
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Loose {
    Bool(bool),
    Int(u64),
    Text(String),
}

fn deserialize_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Loose>::deserialize(deserializer)? {
        None => Ok(false),
        Some(Loose::Bool(b)) => Ok(b),
        Some(Loose::Int(n)) => Ok(n != 0),
        Some(Loose::Text(text)) => match text.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => Ok(true),
            "false" | "no" | "off" | "0" | "" => Ok(false),
            other => Err(serde::de::Error::custom(format!(
                "IsPrivate '{other}' is not a boolean"
            ))),
        },
    }
}

fn deserialize_limit<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Loose>::deserialize(deserializer)? {
        None | Some(Loose::Bool(_)) => Ok(None),
        Some(Loose::Int(n)) => Ok(Some(n)),
        Some(Loose::Text(text)) if text.trim().is_empty() => Ok(None),
        Some(Loose::Text(text)) => text.trim().parse().map(Some).map_err(|_| {
            serde::de::Error::custom(format!("Limit '{text}' is not a positive integer"))
        }),
    }
}
