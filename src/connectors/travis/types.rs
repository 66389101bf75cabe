//! Wire and domain types for the Travis CI v2 API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use utoipa::ToSchema;

/// One row of Travis CI build data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct BuildRecord {
    pub id: u64,
    #[serde(default)]
    pub repository_id: Option<u64>,
    #[serde(default)]
    pub commit_id: Option<u64>,
    /// Build number; the API sends it as a decimal string.
    #[serde(deserialize_with = "deserialize_build_number")]
    pub number: u64,
    #[serde(default)]
    pub pull_request: bool,
    #[serde(default)]
    pub pull_request_title: Option<String>,
    #[serde(default)]
    pub pull_request_number: Option<u64>,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration: Option<i64>,
    #[serde(default, deserialize_with = "deserialize_nullable_vec")]
    pub job_ids: Vec<u64>,
}

/// Commit correlated to builds through `commit_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CommitRecord {
    pub id: u64,
    #[serde(default)]
    pub sha: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub committed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub author_name: Option<String>,
    #[serde(default)]
    pub author_email: Option<String>,
    #[serde(default)]
    pub committer_name: Option<String>,
    #[serde(default)]
    pub committer_email: Option<String>,
    #[serde(default)]
    pub compare_url: Option<String>,
    #[serde(default)]
    pub pull_request_number: Option<u64>,
}

/// A single job belonging to a build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct JobRecord {
    pub id: u64,
    #[serde(default)]
    pub build_id: Option<u64>,
    #[serde(default)]
    pub repository_id: Option<u64>,
    #[serde(default)]
    pub commit_id: Option<u64>,
    /// Job number in `build.job` form, e.g. "42.1".
    #[serde(default)]
    pub number: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub allow_failure: bool,
    #[serde(default)]
    pub queue: Option<String>,
}

/// Body of `GET /repos/{slug}/builds`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildsPage {
    pub builds: Vec<BuildRecord>,
    #[serde(default, deserialize_with = "deserialize_nullable_vec")]
    pub commits: Vec<CommitRecord>,
}

impl BuildsPage {
    /// Number of the oldest build on this page, 0 when the page is empty.
    ///
    /// Travis lists builds newest first, so this is the last element in wire
    /// order; the minimum is used so an unexpected ordering cannot move it.
    pub fn oldest_number(&self) -> u64 {
        self.builds.iter().map(|b| b.number).min().unwrap_or(0)
    }

    /// Number of the newest build on this page, 0 when the page is empty.
    pub fn newest_number(&self) -> u64 {
        self.builds.iter().map(|b| b.number).max().unwrap_or(0)
    }
}

/// Body of `GET /jobs/{id}`.
#[derive(Debug, Clone, Deserialize)]
pub struct JobEnvelope {
    pub job: JobRecord,
}

/// A request for one page of builds.
///
/// `after_number: None` is the unfiltered first page; `Some(n)` asks for
/// builds with `number < n`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PageRequest {
    pub path: String,
    pub after_number: Option<u64>,
}

impl PageRequest {
    pub fn first(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            after_number: None,
        }
    }

    pub fn after(path: impl Into<String>, after_number: u64) -> Self {
        Self {
            path: path.into(),
            after_number: Some(after_number),
        }
    }
}

/// Reconciliation strategy chosen from page one and the stored watermark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SyncStrategy {
    /// More history exists past page one; walk backward.
    FullFetch,
    /// The watermark lies inside page one; keep its newer suffix.
    PartialSuffix,
    /// Page one already holds everything that remains.
    AlreadyComplete,
}

impl std::fmt::Display for SyncStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            SyncStrategy::FullFetch => "full_fetch",
            SyncStrategy::PartialSuffix => "partial_suffix",
            SyncStrategy::AlreadyComplete => "already_complete",
        };
        f.write_str(label)
    }
}

/// Final output of one sync.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct SyncResult {
    /// Builds in descending `number` order, unique by `number`.
    pub builds: Vec<BuildRecord>,
    /// Commits referenced by `builds`, unique by `id`.
    pub commits: Vec<CommitRecord>,
    pub strategy: SyncStrategy,
    /// Page requests issued, including page one.
    pub pages_fetched: usize,
}

impl SyncResult {
    /// Highest build number in the result, used by the host as its next watermark.
    pub fn high_water_mark(&self) -> Option<u64> {
        self.builds.first().map(|b| b.number)
    }
}

fn deserialize_build_number<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawNumber {
        Int(u64),
        Text(String),
    }

    match RawNumber::deserialize(deserializer)? {
        RawNumber::Int(n) => Ok(n),
        RawNumber::Text(text) => text.trim().parse::<u64>().map_err(|_| {
            serde::de::Error::custom(format!("build number '{text}' is not an integer"))
        }),
    }
}

fn deserialize_nullable_vec<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}
