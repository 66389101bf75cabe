//! Host refresh adapter
//!
//! Maps a host table refresh onto a sync: reads the stored watermark, runs
//! the sync, and reports rows or an abort reason through a [`DataSink`].

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use utoipa::ToSchema;

use crate::config::TravisConfig;
use crate::connectors::schema::TableId;
use crate::connectors::trait_::{ConnectionData, DataSink, RecordingSink};
use crate::connectors::travis::{
    BuildRecord, CommitRecord, JobRecord, SyncError, SyncResult, TravisSync,
};

/// Parse the host's `lastRecord` value into a sync cursor.
///
/// Missing, empty, or non-numeric values mean a full sync.
pub fn parse_last_record(last_record: Option<&str>) -> u64 {
    let Some(raw) = last_record.map(str::trim).filter(|raw| !raw.is_empty()) else {
        return 0;
    };

    match raw.parse::<u64>() {
        Ok(cursor) => cursor,
        Err(_) => {
            warn!(last_record = raw, "Ignoring unparsable lastRecord, running full sync");
            0
        }
    }
}

fn deliver<T, S>(sink: &mut S, outcome: Result<Vec<T>, SyncError>)
where
    S: DataSink<T> + ?Sized,
{
    match outcome {
        Ok(rows) => sink.register_data(rows),
        Err(err) => {
            error!(error = %err, "Refresh aborted");
            sink.abort_with_error(&err.abort_reason());
            sink.register_data(Vec::new());
        }
    }
}

/// Refresh the builds table.
pub async fn refresh_builds<S>(sync: &TravisSync, sink: &mut S, last_record: Option<&str>)
where
    S: DataSink<BuildRecord> + ?Sized,
{
    let cursor = parse_last_record(last_record);
    let outcome = sync.sync(cursor).await.map(|result| result.builds);
    deliver(sink, outcome);
}

/// Refresh the commits table from the commits the synced builds reference.
pub async fn refresh_commits<S>(sync: &TravisSync, sink: &mut S, last_record: Option<&str>)
where
    S: DataSink<CommitRecord> + ?Sized,
{
    let cursor = parse_last_record(last_record);
    let outcome = sync.sync(cursor).await.map(|result| result.commits);
    deliver(sink, outcome);
}

/// Refresh the jobs table with every job of the synced builds.
pub async fn refresh_jobs<S>(sync: &TravisSync, sink: &mut S, last_record: Option<&str>)
where
    S: DataSink<JobRecord> + ?Sized,
{
    let cursor = parse_last_record(last_record);
    let outcome = match sync.sync(cursor).await {
        Ok(SyncResult { builds, .. }) => sync.fetch_jobs(&builds).await,
        Err(err) => Err(err),
    };
    deliver(sink, outcome);
}

/// One table refresh requested over HTTP or from the command line.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct RefreshRequest {
    pub connection: ConnectionData,
    #[serde(default = "default_table")]
    pub table: TableId,
    /// Watermark from the previous refresh of this table.
    #[serde(default)]
    pub last_record: Option<String>,
    /// Travis access token, needed for private repositories.
    #[serde(default)]
    pub token: Option<String>,
}

fn default_table() -> TableId {
    TableId::Builds
}

/// What the connector handed the host.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RefreshOutcome {
    pub table: TableId,
    #[schema(value_type = Vec<Object>)]
    pub rows: Vec<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abort_reason: Option<String>,
}

impl RefreshOutcome {
    pub fn is_aborted(&self) -> bool {
        self.abort_reason.is_some()
    }
}

fn into_outcome<T: Serialize>(table: TableId, sink: RecordingSink<T>) -> RefreshOutcome {
    let abort_reason = sink.abort_reason.clone();
    let rows: Result<Vec<serde_json::Value>, _> =
        sink.into_rows().iter().map(serde_json::to_value).collect();

    match rows {
        Ok(rows) => RefreshOutcome {
            table,
            rows,
            abort_reason,
        },
        Err(err) => {
            error!(%table, error = %err, "Failed to serialize refreshed rows");
            RefreshOutcome {
                table,
                rows: Vec::new(),
                abort_reason: Some(format!("Unable to serialize {table} rows: {err}")),
            }
        }
    }
}

/// Run a full table refresh from raw connection data.
///
/// Invalid connection data aborts the refresh the same way a failed fetch does.
pub async fn refresh_table(config: &TravisConfig, request: RefreshRequest) -> RefreshOutcome {
    let table = request.table;
    let slug = request.connection.repo_slug.clone();
    let last_record = request.last_record.as_deref();

    let sync = request
        .connection
        .clone()
        .into_context(request.token.clone(), config.default_row_limit)
        .and_then(|context| TravisSync::from_config(context, config));

    let sync = match sync {
        Ok(sync) => sync,
        Err(err) => {
            // No rows exist yet, so the row type of the sink does not matter.
            let mut sink = RecordingSink::<BuildRecord>::new();
            deliver(&mut sink, Err(err));
            return into_outcome(table, sink);
        }
    };

    let outcome = match table {
        TableId::Builds => {
            let mut sink = RecordingSink::new();
            refresh_builds(&sync, &mut sink, last_record).await;
            into_outcome(table, sink)
        }
        TableId::Commits => {
            let mut sink = RecordingSink::new();
            refresh_commits(&sync, &mut sink, last_record).await;
            into_outcome(table, sink)
        }
        TableId::Jobs => {
            let mut sink = RecordingSink::new();
            refresh_jobs(&sync, &mut sink, last_record).await;
            into_outcome(table, sink)
        }
    };

    info!(
        %table,
        slug = %slug,
        rows = outcome.rows.len(),
        aborted = outcome.is_aborted(),
        "Table refresh finished"
    );

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectors::travis::{
        BuildSource, BuildsPage, FetchError, PageRequest, SyncContext, SyncSettings,
    };
    use async_trait::async_trait;
    use std::sync::Arc;

    struct OnePage {
        fail: bool,
    }

    #[async_trait]
    impl BuildSource for OnePage {
        async fn fetch_page(&self, _request: &PageRequest) -> Result<BuildsPage, FetchError> {
            if self.fail {
                return Err(FetchError::ExhaustedRetries {
                    url: "https://api.travis-ci.org/repos/a/b/builds".to_string(),
                    attempts: 6,
                    reason: "HTTP 502 Bad Gateway".to_string(),
                });
            }
            Ok(serde_json::from_value(serde_json::json!({
                "builds": [
                    { "id": 3, "commit_id": 30, "number": "3", "job_ids": [31, 32] },
                    { "id": 2, "commit_id": 20, "number": "2", "job_ids": [21] },
                    { "id": 1, "commit_id": 10, "number": "1", "job_ids": [] }
                ],
                "commits": [
                    { "id": 30, "sha": "c" },
                    { "id": 20, "sha": "b" },
                    { "id": 10, "sha": "a" }
                ]
            }))
            .unwrap())
        }

        async fn fetch_job(&self, job_id: u64) -> Result<JobRecord, FetchError> {
            Ok(serde_json::from_value(serde_json::json!({ "id": job_id })).unwrap())
        }
    }

    fn sync(fail: bool) -> TravisSync {
        TravisSync::new(
            Arc::new(OnePage { fail }),
            SyncContext {
                slug: "a/b".to_string(),
                is_private: false,
                row_limit: 2500,
                credential: None,
            },
            SyncSettings::default(),
        )
    }

    #[test]
    fn test_parse_last_record() {
        assert_eq!(parse_last_record(None), 0);
        assert_eq!(parse_last_record(Some("")), 0);
        assert_eq!(parse_last_record(Some("  ")), 0);
        assert_eq!(parse_last_record(Some("1337")), 1337);
        assert_eq!(parse_last_record(Some(" 42 ")), 42);
        assert_eq!(parse_last_record(Some("abc")), 0);
        assert_eq!(parse_last_record(Some("-5")), 0);
    }

    #[tokio::test]
    async fn test_builds_registered_once_in_descending_order() {
        let mut sink = RecordingSink::new();
        refresh_builds(&sync(false), &mut sink, None).await;

        assert_eq!(sink.register_calls, 1);
        assert_eq!(sink.abort_calls, 0);
        let numbers: Vec<u64> = sink.into_rows().iter().map(|b| b.number).collect();
        assert_eq!(numbers, vec![3, 2, 1]);
    }

    #[tokio::test]
    async fn test_incremental_builds_refresh() {
        let mut sink = RecordingSink::new();
        refresh_builds(&sync(false), &mut sink, Some("1")).await;
        let numbers: Vec<u64> = sink.into_rows().iter().map(|b| b.number).collect();
        assert_eq!(numbers, vec![3, 2]);
    }

    #[tokio::test]
    async fn test_failure_aborts_once_then_registers_nothing() {
        let mut sink = RecordingSink::<BuildRecord>::new();
        refresh_builds(&sync(true), &mut sink, None).await;

        assert_eq!(sink.abort_calls, 1);
        assert_eq!(sink.register_calls, 1);
        let reason = sink.abort_reason.clone().unwrap();
        assert!(reason.starts_with("Unable to fetch data:"));
        assert!(sink.into_rows().is_empty());
    }

    #[tokio::test]
    async fn test_commits_follow_builds() {
        let mut sink = RecordingSink::new();
        refresh_commits(&sync(false), &mut sink, Some("2")).await;
        let ids: Vec<u64> = sink.into_rows().iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![30]);
    }

    #[tokio::test]
    async fn test_jobs_collected_from_builds() {
        let mut sink = RecordingSink::new();
        refresh_jobs(&sync(false), &mut sink, None).await;
        let ids: Vec<u64> = sink.into_rows().iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![31, 32, 21]);
    }

    #[tokio::test]
    async fn test_invalid_connection_aborts() {
        let request = RefreshRequest {
            connection: ConnectionData {
                repo_slug: "owner/private".to_string(),
                is_private: true,
                limit: None,
            },
            table: TableId::Commits,
            last_record: None,
            token: None,
        };
        let outcome = refresh_table(&TravisConfig::default(), request).await;
        assert!(outcome.is_aborted());
        assert!(outcome.rows.is_empty());
        assert_eq!(outcome.table, TableId::Commits);
    }

    struct Unserializable;

    impl Serialize for Unserializable {
        fn serialize<S: serde::Serializer>(&self, _serializer: S) -> Result<S::Ok, S::Error> {
            Err(serde::ser::Error::custom("unsupported row"))
        }
    }

    #[test]
    fn test_unserializable_row_aborts_instead_of_dropping() {
        let mut sink = RecordingSink::new();
        sink.register_data(vec![Unserializable, Unserializable]);

        let outcome = into_outcome(TableId::Builds, sink);
        assert!(outcome.rows.is_empty());
        let reason = outcome.abort_reason.unwrap();
        assert!(reason.starts_with("Unable to serialize builds rows"));
        assert!(reason.contains("unsupported row"));
    }
}
