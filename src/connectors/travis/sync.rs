//! Sync orchestration: page one, reconcile, walk backward, finalize.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use tracing::{info, instrument};

use super::client::{BuildSource, TravisClient};
use super::error::SyncError;
use super::paginator::{fetch_pages, gather_all, plan_pages};
use super::reconciler::{merge_pages, reconcile};
use super::types::{BuildRecord, JobRecord, PageRequest, SyncResult, SyncStrategy};
use crate::config::TravisConfig;

/// Everything one sync needs to know about the repository it reads.
#[derive(Debug, Clone)]
pub struct SyncContext {
    /// Repository slug in `owner/repo` form.
    pub slug: String,
    pub is_private: bool,
    /// Row budget, page one included.
    pub row_limit: u64,
    /// Travis access token; required for private repositories.
    pub credential: Option<String>,
}

impl SyncContext {
    /// API path listing this repository's builds.
    pub fn builds_path(&self) -> String {
        format!("repos/{}/builds", self.slug)
    }
}

/// Pagination knobs shared by every sync.
#[derive(Debug, Clone, Copy)]
pub struct SyncSettings {
    pub items_per_page: u64,
    pub max_concurrency: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            items_per_page: 25,
            max_concurrency: 25,
        }
    }
}

/// Runs syncs for one repository against a [`BuildSource`].
#[derive(Clone)]
pub struct TravisSync {
    source: Arc<dyn BuildSource>,
    context: SyncContext,
    settings: SyncSettings,
}

impl TravisSync {
    pub fn new(source: Arc<dyn BuildSource>, context: SyncContext, settings: SyncSettings) -> Self {
        Self {
            source,
            context,
            settings,
        }
    }

    /// Build a sync backed by the live API, choosing the endpoint by visibility.
    pub fn from_config(context: SyncContext, config: &TravisConfig) -> Result<Self, SyncError> {
        if context.is_private
            && context
                .credential
                .as_deref()
                .is_none_or(|token| token.trim().is_empty())
        {
            return Err(SyncError::MissingCredential {
                slug: context.slug.clone(),
            });
        }

        let credential = if context.is_private {
            context.credential.clone()
        } else {
            None
        };

        let client = TravisClient::new(
            config.api_base(context.is_private),
            credential,
            config.user_agent.clone(),
            config.retry_policy(),
            config.request_timeout_secs.map(Duration::from_secs),
        )
        .map_err(|e| SyncError::InvalidConnection(e.to_string()))?;

        let settings = SyncSettings {
            items_per_page: config.items_per_page,
            max_concurrency: config.max_concurrent_requests,
        };

        Ok(Self::new(Arc::new(client), context, settings))
    }

    /// Sync builds newer than `cursor` (0 for a full sync).
    ///
    /// Any failed page fails the sync; no partial result is returned.
    #[instrument(skip(self), fields(slug = %self.context.slug, private = self.context.is_private))]
    pub async fn sync(&self, cursor: u64) -> Result<SyncResult, SyncError> {
        let timer = Instant::now();
        let path = self.context.builds_path();
        let items_per_page = self.settings.items_per_page;

        let first_page = self
            .source
            .fetch_page(&PageRequest::first(path.as_str()))
            .await
            .map_err(SyncError::batch)?;

        let strategy = reconcile(&first_page, cursor, items_per_page);
        let mut pages = vec![first_page];

        if strategy == SyncStrategy::FullFetch {
            let start_cursor = pages[0].oldest_number();
            let plan = plan_pages(
                &path,
                start_cursor,
                self.context.row_limit,
                items_per_page,
                cursor,
            );
            let rest = fetch_pages(Arc::clone(&self.source), plan, self.settings.max_concurrency)
                .await?;
            pages.extend(rest);
        }

        let pages_fetched = pages.len();
        let (builds, commits) = merge_pages(pages, cursor);

        counter!("travis_pages_fetched_total").increment(pages_fetched as u64);
        histogram!("travis_sync_duration_seconds").record(timer.elapsed().as_secs_f64());

        info!(
            %strategy,
            cursor,
            pages_fetched,
            builds = builds.len(),
            commits = commits.len(),
            "Travis sync completed in {:.2}s",
            timer.elapsed().as_secs_f64()
        );

        Ok(SyncResult {
            builds,
            commits,
            strategy,
            pages_fetched,
        })
    }

    /// Fetch every distinct job referenced by `builds`, in first-seen order.
    #[instrument(skip(self, builds), fields(slug = %self.context.slug, builds = builds.len()))]
    pub async fn fetch_jobs(&self, builds: &[BuildRecord]) -> Result<Vec<JobRecord>, SyncError> {
        let mut seen = HashSet::new();
        let job_ids: Vec<u64> = builds
            .iter()
            .flat_map(|build| build.job_ids.iter().copied())
            .filter(|id| seen.insert(*id))
            .collect();

        let source = Arc::clone(&self.source);
        let jobs = gather_all(job_ids, self.settings.max_concurrency, move |job_id| {
            let source = Arc::clone(&source);
            async move { source.fetch_job(job_id).await }
        })
        .await?;

        info!(jobs = jobs.len(), "Fetched Travis jobs");
        Ok(jobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectors::travis::client::FetchError;
    use crate::connectors::travis::types::BuildsPage;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// In-memory repository with builds numbered `1..=newest`.
    struct History {
        newest: u64,
        items_per_page: u64,
        requests: Mutex<Vec<Option<u64>>>,
        failing_job: Option<u64>,
    }

    impl History {
        fn new(newest: u64) -> Self {
            Self {
                newest,
                items_per_page: 25,
                requests: Mutex::new(Vec::new()),
                failing_job: None,
            }
        }

        fn requests(&self) -> Vec<Option<u64>> {
            self.requests.lock().unwrap().clone()
        }
    }

    fn build(number: u64) -> BuildRecord {
        BuildRecord {
            id: 500 + number,
            repository_id: Some(1),
            commit_id: Some(900 + number),
            number,
            pull_request: false,
            pull_request_title: None,
            pull_request_number: None,
            state: "passed".to_string(),
            started_at: None,
            finished_at: None,
            duration: None,
            job_ids: vec![number * 10, number * 10 + 1],
        }
    }

    #[async_trait]
    impl BuildSource for History {
        async fn fetch_page(&self, request: &PageRequest) -> Result<BuildsPage, FetchError> {
            self.requests.lock().unwrap().push(request.after_number);
            let below = request.after_number.unwrap_or(self.newest + 1);
            let high = below.saturating_sub(1).min(self.newest);
            let low = below.saturating_sub(self.items_per_page).max(1);
            let builds = if high == 0 {
                Vec::new()
            } else {
                (low..=high).rev().map(build).collect()
            };
            Ok(BuildsPage {
                builds,
                commits: Vec::new(),
            })
        }

        async fn fetch_job(&self, job_id: u64) -> Result<JobRecord, FetchError> {
            if self.failing_job == Some(job_id) {
                return Err(FetchError::ExhaustedRetries {
                    url: format!("jobs/{job_id}"),
                    attempts: 6,
                    reason: "HTTP 404 Not Found".to_string(),
                });
            }
            Ok(JobRecord {
                id: job_id,
                build_id: Some(job_id / 10 + 500),
                repository_id: Some(1),
                commit_id: None,
                number: Some(format!("{}.{}", job_id / 10, job_id % 10 + 1)),
                state: Some("passed".to_string()),
                started_at: None,
                finished_at: None,
                allow_failure: false,
                queue: None,
            })
        }
    }

    fn sync_for(history: Arc<History>, row_limit: u64) -> TravisSync {
        TravisSync::new(
            history,
            SyncContext {
                slug: "owner/repo".to_string(),
                is_private: false,
                row_limit,
                credential: None,
            },
            SyncSettings::default(),
        )
    }

    fn numbers(result: &SyncResult) -> Vec<u64> {
        result.builds.iter().map(|b| b.number).collect()
    }

    #[tokio::test]
    async fn test_full_sync_of_small_repo_fetches_one_page() {
        let history = Arc::new(History::new(12));
        let result = sync_for(history.clone(), 2500).sync(0).await.unwrap();

        assert_eq!(result.strategy, SyncStrategy::AlreadyComplete);
        assert_eq!(numbers(&result), (1..=12).rev().collect::<Vec<_>>());
        assert_eq!(result.pages_fetched, 1);
        assert_eq!(history.requests(), vec![None]);
    }

    #[tokio::test]
    async fn test_full_sync_walks_back_within_budget() {
        let history = Arc::new(History::new(300));
        let result = sync_for(history.clone(), 100).sync(0).await.unwrap();

        assert_eq!(result.strategy, SyncStrategy::FullFetch);
        // Page one plus three planned pages.
        assert_eq!(result.pages_fetched, 4);
        assert_eq!(numbers(&result), (201..=300).rev().collect::<Vec<_>>());
        assert_eq!(result.high_water_mark(), Some(300));
    }

    #[tokio::test]
    async fn test_full_sync_reaches_first_build() {
        let history = Arc::new(History::new(60));
        let result = sync_for(history, 2500).sync(0).await.unwrap();
        assert_eq!(numbers(&result), (1..=60).rev().collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_partial_suffix_issues_no_extra_requests() {
        let history = Arc::new(History::new(100));
        let result = sync_for(history.clone(), 2500).sync(90).await.unwrap();

        assert_eq!(result.strategy, SyncStrategy::PartialSuffix);
        assert_eq!(numbers(&result), (91..=100).rev().collect::<Vec<_>>());
        assert_eq!(history.requests(), vec![None]);
    }

    #[tokio::test]
    async fn test_incremental_full_fetch_stops_at_watermark() {
        let history = Arc::new(History::new(100));
        let result = sync_for(history.clone(), 2500).sync(40).await.unwrap();

        assert_eq!(result.strategy, SyncStrategy::FullFetch);
        assert_eq!(numbers(&result), (41..=100).rev().collect::<Vec<_>>());
        // Page one covers 100..76; 75..41 needs two more pages.
        assert_eq!(history.requests(), vec![None, Some(76), Some(51)]);
    }

    #[tokio::test]
    async fn test_up_to_date_refresh_returns_nothing() {
        let history = Arc::new(History::new(100));
        let result = sync_for(history, 2500).sync(100).await.unwrap();
        assert!(result.builds.is_empty());
        assert_eq!(result.high_water_mark(), None);
    }

    #[tokio::test]
    async fn test_sync_is_idempotent() {
        let history = Arc::new(History::new(180));
        let sync = sync_for(history, 2500);
        let first = sync.sync(33).await.unwrap();
        let second = sync.sync(33).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_fetch_jobs_deduplicates_ids_in_order() {
        let history = Arc::new(History::new(3));
        let sync = sync_for(history, 2500);
        let mut builds: Vec<BuildRecord> = vec![build(3), build(2)];
        builds.push(build(3));

        let jobs = sync.fetch_jobs(&builds).await.unwrap();
        let ids: Vec<u64> = jobs.iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![30, 31, 20, 21]);
    }

    #[tokio::test]
    async fn test_fetch_jobs_fails_closed() {
        let mut history = History::new(3);
        history.failing_job = Some(21);
        let sync = sync_for(Arc::new(history), 2500);

        let err = sync.fetch_jobs(&[build(3), build(2)]).await.unwrap_err();
        assert!(matches!(err, SyncError::BatchFailure { .. }));
    }

    #[test]
    fn test_private_repo_without_token_is_rejected() {
        let context = SyncContext {
            slug: "owner/secret".to_string(),
            is_private: true,
            row_limit: 2500,
            credential: Some("  ".to_string()),
        };
        let result = TravisSync::from_config(context, &TravisConfig::default());
        assert!(matches!(result, Err(SyncError::MissingCredential { .. })));
    }

    #[test]
    fn test_public_repo_needs_no_token() {
        let context = SyncContext {
            slug: "owner/public".to_string(),
            is_private: false,
            row_limit: 2500,
            credential: None,
        };
        assert!(TravisSync::from_config(context, &TravisConfig::default()).is_ok());
    }
}
