//! Backward pagination over numbered builds.
//!
//! Plans the `after_number` cursors needed to walk history from a start
//! cursor, then fetches every planned page concurrently. A failed page fails
//! the whole batch.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use super::client::{BuildSource, FetchError};
use super::error::SyncError;
use super::types::{BuildsPage, PageRequest};

/// Plan the page requests that follow page one.
///
/// The row budget already includes page one, so at most
/// `(row_limit - items_per_page) / items_per_page` further pages are planned.
/// With a watermark (`until_build > 0`) the plan is also capped at the pages
/// needed to cover every build strictly between `until_build` and
/// `start_cursor`. Cursors step down by `items_per_page` and stop once they
/// reach 1.
pub fn plan_pages(
    path: &str,
    start_cursor: u64,
    row_limit: u64,
    items_per_page: u64,
    until_build: u64,
) -> Vec<PageRequest> {
    if items_per_page == 0 {
        return Vec::new();
    }

    let mut max_pages = row_limit.saturating_sub(items_per_page) / items_per_page;

    if until_build > 0 {
        let remaining = start_cursor.saturating_sub(until_build).saturating_sub(1);
        max_pages = max_pages.min(remaining.div_ceil(items_per_page));
    }

    let mut requests = Vec::new();
    let mut cursor = start_cursor;
    while cursor > 1 && (requests.len() as u64) < max_pages {
        requests.push(PageRequest::after(path, cursor));
        cursor = cursor.saturating_sub(items_per_page);
    }

    debug!(
        start_cursor,
        row_limit,
        until_build,
        planned = requests.len(),
        "Planned backward page walk"
    );

    requests
}

/// Fetch every planned page concurrently; results come back in plan order.
pub async fn fetch_pages(
    source: Arc<dyn BuildSource>,
    requests: Vec<PageRequest>,
    max_concurrency: usize,
) -> Result<Vec<BuildsPage>, SyncError> {
    gather_all(requests, max_concurrency, move |request| {
        let source = Arc::clone(&source);
        async move { source.fetch_page(&request).await }
    })
    .await
}

/// Run `op` over every input with at most `max_concurrency` in flight.
///
/// Outputs keep input order regardless of completion order. The first
/// failure is returned and every task still running is aborted.
pub(crate) async fn gather_all<I, T, F, Fut>(
    inputs: Vec<I>,
    max_concurrency: usize,
    op: F,
) -> Result<Vec<T>, SyncError>
where
    I: Send + 'static,
    T: Send + 'static,
    F: Fn(I) -> Fut,
    Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
{
    let total = inputs.len();
    if total == 0 {
        return Ok(Vec::new());
    }

    let semaphore = Arc::new(Semaphore::new(max_concurrency.max(1)));
    let mut tasks = JoinSet::new();

    for (index, input) in inputs.into_iter().enumerate() {
        let semaphore = Arc::clone(&semaphore);
        let work = op(input);
        tasks.spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .map_err(|e| SyncError::Join(e.to_string()))?;
            work.await.map(|output| (index, output)).map_err(SyncError::batch)
        });
    }

    let mut slots: Vec<Option<T>> = (0..total).map(|_| None).collect();
    while let Some(joined) = tasks.join_next().await {
        let outcome = joined.map_err(|e| SyncError::Join(e.to_string()))?;
        match outcome {
            Ok((index, output)) => slots[index] = Some(output),
            Err(err) => {
                warn!(error = %err, "Concurrent fetch failed, discarding batch");
                tasks.abort_all();
                return Err(err);
            }
        }
    }

    Ok(slots.into_iter().flatten().collect())
}
