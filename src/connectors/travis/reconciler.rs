//! Incremental reconciliation of fetched pages against the stored watermark.

use std::collections::{BTreeMap, HashMap, HashSet};

use super::types::{BuildRecord, BuildsPage, CommitRecord, SyncStrategy};

/// Choose how to complete a sync from page one and the watermark.
///
/// `cursor` is the highest build number already synced, 0 for a full sync.
pub fn reconcile(first_page: &BuildsPage, cursor: u64, items_per_page: u64) -> SyncStrategy {
    let last = first_page.oldest_number();

    let has_more = last > 1;
    let still_has_more = last > cursor;
    let watermark_in_page = last <= cursor
        && cursor <= last.saturating_add(items_per_page.max(1) - 1);

    if has_more && still_has_more {
        SyncStrategy::FullFetch
    } else if cursor > 0 && watermark_in_page {
        SyncStrategy::PartialSuffix
    } else {
        SyncStrategy::AlreadyComplete
    }
}

/// Merge pages into the final row set.
///
/// Builds at or below a non-zero `cursor` are dropped, duplicates by `number`
/// keep their first occurrence in page order, and the result is sorted by
/// `number` descending. Commits are limited to those the surviving builds
/// reference, unique by `id`, in build order.
pub fn merge_pages(
    pages: impl IntoIterator<Item = BuildsPage>,
    cursor: u64,
) -> (Vec<BuildRecord>, Vec<CommitRecord>) {
    let mut builds: BTreeMap<u64, BuildRecord> = BTreeMap::new();
    let mut commits: HashMap<u64, CommitRecord> = HashMap::new();

    for page in pages {
        for build in page.builds {
            if cursor > 0 && build.number <= cursor {
                continue;
            }
            builds.entry(build.number).or_insert(build);
        }
        for commit in page.commits {
            commits.entry(commit.id).or_insert(commit);
        }
    }

    let builds: Vec<BuildRecord> = builds.into_values().rev().collect();

    let mut seen = HashSet::new();
    let commits = builds
        .iter()
        .filter_map(|build| build.commit_id)
        .filter(|id| seen.insert(*id))
        .filter_map(|id| commits.remove(&id))
        .collect();

    (builds, commits)
}
