//! Travis CI connector
//!
//! Reads builds, commits and jobs for one repository from the Travis CI v2
//! REST API. Builds are walked backward from the newest page and reconciled
//! against the highest build number synced previously.

pub mod client;
pub mod error;
pub mod paginator;
pub mod reconciler;
pub mod sync;
pub mod types;

pub use client::{BuildSource, FetchError, RetryPolicy, TRAVIS_ACCEPT, TravisClient};
pub use error::SyncError;
pub use paginator::{fetch_pages, plan_pages};
pub use reconciler::{merge_pages, reconcile};
pub use sync::{SyncContext, SyncSettings, TravisSync};
pub use types::{
    BuildRecord, BuildsPage, CommitRecord, JobRecord, PageRequest, SyncResult, SyncStrategy,
};
