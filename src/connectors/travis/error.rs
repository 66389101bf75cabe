//! Sync-level errors.

use thiserror::Error;

use super::client::FetchError;

/// Failure of a whole sync. Any of these aborts the refresh with no rows.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SyncError {
    #[error("Unable to fetch data: {reason}")]
    BatchFailure { reason: String },

    #[error("Invalid connection data: {0}")]
    InvalidConnection(String),

    #[error("A Travis CI access token is required for private repository {slug}")]
    MissingCredential { slug: String },

    #[error("Sync task failed: {0}")]
    Join(String),
}

impl SyncError {
    pub fn batch(err: FetchError) -> Self {
        SyncError::BatchFailure {
            reason: err.to_string(),
        }
    }

    /// Reason string handed to the host when the refresh is aborted.
    pub fn abort_reason(&self) -> String {
        self.to_string()
    }
}
