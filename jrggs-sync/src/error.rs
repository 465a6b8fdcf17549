//! Error types for jrggs-sync
//!
//! Background ticks classify errors to decide whether a failure is local to
//! one work item (mark it FAILED, keep the batch going) or belongs to the
//! whole tick (log it and wait for the next tick). Workflow actions return
//! errors synchronously to their caller.

use crate::source::SourceError;
use thiserror::Error;

/// Engine error taxonomy
#[derive(Debug, Error)]
pub enum SyncError {
    /// Adapter timeout or network failure
    #[error("Fetch failed: {0}")]
    TransientFetch(String),

    /// Malformed history or missing field while deriving metrics
    #[error("Computation failed: {0}")]
    Computation(String),

    /// Approval against a stale snapshot
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Malformed or disallowed request input
    #[error("Invalid request: {0}")]
    Validation(String),

    /// Target resource does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Caller lacks the role or ownership required for the action
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Store, config or serialization failure from jrggs-common
    #[error(transparent)]
    Common(#[from] jrggs_common::Error),
}

impl SyncError {
    /// Errors that mark a single work item FAILED without aborting the batch
    pub fn is_item_local(&self) -> bool {
        matches!(self, SyncError::TransientFetch(_) | SyncError::Computation(_))
    }
}

impl From<SourceError> for SyncError {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::Network(_) | SourceError::Timeout(_) | SourceError::Api(_, _) => {
                SyncError::TransientFetch(err.to_string())
            }
            SourceError::Parse(_) => SyncError::Computation(err.to_string()),
        }
    }
}

impl From<sqlx::Error> for SyncError {
    fn from(err: sqlx::Error) -> Self {
        SyncError::Common(jrggs_common::Error::Database(err))
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Common(jrggs_common::Error::Serialization(err))
    }
}

/// Result type for engine operations
pub type SyncResult<T> = Result<T, SyncError>;
