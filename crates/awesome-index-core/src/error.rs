//! Error taxonomy for the sync pipeline.
//!
//! Extraction problems are never errors: they are counted in
//! [`ExtractStats`](crate::extract::ExtractStats). Index write failures are
//! collected as [`IndexWriteFailure`] values and downgrade a run to
//! `partial` instead of aborting it.

use std::time::Duration;

use thiserror::Error;

/// Failure reported by a [`SourceClient`](crate::client::SourceClient).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    /// The source or its content reference does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The remote asked us to back off.
    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    /// Network error, timeout, or server-side failure. Safe to retry.
    #[error("transient network error: {0}")]
    Transient(String),

    /// Client error other than not-found (bad credentials, malformed request).
    #[error("request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },
}

impl FetchError {
    /// Whether another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FetchError::RateLimited { .. } | FetchError::Transient(_)
        )
    }
}

/// Run-level failure of the sync orchestrator.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("fetch failed for {source_id}: {error}")]
    Fetch {
        source_id: String,
        #[source]
        error: FetchError,
    },

    /// Another writer committed changes for this source mid-run.
    #[error("concurrent write to {source_id}: expected generation {expected}, found {found}")]
    PersistenceConflict {
        source_id: String,
        expected: i64,
        found: i64,
    },

    #[error("unknown source: {0}")]
    UnknownSource(String),

    #[error("source is deprecated: {0}")]
    Deprecated(String),

    /// Cancelled before anything was persisted.
    #[error("sync cancelled before persistence")]
    Cancelled,

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// One index document that could not be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexWriteFailure {
    pub doc_id: String,
    pub message: String,
}

impl std::fmt::Display for IndexWriteFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.doc_id, self.message)
    }
}
