//! Storage abstraction for Awesome Index.
//!
//! The [`Store`] trait is the store of record: sources, projects (live and
//! tombstoned), and the append-only sync-run audit log. Backends are
//! pluggable (SQLite in the native crate, [`memory::InMemoryStore`] for
//! tests).
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Project, Source, SyncRun, ValidationState};
use crate::normalize::Changeset;

/// Result of [`Store::apply_changes`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// All changes committed; the source's generation is now `generation`.
    Committed { generation: i64 },
    /// The source's generation moved since the caller read it. Nothing was written.
    Conflict { expected: i64, found: i64 },
}

/// Abstract store of record.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`register_source`](Store::register_source) | Insert a source if its id is new |
/// | [`get_source`](Store::get_source) | Look up one source |
/// | [`list_sources`](Store::list_sources) | All sources, deprecated included |
/// | [`set_validation`](Store::set_validation) | Record whether the content ref resolved |
/// | [`mark_synced`](Store::mark_synced) | Advance the last-synchronized marker |
/// | [`deprecate_source`](Store::deprecate_source) | Soft-deprecate a source |
/// | [`get_projects`](Store::get_projects) | Projects of one source |
/// | [`all_projects`](Store::all_projects) | Every stored project |
/// | [`apply_changes`](Store::apply_changes) | Atomically persist a changeset |
/// | [`record_run`](Store::record_run) | Append a finalized sync run |
/// | [`list_runs`](Store::list_runs) | Read the audit log, newest first |
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert `source` unless a source with the same id exists.
    ///
    /// Returns `true` if it was inserted.
    async fn register_source(&self, source: &Source) -> Result<bool>;

    async fn get_source(&self, id: &str) -> Result<Option<Source>>;

    async fn list_sources(&self) -> Result<Vec<Source>>;

    /// Record the validation state and the error that produced it, if any.
    async fn set_validation(
        &self,
        id: &str,
        state: ValidationState,
        error: Option<&str>,
    ) -> Result<()>;

    /// Store `fingerprint` as the source's last-synchronized marker.
    async fn mark_synced(&self, id: &str, fingerprint: &str, at: i64) -> Result<()>;

    async fn deprecate_source(&self, id: &str) -> Result<bool>;

    /// Projects of one source, tombstoned ones included, in position order.
    async fn get_projects(&self, source_id: &str) -> Result<Vec<Project>>;

    async fn all_projects(&self) -> Result<Vec<Project>>;

    /// Persist inserts, updates, tombstones, and purges as one atomic unit.
    ///
    /// Succeeds only if the source's generation still equals
    /// `expected_generation`, and bumps it by one.
    async fn apply_changes(
        &self,
        source_id: &str,
        expected_generation: i64,
        changes: &Changeset,
    ) -> Result<ApplyOutcome>;

    /// Append a finalized run. Runs are never updated afterwards.
    async fn record_run(&self, run: &SyncRun) -> Result<()>;

    /// Runs, newest first, optionally for one source.
    async fn list_runs(&self, source_id: Option<&str>, limit: usize) -> Result<Vec<SyncRun>>;
}
