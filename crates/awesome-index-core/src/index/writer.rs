//! Projects persisted changes into the search index.
//!
//! The writer turns a [`Changeset`] into the minimal set of index writes
//! (upserts for inserted and updated projects, deletes for purged ones)
//! and sends them in batches of `batch_size`. Tombstoned projects keep
//! their document until they are purged.
//!
//! Failures never stop the remaining work: a failed document or a failed
//! batch is recorded in the [`IndexReport`] and the writer moves on. The
//! report feeds the run's `partial` outcome, and the reconciler repairs
//! whatever is left.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::IndexWriteFailure;
use crate::models::{IndexDocument, Project};
use crate::normalize::Changeset;

use super::{BatchOutcome, SearchIndex};

/// What a writer call managed to apply.
#[derive(Debug, Clone, Default)]
pub struct IndexReport {
    pub upserted: usize,
    pub deleted: usize,
    pub failures: Vec<IndexWriteFailure>,
}

impl IndexReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    fn merge(&mut self, other: IndexReport) {
        self.upserted += other.upserted;
        self.deleted += other.deleted;
        self.failures.extend(other.failures);
    }
}

/// Batched, failure-isolating writer over a [`SearchIndex`].
#[derive(Clone)]
pub struct IndexWriter {
    index: Arc<dyn SearchIndex>,
    batch_size: usize,
}

impl IndexWriter {
    pub fn new(index: Arc<dyn SearchIndex>, batch_size: usize) -> Self {
        Self {
            index,
            batch_size: batch_size.max(1),
        }
    }

    pub fn index(&self) -> &Arc<dyn SearchIndex> {
        &self.index
    }

    /// Apply the index side of a committed changeset.
    pub async fn apply(&self, changes: &Changeset) -> IndexReport {
        let docs: Vec<IndexDocument> = changes.upserts().map(IndexDocument::from_project).collect();
        let purged: Vec<String> = changes.purges.iter().map(Project::doc_id).collect();

        let mut report = self.upsert_documents(&docs).await;
        report.merge(self.delete_documents(&purged).await);
        report
    }

    /// Re-derive and upsert the documents for `projects`.
    pub async fn upsert_projects(&self, projects: &[Project]) -> IndexReport {
        let docs: Vec<IndexDocument> = projects.iter().map(IndexDocument::from_project).collect();
        self.upsert_documents(&docs).await
    }

    pub async fn upsert_documents(&self, docs: &[IndexDocument]) -> IndexReport {
        let mut report = IndexReport::default();
        for batch in docs.chunks(self.batch_size) {
            let ids: Vec<&str> = batch.iter().map(|d| d.id.as_str()).collect();
            let outcome = self.index.upsert(batch).await;
            report.upserted += record(&mut report.failures, &ids, outcome, "upsert");
        }
        report
    }

    pub async fn delete_documents(&self, doc_ids: &[String]) -> IndexReport {
        let mut report = IndexReport::default();
        for batch in doc_ids.chunks(self.batch_size) {
            let ids: Vec<&str> = batch.iter().map(String::as_str).collect();
            let outcome = self.index.delete(batch).await;
            report.deleted += record(&mut report.failures, &ids, outcome, "delete");
        }
        report
    }
}

/// Fold one batch result into the failure list, returning the applied count.
fn record(
    failures: &mut Vec<IndexWriteFailure>,
    ids: &[&str],
    outcome: anyhow::Result<BatchOutcome>,
    op: &str,
) -> usize {
    match outcome {
        Ok(batch) => {
            debug!(op, applied = batch.applied, failed = batch.failed.len(), "index batch");
            for failure in &batch.failed {
                warn!(op, doc_id = %failure.doc_id, error = %failure.message, "index write failed");
            }
            failures.extend(batch.failed);
            batch.applied
        }
        Err(e) => {
            warn!(op, docs = ids.len(), error = %e, "index batch failed");
            failures.extend(ids.iter().map(|id| IndexWriteFailure {
                doc_id: id.to_string(),
                message: e.to_string(),
            }));
            0
        }
    }
}
