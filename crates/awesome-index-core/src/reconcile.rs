//! Drift detection and repair between the store and the search index.
//!
//! A reconciliation pass enumerates every stored project and every indexed
//! document, then classifies the differences:
//!
//! - **missing**: a project with no document
//! - **stale**: a document whose revision differs from its project's
//! - **orphan**: a document with no stored project, e.g. a purge whose
//!   delete failed
//!
//! Missing and stale documents are re-derived from the project and
//! upserted; orphans are deleted. Both go through the idempotent
//! [`IndexWriter`], so a pass over an unchanged store converges: the next
//! pass finds no drift.
//!
//! A sync may commit and index between the two reads. Repairs are
//! therefore derived from a second store read taken after the index was
//! enumerated, and an orphan is only deleted if that read confirms its
//! project is gone. Index upserts never lower a document's revision, so a
//! repair built from an older snapshot cannot overwrite newer work.
//!
//! The one legitimate revision drop is a project that was purged (its
//! delete failed) and later re-inserted at revision 1. The leftover
//! document outranks it, so the reconciler deletes it before re-upserting.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

use crate::error::IndexWriteFailure;
use crate::index::IndexWriter;
use crate::models::Project;
use crate::store::Store;

/// Drift found (and repaired) by one pass.
#[derive(Debug, Clone, Default)]
pub struct DriftReport {
    pub projects: usize,
    pub documents: usize,
    pub missing: Vec<String>,
    pub stale: Vec<String>,
    pub orphans: Vec<String>,
    pub repaired: usize,
    pub failures: Vec<IndexWriteFailure>,
}

impl DriftReport {
    pub fn drift(&self) -> usize {
        self.missing.len() + self.stale.len() + self.orphans.len()
    }

    pub fn is_consistent(&self) -> bool {
        self.drift() == 0
    }
}

/// Audits and repairs the index against the store.
pub struct Reconciler {
    store: Arc<dyn Store>,
    writer: IndexWriter,
}

impl Reconciler {
    pub fn new(store: Arc<dyn Store>, writer: IndexWriter) -> Self {
        Self { store, writer }
    }

    /// Run one detect-and-repair pass over every source.
    pub async fn reconcile(&self) -> Result<DriftReport> {
        let projects = self.store.all_projects().await?;
        let indexed = self.writer.index().revisions(None).await?;

        let mut report = detect(&projects, &indexed);
        if report.is_consistent() {
            info!(projects = report.projects, documents = report.documents, "index consistent");
            return Ok(report);
        }
        warn!(
            missing = report.missing.len(),
            stale = report.stale.len(),
            orphans = report.orphans.len(),
            "index drift detected"
        );

        // Re-read after enumerating the index: anything committed since is visible here
        let fresh = self.store.all_projects().await?;
        let by_doc: HashMap<String, &Project> = fresh.iter().map(|p| (p.doc_id(), p)).collect();

        let mut to_upsert: Vec<Project> = Vec::new();
        let mut to_delete: Vec<String> = Vec::new();
        for id in report.missing.iter().chain(report.stale.iter()) {
            let Some(project) = by_doc.get(id) else {
                // purged since the first read; an orphan for the next pass
                continue;
            };
            if indexed.get(id).is_some_and(|&rev| rev > project.revision) {
                to_delete.push(id.clone());
            }
            to_upsert.push((*project).clone());
        }
        to_delete.extend(
            report
                .orphans
                .iter()
                .filter(|id| !by_doc.contains_key(*id))
                .cloned(),
        );

        let deleted = self.writer.delete_documents(&to_delete).await;
        let upserted = self.writer.upsert_projects(&to_upsert).await;
        report.repaired = upserted.upserted + deleted.deleted;
        report.failures.extend(deleted.failures);
        report.failures.extend(upserted.failures);

        info!(repaired = report.repaired, failed = report.failures.len(), "reconciliation pass done");
        Ok(report)
    }
}

/// Classify drift between stored projects and indexed `doc id → revision`.
pub fn detect(projects: &[Project], indexed: &HashMap<String, i64>) -> DriftReport {
    let mut report = DriftReport {
        projects: projects.len(),
        documents: indexed.len(),
        ..DriftReport::default()
    };
    let mut live: HashMap<String, i64> = HashMap::with_capacity(projects.len());
    for project in projects {
        let id = project.doc_id();
        match indexed.get(&id) {
            None => report.missing.push(id.clone()),
            Some(&rev) if rev != project.revision => report.stale.push(id.clone()),
            Some(_) => {}
        }
        live.insert(id, project.revision);
    }
    report.orphans = indexed
        .keys()
        .filter(|id| !live.contains_key(*id))
        .cloned()
        .collect();
    report.missing.sort();
    report.stale.sort();
    report.orphans.sort();
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::memory::InMemoryIndex;
    use crate::index::{BatchOutcome, SearchHit, SearchIndex, SearchQuery};
    use crate::models::{CandidateEntry, IndexDocument, Source};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use crate::normalize::{diff, TombstonePolicy};
    use crate::store::memory::InMemoryStore;

    async fn seeded(n: usize) -> (Arc<InMemoryStore>, Arc<InMemoryIndex>, Reconciler) {
        let store = Arc::new(InMemoryStore::new());
        let index = Arc::new(InMemoryIndex::new());
        store.register_source(&Source::new("o/list", "HEAD")).await.unwrap();
        let entries: Vec<CandidateEntry> = (0..n)
            .map(|i| CandidateEntry {
                name: format!("P{}", i),
                target: format!("https://p{}.example.com", i),
                description: None,
                category_path: vec![],
                position: i,
                line: i + 1,
            })
            .collect();
        let changes = diff("o/list", &[], entries, "fp", TombstonePolicy::default(), 0);
        store.apply_changes("o/list", 0, &changes).await.unwrap();
        let writer = IndexWriter::new(index.clone(), 50);
        writer.apply(&changes).await;
        let reconciler = Reconciler::new(store.clone(), writer);
        (store, index, reconciler)
    }

    #[tokio::test]
    async fn test_consistent_store_has_no_drift() {
        let (_store, _index, reconciler) = seeded(4).await;
        let report = reconciler.reconcile().await.unwrap();
        assert!(report.is_consistent());
        assert_eq!(report.projects, 4);
        assert_eq!(report.documents, 4);
    }

    #[tokio::test]
    async fn test_missing_documents_converge() {
        let (store, index, reconciler) = seeded(10).await;
        let projects = store.all_projects().await.unwrap();
        let mut dropped: Vec<String> = projects.iter().take(3).map(|p| p.doc_id()).collect();
        for id in &dropped {
            index.forget(id);
        }

        let first = reconciler.reconcile().await.unwrap();
        dropped.sort();
        assert_eq!(first.missing, dropped);
        assert!(first.stale.is_empty());
        assert!(first.orphans.is_empty());
        assert_eq!(first.repaired, 3);
        assert_eq!(index.len(), 10);

        let second = reconciler.reconcile().await.unwrap();
        assert!(second.is_consistent());
    }

    #[tokio::test]
    async fn test_stale_and_orphan_repaired() {
        let (store, index, reconciler) = seeded(2).await;
        let mut project = store.get_projects("o/list").await.unwrap().remove(0);
        project.revision += 1;
        project.name = "Renamed".into();
        store.overwrite_project(project.clone());

        let mut orphan = IndexDocument::from_project(&project);
        orphan.id = "orphan".into();
        index.put(orphan);

        let first = reconciler.reconcile().await.unwrap();
        assert_eq!(first.stale, vec![project.doc_id()]);
        assert_eq!(first.orphans, vec!["orphan".to_string()]);
        let doc = index.get(&project.doc_id()).unwrap();
        assert_eq!(doc.revision, project.revision);
        assert_eq!(doc.name, "Renamed");
        assert!(index.get("orphan").is_none());

        assert!(reconciler.reconcile().await.unwrap().is_consistent());
    }

    #[tokio::test]
    async fn test_failed_repair_stays_detectable() {
        let (store, index, reconciler) = seeded(2).await;
        let victim = store.all_projects().await.unwrap()[0].doc_id();
        index.forget(&victim);
        index.fail_on(victim.clone());

        let first = reconciler.reconcile().await.unwrap();
        assert_eq!(first.failures.len(), 1);
        let second = reconciler.reconcile().await.unwrap();
        assert_eq!(second.missing, vec![victim]);

        index.clear_failures();
        reconciler.reconcile().await.unwrap();
        assert!(reconciler.reconcile().await.unwrap().is_consistent());
    }

    /// Commits and indexes `pending` while the index is being enumerated,
    /// the way a concurrent sync would.
    struct SyncDuringEnumeration {
        inner: Arc<InMemoryIndex>,
        store: Arc<InMemoryStore>,
        pending: Mutex<Vec<Project>>,
    }

    #[async_trait]
    impl SearchIndex for SyncDuringEnumeration {
        async fn upsert(&self, docs: &[IndexDocument]) -> Result<BatchOutcome> {
            self.inner.upsert(docs).await
        }

        async fn delete(&self, doc_ids: &[String]) -> Result<BatchOutcome> {
            self.inner.delete(doc_ids).await
        }

        async fn revisions(&self, source_id: Option<&str>) -> Result<HashMap<String, i64>> {
            let pending = std::mem::take(&mut *self.pending.lock());
            for project in pending {
                self.store.overwrite_project(project.clone());
                self.inner.put(IndexDocument::from_project(&project));
            }
            self.inner.revisions(source_id).await
        }

        async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchHit>> {
            self.inner.search(query).await
        }
    }

    #[tokio::test]
    async fn test_concurrent_sync_is_not_overwritten() {
        let (store, index, _) = seeded(2).await;
        let projects = store.get_projects("o/list").await.unwrap();
        // drift so the pass has work to do
        index.forget(&projects[0].doc_id());

        let updated = Project {
            name: "NEW".into(),
            revision: 2,
            ..projects[0].clone()
        };
        let inserted = Project {
            name: "Added".into(),
            url: "https://added.example.com".into(),
            position: 2,
            ..projects[1].clone()
        };
        let racing = Arc::new(SyncDuringEnumeration {
            inner: index.clone(),
            store: store.clone(),
            pending: Mutex::new(vec![updated.clone(), inserted.clone()]),
        });
        let reconciler = Reconciler::new(store.clone(), IndexWriter::new(racing, 50));

        let first = reconciler.reconcile().await.unwrap();
        // the snapshot predates the sync: rev 1 vs indexed rev 2, plus an unknown doc
        assert_eq!(first.stale, vec![updated.doc_id()]);
        assert_eq!(first.orphans, vec![inserted.doc_id()]);

        let doc = index.get(&updated.doc_id()).unwrap();
        assert_eq!(doc.revision, 2);
        assert_eq!(doc.name, "NEW");
        assert!(index.get(&inserted.doc_id()).is_some());

        assert!(reconciler.reconcile().await.unwrap().is_consistent());
    }

    #[tokio::test]
    async fn test_reinserted_project_replaces_leftover_document() {
        let (store, index, reconciler) = seeded(1).await;
        let project = store.get_projects("o/list").await.unwrap().remove(0);
        // leftover from a purge whose delete failed
        index.put(IndexDocument::from_project(&Project {
            name: "Old".into(),
            revision: 5,
            ..project.clone()
        }));

        let first = reconciler.reconcile().await.unwrap();
        assert_eq!(first.stale, vec![project.doc_id()]);
        let doc = index.get(&project.doc_id()).unwrap();
        assert_eq!(doc.revision, 1);
        assert_eq!(doc.name, project.name);
        assert!(reconciler.reconcile().await.unwrap().is_consistent());
    }
}
