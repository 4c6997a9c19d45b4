//! In-memory [`SearchIndex`] for tests.
//!
//! Search is a naive term-count match over name and description. Like
//! every backend, an upsert never replaces a document with a lower
//! revision.
//! Individual document ids can be made to fail, and the whole index can be
//! taken "offline", to exercise partial-failure paths.

use std::collections::{HashMap, HashSet};

use anyhow::{bail, Result};
use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::IndexWriteFailure;
use crate::models::IndexDocument;

use super::{BatchOutcome, SearchHit, SearchIndex, SearchQuery};

/// In-memory search index for tests.
#[derive(Default)]
pub struct InMemoryIndex {
    docs: RwLock<HashMap<String, IndexDocument>>,
    failing: RwLock<HashSet<String>>,
    offline: RwLock<bool>,
    writes: RwLock<usize>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every write touching `doc_id` fail until cleared.
    pub fn fail_on(&self, doc_id: impl Into<String>) {
        self.failing.write().insert(doc_id.into());
    }

    pub fn clear_failures(&self) {
        self.failing.write().clear();
        *self.offline.write() = false;
    }

    /// Reject whole batches while `offline` is set.
    pub fn set_offline(&self, offline: bool) {
        *self.offline.write() = offline;
    }

    pub fn get(&self, doc_id: &str) -> Option<IndexDocument> {
        self.docs.read().get(doc_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.docs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.read().is_empty()
    }

    /// Remove a document without going through the writer.
    pub fn forget(&self, doc_id: &str) {
        self.docs.write().remove(doc_id);
    }

    /// Store a document verbatim, bypassing failure injection.
    pub fn put(&self, doc: IndexDocument) {
        self.docs.write().insert(doc.id.clone(), doc);
    }

    /// Number of upsert/delete calls that reached the index.
    pub fn write_calls(&self) -> usize {
        *self.writes.read()
    }

    fn check_online(&self) -> Result<()> {
        *self.writes.write() += 1;
        if *self.offline.read() {
            bail!("index offline");
        }
        Ok(())
    }
}

#[async_trait]
impl SearchIndex for InMemoryIndex {
    async fn upsert(&self, docs: &[IndexDocument]) -> Result<BatchOutcome> {
        self.check_online()?;
        let failing = self.failing.read();
        let mut stored = self.docs.write();
        let mut outcome = BatchOutcome::default();
        for doc in docs {
            if failing.contains(&doc.id) {
                outcome.failed.push(IndexWriteFailure {
                    doc_id: doc.id.clone(),
                    message: "injected failure".into(),
                });
                continue;
            }
            let superseded = stored
                .get(&doc.id)
                .is_some_and(|current| current.revision > doc.revision);
            if !superseded {
                stored.insert(doc.id.clone(), doc.clone());
            }
            outcome.applied += 1;
        }
        Ok(outcome)
    }

    async fn delete(&self, doc_ids: &[String]) -> Result<BatchOutcome> {
        self.check_online()?;
        let failing = self.failing.read();
        let mut stored = self.docs.write();
        let mut outcome = BatchOutcome::default();
        for id in doc_ids {
            if failing.contains(id) {
                outcome.failed.push(IndexWriteFailure {
                    doc_id: id.clone(),
                    message: "injected failure".into(),
                });
                continue;
            }
            stored.remove(id);
            outcome.applied += 1;
        }
        Ok(outcome)
    }

    async fn revisions(&self, source_id: Option<&str>) -> Result<HashMap<String, i64>> {
        Ok(self
            .docs
            .read()
            .values()
            .filter(|d| source_id.map_or(true, |s| d.source_id == s))
            .map(|d| (d.id.clone(), d.revision))
            .collect())
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchHit>> {
        let text = query.text.to_lowercase();
        let terms: Vec<&str> = text.split_whitespace().collect();
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        let docs = self.docs.read();
        let mut hits: Vec<SearchHit> = docs
            .values()
            .filter(|d| query.source_id.as_deref().map_or(true, |s| d.source_id == s))
            .filter(|d| {
                query
                    .category
                    .as_deref()
                    .map_or(true, |c| d.categories.iter().any(|f| f == c))
            })
            .filter(|d| {
                query.language.as_deref().map_or(true, |l| {
                    d.github_language
                        .as_deref()
                        .is_some_and(|lang| lang.eq_ignore_ascii_case(l))
                })
            })
            .filter_map(|d| {
                let haystack = format!("{} {}", d.name, d.description).to_lowercase();
                let matches = terms.iter().filter(|t| haystack.contains(*t)).count();
                (matches > 0).then(|| SearchHit {
                    id: d.id.clone(),
                    source_id: d.source_id.clone(),
                    name: d.name.clone(),
                    url: d.url.clone(),
                    categories: d.categories.clone(),
                    github_repo: d.github_repo.clone(),
                    github_stars: d.github_stars,
                    github_language: d.github_language.clone(),
                    score: matches as f64,
                    snippet: d.description.chars().take(240).collect(),
                })
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(query.limit.max(1));
        Ok(hits)
    }
}
