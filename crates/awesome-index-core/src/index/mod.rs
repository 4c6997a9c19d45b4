//! Search index abstraction.
//!
//! The index is a derived, eventually-consistent view of the store. Every
//! write is an idempotent upsert or delete keyed by document id, so
//! repeating a write after a failure or a crash is always safe.
//!
//! [`IndexWriter`] batches the writes produced by a sync run;
//! [`memory::InMemoryIndex`] is a test backend that can be told to fail.

pub mod memory;
pub mod writer;

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use crate::error::IndexWriteFailure;
use crate::models::IndexDocument;

pub use writer::{IndexReport, IndexWriter};

/// Per-document result of a batch write.
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    pub applied: usize,
    pub failed: Vec<IndexWriteFailure>,
}

/// Filters and limits for [`SearchIndex::search`].
#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    pub text: String,
    pub source_id: Option<String>,
    /// Matches documents whose category facets contain this value.
    pub category: Option<String>,
    /// Repository language, compared case-insensitively.
    pub language: Option<String>,
    pub limit: usize,
}

/// One ranked search result.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub id: String,
    pub source_id: String,
    pub name: String,
    pub url: String,
    pub categories: Vec<String>,
    pub github_repo: Option<String>,
    pub github_stars: Option<i64>,
    pub github_language: Option<String>,
    pub score: f64,
    pub snippet: String,
}

/// Abstract full-text search backend.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`upsert`](SearchIndex::upsert) | Insert or replace documents by id |
/// | [`delete`](SearchIndex::delete) | Remove documents by id; missing ids are not errors |
/// | [`revisions`](SearchIndex::revisions) | Enumerate `doc id → revision` for drift checks |
/// | [`search`](SearchIndex::search) | Ranked full-text query |
#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Write each document with its revision in the same write.
    ///
    /// A document whose indexed revision is higher than the incoming one
    /// is left alone and still counts as applied.
    ///
    /// A failure for one document must not prevent the others from being
    /// applied; it is reported in [`BatchOutcome::failed`]. An `Err` means
    /// nothing in the batch is known to have been applied.
    async fn upsert(&self, docs: &[IndexDocument]) -> Result<BatchOutcome>;

    async fn delete(&self, doc_ids: &[String]) -> Result<BatchOutcome>;

    /// Revision of every indexed document, optionally for one source.
    async fn revisions(&self, source_id: Option<&str>) -> Result<HashMap<String, i64>>;

    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchHit>>;
}
