//! Core data models used throughout Awesome Index.
//!
//! These types represent the sources, extracted entries, durable projects,
//! sync runs, and search documents that flow through the ingestion and
//! consistency pipeline.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Content reference meaning "whatever the default branch is".
pub const DEFAULT_CONTENT_REF: &str = "HEAD";

/// Whether a source's content reference resolves to fetchable content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationState {
    Unvalidated,
    Valid,
    Invalid,
}

impl ValidationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationState::Unvalidated => "unvalidated",
            ValidationState::Valid => "valid",
            ValidationState::Invalid => "invalid",
        }
    }

    /// Parse the stored representation. Unknown values read as unvalidated.
    pub fn parse(s: &str) -> Self {
        match s {
            "valid" => ValidationState::Valid,
            "invalid" => ValidationState::Invalid,
            _ => ValidationState::Unvalidated,
        }
    }
}

impl fmt::Display for ValidationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// A curated list under synchronization, identified by `owner/name`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub id: String,
    /// Branch or ref to read; [`DEFAULT_CONTENT_REF`] means the default branch.
    pub content_ref: String,
    /// Content fingerprint of the last fully successful run.
    pub fingerprint: Option<String>,
    pub validation: ValidationState,
    pub deprecated: bool,
    /// Bumped on every committed change set; guards against interleaved writers.
    pub generation: i64,
    pub last_synced_at: Option<i64>,
    pub last_error: Option<String>,
    pub description: Option<String>,
}

impl Source {
    pub fn new(id: impl Into<String>, content_ref: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content_ref: content_ref.into(),
            fingerprint: None,
            validation: ValidationState::Unvalidated,
            deprecated: false,
            generation: 0,
            last_synced_at: None,
            last_error: None,
            description: None,
        }
    }

    /// Check that an identifier looks like `owner/name`.
    pub fn is_valid_id(id: &str) -> bool {
        let mut parts = id.split('/');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(owner), Some(name), None) => {
                !owner.is_empty()
                    && !name.is_empty()
                    && id
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/'))
            }
            _ => false,
        }
    }
}

/// Transient extraction result from one list item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateEntry {
    pub name: String,
    pub target: String,
    pub description: Option<String>,
    /// Heading titles from the document root down to the enclosing section.
    pub category_path: Vec<String>,
    /// Ordinal among the candidates emitted for this document.
    pub position: usize,
    /// 1-based source line.
    pub line: usize,
}

/// Dedup key of a project: owning source plus canonical target URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProjectKey {
    pub source_id: String,
    pub url: String,
}

impl ProjectKey {
    pub fn new(source_id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            url: url.into(),
        }
    }

    /// Stable identifier of the index document for this key.
    pub fn doc_id(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.source_id.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.url.as_bytes());
        hex::encode(&hasher.finalize()[..16])
    }
}

/// Soft-delete marker carried by a project its source stopped yielding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tombstone {
    /// Consecutive extractions the project was absent from.
    pub misses: u32,
    /// Content fingerprint of the extraction that last counted a miss.
    pub content_fingerprint: String,
}

/// Durable record of one curated entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Project {
    pub source_id: String,
    /// Canonical target URL, see [`crate::normalize::normalize_url`].
    pub url: String,
    pub name: String,
    pub description: Option<String>,
    pub category_path: Vec<String>,
    /// `owner/name` when the URL points at a GitHub repository.
    pub github_repo: Option<String>,
    /// Repository metadata filled in by enrichment; untouched by syncs.
    pub github_stars: Option<i64>,
    pub github_language: Option<String>,
    /// Ordinal in the source document; refreshed without a revision bump.
    pub position: i64,
    /// SHA-256 over the content fields, used for change detection.
    pub fingerprint: String,
    pub revision: i64,
    pub tombstone: Option<Tombstone>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Project {
    pub fn key(&self) -> ProjectKey {
        ProjectKey::new(&self.source_id, &self.url)
    }

    pub fn doc_id(&self) -> String {
        self.key().doc_id()
    }

    pub fn is_tombstoned(&self) -> bool {
        self.tombstone.is_some()
    }
}

/// Final state of a sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunOutcome {
    Success,
    Partial,
    Failed,
}

impl RunOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunOutcome::Success => "success",
            RunOutcome::Partial => "partial",
            RunOutcome::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(RunOutcome::Success),
            "partial" => Some(RunOutcome::Partial),
            "failed" => Some(RunOutcome::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Per-run counters reported to the audit log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounts {
    pub seen: u64,
    pub inserted: u64,
    pub updated: u64,
    pub tombstoned: u64,
    pub purged: u64,
    pub skipped: u64,
    pub index_failures: u64,
}

/// One execution of the pipeline against one source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRun {
    pub id: String,
    pub source_id: String,
    pub started_at: i64,
    pub finished_at: i64,
    pub outcome: RunOutcome,
    /// Content fingerprint observed by this run, if the fetch succeeded.
    pub fingerprint: Option<String>,
    pub counts: RunCounts,
    pub error: Option<String>,
}

/// Denormalized search-engine projection of a [`Project`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDocument {
    pub id: String,
    pub source_id: String,
    pub url: String,
    pub name: String,
    pub description: String,
    /// Each prefix of the category path joined with ` > `, usable as facets.
    pub categories: Vec<String>,
    pub github_repo: Option<String>,
    pub github_stars: Option<i64>,
    pub github_language: Option<String>,
    pub revision: i64,
}

impl IndexDocument {
    /// Derive the document for a project. Deterministic in the project's fields.
    pub fn from_project(project: &Project) -> Self {
        let categories = (1..=project.category_path.len())
            .map(|n| project.category_path[..n].join(" > "))
            .collect();
        Self {
            id: project.doc_id(),
            source_id: project.source_id.clone(),
            url: project.url.clone(),
            name: project.name.clone(),
            description: project.description.clone().unwrap_or_default(),
            categories,
            github_repo: project.github_repo.clone(),
            github_stars: project.github_stars,
            github_language: project.github_language.clone(),
            revision: project.revision,
        }
    }
}
