//! Source client abstraction.
//!
//! A [`SourceClient`] fetches the raw markdown of one source at one content
//! reference, together with a fingerprint that changes whenever the
//! content does. Retries, timeouts, and authentication belong to the
//! implementation or its caller.

use async_trait::async_trait;

use crate::error::FetchError;

/// Raw document content plus its fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedDocument {
    pub content: String,
    /// Revision token (e.g. a git blob sha) or content hash.
    pub fingerprint: String,
}

#[async_trait]
pub trait SourceClient: Send + Sync {
    /// Short label for logs (`"github"`, `"local"`).
    fn name(&self) -> &str;

    async fn fetch(&self, source_id: &str, content_ref: &str) -> Result<FetchedDocument, FetchError>;
}

/// Repository facts used to enrich projects that point at GitHub.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepoMetadata {
    pub stars: i64,
    pub language: Option<String>,
}

#[async_trait]
pub trait MetadataClient: Send + Sync {
    fn name(&self) -> &str;

    /// Look up `owner/name`.
    async fn repo_metadata(&self, repo: &str) -> Result<RepoMetadata, FetchError>;
}
