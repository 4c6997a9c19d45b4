//! Source clients: where list markdown comes from.
//!
//! - [`GitHubClient`] reads a repository README through the GitHub
//!   contents API (`GET /repos/{owner}/{name}/readme`). The fingerprint is
//!   the README's git blob sha, so an unchanged README costs one request
//!   and no parsing. READMEs too large to inline (over 1 MB) are
//!   downloaded from the response's `download_url`.
//! - [`LocalClient`] reads `<root>/<owner>/<name>/README.md` from disk,
//!   with a SHA-256 content fingerprint. Used for mirrors and tests.
//!
//! Both also implement [`MetadataClient`]: GitHub through
//! `GET /repos/{owner}/{name}`, the local client from
//! `<root>/<owner>/<name>/repo.json` in the same JSON shape.
//!
//! # Retry Strategy
//!
//! [`with_retry`] wraps any client call ([`fetch_with_retry`] for fetches):
//! - `Transient` (network, timeout, 5xx) → retry with exponential backoff
//!   and full jitter
//! - `RateLimited` → wait for the server-requested delay if it is within
//!   `max_retry_after`, otherwise fail immediately
//! - `NotFound` / `Rejected` → fail immediately

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use base64::Engine;
use rand::Rng;
use reqwest::header::HeaderMap;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use awesome_index_core::client::{FetchedDocument, MetadataClient, RepoMetadata, SourceClient};
use awesome_index_core::error::FetchError;
use awesome_index_core::models::DEFAULT_CONTENT_REF;

use crate::config::{ClientConfig, RetryConfig};

/// Build the client selected by `[client] kind`.
pub fn build_client(config: &ClientConfig) -> Result<Arc<dyn SourceClient>> {
    match config.kind.as_str() {
        "github" => Ok(Arc::new(GitHubClient::new(config)?)),
        "local" => Ok(Arc::new(local_client(config)?)),
        other => anyhow::bail!("Unknown client kind: {}", other),
    }
}

/// Build the repository metadata client for `[client] kind`.
pub fn build_metadata_client(config: &ClientConfig) -> Result<Arc<dyn MetadataClient>> {
    match config.kind.as_str() {
        "github" => Ok(Arc::new(GitHubClient::new(config)?)),
        "local" => Ok(Arc::new(local_client(config)?)),
        other => anyhow::bail!("Unknown client kind: {}", other),
    }
}

fn local_client(config: &ClientConfig) -> Result<LocalClient> {
    let root = config
        .local_root
        .clone()
        .ok_or_else(|| anyhow::anyhow!("client.local_root required for local client"))?;
    Ok(LocalClient::new(root))
}

// ============ GitHub ============

pub struct GitHubClient {
    http: reqwest::Client,
    api_url: String,
    token: Option<String>,
}

#[derive(Deserialize)]
struct ReadmeResponse {
    #[serde(default)]
    content: String,
    #[serde(default)]
    encoding: Option<String>,
    sha: String,
    #[serde(default)]
    download_url: Option<String>,
}

/// Where a README's bytes are, after reading the contents response.
#[derive(Debug, PartialEq, Eq)]
enum ReadmeBody {
    Inline(FetchedDocument),
    /// Too large to inline; fetch the raw file.
    Download { url: String, sha: String },
}

/// The subset of `GET /repos/{owner}/{name}` used for enrichment.
#[derive(Deserialize)]
struct RepoResponse {
    #[serde(default)]
    stargazers_count: i64,
    #[serde(default)]
    language: Option<String>,
}

impl From<RepoResponse> for RepoMetadata {
    fn from(repo: RepoResponse) -> Self {
        Self {
            stars: repo.stargazers_count,
            language: repo.language.filter(|l| !l.is_empty()),
        }
    }
}

impl GitHubClient {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()?;
        let token = std::env::var(&config.token_env)
            .ok()
            .filter(|t| !t.trim().is_empty());
        if token.is_none() {
            debug!(env = %config.token_env, "no GitHub token set, using unauthenticated rate limits");
        }
        Ok(Self {
            http,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn get(&self, url: &str, accept: &str) -> reqwest::RequestBuilder {
        let request = self.http.get(url).header("Accept", accept);
        match &self.token {
            Some(token) => request.header("Authorization", format!("Bearer {}", token)),
            None => request,
        }
    }

    /// Send `request`; non-success statuses become [`FetchError`]s labelled with `label`.
    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        label: &str,
    ) -> Result<reqwest::Response, FetchError> {
        let response = request
            .send()
            .await
            .map_err(|e| FetchError::Transient(e.to_string()))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let headers = response.headers().clone();
        let body_text = response.text().await.unwrap_or_default();
        Err(classify_status(
            status.as_u16(),
            &headers,
            &format!("{}: {}", label, body_text.trim()),
            chrono::Utc::now().timestamp(),
        ))
    }
}

#[async_trait]
impl SourceClient for GitHubClient {
    fn name(&self) -> &str {
        "github"
    }

    async fn fetch(&self, source_id: &str, content_ref: &str) -> Result<FetchedDocument, FetchError> {
        let url = format!("{}/repos/{}/readme", self.api_url, source_id);
        let label = format!("{}@{}", source_id, content_ref);
        let mut request = self.get(&url, "application/vnd.github+json");
        if content_ref != DEFAULT_CONTENT_REF {
            request = request.query(&[("ref", content_ref)]);
        }

        let body: ReadmeResponse = self
            .send(request, &label)
            .await?
            .json()
            .await
            .map_err(|e| FetchError::Transient(format!("malformed readme response: {}", e)))?;

        match decode_readme(body)? {
            ReadmeBody::Inline(document) => Ok(document),
            ReadmeBody::Download { url, sha } => {
                debug!(source = source_id, "readme too large to inline, downloading raw file");
                let content = self
                    .send(self.get(&url, "application/vnd.github.raw"), &label)
                    .await?
                    .text()
                    .await
                    .map_err(|e| FetchError::Transient(e.to_string()))?;
                Ok(FetchedDocument {
                    content,
                    fingerprint: sha,
                })
            }
        }
    }
}

#[async_trait]
impl MetadataClient for GitHubClient {
    fn name(&self) -> &str {
        "github"
    }

    async fn repo_metadata(&self, repo: &str) -> Result<RepoMetadata, FetchError> {
        let url = format!("{}/repos/{}", self.api_url, repo);
        let body: RepoResponse = self
            .send(self.get(&url, "application/vnd.github+json"), repo)
            .await?
            .json()
            .await
            .map_err(|e| FetchError::Transient(format!("malformed repository response: {}", e)))?;
        Ok(body.into())
    }
}

fn decode_readme(body: ReadmeResponse) -> Result<ReadmeBody, FetchError> {
    let inline = match body.encoding.as_deref() {
        Some("base64") => true,
        None => !body.content.is_empty(),
        // over the inline size limit: empty content, encoding "none"
        Some("none") => false,
        Some(other) => {
            return Err(FetchError::Rejected {
                status: 200,
                message: format!("unsupported readme encoding: {}", other),
            });
        }
    };
    if !inline {
        return match body.download_url {
            Some(url) => Ok(ReadmeBody::Download { url, sha: body.sha }),
            None => Err(FetchError::Rejected {
                status: 200,
                message: "readme has no inline content and no download url".to_string(),
            }),
        };
    }
    // The API wraps base64 at 60 columns
    let packed: String = body.content.split_whitespace().collect();
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(packed)
        .map_err(|e| FetchError::Transient(format!("invalid readme encoding: {}", e)))?;
    Ok(ReadmeBody::Inline(FetchedDocument {
        content: String::from_utf8_lossy(&bytes).into_owned(),
        fingerprint: body.sha,
    }))
}

/// Map a non-success GitHub response to a [`FetchError`].
///
/// `now` is the current unix time, used to turn `x-ratelimit-reset` into a
/// delay.
pub fn classify_status(status: u16, headers: &HeaderMap, message: &str, now: i64) -> FetchError {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
    };
    let retry_after = header("retry-after")
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
        .or_else(|| {
            let reset = header("x-ratelimit-reset")?.parse::<i64>().ok()?;
            Some(Duration::from_secs((reset - now).max(0) as u64))
        });
    let exhausted = header("x-ratelimit-remaining") == Some("0") || header("retry-after").is_some();

    match status {
        404 => FetchError::NotFound(message.to_string()),
        429 => FetchError::RateLimited { retry_after },
        403 if exhausted => FetchError::RateLimited { retry_after },
        s if s >= 500 => FetchError::Transient(format!("server error {}: {}", s, message)),
        s => FetchError::Rejected {
            status: s,
            message: message.to_string(),
        },
    }
}

// ============ Local ============

pub struct LocalClient {
    root: PathBuf,
}

impl LocalClient {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, source_id: &str, content_ref: &str) -> PathBuf {
        let dir = self.root.join(source_id);
        if content_ref == DEFAULT_CONTENT_REF {
            dir.join("README.md")
        } else {
            dir.join(format!("{}.md", content_ref))
        }
    }
}

#[async_trait]
impl SourceClient for LocalClient {
    fn name(&self) -> &str {
        "local"
    }

    async fn fetch(&self, source_id: &str, content_ref: &str) -> Result<FetchedDocument, FetchError> {
        let bytes = read_file(self.path_for(source_id, content_ref)).await?;
        let fingerprint = format!("{:x}", Sha256::digest(&bytes));
        Ok(FetchedDocument {
            content: String::from_utf8_lossy(&bytes).into_owned(),
            fingerprint,
        })
    }
}

#[async_trait]
impl MetadataClient for LocalClient {
    fn name(&self) -> &str {
        "local"
    }

    async fn repo_metadata(&self, repo: &str) -> Result<RepoMetadata, FetchError> {
        let path = self.root.join(repo).join("repo.json");
        let bytes = read_file(path.clone()).await?;
        let body: RepoResponse = serde_json::from_slice(&bytes).map_err(|e| FetchError::Rejected {
            status: 0,
            message: format!("{}: {}", path.display(), e),
        })?;
        Ok(body.into())
    }
}

async fn read_file(path: PathBuf) -> Result<Vec<u8>, FetchError> {
    match tokio::fs::read(&path).await {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(FetchError::NotFound(path.display().to_string()))
        }
        Err(e) => Err(FetchError::Transient(format!("{}: {}", path.display(), e))),
    }
}

// ============ Retry ============

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_retry_after: Duration,
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: config.base_delay(),
            max_delay: config.max_delay(),
            max_retry_after: config.max_retry_after(),
        }
    }
}

impl RetryPolicy {
    /// Upper bound of the backoff before retry number `retry` (1-based).
    pub fn backoff_ceiling(&self, retry: u32) -> Duration {
        let factor = 1u32 << retry.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Full jitter: uniform in `[0, backoff_ceiling(retry)]`.
    pub fn backoff(&self, retry: u32) -> Duration {
        let ceiling = self.backoff_ceiling(retry).as_millis() as u64;
        Duration::from_millis(rand::rng().random_range(0..=ceiling))
    }
}

/// Fetch through `client`, retrying retryable failures per `policy`.
pub async fn fetch_with_retry(
    client: &dyn SourceClient,
    policy: &RetryPolicy,
    source_id: &str,
    content_ref: &str,
) -> Result<FetchedDocument, FetchError> {
    with_retry(policy, client.name(), source_id, || {
        client.fetch(source_id, content_ref)
    })
    .await
}

/// Run `op` until it succeeds, fails permanently, or `policy` runs out of
/// attempts. `client` and `resource` only label the retry logs.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    client: &str,
    resource: &str,
    mut op: F,
) -> Result<T, FetchError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let mut attempt = 1;
    loop {
        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };
        if !err.is_retryable() || attempt >= policy.max_attempts {
            return Err(err);
        }

        let delay = match &err {
            FetchError::RateLimited {
                retry_after: Some(wait),
            } => {
                if *wait > policy.max_retry_after {
                    warn!(resource, wait_secs = wait.as_secs(), "rate limit wait too long, giving up");
                    return Err(err);
                }
                *wait
            }
            _ => policy.backoff(attempt),
        };

        warn!(
            resource,
            client,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "request failed, retrying"
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
