//! `awx enrich`: fill in GitHub stars and language for projects.
//!
//! For one source, every distinct repository among its live projects is
//! looked up through the metadata client, at most `max_in_flight` at a
//! time and each through the retry policy. Changed metadata is persisted as
//! a changeset guarded by the source's generation, exactly like a sync, and
//! then written to the index. A sync committing in between makes the pass
//! fail with [`SyncError::PersistenceConflict`]; nothing is written and the
//! pass can simply be rerun.
//!
//! A repository that cannot be looked up (deleted, renamed, rate limited
//! past the retry budget) keeps its previous metadata.

use std::collections::HashMap;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tracing::{info, info_span, warn, Instrument};

use awesome_index_core::client::{MetadataClient, RepoMetadata};
use awesome_index_core::enrich::{enrichment_changes, repos_to_enrich};
use awesome_index_core::error::{FetchError, SyncError};
use awesome_index_core::index::IndexWriter;
use awesome_index_core::store::{ApplyOutcome, Store};

use crate::config::Config;
use crate::db;
use crate::source_client::{build_metadata_client, with_retry, RetryPolicy};
use crate::sqlite_index::SqliteIndex;
use crate::sqlite_store::SqliteStore;

/// What one enrichment pass over a source did.
#[derive(Debug, Default)]
pub struct EnrichReport {
    pub repos: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub lookup_failures: Vec<(String, FetchError)>,
    pub index_failures: usize,
}

pub struct Enricher {
    store: Arc<dyn Store>,
    client: Arc<dyn MetadataClient>,
    writer: IndexWriter,
    retry: RetryPolicy,
    max_in_flight: usize,
}

impl Enricher {
    pub fn new(
        store: Arc<dyn Store>,
        client: Arc<dyn MetadataClient>,
        writer: IndexWriter,
        retry: RetryPolicy,
        max_in_flight: usize,
    ) -> Self {
        Self {
            store,
            client,
            writer,
            retry,
            max_in_flight: max_in_flight.max(1),
        }
    }

    pub async fn enrich_source(&self, source_id: &str) -> Result<EnrichReport, SyncError> {
        self.run(source_id)
            .instrument(info_span!("enrich", source = %source_id))
            .await
    }

    async fn run(&self, source_id: &str) -> Result<EnrichReport, SyncError> {
        let source = self
            .store
            .get_source(source_id)
            .await?
            .ok_or_else(|| SyncError::UnknownSource(source_id.to_string()))?;
        let projects = self.store.get_projects(source_id).await?;
        let repos = repos_to_enrich(&projects);
        info!(repos = repos.len(), client = self.client.name(), "enrichment started");

        let lookups: Vec<(String, Result<RepoMetadata, FetchError>)> = stream::iter(repos.iter().cloned())
            .map(|repo| async move {
                let result = with_retry(&self.retry, self.client.name(), &repo, || {
                    self.client.repo_metadata(&repo)
                })
                .await;
                (repo, result)
            })
            .buffer_unordered(self.max_in_flight)
            .collect()
            .await;

        let mut report = EnrichReport {
            repos: repos.len(),
            ..Default::default()
        };
        let mut metadata: HashMap<String, RepoMetadata> = HashMap::new();
        for (repo, result) in lookups {
            match result {
                Ok(meta) => {
                    metadata.insert(repo, meta);
                }
                Err(e) => {
                    warn!(repo = %repo, error = %e, "repository lookup failed");
                    report.lookup_failures.push((repo, e));
                }
            }
        }
        report.lookup_failures.sort_by(|a, b| a.0.cmp(&b.0));

        let changes = enrichment_changes(&projects, &metadata, chrono::Utc::now().timestamp());
        report.unchanged = changes.unchanged;
        if changes.is_empty() {
            info!("metadata unchanged");
            return Ok(report);
        }

        match self
            .store
            .apply_changes(source_id, source.generation, &changes)
            .await?
        {
            ApplyOutcome::Committed { generation } => {
                info!(generation, updated = changes.updates.len(), "metadata committed");
            }
            ApplyOutcome::Conflict { expected, found } => {
                return Err(SyncError::PersistenceConflict {
                    source_id: source_id.to_string(),
                    expected,
                    found,
                });
            }
        }
        report.updated = changes.updates.len();

        let indexed = self.writer.apply(&changes).await;
        report.index_failures = indexed.failures.len();
        if !indexed.is_clean() {
            warn!(failed = report.index_failures, "index writes failed, run `awx reconcile`");
        }
        Ok(report)
    }
}

/// `awx enrich <all|id...>`: refresh repository metadata per source.
pub async fn run_enrich(config: &Config, targets: &[String]) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    let store: Arc<dyn Store> = Arc::new(SqliteStore::new(pool.clone()));

    let source_ids: Vec<String> = if targets.iter().any(|t| t == "all") {
        store
            .list_sources()
            .await?
            .into_iter()
            .filter(|s| !s.deprecated)
            .map(|s| s.id)
            .collect()
    } else {
        targets.to_vec()
    };

    let enricher = Enricher::new(
        store,
        build_metadata_client(&config.client)?,
        IndexWriter::new(
            Arc::new(SqliteIndex::new(pool.clone())),
            config.sync.index_batch_size,
        ),
        RetryPolicy::from(&config.retry),
        config.sync.max_in_flight,
    );

    let mut failed = 0;
    for id in &source_ids {
        match enricher.enrich_source(id).await {
            Ok(report) => {
                println!(
                    "{}: {} repos, {} projects updated, {} unchanged, {} lookups failed",
                    id,
                    report.repos,
                    report.updated,
                    report.unchanged,
                    report.lookup_failures.len()
                );
                for (repo, e) in &report.lookup_failures {
                    println!("    {}: {}", repo, e);
                }
                if report.index_failures > 0 {
                    println!("    {} index writes failed", report.index_failures);
                }
            }
            Err(e) => {
                failed += 1;
                println!("{}: failed: {}", id, e);
            }
        }
    }

    pool.close().await;
    if failed > 0 {
        anyhow::bail!("{} of {} sources failed to enrich", failed, source_ids.len());
    }
    Ok(())
}
