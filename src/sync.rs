//! Sync orchestrator: one run per source, many sources at once.
//!
//! A run drives fetch → extract → diff → persist → index → mark for one
//! source and appends a [`SyncRun`] to the audit log when it finishes.
//!
//! # Concurrency
//!
//! - Each source id maps to its own async mutex; a run holds it from start
//!   to finalization, so runs of the same source never overlap. The entry
//!   is dropped when the last run of that source finishes.
//! - A semaphore bounds how many runs are in flight across sources. The
//!   source lock is taken before the permit, so a run queued behind its
//!   own source does not hold a slot.
//! - `apply_changes` also checks the source's generation. A mismatch means
//!   some other writer touched the source mid-run and fails the run with
//!   [`SyncError::PersistenceConflict`].
//!
//! # Outcomes
//!
//! | Situation | Outcome | Marker |
//! |-----------|---------|--------|
//! | fingerprint equals marker | success, no writes | unchanged |
//! | fetch failed after retries | failed | unchanged |
//! | generation conflict | failed | unchanged |
//! | index write failures | partial | unchanged |
//! | cancelled after persist | partial | unchanged |
//! | everything applied | success | advanced |
//!
//! A run cancelled before anything was persisted leaves no trace, not even
//! a run record.

use std::collections::HashMap;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use awesome_index_core::client::SourceClient;
use awesome_index_core::error::{FetchError, SyncError};
use awesome_index_core::extract::extract_entries;
use awesome_index_core::index::IndexWriter;
use awesome_index_core::models::{RunCounts, RunOutcome, Source, SyncRun, ValidationState};
use awesome_index_core::normalize::{diff, TombstonePolicy};
use awesome_index_core::store::{ApplyOutcome, Store};

use crate::config::Config;
use crate::db;
use crate::source_client::{build_client, fetch_with_retry, RetryPolicy};
use crate::sqlite_index::SqliteIndex;
use crate::sqlite_store::SqliteStore;

pub struct SyncOrchestrator {
    store: Arc<dyn Store>,
    client: Arc<dyn SourceClient>,
    writer: IndexWriter,
    retry: RetryPolicy,
    policy: TombstonePolicy,
    max_in_flight: usize,
    permits: Semaphore,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl SyncOrchestrator {
    pub fn new(
        store: Arc<dyn Store>,
        client: Arc<dyn SourceClient>,
        writer: IndexWriter,
        retry: RetryPolicy,
        policy: TombstonePolicy,
        max_in_flight: usize,
    ) -> Self {
        let max_in_flight = max_in_flight.max(1);
        Self {
            store,
            client,
            writer,
            retry,
            policy,
            max_in_flight,
            permits: Semaphore::new(max_in_flight),
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn lock_for(&self, source_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .entry(source_id.to_string())
            .or_default()
            .clone()
    }

    /// Drop the source's lock entry once no run holds or awaits it.
    fn release_lock(&self, source_id: &str) {
        let mut locks = self.locks.lock();
        if locks
            .get(source_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(source_id);
        }
    }

    /// Run one source to completion.
    ///
    /// Returns the recorded run for `success` and `partial` outcomes. A
    /// `failed` run is recorded too, and its cause is returned as the error.
    pub async fn sync_source(
        &self,
        source_id: &str,
        cancel: &CancellationToken,
    ) -> Result<SyncRun, SyncError> {
        let result = {
            let lock = self.lock_for(source_id);
            let _guard = lock.lock().await;
            match self.permits.acquire().await {
                Ok(_permit) => {
                    self.run(source_id, cancel)
                        .instrument(info_span!("sync", source = %source_id))
                        .await
                }
                Err(e) => Err(SyncError::Store(e.into())),
            }
        };
        self.release_lock(source_id);
        result
    }

    /// Sync many sources concurrently, at most `max_in_flight` at a time.
    ///
    /// Results come back in completion order.
    pub async fn sync_many(
        &self,
        source_ids: &[String],
        cancel: &CancellationToken,
    ) -> Vec<(String, Result<SyncRun, SyncError>)> {
        stream::iter(source_ids.iter().cloned())
            .map(|id| async move {
                let result = self.sync_source(&id, cancel).await;
                (id, result)
            })
            .buffer_unordered(self.max_in_flight)
            .collect()
            .await
    }

    async fn run(&self, source_id: &str, cancel: &CancellationToken) -> Result<SyncRun, SyncError> {
        let source = self
            .store
            .get_source(source_id)
            .await?
            .ok_or_else(|| SyncError::UnknownSource(source_id.to_string()))?;
        if source.deprecated {
            return Err(SyncError::Deprecated(source_id.to_string()));
        }

        let mut run = SyncRun {
            id: uuid::Uuid::new_v4().to_string(),
            source_id: source_id.to_string(),
            started_at: now(),
            finished_at: 0,
            outcome: RunOutcome::Success,
            fingerprint: None,
            counts: RunCounts::default(),
            error: None,
        };
        info!(content_ref = %source.content_ref, client = self.client.name(), "sync started");

        let fetched = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("sync cancelled during fetch");
                return Err(SyncError::Cancelled);
            }
            result = fetch_with_retry(self.client.as_ref(), &self.retry, source_id, &source.content_ref) => result,
        };

        let document = match fetched {
            Ok(document) => document,
            Err(error) => return self.fail_fetch(run, &source, error).await,
        };
        run.fingerprint = Some(document.fingerprint.clone());

        if source.validation != ValidationState::Valid {
            self.store
                .set_validation(source_id, ValidationState::Valid, None)
                .await?;
        }

        if source.fingerprint.as_deref() == Some(document.fingerprint.as_str()) {
            self.store
                .mark_synced(source_id, &document.fingerprint, now())
                .await?;
            info!("content unchanged");
            return self.finish(run).await;
        }

        // Pure computation from here until persistence
        let (candidates, stats) = extract_entries(&document.content).collect_with_stats();
        let existing = self.store.get_projects(source_id).await?;
        let seen = candidates.len();
        let changes = diff(
            source_id,
            &existing,
            candidates,
            &document.fingerprint,
            self.policy,
            now(),
        );

        run.counts.seen = seen as u64;
        run.counts.inserted = changes.inserts.len() as u64;
        run.counts.updated = changes.updates.len() as u64;
        run.counts.tombstoned = changes.tombstones.len() as u64;
        run.counts.purged = changes.purges.len() as u64;
        run.counts.skipped = (stats.skipped() + changes.duplicates + changes.rejected) as u64;

        if cancel.is_cancelled() {
            info!("sync cancelled before persistence");
            return Err(SyncError::Cancelled);
        }

        if !changes.is_empty() {
            match self
                .store
                .apply_changes(source_id, source.generation, &changes)
                .await?
            {
                ApplyOutcome::Committed { generation } => {
                    info!(generation, "changes committed");
                }
                ApplyOutcome::Conflict { expected, found } => {
                    let error = SyncError::PersistenceConflict {
                        source_id: source_id.to_string(),
                        expected,
                        found,
                    };
                    run.outcome = RunOutcome::Failed;
                    run.error = Some(error.to_string());
                    self.finish(run).await?;
                    return Err(error);
                }
            }
        }

        if cancel.is_cancelled() {
            run.outcome = RunOutcome::Partial;
            run.error = Some("cancelled before indexing".to_string());
            return self.finish(run).await;
        }

        let report = self.writer.apply(&changes).await;
        if report.is_clean() {
            self.store
                .mark_synced(source_id, &document.fingerprint, now())
                .await?;
        } else {
            run.outcome = RunOutcome::Partial;
            run.counts.index_failures = report.failures.len() as u64;
            let sample: Vec<String> = report.failures.iter().take(3).map(|f| f.to_string()).collect();
            run.error = Some(format!(
                "{} index writes failed: {}",
                report.failures.len(),
                sample.join("; ")
            ));
        }

        self.finish(run).await
    }

    async fn fail_fetch(
        &self,
        mut run: SyncRun,
        source: &Source,
        error: FetchError,
    ) -> Result<SyncRun, SyncError> {
        let state = match error {
            FetchError::NotFound(_) => ValidationState::Invalid,
            _ => source.validation,
        };
        let message = error.to_string();
        self.store
            .set_validation(&source.id, state, Some(message.as_str()))
            .await?;

        run.outcome = RunOutcome::Failed;
        run.error = Some(message);
        self.finish(run).await?;
        Err(SyncError::Fetch {
            source_id: source.id.clone(),
            error,
        })
    }

    async fn finish(&self, mut run: SyncRun) -> Result<SyncRun, SyncError> {
        run.finished_at = now();
        self.store.record_run(&run).await?;

        let c = &run.counts;
        match run.outcome {
            RunOutcome::Success => info!(
                seen = c.seen,
                inserted = c.inserted,
                updated = c.updated,
                tombstoned = c.tombstoned,
                purged = c.purged,
                skipped = c.skipped,
                "sync finished"
            ),
            outcome => warn!(
                outcome = %outcome,
                index_failures = c.index_failures,
                error = run.error.as_deref().unwrap_or_default(),
                "sync finished"
            ),
        }
        Ok(run)
    }
}

/// `awx sync <all|id...>`: sync the named sources and print one line each.
///
/// `all` selects every non-deprecated source. Ctrl-C cancels in-flight
/// runs; runs that already persisted finish as `partial`.
pub async fn run_sync(config: &Config, targets: &[String]) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    let store: Arc<dyn Store> = Arc::new(SqliteStore::new(pool.clone()));
    let index = Arc::new(SqliteIndex::new(pool.clone()));
    let client = build_client(&config.client)?;

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
    if source_ids.is_empty() {
        println!("No sources to sync.");
        pool.close().await;
        return Ok(());
    }

    let orchestrator = SyncOrchestrator::new(
        store,
        client,
        IndexWriter::new(index, config.sync.index_batch_size),
        RetryPolicy::from(&config.retry),
        TombstonePolicy {
            purge_after_misses: config.sync.purge_after_misses,
        },
        config.sync.max_in_flight,
    );

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling sync");
            on_signal.cancel();
        }
    });

    let results = orchestrator.sync_many(&source_ids, &cancel).await;
    let mut failed = 0;
    for (id, result) in &results {
        match result {
            Ok(run) => {
                let c = &run.counts;
                println!(
                    "{}: {} (seen {}, inserted {}, updated {}, tombstoned {}, purged {}, skipped {})",
                    id, run.outcome, c.seen, c.inserted, c.updated, c.tombstoned, c.purged, c.skipped
                );
                if let Some(error) = &run.error {
                    println!("    {}", error);
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
        anyhow::bail!("{} of {} sources failed to sync", failed, results.len());
    }
    Ok(())
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use awesome_index_core::client::FetchedDocument;
    use awesome_index_core::index::memory::InMemoryIndex;
    use awesome_index_core::models::{Project, ProjectKey};
    use awesome_index_core::normalize::Changeset;
    use awesome_index_core::reconcile::Reconciler;
    use awesome_index_core::store::memory::InMemoryStore;
    use std::time::Duration;

    const LIST: &str = "# Awesome\n\n## Tools\n- [Foo](https://a.com) - desc\n### Sub\n- [Bar](https://b.com) - desc2\n## Other\n- [Baz](https://c.com) - desc3\n";

    /// Serves per-source documents, tracking concurrency per source.
    #[derive(Default)]
    struct FakeClient {
        docs: Mutex<HashMap<String, Result<FetchedDocument, FetchError>>>,
        delay: Option<Duration>,
        calls: Mutex<usize>,
        in_flight: Mutex<HashMap<String, usize>>,
        max_per_source: Mutex<usize>,
        max_total: Mutex<usize>,
        interloper: Option<Arc<InMemoryStore>>,
    }

    impl FakeClient {
        fn serve(&self, source_id: &str, content: &str, fingerprint: &str) {
            self.docs.lock().insert(
                source_id.to_string(),
                Ok(FetchedDocument {
                    content: content.to_string(),
                    fingerprint: fingerprint.to_string(),
                }),
            );
        }

        fn fail(&self, source_id: &str, error: FetchError) {
            self.docs.lock().insert(source_id.to_string(), Err(error));
        }
    }

    #[async_trait]
    impl SourceClient for FakeClient {
        fn name(&self) -> &str {
            "fake"
        }

        async fn fetch(&self, source_id: &str, _: &str) -> Result<FetchedDocument, FetchError> {
            *self.calls.lock() += 1;
            {
                let mut in_flight = self.in_flight.lock();
                let here = in_flight.entry(source_id.to_string()).or_default();
                *here += 1;
                let here = *here;
                let total: usize = in_flight.values().sum();
                let mut max = self.max_per_source.lock();
                *max = (*max).max(here);
                let mut max_total = self.max_total.lock();
                *max_total = (*max_total).max(total);
            }
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(store) = &self.interloper {
                let generation = store.get_source(source_id).await.unwrap().unwrap().generation;
                store
                    .apply_changes(source_id, generation, &Changeset::default())
                    .await
                    .unwrap();
            }
            *self.in_flight.lock().get_mut(source_id).unwrap() -= 1;
            self.docs
                .lock()
                .get(source_id)
                .cloned()
                .unwrap_or_else(|| Err(FetchError::NotFound(source_id.to_string())))
        }
    }

    struct Harness {
        store: Arc<InMemoryStore>,
        index: Arc<InMemoryIndex>,
        client: Arc<FakeClient>,
        orchestrator: SyncOrchestrator,
    }

    fn harness_with(client: FakeClient, max_in_flight: usize) -> Harness {
        let store = Arc::new(InMemoryStore::new());
        let index = Arc::new(InMemoryIndex::new());
        let client = Arc::new(client);
        let retry = RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            max_retry_after: Duration::from_millis(10),
        };
        let orchestrator = SyncOrchestrator::new(
            store.clone(),
            client.clone(),
            IndexWriter::new(index.clone(), 2),
            retry,
            TombstonePolicy::default(),
            max_in_flight,
        );
        Harness {
            store,
            index,
            client,
            orchestrator,
        }
    }

    async fn harness() -> Harness {
        let h = harness_with(FakeClient::default(), 4);
        h.store.register_source(&Source::new("o/list", "HEAD")).await.unwrap();
        h
    }

    #[tokio::test]
    async fn test_first_sync_inserts_and_indexes() {
        let h = harness().await;
        h.client.serve("o/list", LIST, "fp1");

        let run = h
            .orchestrator
            .sync_source("o/list", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(run.outcome, RunOutcome::Success);
        assert_eq!(run.counts.seen, 3);
        assert_eq!(run.counts.inserted, 3);
        assert_eq!(run.fingerprint.as_deref(), Some("fp1"));

        assert_eq!(h.index.len(), 3);
        let source = h.store.get_source("o/list").await.unwrap().unwrap();
        assert_eq!(source.fingerprint.as_deref(), Some("fp1"));
        assert_eq!(source.validation, ValidationState::Valid);

        let doc_id = ProjectKey::new("o/list", "https://b.com").doc_id();
        let doc = h.index.get(&doc_id).unwrap();
        assert_eq!(doc.categories, vec!["Awesome", "Awesome > Tools", "Awesome > Tools > Sub"]);
        assert_eq!(doc.revision, 1);

        let runs = h.store.list_runs(Some("o/list"), 10).await.unwrap();
        assert_eq!(runs, vec![run]);
    }

    #[tokio::test]
    async fn test_unchanged_fingerprint_is_noop() {
        let h = harness().await;
        h.client.serve("o/list", LIST, "fp1");
        let cancel = CancellationToken::new();
        h.orchestrator.sync_source("o/list", &cancel).await.unwrap();
        let writes = h.index.write_calls();

        let run = h.orchestrator.sync_source("o/list", &cancel).await.unwrap();
        assert_eq!(run.outcome, RunOutcome::Success);
        assert_eq!(run.counts, RunCounts::default());
        assert_eq!(h.index.write_calls(), writes);
        assert_eq!(h.store.list_runs(None, 10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_new_fingerprint_same_entries_writes_nothing() {
        let h = harness().await;
        let cancel = CancellationToken::new();
        h.client.serve("o/list", LIST, "fp1");
        h.orchestrator.sync_source("o/list", &cancel).await.unwrap();
        let writes = h.index.write_calls();

        h.client.serve("o/list", &format!("{}\n<!-- footer -->\n", LIST), "fp2");
        let run = h.orchestrator.sync_source("o/list", &cancel).await.unwrap();
        assert_eq!(run.counts.inserted + run.counts.updated + run.counts.tombstoned, 0);
        assert_eq!(h.index.write_calls(), writes);
        let source = h.store.get_source("o/list").await.unwrap().unwrap();
        assert_eq!(source.fingerprint.as_deref(), Some("fp2"));
        assert_eq!(source.generation, 1);
    }

    #[tokio::test]
    async fn test_fetch_failure_leaves_marker() {
        let h = harness().await;
        let cancel = CancellationToken::new();
        h.client.serve("o/list", LIST, "fp1");
        h.orchestrator.sync_source("o/list", &cancel).await.unwrap();

        h.client.fail("o/list", FetchError::Transient("connection reset".into()));
        let err = h.orchestrator.sync_source("o/list", &cancel).await.unwrap_err();
        assert!(matches!(err, SyncError::Fetch { .. }));

        let source = h.store.get_source("o/list").await.unwrap().unwrap();
        assert_eq!(source.fingerprint.as_deref(), Some("fp1"));
        assert_eq!(source.validation, ValidationState::Valid);
        assert_eq!(h.store.get_projects("o/list").await.unwrap().len(), 3);

        let runs = h.store.list_runs(Some("o/list"), 1).await.unwrap();
        assert_eq!(runs[0].outcome, RunOutcome::Failed);
        assert!(runs[0].error.as_deref().unwrap().contains("connection reset"));
        // retried up to max_attempts
        assert_eq!(*h.client.calls.lock(), 3);
    }

    #[tokio::test]
    async fn test_not_found_invalidates_source() {
        let h = harness().await;
        let err = h
            .orchestrator
            .sync_source("o/list", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SyncError::Fetch {
                error: FetchError::NotFound(_),
                ..
            }
        ));
        let source = h.store.get_source("o/list").await.unwrap().unwrap();
        assert_eq!(source.validation, ValidationState::Invalid);
        assert!(source.fingerprint.is_none());
    }

    #[tokio::test]
    async fn test_index_failure_is_partial_and_reconcilable() {
        let h = harness().await;
        h.client.serve("o/list", LIST, "fp1");
        let victim = ProjectKey::new("o/list", "https://c.com").doc_id();
        h.index.fail_on(victim.clone());

        let run = h
            .orchestrator
            .sync_source("o/list", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(run.outcome, RunOutcome::Partial);
        assert_eq!(run.counts.index_failures, 1);
        assert_eq!(h.index.len(), 2);

        // Committed rows stay, marker does not advance
        assert_eq!(h.store.get_projects("o/list").await.unwrap().len(), 3);
        let source = h.store.get_source("o/list").await.unwrap().unwrap();
        assert!(source.fingerprint.is_none());

        h.index.clear_failures();
        let reconciler = Reconciler::new(h.store.clone(), IndexWriter::new(h.index.clone(), 10));
        let report = reconciler.reconcile().await.unwrap();
        assert_eq!(report.missing, vec![victim]);
        assert!(reconciler.reconcile().await.unwrap().is_consistent());
    }

    #[tokio::test]
    async fn test_removed_entry_tombstoned_then_purged() {
        let h = harness().await;
        let cancel = CancellationToken::new();
        h.client.serve("o/list", LIST, "fp1");
        h.orchestrator.sync_source("o/list", &cancel).await.unwrap();

        let without_baz = LIST.replace("- [Baz](https://c.com) - desc3\n", "");
        h.client.serve("o/list", &without_baz, "fp2");
        let run = h.orchestrator.sync_source("o/list", &cancel).await.unwrap();
        assert_eq!(run.counts.tombstoned, 1);
        let baz = ProjectKey::new("o/list", "https://c.com").doc_id();
        assert!(h.index.get(&baz).is_some());

        h.client.serve("o/list", &format!("{}\n", without_baz), "fp3");
        let run = h.orchestrator.sync_source("o/list", &cancel).await.unwrap();
        assert_eq!(run.counts.purged, 1);
        assert!(h.index.get(&baz).is_none());
        assert_eq!(h.store.get_projects("o/list").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_cancel_before_fetch_records_nothing() {
        let h = harness().await;
        h.client.serve("o/list", LIST, "fp1");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = h.orchestrator.sync_source("o/list", &cancel).await.unwrap_err();
        assert!(matches!(err, SyncError::Cancelled));
        assert!(h.store.list_runs(None, 10).await.unwrap().is_empty());
        assert!(h.store.get_projects("o/list").await.unwrap().is_empty());
        assert!(h.index.is_empty());
    }

    /// Cancels `token` as soon as a changeset has been committed.
    struct CancelAfterCommit {
        inner: Arc<InMemoryStore>,
        token: CancellationToken,
    }

    #[async_trait]
    impl Store for CancelAfterCommit {
        async fn register_source(&self, source: &Source) -> anyhow::Result<bool> {
            self.inner.register_source(source).await
        }
        async fn get_source(&self, id: &str) -> anyhow::Result<Option<Source>> {
            self.inner.get_source(id).await
        }
        async fn list_sources(&self) -> anyhow::Result<Vec<Source>> {
            self.inner.list_sources().await
        }
        async fn set_validation(
            &self,
            id: &str,
            state: ValidationState,
            error: Option<&str>,
        ) -> anyhow::Result<()> {
            self.inner.set_validation(id, state, error).await
        }
        async fn mark_synced(&self, id: &str, fingerprint: &str, at: i64) -> anyhow::Result<()> {
            self.inner.mark_synced(id, fingerprint, at).await
        }
        async fn deprecate_source(&self, id: &str) -> anyhow::Result<bool> {
            self.inner.deprecate_source(id).await
        }
        async fn get_projects(&self, source_id: &str) -> anyhow::Result<Vec<Project>> {
            self.inner.get_projects(source_id).await
        }
        async fn all_projects(&self) -> anyhow::Result<Vec<Project>> {
            self.inner.all_projects().await
        }
        async fn apply_changes(
            &self,
            source_id: &str,
            expected_generation: i64,
            changes: &Changeset,
        ) -> anyhow::Result<ApplyOutcome> {
            let outcome = self
                .inner
                .apply_changes(source_id, expected_generation, changes)
                .await;
            self.token.cancel();
            outcome
        }
        async fn record_run(&self, run: &SyncRun) -> anyhow::Result<()> {
            self.inner.record_run(run).await
        }
        async fn list_runs(&self, source_id: Option<&str>, limit: usize) -> anyhow::Result<Vec<SyncRun>> {
            self.inner.list_runs(source_id, limit).await
        }
    }

    #[tokio::test]
    async fn test_cancel_after_persist_is_partial_and_reconcilable() {
        let store = Arc::new(InMemoryStore::new());
        let index = Arc::new(InMemoryIndex::new());
        let cancel = CancellationToken::new();
        let client = FakeClient::default();
        client.serve("o/list", LIST, "fp1");
        let orchestrator = SyncOrchestrator::new(
            Arc::new(CancelAfterCommit {
                inner: store.clone(),
                token: cancel.clone(),
            }),
            Arc::new(client),
            IndexWriter::new(index.clone(), 10),
            RetryPolicy {
                max_attempts: 1,
                base_delay: Duration::ZERO,
                max_delay: Duration::ZERO,
                max_retry_after: Duration::ZERO,
            },
            TombstonePolicy::default(),
            1,
        );
        store.register_source(&Source::new("o/list", "HEAD")).await.unwrap();

        let run = orchestrator.sync_source("o/list", &cancel).await.unwrap();
        assert_eq!(run.outcome, RunOutcome::Partial);
        assert_eq!(run.counts.inserted, 3);
        assert_eq!(run.error.as_deref(), Some("cancelled before indexing"));

        // committed, not indexed, marker not advanced
        assert_eq!(store.get_projects("o/list").await.unwrap().len(), 3);
        assert!(index.is_empty());
        assert_eq!(index.write_calls(), 0);
        let source = store.get_source("o/list").await.unwrap().unwrap();
        assert!(source.fingerprint.is_none());
        assert_eq!(store.list_runs(None, 10).await.unwrap(), vec![run]);

        let reconciler = Reconciler::new(store.clone(), IndexWriter::new(index.clone(), 10));
        let report = reconciler.reconcile().await.unwrap();
        assert_eq!(report.missing.len(), 3);
        assert_eq!(report.repaired, 3);
        assert!(reconciler.reconcile().await.unwrap().is_consistent());
    }

    #[tokio::test]
    async fn test_generation_conflict_fails_run() {
        let store = Arc::new(InMemoryStore::new());
        let client = FakeClient {
            interloper: Some(store.clone()),
            ..Default::default()
        };
        client.serve("o/list", LIST, "fp1");
        let index = Arc::new(InMemoryIndex::new());
        let orchestrator = SyncOrchestrator::new(
            store.clone(),
            Arc::new(client),
            IndexWriter::new(index.clone(), 10),
            RetryPolicy {
                max_attempts: 1,
                base_delay: Duration::ZERO,
                max_delay: Duration::ZERO,
                max_retry_after: Duration::ZERO,
            },
            TombstonePolicy::default(),
            1,
        );
        store.register_source(&Source::new("o/list", "HEAD")).await.unwrap();

        let err = orchestrator
            .sync_source("o/list", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SyncError::PersistenceConflict {
                expected: 0,
                found: 1,
                ..
            }
        ));
        assert!(store.get_projects("o/list").await.unwrap().is_empty());
        assert!(index.is_empty());
        let runs = store.list_runs(None, 10).await.unwrap();
        assert_eq!(runs[0].outcome, RunOutcome::Failed);
    }

    #[tokio::test]
    async fn test_unknown_and_deprecated_sources() {
        let h = harness().await;
        let cancel = CancellationToken::new();
        let err = h.orchestrator.sync_source("o/missing", &cancel).await.unwrap_err();
        assert!(matches!(err, SyncError::UnknownSource(_)));

        h.store.deprecate_source("o/list").await.unwrap();
        let err = h.orchestrator.sync_source("o/list", &cancel).await.unwrap_err();
        assert!(matches!(err, SyncError::Deprecated(_)));
        assert_eq!(*h.client.calls.lock(), 0);
    }

    #[tokio::test]
    async fn test_sync_many_serializes_each_source() {
        let client = FakeClient {
            delay: Some(Duration::from_millis(20)),
            ..Default::default()
        };
        let h = harness_with(client, 2);
        for id in ["o/a", "o/b", "o/c"] {
            h.store.register_source(&Source::new(id, "HEAD")).await.unwrap();
            h.client.serve(id, LIST, "fp1");
        }

        let ids: Vec<String> = ["o/a", "o/a", "o/b", "o/c", "o/a"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let results = h.orchestrator.sync_many(&ids, &CancellationToken::new()).await;

        assert_eq!(results.len(), 5);
        assert!(results.iter().all(|(_, r)| r.is_ok()));
        assert_eq!(*h.client.max_per_source.lock(), 1);
        assert!(*h.client.max_total.lock() <= 2);

        // Later runs of o/a see the marker written by the first one
        let runs = h.store.list_runs(Some("o/a"), 10).await.unwrap();
        assert_eq!(runs.len(), 3);
        assert_eq!(runs.iter().filter(|r| r.counts.inserted == 3).count(), 1);
        assert_eq!(h.index.len(), 9);

        // no lock entries outlive their runs
        assert!(h.orchestrator.locks.lock().is_empty());
    }
}
