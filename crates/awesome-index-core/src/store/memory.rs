//! In-memory [`Store`] implementation for testing.
//!
//! Uses `HashMap`/`Vec` behind `parking_lot` locks. `apply_changes` holds
//! the write lock for the whole changeset, which makes it atomic with
//! respect to every other operation.

use std::collections::HashMap;

use anyhow::{bail, Result};
use async_trait::async_trait;
use parking_lot::RwLock;

use crate::models::{Project, Source, SyncRun, ValidationState};
use crate::normalize::{apply_to, Changeset};

use super::{ApplyOutcome, Store};

#[derive(Default)]
struct Inner {
    sources: HashMap<String, Source>,
    projects: HashMap<String, Vec<Project>>,
    runs: Vec<SyncRun>,
}

/// In-memory store for tests.
#[derive(Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace one project in place, bypassing change tracking.
    ///
    /// Lets tests simulate drift that no sync run would produce.
    pub fn overwrite_project(&self, project: Project) {
        let mut inner = self.inner.write();
        let list = inner.projects.entry(project.source_id.clone()).or_default();
        match list.iter_mut().find(|p| p.url == project.url) {
            Some(slot) => *slot = project,
            None => list.push(project),
        }
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn register_source(&self, source: &Source) -> Result<bool> {
        let mut inner = self.inner.write();
        if inner.sources.contains_key(&source.id) {
            return Ok(false);
        }
        inner.sources.insert(source.id.clone(), source.clone());
        Ok(true)
    }

    async fn get_source(&self, id: &str) -> Result<Option<Source>> {
        Ok(self.inner.read().sources.get(id).cloned())
    }

    async fn list_sources(&self) -> Result<Vec<Source>> {
        let mut sources: Vec<Source> = self.inner.read().sources.values().cloned().collect();
        sources.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(sources)
    }

    async fn set_validation(
        &self,
        id: &str,
        state: ValidationState,
        error: Option<&str>,
    ) -> Result<()> {
        let mut inner = self.inner.write();
        let Some(source) = inner.sources.get_mut(id) else {
            bail!("unknown source: {}", id);
        };
        source.validation = state;
        source.last_error = error.map(String::from);
        Ok(())
    }

    async fn mark_synced(&self, id: &str, fingerprint: &str, at: i64) -> Result<()> {
        let mut inner = self.inner.write();
        let Some(source) = inner.sources.get_mut(id) else {
            bail!("unknown source: {}", id);
        };
        source.fingerprint = Some(fingerprint.to_string());
        source.last_synced_at = Some(at);
        source.last_error = None;
        Ok(())
    }

    async fn deprecate_source(&self, id: &str) -> Result<bool> {
        let mut inner = self.inner.write();
        Ok(match inner.sources.get_mut(id) {
            Some(source) => {
                source.deprecated = true;
                true
            }
            None => false,
        })
    }

    async fn get_projects(&self, source_id: &str) -> Result<Vec<Project>> {
        let mut projects = self
            .inner
            .read()
            .projects
            .get(source_id)
            .cloned()
            .unwrap_or_default();
        projects.sort_by_key(|p| p.position);
        Ok(projects)
    }

    async fn all_projects(&self) -> Result<Vec<Project>> {
        let inner = self.inner.read();
        Ok(inner.projects.values().flatten().cloned().collect())
    }

    async fn apply_changes(
        &self,
        source_id: &str,
        expected_generation: i64,
        changes: &Changeset,
    ) -> Result<ApplyOutcome> {
        let mut inner = self.inner.write();
        let Some(source) = inner.sources.get_mut(source_id) else {
            bail!("unknown source: {}", source_id);
        };
        if source.generation != expected_generation {
            return Ok(ApplyOutcome::Conflict {
                expected: expected_generation,
                found: source.generation,
            });
        }
        source.generation += 1;
        let generation = source.generation;
        let projects = inner.projects.entry(source_id.to_string()).or_default();
        apply_to(projects, changes);
        Ok(ApplyOutcome::Committed { generation })
    }

    async fn record_run(&self, run: &SyncRun) -> Result<()> {
        self.inner.write().runs.push(run.clone());
        Ok(())
    }

    async fn list_runs(&self, source_id: Option<&str>, limit: usize) -> Result<Vec<SyncRun>> {
        let inner = self.inner.read();
        Ok(inner
            .runs
            .iter()
            .rev()
            .filter(|r| source_id.map_or(true, |id| r.source_id == id))
            .take(limit)
            .cloned()
            .collect())
    }
}
