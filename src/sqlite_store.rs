//! SQLite implementation of the store of record.
//!
//! [`SqliteStore`] implements [`Store`] over the `sources`, `projects`, and
//! `sync_runs` tables created by [`crate::migrate`]. Category paths are
//! stored as JSON arrays.
//!
//! `apply_changes` runs inside one transaction. It begins with a guarded
//! `UPDATE sources SET generation = generation + 1 ... AND generation = ?`,
//! which takes SQLite's write lock and checks the expected generation in the
//! same statement, so two interleaved writers can never both commit.

use anyhow::{bail, Result};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::{Row, SqlitePool};

use awesome_index_core::models::{
    Project, RunCounts, RunOutcome, Source, SyncRun, Tombstone, ValidationState,
};
use awesome_index_core::normalize::Changeset;
use awesome_index_core::store::{ApplyOutcome, Store};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

const SOURCE_COLUMNS: &str = "id, content_ref, fingerprint, validation, deprecated, generation, \
     last_synced_at, last_error, description";

const PROJECT_COLUMNS: &str = "source_id, url, name, description, category_path, github_repo, \
     github_stars, github_language, position, fingerprint, revision, tombstone_misses, tombstone_fingerprint, created_at, updated_at";

const RUN_COLUMNS: &str = "id, source_id, started_at, finished_at, outcome, fingerprint, seen, \
     inserted, updated, tombstoned, purged, skipped, index_failures, error";

fn source_from_row(row: &SqliteRow) -> Source {
    let validation: String = row.get("validation");
    let deprecated: i64 = row.get("deprecated");
    Source {
        id: row.get("id"),
        content_ref: row.get("content_ref"),
        fingerprint: row.get("fingerprint"),
        validation: ValidationState::parse(&validation),
        deprecated: deprecated != 0,
        generation: row.get("generation"),
        last_synced_at: row.get("last_synced_at"),
        last_error: row.get("last_error"),
        description: row.get("description"),
    }
}

fn project_from_row(row: &SqliteRow) -> Result<Project> {
    let category_json: String = row.get("category_path");
    let misses: Option<i64> = row.get("tombstone_misses");
    let tombstone_fp: Option<String> = row.get("tombstone_fingerprint");
    let tombstone = match (misses, tombstone_fp) {
        (Some(misses), Some(content_fingerprint)) => Some(Tombstone {
            misses: u32::try_from(misses)?,
            content_fingerprint,
        }),
        _ => None,
    };
    Ok(Project {
        source_id: row.get("source_id"),
        url: row.get("url"),
        name: row.get("name"),
        description: row.get("description"),
        category_path: serde_json::from_str(&category_json)?,
        github_repo: row.get("github_repo"),
        github_stars: row.get("github_stars"),
        github_language: row.get("github_language"),
        position: row.get("position"),
        fingerprint: row.get("fingerprint"),
        revision: row.get("revision"),
        tombstone,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn run_from_row(row: &SqliteRow) -> Result<SyncRun> {
    let outcome: String = row.get("outcome");
    let Some(outcome) = RunOutcome::parse(&outcome) else {
        bail!("unknown run outcome in database: {}", outcome);
    };
    let count = |name: &str| -> u64 { row.get::<i64, _>(name).max(0) as u64 };
    Ok(SyncRun {
        id: row.get("id"),
        source_id: row.get("source_id"),
        started_at: row.get("started_at"),
        finished_at: row.get("finished_at"),
        outcome,
        fingerprint: row.get("fingerprint"),
        counts: RunCounts {
            seen: count("seen"),
            inserted: count("inserted"),
            updated: count("updated"),
            tombstoned: count("tombstoned"),
            purged: count("purged"),
            skipped: count("skipped"),
            index_failures: count("index_failures"),
        },
        error: row.get("error"),
    })
}

async fn upsert_project(conn: &mut SqliteConnection, project: &Project) -> Result<()> {
    let category_json = serde_json::to_string(&project.category_path)?;
    let (misses, tombstone_fp) = match &project.tombstone {
        Some(t) => (Some(t.misses as i64), Some(t.content_fingerprint.as_str())),
        None => (None, None),
    };

    sqlx::query(
        r#"
        INSERT INTO projects (source_id, url, doc_id, name, description, category_path,
                              github_repo, github_stars, github_language, position,
                              fingerprint, revision, tombstone_misses, tombstone_fingerprint,
                              created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(source_id, url) DO UPDATE SET
            name = excluded.name,
            description = excluded.description,
            category_path = excluded.category_path,
            github_repo = excluded.github_repo,
            github_stars = excluded.github_stars,
            github_language = excluded.github_language,
            position = excluded.position,
            fingerprint = excluded.fingerprint,
            revision = excluded.revision,
            tombstone_misses = excluded.tombstone_misses,
            tombstone_fingerprint = excluded.tombstone_fingerprint,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&project.source_id)
    .bind(&project.url)
    .bind(project.doc_id())
    .bind(&project.name)
    .bind(&project.description)
    .bind(&category_json)
    .bind(&project.github_repo)
    .bind(project.github_stars)
    .bind(&project.github_language)
    .bind(project.position)
    .bind(&project.fingerprint)
    .bind(project.revision)
    .bind(misses)
    .bind(tombstone_fp)
    .bind(project.created_at)
    .bind(project.updated_at)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

#[async_trait]
impl Store for SqliteStore {
    async fn register_source(&self, source: &Source) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            r#"
            INSERT INTO sources (id, content_ref, fingerprint, validation, deprecated, generation,
                                 last_synced_at, last_error, description, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(&source.id)
        .bind(&source.content_ref)
        .bind(&source.fingerprint)
        .bind(source.validation.as_str())
        .bind(source.deprecated as i64)
        .bind(source.generation)
        .bind(source.last_synced_at)
        .bind(&source.last_error)
        .bind(&source.description)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn get_source(&self, id: &str) -> Result<Option<Source>> {
        let row = sqlx::query(&format!("SELECT {} FROM sources WHERE id = ?", SOURCE_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(source_from_row))
    }

    async fn list_sources(&self) -> Result<Vec<Source>> {
        let rows = sqlx::query(&format!("SELECT {} FROM sources ORDER BY id", SOURCE_COLUMNS))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(source_from_row).collect())
    }

    async fn set_validation(
        &self,
        id: &str,
        state: ValidationState,
        error: Option<&str>,
    ) -> Result<()> {
        let result = sqlx::query("UPDATE sources SET validation = ?, last_error = ? WHERE id = ?")
            .bind(state.as_str())
            .bind(error)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            bail!("unknown source: {}", id);
        }
        Ok(())
    }

    async fn mark_synced(&self, id: &str, fingerprint: &str, at: i64) -> Result<()> {
        let result = sqlx::query(
            "UPDATE sources SET fingerprint = ?, last_synced_at = ?, last_error = NULL WHERE id = ?",
        )
        .bind(fingerprint)
        .bind(at)
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            bail!("unknown source: {}", id);
        }
        Ok(())
    }

    async fn deprecate_source(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE sources SET deprecated = 1 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_projects(&self, source_id: &str) -> Result<Vec<Project>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM projects WHERE source_id = ? ORDER BY position, url",
            PROJECT_COLUMNS
        ))
        .bind(source_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(project_from_row).collect()
    }

    async fn all_projects(&self) -> Result<Vec<Project>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM projects ORDER BY source_id, position, url",
            PROJECT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(project_from_row).collect()
    }

    async fn apply_changes(
        &self,
        source_id: &str,
        expected_generation: i64,
        changes: &Changeset,
    ) -> Result<ApplyOutcome> {
        let mut tx = self.pool.begin().await?;

        let bumped = sqlx::query(
            "UPDATE sources SET generation = generation + 1 WHERE id = ? AND generation = ?",
        )
        .bind(source_id)
        .bind(expected_generation)
        .execute(&mut *tx)
        .await?;

        if bumped.rows_affected() == 0 {
            let found: Option<i64> =
                sqlx::query_scalar("SELECT generation FROM sources WHERE id = ?")
                    .bind(source_id)
                    .fetch_optional(&mut *tx)
                    .await?;
            tx.rollback().await?;
            return match found {
                Some(found) => Ok(ApplyOutcome::Conflict {
                    expected: expected_generation,
                    found,
                }),
                None => bail!("unknown source: {}", source_id),
            };
        }

        for project in &changes.purges {
            sqlx::query("DELETE FROM projects WHERE source_id = ? AND url = ?")
                .bind(source_id)
                .bind(&project.url)
                .execute(&mut *tx)
                .await?;
        }

        for project in changes
            .inserts
            .iter()
            .chain(changes.updates.iter())
            .chain(changes.tombstones.iter())
            .chain(changes.moves.iter())
        {
            upsert_project(&mut *tx, project).await?;
        }

        tx.commit().await?;

        Ok(ApplyOutcome::Committed {
            generation: expected_generation + 1,
        })
    }

    async fn record_run(&self, run: &SyncRun) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO sync_runs ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            RUN_COLUMNS
        ))
        .bind(&run.id)
        .bind(&run.source_id)
        .bind(run.started_at)
        .bind(run.finished_at)
        .bind(run.outcome.as_str())
        .bind(&run.fingerprint)
        .bind(run.counts.seen as i64)
        .bind(run.counts.inserted as i64)
        .bind(run.counts.updated as i64)
        .bind(run.counts.tombstoned as i64)
        .bind(run.counts.purged as i64)
        .bind(run.counts.skipped as i64)
        .bind(run.counts.index_failures as i64)
        .bind(&run.error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_runs(&self, source_id: Option<&str>, limit: usize) -> Result<Vec<SyncRun>> {
        let rows = match source_id {
            Some(id) => {
                sqlx::query(&format!(
                    "SELECT {} FROM sync_runs WHERE source_id = ? \
                     ORDER BY started_at DESC, rowid DESC LIMIT ?",
                    RUN_COLUMNS
                ))
                .bind(id)
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {} FROM sync_runs ORDER BY started_at DESC, rowid DESC LIMIT ?",
                    RUN_COLUMNS
                ))
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.iter().map(run_from_row).collect()
    }
}
