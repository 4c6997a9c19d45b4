//! SQLite FTS5 implementation of the search index.
//!
//! Documents live in `index_documents` (one row per document, carrying its
//! revision) and are mirrored into the `index_fts` virtual table over name,
//! description, and categories. Both writes for a document share one
//! transaction, so a document is either fully indexed or not at all.
//!
//! Every document in a batch is written independently: one bad document
//! is reported in [`BatchOutcome::failed`] and the rest still land. An
//! upsert carrying a lower revision than the indexed one is a no-op.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use awesome_index_core::error::IndexWriteFailure;
use awesome_index_core::index::{BatchOutcome, SearchHit, SearchIndex, SearchQuery};
use awesome_index_core::models::IndexDocument;

pub struct SqliteIndex {
    pool: SqlitePool,
}

impl SqliteIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn upsert_one(&self, doc: &IndexDocument) -> Result<()> {
        let categories_json = serde_json::to_string(&doc.categories)?;
        let mut tx = self.pool.begin().await?;

        let written = sqlx::query(
            r#"
            INSERT INTO index_documents (id, source_id, url, name, description,
                                         categories_json, github_repo, github_stars,
                                         github_language, revision)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                source_id = excluded.source_id,
                url = excluded.url,
                name = excluded.name,
                description = excluded.description,
                categories_json = excluded.categories_json,
                github_repo = excluded.github_repo,
                github_stars = excluded.github_stars,
                github_language = excluded.github_language,
                revision = excluded.revision
            WHERE excluded.revision >= index_documents.revision
            "#,
        )
        .bind(&doc.id)
        .bind(&doc.source_id)
        .bind(&doc.url)
        .bind(&doc.name)
        .bind(&doc.description)
        .bind(&categories_json)
        .bind(&doc.github_repo)
        .bind(doc.github_stars)
        .bind(&doc.github_language)
        .bind(doc.revision)
        .execute(&mut *tx)
        .await?;

        if written.rows_affected() == 0 {
            // a newer revision is already indexed
            tx.rollback().await?;
            return Ok(());
        }

        sqlx::query("DELETE FROM index_fts WHERE doc_id = ?")
            .bind(&doc.id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("INSERT INTO index_fts (doc_id, name, description, categories) VALUES (?, ?, ?, ?)")
            .bind(&doc.id)
            .bind(&doc.name)
            .bind(&doc.description)
            .bind(doc.categories.join(" | "))
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn delete_one(&self, doc_id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM index_fts WHERE doc_id = ?")
            .bind(doc_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM index_documents WHERE id = ?")
            .bind(doc_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}

/// Turn free text into an FTS5 query: every whitespace-separated term is
/// quoted, so operators and punctuation in user input are matched literally.
pub fn fts_query(text: &str) -> Option<String> {
    let terms: Vec<String> = text
        .split_whitespace()
        .map(|term| format!("\"{}\"", term.replace('"', "\"\"")))
        .collect();
    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" "))
    }
}

#[async_trait]
impl SearchIndex for SqliteIndex {
    async fn upsert(&self, docs: &[IndexDocument]) -> Result<BatchOutcome> {
        let mut outcome = BatchOutcome::default();
        for doc in docs {
            match self.upsert_one(doc).await {
                Ok(()) => outcome.applied += 1,
                Err(e) => outcome.failed.push(IndexWriteFailure {
                    doc_id: doc.id.clone(),
                    message: e.to_string(),
                }),
            }
        }
        Ok(outcome)
    }

    async fn delete(&self, doc_ids: &[String]) -> Result<BatchOutcome> {
        let mut outcome = BatchOutcome::default();
        for id in doc_ids {
            match self.delete_one(id).await {
                Ok(()) => outcome.applied += 1,
                Err(e) => outcome.failed.push(IndexWriteFailure {
                    doc_id: id.clone(),
                    message: e.to_string(),
                }),
            }
        }
        Ok(outcome)
    }

    async fn revisions(&self, source_id: Option<&str>) -> Result<HashMap<String, i64>> {
        let rows = sqlx::query(
            "SELECT id, revision FROM index_documents WHERE (?1 IS NULL OR source_id = ?1)",
        )
        .bind(source_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| (row.get::<String, _>("id"), row.get::<i64, _>("revision")))
            .collect())
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchHit>> {
        let Some(match_expr) = fts_query(&query.text) else {
            return Ok(Vec::new());
        };

        let rows = sqlx::query(
            r#"
            SELECT d.id, d.source_id, d.name, d.url, d.categories_json, d.github_repo,
                   d.github_stars, d.github_language,
                   bm25(index_fts, 0.0, 10.0, 5.0, 2.0) AS rank,
                   snippet(index_fts, -1, '>>>', '<<<', '...', 24) AS snippet
            FROM index_fts
            JOIN index_documents d ON d.id = index_fts.doc_id
            WHERE index_fts MATCH ?1
              AND (?2 IS NULL OR d.source_id = ?2)
              AND (?3 IS NULL OR EXISTS (
                    SELECT 1 FROM json_each(d.categories_json) WHERE json_each.value = ?3))
              AND (?4 IS NULL OR d.github_language = ?4 COLLATE NOCASE)
            ORDER BY rank
            LIMIT ?5
            "#,
        )
        .bind(&match_expr)
        .bind(&query.source_id)
        .bind(&query.category)
        .bind(&query.language)
        .bind(query.limit.max(1) as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let rank: f64 = row.get("rank");
                let categories_json: String = row.get("categories_json");
                Ok(SearchHit {
                    id: row.get("id"),
                    source_id: row.get("source_id"),
                    name: row.get("name"),
                    url: row.get("url"),
                    categories: serde_json::from_str(&categories_json)?,
                    github_repo: row.get("github_repo"),
                    github_stars: row.get("github_stars"),
                    github_language: row.get("github_language"),
                    score: -rank, // bm25 is lower-is-better
                    snippet: row.get("snippet"),
                })
            })
            .collect()
    }
}
