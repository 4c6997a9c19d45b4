use anyhow::Result;

use awesome_index_core::store::Store;

use crate::config::Config;
use crate::db;
use crate::sources::format_ts;
use crate::sqlite_store::SqliteStore;

/// `awx runs [source] [--limit N]`: print the sync audit log, newest first.
pub async fn run_runs(config: &Config, source: Option<&str>, limit: usize, json: bool) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let runs = store.list_runs(source, limit).await?;
    pool.close().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&runs)?);
        return Ok(());
    }

    if runs.is_empty() {
        println!("No sync runs recorded.");
        return Ok(());
    }

    for run in &runs {
        let c = &run.counts;
        println!(
            "{}  {:<30} {:<8} seen {} +{} ~{} tomb {} purge {} skip {} idx-fail {} ({}s)",
            format_ts(Some(run.started_at)),
            run.source_id,
            run.outcome,
            c.seen,
            c.inserted,
            c.updated,
            c.tombstoned,
            c.purged,
            c.skipped,
            c.index_failures,
            (run.finished_at - run.started_at).max(0)
        );
        if let Some(error) = &run.error {
            println!("    {}", error);
        }
    }
    Ok(())
}
