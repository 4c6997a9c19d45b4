//! `awx sources`: register, list, and deprecate awesome lists.
//!
//! Sources are never deleted. Deprecating one stops it from being synced
//! while its projects stay attributable.

use anyhow::{bail, Result};
use chrono::{TimeZone, Utc};

use awesome_index_core::models::Source;
use awesome_index_core::store::Store;

use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteStore;

pub async fn run_sources_list(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let sources = store.list_sources().await?;
    pool.close().await;

    if sources.is_empty() {
        println!("No sources registered. Add one with `awx sources add <owner/name>`.");
        return Ok(());
    }

    println!(
        "{:<40} {:<10} {:<12} {:<14} LAST SYNC",
        "SOURCE", "REF", "STATE", "FINGERPRINT"
    );
    for source in &sources {
        let state = if source.deprecated {
            "deprecated".to_string()
        } else {
            source.validation.to_string()
        };
        let fingerprint = source
            .fingerprint
            .as_deref()
            .map(|f| f.chars().take(12).collect::<String>())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<40} {:<10} {:<12} {:<14} {}",
            source.id,
            source.content_ref,
            state,
            fingerprint,
            format_ts(source.last_synced_at)
        );
        if let Some(error) = &source.last_error {
            println!("    last error: {}", error);
        }
    }
    Ok(())
}

pub async fn run_sources_add(
    config: &Config,
    id: &str,
    content_ref: &str,
    description: Option<String>,
) -> Result<()> {
    if !Source::is_valid_id(id) {
        bail!("Invalid source id '{}': expected owner/name", id);
    }

    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let mut source = Source::new(id, content_ref);
    source.description = description;
    let added = store.register_source(&source).await?;
    pool.close().await;

    if added {
        println!("Added source {} ({})", id, content_ref);
    } else {
        println!("Source {} already registered", id);
    }
    Ok(())
}

pub async fn run_sources_deprecate(config: &Config, id: &str) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let found = store.deprecate_source(id).await?;
    pool.close().await;

    if !found {
        bail!("Unknown source: {}", id);
    }
    println!("Deprecated source {}", id);
    Ok(())
}

pub(crate) fn format_ts(ts: Option<i64>) -> String {
    ts.and_then(|t| Utc.timestamp_opt(t, 0).single())
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "never".to_string())
}
