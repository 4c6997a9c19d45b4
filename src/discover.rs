//! `awx discover`: find awesome lists linked from a seed list.
//!
//! The seed (by default `sindresorhus/awesome`) is fetched and run through
//! the same extractor as any other source. Entries pointing at the root of
//! a GitHub repository whose name or link text mentions "awesome" become
//! unvalidated sources. Sources that already exist are left untouched.

use anyhow::{Context, Result};

use awesome_index_core::extract::extract_entries;
use awesome_index_core::models::{Source, DEFAULT_CONTENT_REF};
use awesome_index_core::normalize::{github_repo, normalize_url};
use awesome_index_core::store::Store;

use crate::config::Config;
use crate::db;
use crate::source_client::{build_client, fetch_with_retry, RetryPolicy};
use crate::sqlite_store::SqliteStore;

pub const DEFAULT_SEED: &str = "sindresorhus/awesome";

/// A list found in the seed document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredList {
    pub id: String,
    pub description: Option<String>,
}

/// Pick candidate lists out of a seed document, in document order.
pub fn discover_lists(content: &str, seed: &str, limit: usize) -> Vec<DiscoveredList> {
    let mut found: Vec<DiscoveredList> = Vec::new();
    for entry in extract_entries(content) {
        if found.len() >= limit {
            break;
        }
        let Some(url) = normalize_url(&entry.target) else {
            continue;
        };
        let Some(repo) = github_repo(&url) else {
            continue;
        };
        // Repository roots only, not /tree/ or /blob/ links into one
        let repo_root = url
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .trim_end_matches('/')
            .trim_end_matches(".git");
        if !repo_root.to_ascii_lowercase().ends_with(&repo.to_ascii_lowercase()) {
            continue;
        }
        let mentions_awesome = repo.to_ascii_lowercase().contains("awesome")
            || entry.name.to_ascii_lowercase().contains("awesome");
        if !mentions_awesome
            || repo.eq_ignore_ascii_case(seed)
            || !Source::is_valid_id(&repo)
            || found.iter().any(|d| d.id.eq_ignore_ascii_case(&repo))
        {
            continue;
        }
        found.push(DiscoveredList {
            id: repo,
            description: entry.description.or(Some(entry.name)),
        });
    }
    found
}

pub async fn run_discover(config: &Config, seed: &str, limit: usize) -> Result<()> {
    let client = build_client(&config.client)?;
    let retry = RetryPolicy::from(&config.retry);
    let document = fetch_with_retry(client.as_ref(), &retry, seed, DEFAULT_CONTENT_REF)
        .await
        .with_context(|| format!("Failed to fetch seed list {}", seed))?;

    let lists = discover_lists(&document.content, seed, limit);

    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let mut added = 0;
    for list in &lists {
        let mut source = Source::new(&list.id, DEFAULT_CONTENT_REF);
        source.description = list.description.clone();
        if store.register_source(&source).await? {
            added += 1;
            println!("  + {}", list.id);
        }
    }

    println!(
        "Discovered {} lists from {} ({} new, {} already registered)",
        lists.len(),
        seed,
        added,
        lists.len() - added
    );
    pool.close().await;
    Ok(())
}
