use anyhow::Result;

use awesome_index_core::index::{SearchIndex, SearchQuery};

use crate::config::Config;
use crate::db;
use crate::sqlite_index::SqliteIndex;

pub async fn run_search(
    config: &Config,
    query: &str,
    source: Option<String>,
    category: Option<String>,
    language: Option<String>,
    limit: usize,
    json: bool,
) -> Result<()> {
    if query.trim().is_empty() {
        println!("No results.");
        return Ok(());
    }

    let pool = db::connect(config).await?;
    let index = SqliteIndex::new(pool.clone());
    let hits = index
        .search(&SearchQuery {
            text: query.to_string(),
            source_id: source,
            category,
            language,
            limit,
        })
        .await?;
    pool.close().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&hits)?);
        return Ok(());
    }

    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, hit) in hits.iter().enumerate() {
        println!("{}. [{:.2}] {}", i + 1, hit.score, hit.name);
        println!("    url: {}", hit.url);
        println!("    source: {}", hit.source_id);
        if let Some(category) = hit.categories.last() {
            println!("    category: {}", category);
        }
        if let Some(repo) = &hit.github_repo {
            match (hit.github_stars, &hit.github_language) {
                (Some(stars), Some(lang)) => println!("    repo: {} ({} stars, {})", repo, stars, lang),
                (Some(stars), None) => println!("    repo: {} ({} stars)", repo, stars),
                _ => println!("    repo: {}", repo),
            }
        }
        println!("    > {}", hit.snippet);
        println!();
    }

    Ok(())
}
