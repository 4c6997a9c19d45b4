//! # Awesome Index CLI (`awx`)
//!
//! The `awx` binary drives the awesome-list ingestion pipeline: registering
//! lists, syncing them into the SQLite store, keeping the full-text index
//! consistent, and searching it.
//!
//! ## Usage
//!
//! ```bash
//! awx --config ./config/awx.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `awx init` | Create the SQLite database and run schema migrations |
//! | `awx sources list` | List registered lists with their sync state |
//! | `awx sources add <owner/name>` | Register a list |
//! | `awx sources deprecate <owner/name>` | Stop syncing a list, keep its projects |
//! | `awx discover` | Register lists linked from a seed list |
//! | `awx sync <all\|id...>` | Sync lists into the store and index |
//! | `awx enrich <all\|id...>` | Fetch GitHub stars and language for listed repos |
//! | `awx reconcile` | Detect and repair index drift |
//! | `awx search "<query>"` | Search indexed projects |
//! | `awx runs` | Show the sync audit log |
//!
//! ## Examples
//!
//! ```bash
//! awx init
//! awx discover --limit 20
//! awx sync all
//! awx enrich all
//! awx search "http client" --category "Rust > Web" --language rust
//! awx reconcile --every 3600
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use awesome_index::discover::DEFAULT_SEED;
use awesome_index::{
    config, discover, enrich, logging, migrate, reconcile_cmd, runs, search, sources, sync,
};

/// Awesome Index CLI: keeps awesome-list entries in sync between a SQLite
/// store and a full-text search index.
#[derive(Parser)]
#[command(
    name = "awx",
    about = "Awesome Index: ingest, sync, and search curated awesome lists",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/awx.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// Manage registered lists.
    Sources {
        #[command(subcommand)]
        action: SourcesAction,
    },

    /// Register awesome lists linked from a seed list.
    Discover {
        /// Seed list to read, as `owner/name`.
        #[arg(long, default_value = DEFAULT_SEED)]
        seed: String,

        /// Maximum number of lists to register.
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },

    /// Sync lists: fetch, extract, diff, persist, and index.
    Sync {
        /// `all`, or one or more `owner/name` ids.
        #[arg(required = true)]
        targets: Vec<String>,
    },

    /// Look up GitHub stars and language for the projects of lists.
    Enrich {
        /// `all`, or one or more `owner/name` ids.
        #[arg(required = true)]
        targets: Vec<String>,
    },

    /// Compare the index with the store and repair drift.
    Reconcile {
        /// Keep running a pass every SECS seconds until interrupted.
        #[arg(long, value_name = "SECS")]
        every: Option<u64>,
    },

    /// Full-text search over indexed projects.
    Search {
        query: String,

        /// Only projects from this list.
        #[arg(long)]
        source: Option<String>,

        /// Only projects under this category facet, e.g. `Tools > CLI`.
        #[arg(long)]
        category: Option<String>,

        /// Only projects whose repository language matches, e.g. `rust`.
        #[arg(long)]
        language: Option<String>,

        #[arg(long, default_value_t = 10)]
        limit: usize,

        /// Print results as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show sync runs, newest first.
    Runs {
        /// Only runs of this list.
        source: Option<String>,

        #[arg(long, default_value_t = 20)]
        limit: usize,

        /// Print runs as JSON.
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum SourcesAction {
    /// List registered lists.
    List,

    /// Register a list by `owner/name`.
    Add {
        id: String,

        /// Branch or ref to read. `HEAD` means the default branch.
        #[arg(long = "ref", default_value = "HEAD")]
        content_ref: String,

        #[arg(long)]
        description: Option<String>,
    },

    /// Soft-deprecate a list. It is no longer synced; its projects remain.
    Deprecate { id: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    logging::init(&cfg.logging);

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Sources { action } => match action {
            SourcesAction::List => sources::run_sources_list(&cfg).await?,
            SourcesAction::Add {
                id,
                content_ref,
                description,
            } => sources::run_sources_add(&cfg, &id, &content_ref, description).await?,
            SourcesAction::Deprecate { id } => sources::run_sources_deprecate(&cfg, &id).await?,
        },
        Commands::Discover { seed, limit } => {
            discover::run_discover(&cfg, &seed, limit).await?;
        }
        Commands::Sync { targets } => {
            sync::run_sync(&cfg, &targets).await?;
        }
        Commands::Enrich { targets } => {
            enrich::run_enrich(&cfg, &targets).await?;
        }
        Commands::Reconcile { every } => {
            reconcile_cmd::run_reconcile(&cfg, every).await?;
        }
        Commands::Search {
            query,
            source,
            category,
            language,
            limit,
            json,
        } => {
            search::run_search(&cfg, &query, source, category, language, limit, json).await?;
        }
        Commands::Runs {
            source,
            limit,
            json,
        } => {
            runs::run_runs(&cfg, source.as_deref(), limit, json).await?;
        }
    }

    Ok(())
}
