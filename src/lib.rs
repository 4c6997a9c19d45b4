//! # Awesome Index
//!
//! Ingests crowd-curated "awesome list" markdown documents, extracts the
//! project entries embedded in them, and keeps those entries consistent
//! between a SQLite store of record and a full-text search index.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌───────────────────┐   ┌──────────────┐
//! │ SourceClient │──▶│ extract → diff    │──▶│ SQLite store │
//! │ GitHub/local │   │ (SyncOrchestrator)│   │  (projects)  │
//! └──────────────┘   └─────────┬─────────┘   └──────┬───────┘
//!                              ▼                    │
//!                       ┌─────────────┐             │
//!                       │ IndexWriter │◀── Reconciler
//!                       └──────┬──────┘
//!                              ▼
//!                       ┌─────────────┐
//!                       │ FTS5 index  │
//!                       └─────────────┘
//! ```
//!
//! The pure pipeline pieces (extractor, normalizer, writer, reconciler,
//! trait seams) live in `awesome-index-core`. This crate supplies the
//! SQLite backends, the source clients, the async orchestrator, and the
//! `awx` CLI commands.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`logging`] | tracing subscriber setup |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | Store of record over SQLite |
//! | [`sqlite_index`] | Search index over SQLite FTS5 |
//! | [`source_client`] | GitHub and local clients, retry policy |
//! | [`sync`] | Sync orchestrator and `awx sync` |
//! | [`reconcile_cmd`] | `awx reconcile` |
//! | [`discover`] | Seed-list discovery |
//! | [`enrich`] | GitHub metadata enrichment |
//! | [`search`] | `awx search` |
//! | [`sources`] | `awx sources` |
//! | [`runs`] | `awx runs` |

pub mod config;
pub mod db;
pub mod discover;
pub mod enrich;
pub mod logging;
pub mod migrate;
pub mod reconcile_cmd;
pub mod runs;
pub mod search;
pub mod source_client;
pub mod sources;
pub mod sqlite_index;
pub mod sqlite_store;
pub mod sync;
