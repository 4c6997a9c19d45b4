//! # Awesome Index Core
//!
//! Runtime-free logic for Awesome Index: data models, markdown extraction,
//! entry normalization and diffing, metadata enrichment, the store and search-index
//! abstractions, the batched index writer, and the consistency
//! reconciler.
//!
//! This crate contains no tokio, sqlx, HTTP, or filesystem I/O. The native
//! crate supplies the SQLite store, the FTS5 index, the source clients,
//! and the sync orchestrator.

pub mod client;
pub mod enrich;
pub mod error;
pub mod extract;
pub mod index;
pub mod models;
pub mod normalize;
pub mod reconcile;
pub mod store;
