//! `awx reconcile`: audit the search index against the store and repair it.
//!
//! Runs one pass by default. With `--every SECS` it keeps running passes on
//! that interval until interrupted.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{error, info};

use awesome_index_core::index::IndexWriter;
use awesome_index_core::reconcile::{DriftReport, Reconciler};

use crate::config::Config;
use crate::db;
use crate::sqlite_index::SqliteIndex;
use crate::sqlite_store::SqliteStore;

pub async fn run_reconcile(config: &Config, every: Option<u64>) -> Result<()> {
    let pool = db::connect(config).await?;
    let reconciler = Reconciler::new(
        Arc::new(SqliteStore::new(pool.clone())),
        IndexWriter::new(
            Arc::new(SqliteIndex::new(pool.clone())),
            config.sync.index_batch_size,
        ),
    );

    let Some(secs) = every else {
        let report = reconciler.reconcile().await?;
        print_report(&report);
        pool.close().await;
        if !report.failures.is_empty() {
            anyhow::bail!("{} index repairs failed", report.failures.len());
        }
        return Ok(());
    };

    let mut ticker = tokio::time::interval(Duration::from_secs(secs.max(1)));
    info!(every_secs = secs, "periodic reconciliation started");
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                // A failed pass is retried on the next tick
                match reconciler.reconcile().await {
                    Ok(report) => print_report(&report),
                    Err(e) => error!(error = %e, "reconciliation pass failed"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received, stopping reconciliation");
                break;
            }
        }
    }

    pool.close().await;
    Ok(())
}

fn print_report(report: &DriftReport) {
    println!(
        "projects: {}  documents: {}  missing: {}  stale: {}  orphans: {}  repaired: {}  failed: {}",
        report.projects,
        report.documents,
        report.missing.len(),
        report.stale.len(),
        report.orphans.len(),
        report.repaired,
        report.failures.len()
    );
    for failure in &report.failures {
        println!("    {}", failure);
    }
}
