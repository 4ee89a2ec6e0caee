//! `harvest run` – poll the catalog over a window and process pending entries.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use harvest_core::archive::ArchiveExpander;
use harvest_core::catalog::{Catalog, CatalogDb, MetadataRegistrar};
use harvest_core::clock::SessionClock;
use harvest_core::config::HarvestConfig;
use harvest_core::fetch::CurlFetcher;
use harvest_core::invoker::DownloadInvoker;
use harvest_core::pipeline::{PoolSettings, WorkerPool};
use harvest_core::poll::PollLoop;
use harvest_core::progress::{self, Snapshot};
use std::io::Write;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub begin: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub theme_id: i64,
    pub status_line: bool,
}

pub async fn run_poll(db: CatalogDb, cfg: &HarvestConfig, opts: RunOptions) -> Result<()> {
    let download_root = if cfg.download_dir.is_absolute() {
        cfg.download_dir.clone()
    } else {
        std::env::current_dir()?.join(&cfg.download_dir)
    };
    tokio::fs::create_dir_all(&download_root)
        .await
        .with_context(|| format!("create download dir {}", download_root.display()))?;

    let db = Arc::new(db);
    let catalog: Arc<dyn Catalog> = db.clone();
    let registrar: Arc<dyn MetadataRegistrar> = db;

    let invoker = Arc::new(DownloadInvoker::from_config(Arc::new(CurlFetcher::new()), cfg));
    let (handle, aggregator, snapshots) = progress::channel(cfg.log_capacity, cfg.flush_interval());
    let aggregator = tokio::spawn(aggregator.run());
    let printer = opts
        .status_line
        .then(|| tokio::spawn(print_status(snapshots)));

    let pool = Arc::new(WorkerPool::new(
        Arc::clone(&invoker),
        ArchiveExpander::from_config(&cfg.archive_or_default()),
        catalog.clone(),
        registrar,
        handle.clone(),
        PoolSettings::from_config(cfg),
    ));
    let mut poll = PollLoop::new(
        catalog,
        pool,
        handle,
        SessionClock::start(),
        opts.theme_id,
        download_root,
    );

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupt received, cancelling run");
                cancel.cancel();
            }
        });
    }

    let summary = poll
        .run(opts.begin, opts.end, cfg.poll_interval(), &cancel)
        .await;
    // Last progress handles go with the loop; the aggregator then drains and exits.
    drop(poll);
    let snapshot = aggregator.await.context("progress aggregator panicked")?;
    if let Some(printer) = printer {
        let _ = printer.await;
    }

    let breaker = invoker.breaker().snapshot();
    println!(
        "iterations {}  succeeded {}  failed {}  deferred {}  cancelled {}  query failures {}",
        summary.iterations,
        summary.pool.succeeded,
        summary.pool.failed,
        summary.pool.deferred,
        summary.pool.cancelled,
        summary.query_failures
    );
    for day in &snapshot.daily {
        println!("  {}  {}/{}", day.date, day.processed, day.expected);
    }
    if breaker.times_opened > 0 {
        println!("circuit breaker opened {} time(s)", breaker.times_opened);
    }
    tracing::info!(
        iterations = summary.iterations,
        dispatched = summary.dispatched,
        cancelled = summary.cancelled,
        "run finished"
    );
    Ok(())
}

/// Redraw a one-line status whenever the aggregator publishes a new snapshot.
async fn print_status(mut rx: watch::Receiver<Arc<Snapshot>>) {
    let mut printed = false;
    while rx.changed().await.is_ok() {
        let snap = rx.borrow_and_update().clone();
        let (processed, expected) = snap
            .daily
            .iter()
            .fold((0, 0), |(p, e), d| (p + d.processed, e + d.expected));
        let active: u64 = snap.transfers.values().map(|t| t.bytes).sum();
        let last = snap.logs.last().map(|l| l.message.as_str()).unwrap_or("");
        print!(
            "\r  {}/{} processed  ok {}  failed {}  deferred {}  in flight {} ({:.1} MiB)  {:<60.60}",
            processed,
            expected,
            snap.totals.succeeded,
            snap.totals.failed,
            snap.totals.deferred,
            snap.transfers.len(),
            active as f64 / 1_048_576.0,
            last
        );
        let _ = std::io::stdout().flush();
        printed = true;
    }
    if printed {
        println!();
    }
}
