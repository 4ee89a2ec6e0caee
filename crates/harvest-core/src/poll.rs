//! Outer scheduling loop.
//!
//! Re-queries the catalog every `interval` until the window end passes or the
//! run is cancelled, dispatching entries not yet processed this session. A
//! failed query is logged and the loop waits for the next iteration.

use chrono::{DateTime, NaiveDate, Utc};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::catalog::{Catalog, CatalogEntry, DateRange};
use crate::clock::SessionClock;
use crate::invoker::sleep_or_cancel;
use crate::pipeline::{PoolSummary, WorkerPool};
use crate::progress::{LogLevel, ProgressHandle};
use crate::task::DownloadTask;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollSummary {
    pub iterations: u32,
    pub query_failures: u32,
    /// Tasks handed to the pool across all iterations.
    pub dispatched: usize,
    pub pool: PoolSummary,
    pub cancelled: bool,
}

pub struct PollLoop {
    catalog: Arc<dyn Catalog>,
    pool: Arc<WorkerPool>,
    progress: ProgressHandle,
    clock: SessionClock,
    theme_id: i64,
    download_root: PathBuf,
    /// Distinct ids seen per publish date; drives the expected counts.
    seen: HashMap<NaiveDate, HashSet<i64>>,
}

impl PollLoop {
    pub fn new(
        catalog: Arc<dyn Catalog>,
        pool: Arc<WorkerPool>,
        progress: ProgressHandle,
        clock: SessionClock,
        theme_id: i64,
        download_root: PathBuf,
    ) -> Self {
        Self {
            catalog,
            pool,
            progress,
            clock,
            theme_id,
            download_root,
            seen: HashMap::new(),
        }
    }

    pub async fn run(
        &mut self,
        begin: DateTime<Utc>,
        end: DateTime<Utc>,
        interval: Duration,
        cancel: &CancellationToken,
    ) -> PollSummary {
        let range = DateRange::new(begin.date_naive(), end.date_naive());
        let mut summary = PollSummary::default();
        tracing::info!(
            begin = %begin,
            end = %end,
            interval_secs = interval.as_secs(),
            theme_id = self.theme_id,
            "poll loop started"
        );

        loop {
            if summary.iterations > 0 && !sleep_or_cancel(interval, cancel).await {
                break;
            }
            if cancel.is_cancelled() || self.clock.now() > end {
                break;
            }
            summary.iterations += 1;

            let entries = match self.catalog.query(range, self.theme_id).await {
                Ok(entries) => entries,
                Err(e) => {
                    summary.query_failures += 1;
                    self.progress.log(
                        LogLevel::Error,
                        None,
                        format!("catalog query failed: {}", e),
                    );
                    continue;
                }
            };
            self.publish_expected(&entries);

            let processed = self.pool.processed();
            let tasks: Vec<DownloadTask> = entries
                .iter()
                .filter(|e| !processed.contains(e.id))
                .map(|e| DownloadTask::from_entry(e, &self.download_root))
                .collect();
            tracing::debug!(
                iteration = summary.iterations,
                found = entries.len(),
                new = tasks.len(),
                "catalog polled"
            );
            if tasks.is_empty() {
                continue;
            }
            summary.dispatched += tasks.len();
            summary.pool += self.pool.run(tasks, cancel).await;
        }

        summary.cancelled = cancel.is_cancelled();
        tracing::info!(
            iterations = summary.iterations,
            dispatched = summary.dispatched,
            query_failures = summary.query_failures,
            cancelled = summary.cancelled,
            "poll loop finished"
        );
        summary
    }

    fn publish_expected(&mut self, entries: &[CatalogEntry]) {
        let mut changed = HashSet::new();
        for e in entries {
            if self.seen.entry(e.publish_date).or_default().insert(e.id) {
                changed.insert(e.publish_date);
            }
        }
        for date in changed {
            let count = self.seen.get(&date).map_or(0, HashSet::len);
            self.progress.expected(date, count as u64);
        }
    }
}
