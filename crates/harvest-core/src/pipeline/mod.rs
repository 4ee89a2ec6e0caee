//! Bounded worker pool running the per-task pipeline.
//!
//! Each task holds one slot for its whole pipeline: download, expansion when
//! the file is an archive, metadata registration per produced file, then the
//! catalog flag update. Tasks that reach a terminal state (success or final
//! failure) join the [`SessionProcessedSet`]; cancelled and breaker-deferred
//! tasks do not, so a later poll iteration picks them up again.

mod processed;
mod slots;

use std::ops::AddAssign;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::archive::{ArchiveExpander, ProducedFile};
use crate::catalog::{Catalog, FileRecord, MetadataRegistrar};
use crate::checksum::digest_file;
use crate::config::{FailureMode, HarvestConfig};
use crate::invoker::DownloadInvoker;
use crate::progress::{LogLevel, ProgressHandle, TaskState};
use crate::retry::ErrorKind;
use crate::task::DownloadTask;

pub use processed::SessionProcessedSet;
use slots::Slots;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// Rejected by the open breaker; not marked processed.
    pub deferred: usize,
    /// Already in the processed set; not dispatched.
    pub skipped: usize,
}

impl PoolSummary {
    pub fn dispatched(&self) -> usize {
        self.succeeded + self.failed + self.cancelled + self.deferred
    }

    fn record(&mut self, state: TaskState) {
        match state {
            TaskState::Succeeded => self.succeeded += 1,
            TaskState::Failed => self.failed += 1,
            TaskState::Cancelled => self.cancelled += 1,
            TaskState::Deferred => self.deferred += 1,
        }
    }
}

impl AddAssign for PoolSummary {
    fn add_assign(&mut self, rhs: Self) {
        self.succeeded += rhs.succeeded;
        self.failed += rhs.failed;
        self.cancelled += rhs.cancelled;
        self.deferred += rhs.deferred;
        self.skipped += rhs.skipped;
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PoolSettings {
    pub max_parallel: usize,
    pub max_archive_depth: u32,
    pub on_failure: FailureMode,
}

impl PoolSettings {
    pub fn from_config(cfg: &HarvestConfig) -> Self {
        Self {
            max_parallel: cfg.max_parallel,
            max_archive_depth: cfg.archive_or_default().max_depth,
            on_failure: cfg.on_failure,
        }
    }
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self::from_config(&HarvestConfig::default())
    }
}

/// Everything a spawned pipeline needs, shared by all tasks.
struct Pipeline {
    invoker: Arc<DownloadInvoker>,
    expander: ArchiveExpander,
    catalog: Arc<dyn Catalog>,
    registrar: Arc<dyn MetadataRegistrar>,
    progress: ProgressHandle,
    processed: SessionProcessedSet,
    settings: PoolSettings,
}

pub struct WorkerPool {
    pipeline: Arc<Pipeline>,
    slots: Arc<Slots>,
}

impl WorkerPool {
    pub fn new(
        invoker: Arc<DownloadInvoker>,
        expander: ArchiveExpander,
        catalog: Arc<dyn Catalog>,
        registrar: Arc<dyn MetadataRegistrar>,
        progress: ProgressHandle,
        settings: PoolSettings,
    ) -> Self {
        Self {
            slots: Slots::new(settings.max_parallel),
            pipeline: Arc::new(Pipeline {
                invoker,
                expander,
                catalog,
                registrar,
                progress,
                processed: SessionProcessedSet::new(),
                settings,
            }),
        }
    }

    pub fn processed(&self) -> &SessionProcessedSet {
        &self.pipeline.processed
    }

    pub fn in_flight(&self) -> usize {
        self.slots.in_flight()
    }

    /// Highest number of simultaneously held slots since the pool was created.
    pub fn peak_in_flight(&self) -> usize {
        self.slots.peak()
    }

    /// Run `tasks` with at most `max_parallel` in flight and wait for all of
    /// them. Cancellation stops dispatch; running tasks unwind on their own.
    pub async fn run(&self, tasks: Vec<DownloadTask>, cancel: &CancellationToken) -> PoolSummary {
        let mut summary = PoolSummary::default();
        let mut set = JoinSet::new();
        let total = tasks.len();

        for (i, task) in tasks.into_iter().enumerate() {
            if self.pipeline.processed.contains(task.id) {
                summary.skipped += 1;
                continue;
            }
            let slot = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                slot = self.slots.acquire() => slot.ok(),
            };
            let Some(slot) = slot else {
                tracing::info!(not_started = total - i, "dispatch stopped");
                break;
            };
            let pipeline = Arc::clone(&self.pipeline);
            let cancel = cancel.clone();
            set.spawn(async move {
                let _slot = slot;
                pipeline.process(task, &cancel).await
            });
        }

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(state) => summary.record(state),
                Err(e) => {
                    tracing::error!("pipeline task aborted: {}", e);
                    summary.failed += 1;
                }
            }
        }
        summary
    }
}

impl Pipeline {
    async fn process(&self, task: DownloadTask, cancel: &CancellationToken) -> TaskState {
        let progress = Some(self.progress.transfer_callback(task.id));
        let outcome = self
            .invoker
            .download_with_progress(&task, progress, cancel)
            .await;

        if !outcome.success {
            let cause = outcome
                .error
                .as_ref()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown error".into());
            let state = match outcome.kind() {
                Some(ErrorKind::Cancelled) => {
                    self.progress
                        .log(LogLevel::Info, Some(task.id), format!("task {} cancelled", task.id));
                    TaskState::Cancelled
                }
                Some(ErrorKind::BreakerOpen) => {
                    self.progress.log(
                        LogLevel::Warn,
                        Some(task.id),
                        format!("task {} deferred: {}", task.id, cause),
                    );
                    TaskState::Deferred
                }
                _ => {
                    let level = match self.settings.on_failure {
                        FailureMode::Ignore => LogLevel::Warn,
                        FailureMode::Report => LogLevel::Error,
                    };
                    self.progress.log(
                        level,
                        Some(task.id),
                        format!("task {} failed after {} attempt(s): {}", task.id, outcome.attempts, cause),
                    );
                    self.processed.insert(task.id);
                    self.progress.processed(task.publish_date);
                    TaskState::Failed
                }
            };
            self.progress.finished(task.id, state);
            return state;
        }

        let (files, failed_entries) = self.expand(&task).await;
        let failed_registrations = self.register(task.id, &files).await;
        let flag_ok = match self.catalog.mark_downloaded(task.id).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(task_id = task.id, "flag update failed: {}", e);
                false
            }
        };
        self.processed.insert(task.id);
        self.progress.processed(task.publish_date);

        let mut message = format!(
            "task {} downloaded {} ({} bytes, {} file(s))",
            task.id,
            task.destination.display(),
            outcome.bytes_written,
            files.len()
        );
        let mut notes = Vec::new();
        if failed_entries > 0 {
            notes.push(format!("{} archive entries skipped", failed_entries));
        }
        if failed_registrations > 0 {
            notes.push(format!("{} registrations failed", failed_registrations));
        }
        if !flag_ok {
            notes.push("flag update failed".to_string());
        }
        let level = if notes.is_empty() {
            LogLevel::Info
        } else {
            message.push_str(&format!("; {}", notes.join(", ")));
            LogLevel::Warn
        };
        self.progress.log(level, Some(task.id), message);
        self.progress.finished(task.id, TaskState::Succeeded);
        TaskState::Succeeded
    }

    /// Expand the download when it is an archive. Returns produced files and
    /// the number of entries that failed.
    async fn expand(&self, task: &DownloadTask) -> (Vec<ProducedFile>, usize) {
        let downloaded = vec![ProducedFile {
            path: task.destination.clone(),
            source_archive: None,
        }];
        if !self.expander.is_archive(&task.destination) {
            return (downloaded, 0);
        }
        let expander = self.expander.clone();
        let archive = task.destination.clone();
        let dest = ArchiveExpander::nested_dir(&archive);
        let depth = self.settings.max_archive_depth;
        match tokio::task::spawn_blocking(move || expander.expand(&archive, &dest, depth)).await {
            Ok(expansion) => {
                let failed = expansion.failed_entries.len();
                (expansion.files, failed)
            }
            Err(e) => {
                tracing::error!(task_id = task.id, "archive expansion aborted: {}", e);
                (downloaded, 1)
            }
        }
    }

    /// Register size and digest of each file. Returns the number of failures.
    async fn register(&self, task_id: i64, files: &[ProducedFile]) -> usize {
        let mut failures = 0;
        for file in files {
            let path = file.path.clone();
            let digest = match tokio::task::spawn_blocking(move || digest_file(&path)).await {
                Ok(Ok(d)) => d,
                Ok(Err(e)) => {
                    tracing::warn!(task_id, path = %file.path.display(), "digest failed: {:#}", e);
                    failures += 1;
                    continue;
                }
                Err(e) => {
                    tracing::warn!(task_id, path = %file.path.display(), "digest task aborted: {}", e);
                    failures += 1;
                    continue;
                }
            };
            let record = FileRecord {
                entry_id: task_id,
                path: file.path.clone(),
                size: digest.size,
                sha256: digest.sha256,
                source_archive: file.source_archive.clone(),
            };
            if let Err(e) = self.registrar.register(&record).await {
                tracing::warn!(task_id, path = %file.path.display(), "metadata registration failed: {}", e);
                failures += 1;
            }
        }
        failures
    }
}

#[cfg(test)]
mod tests;
