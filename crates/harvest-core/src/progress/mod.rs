//! Progress and log aggregation.
//!
//! Workers publish [`Update`]s through a cloneable [`ProgressHandle`]; sends
//! never block. A single [`Aggregator`] task drains the queue on a fixed
//! interval, applies everything in one pass and publishes an immutable
//! [`Snapshot`] on a watch channel. It is the only writer of that state.

mod aggregator;
mod snapshot;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

use crate::fetch::ProgressFn;

pub use aggregator::Aggregator;
pub use snapshot::{DailyStat, OutcomeTotals, Snapshot, TransferProgress};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEvent {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub task_id: Option<i64>,
    pub message: String,
}

/// Terminal state of one task as seen by observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Succeeded,
    Failed,
    Cancelled,
    /// Short-circuited by the breaker; eligible again on the next poll.
    Deferred,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    /// Entries the catalog reported for a publish date this session.
    Expected { date: NaiveDate, count: u64 },
    /// One more task for `date` reached a terminal state.
    Processed { date: NaiveDate },
    Log(LogEvent),
    Transfer {
        task_id: i64,
        bytes: u64,
        total: Option<u64>,
    },
    Finished { task_id: i64, state: TaskState },
}

/// Producer side. Cheap to clone; sending never blocks and never fails
/// visibly (updates sent after the aggregator is gone are dropped).
#[derive(Debug, Clone)]
pub struct ProgressHandle {
    tx: mpsc::UnboundedSender<Update>,
}

impl ProgressHandle {
    /// A handle whose updates go nowhere.
    pub fn detached() -> Self {
        let (tx, _rx) = mpsc::unbounded_channel();
        Self { tx }
    }

    pub fn publish(&self, update: Update) {
        let _ = self.tx.send(update);
    }

    /// Record a log event and mirror it to tracing.
    pub fn log(&self, level: LogLevel, task_id: Option<i64>, message: impl Into<String>) {
        let message = message.into();
        match level {
            LogLevel::Debug => tracing::debug!(task_id, "{}", message),
            LogLevel::Info => tracing::info!(task_id, "{}", message),
            LogLevel::Warn => tracing::warn!(task_id, "{}", message),
            LogLevel::Error => tracing::error!(task_id, "{}", message),
        }
        self.publish(Update::Log(LogEvent {
            timestamp: Utc::now(),
            level,
            task_id,
            message,
        }));
    }

    pub fn expected(&self, date: NaiveDate, count: u64) {
        self.publish(Update::Expected { date, count });
    }

    pub fn processed(&self, date: NaiveDate) {
        self.publish(Update::Processed { date });
    }

    pub fn finished(&self, task_id: i64, state: TaskState) {
        self.publish(Update::Finished { task_id, state });
    }

    /// Transfer callback for the fetcher that reports into this handle.
    pub fn transfer_callback(&self, task_id: i64) -> ProgressFn {
        let handle = self.clone();
        Arc::new(move |bytes, total| {
            handle.publish(Update::Transfer {
                task_id,
                bytes,
                total,
            })
        })
    }
}

/// Create a producer handle, the aggregator that consumes it, and a receiver
/// for published snapshots. Spawn [`Aggregator::run`] to start draining.
pub fn channel(
    log_capacity: usize,
    flush_interval: Duration,
) -> (ProgressHandle, Aggregator, watch::Receiver<Arc<Snapshot>>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let (snap_tx, snap_rx) = watch::channel(Arc::new(Snapshot::default()));
    (
        ProgressHandle { tx },
        Aggregator::new(rx, snap_tx, log_capacity, flush_interval),
        snap_rx,
    )
}
