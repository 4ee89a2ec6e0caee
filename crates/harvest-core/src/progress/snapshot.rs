use chrono::NaiveDate;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};

use super::{LogEvent, TaskState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DailyStat {
    pub date: NaiveDate,
    pub expected: u64,
    /// Never decreases within a session.
    pub processed: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OutcomeTotals {
    pub succeeded: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub deferred: u64,
}

impl OutcomeTotals {
    pub(super) fn record(&mut self, state: TaskState) {
        match state {
            TaskState::Succeeded => self.succeeded += 1,
            TaskState::Failed => self.failed += 1,
            TaskState::Cancelled => self.cancelled += 1,
            TaskState::Deferred => self.deferred += 1,
        }
    }
}

/// Bytes received so far for an in-flight download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TransferProgress {
    pub bytes: u64,
    pub total: Option<u64>,
}

impl TransferProgress {
    /// Fraction complete in [0.0, 1.0], when the total is known.
    pub fn fraction(&self) -> Option<f64> {
        match self.total {
            Some(0) => Some(1.0),
            Some(total) => Some((self.bytes as f64 / total as f64).min(1.0)),
            None => None,
        }
    }
}

/// Immutable view published after each drain.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Snapshot {
    /// Ordered by date.
    pub daily: Vec<DailyStat>,
    /// Oldest first, bounded by the configured capacity.
    pub logs: Vec<LogEvent>,
    pub totals: OutcomeTotals,
    pub transfers: BTreeMap<i64, TransferProgress>,
    /// Number of drains that applied at least one update.
    pub revision: u64,
}

impl Snapshot {
    pub fn daily_for(&self, date: NaiveDate) -> Option<&DailyStat> {
        self.daily.iter().find(|d| d.date == date)
    }
}

/// Mutable aggregate owned by the consumer task.
#[derive(Debug, Default)]
pub(super) struct State {
    pub(super) daily: BTreeMap<NaiveDate, DailyStat>,
    pub(super) logs: VecDeque<LogEvent>,
    pub(super) totals: OutcomeTotals,
    pub(super) transfers: BTreeMap<i64, TransferProgress>,
    pub(super) revision: u64,
}

impl State {
    pub(super) fn day(&mut self, date: NaiveDate) -> &mut DailyStat {
        self.daily.entry(date).or_insert(DailyStat {
            date,
            expected: 0,
            processed: 0,
        })
    }

    pub(super) fn snapshot(&self) -> Snapshot {
        Snapshot {
            daily: self.daily.values().copied().collect(),
            logs: self.logs.iter().cloned().collect(),
            totals: self.totals,
            transfers: self.transfers.clone(),
            revision: self.revision,
        }
    }
}
