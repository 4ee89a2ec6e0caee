//! Single consumer that drains progress updates on a fixed interval.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;

use super::snapshot::{Snapshot, State};
use super::Update;

pub struct Aggregator {
    rx: mpsc::UnboundedReceiver<Update>,
    snapshots: watch::Sender<Arc<Snapshot>>,
    state: State,
    log_capacity: usize,
    flush_interval: Duration,
}

impl Aggregator {
    pub(super) fn new(
        rx: mpsc::UnboundedReceiver<Update>,
        snapshots: watch::Sender<Arc<Snapshot>>,
        log_capacity: usize,
        flush_interval: Duration,
    ) -> Self {
        Self {
            rx,
            snapshots,
            state: State::default(),
            log_capacity: log_capacity.max(1),
            flush_interval: flush_interval.max(Duration::from_millis(1)),
        }
    }

    /// Drain every `flush_interval` until all producers are dropped, then do a
    /// final drain and return the last snapshot.
    pub async fn run(mut self) -> Arc<Snapshot> {
        let mut ticker = tokio::time::interval(self.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let open = self.drain();
            if !open {
                break;
            }
        }
        tracing::debug!(revision = self.state.revision, "progress aggregator stopped");
        self.snapshots.borrow().clone()
    }

    /// Apply everything queued right now. Returns false once the queue is
    /// empty and every producer is gone.
    fn drain(&mut self) -> bool {
        let mut applied = 0usize;
        let open = loop {
            match self.rx.try_recv() {
                Ok(update) => {
                    self.apply(update);
                    applied += 1;
                }
                Err(TryRecvError::Empty) => break true,
                Err(TryRecvError::Disconnected) => break false,
            }
        };
        if applied > 0 {
            self.state.revision += 1;
            self.snapshots.send_replace(Arc::new(self.state.snapshot()));
        }
        open
    }

    fn apply(&mut self, update: Update) {
        let state = &mut self.state;
        match update {
            Update::Expected { date, count } => state.day(date).expected = count,
            Update::Processed { date } => state.day(date).processed += 1,
            Update::Log(event) => {
                if state.logs.len() == self.log_capacity {
                    state.logs.pop_front();
                }
                state.logs.push_back(event);
            }
            Update::Transfer {
                task_id,
                bytes,
                total,
            } => {
                state
                    .transfers
                    .insert(task_id, super::TransferProgress { bytes, total });
            }
            Update::Finished { task_id, state: s } => {
                state.transfers.remove(&task_id);
                state.totals.record(s);
            }
        }
    }
}
