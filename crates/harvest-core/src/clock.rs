//! Wall-clock view anchored at session start and advanced by the tokio clock.
//!
//! The poll loop compares "now" against a wall-clock window end. Reading it
//! through `tokio::time::Instant` lets a paused runtime drive the loop.

use chrono::{DateTime, Utc};
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
pub struct SessionClock {
    origin_wall: DateTime<Utc>,
    origin: Instant,
}

impl SessionClock {
    pub fn start() -> Self {
        Self::anchored_at(Utc::now())
    }

    /// A clock reading `wall` right now.
    pub fn anchored_at(wall: DateTime<Utc>) -> Self {
        Self {
            origin_wall: wall,
            origin: Instant::now(),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        let elapsed = Instant::now().saturating_duration_since(self.origin);
        match chrono::Duration::from_std(elapsed) {
            Ok(d) => self.origin_wall + d,
            Err(_) => DateTime::<Utc>::MAX_UTC,
        }
    }
}
