//! Adaptive pre-request delay shared by all download workers.
//!
//! Steps up by `step` on each rate-limit failure (capped at `max_delay`) and
//! down by `decrease` on each success (floored at zero).

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::config::ThrottleConfig;

#[derive(Debug)]
pub struct AdaptiveThrottle {
    delay_ms: AtomicU64,
    step_ms: u64,
    decrease_ms: u64,
    max_delay_ms: u64,
    jitter_ms: u64,
}

impl AdaptiveThrottle {
    pub fn new(step: Duration, decrease: Duration, max_delay: Duration, jitter: Duration) -> Self {
        Self {
            delay_ms: AtomicU64::new(0),
            step_ms: step.as_millis() as u64,
            decrease_ms: decrease.as_millis() as u64,
            max_delay_ms: max_delay.as_millis() as u64,
            jitter_ms: jitter.as_millis() as u64,
        }
    }

    pub fn from_config(cfg: &ThrottleConfig) -> Self {
        Self::new(
            Duration::from_millis(cfg.step_ms),
            Duration::from_millis(cfg.decrease_ms),
            Duration::from_millis(cfg.max_delay_ms),
            Duration::from_millis(cfg.jitter_ms),
        )
    }

    pub fn current_delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms.load(Ordering::Acquire))
    }

    pub fn on_rate_limited(&self) {
        let (step, cap) = (self.step_ms, self.max_delay_ms);
        let prev = self
            .delay_ms
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |d| {
                Some(d.saturating_add(step).min(cap))
            })
            .unwrap_or_default();
        tracing::debug!(
            delay_ms = prev.saturating_add(step).min(cap),
            "throttle delay increased"
        );
    }

    pub fn on_success(&self) {
        let dec = self.decrease_ms;
        let _ = self
            .delay_ms
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |d| {
                Some(d.saturating_sub(dec))
            });
    }

    /// Random jitter in `[0, jitter]`.
    pub fn jitter(&self) -> Duration {
        if self.jitter_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(fastrand::u64(0..=self.jitter_ms))
    }

    /// The wait to insert before the next request: current delay plus jitter,
    /// or zero when the throttle is relaxed.
    pub fn next_wait(&self) -> Duration {
        let delay = self.current_delay();
        if delay.is_zero() {
            return Duration::ZERO;
        }
        delay + self.jitter()
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

impl Default for AdaptiveThrottle {
    fn default() -> Self {
        Self::from_config(&ThrottleConfig::default())
    }
}
