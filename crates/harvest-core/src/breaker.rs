//! Three-state circuit breaker shared by all download workers.
//!
//! Closed → Open after `threshold` consecutive rate-limit failures; Open
//! short-circuits attempts until `open_until`; the first caller after that
//! becomes the single half-open trial, whose verdict closes or reopens it.
//! Time comes from `tokio::time::Instant` so paused-clock tests drive it.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;

use crate::config::BreakerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Result of asking the breaker for permission to make a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    /// Short-circuited; `open_until` is when the breaker will next admit a
    /// trial. While a half-open trial is in flight this is the bound a failed
    /// trial would set, so it is always in the future.
    Rejected { open_until: Instant },
}

/// Point-in-time view of the breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerSnapshot {
    pub state: BreakerState,
    /// Only set while the state is `Open`.
    pub open_until: Option<Instant>,
    pub consecutive_rate_limit_failures: u32,
    /// How many times the breaker has transitioned to `Open`.
    pub times_opened: u64,
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    open_until: Instant,
    trial_in_flight: bool,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    inner: Mutex<Inner>,
    consecutive_rate_limit_failures: AtomicU32,
    times_opened: AtomicU64,
    threshold: u32,
    open_duration: Duration,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, open_duration: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                open_until: Instant::now(),
                trial_in_flight: false,
            }),
            consecutive_rate_limit_failures: AtomicU32::new(0),
            times_opened: AtomicU64::new(0),
            threshold: threshold.max(1),
            open_duration,
        }
    }

    pub fn from_config(cfg: &BreakerConfig) -> Self {
        Self::new(
            cfg.failure_threshold,
            Duration::from_secs(cfg.open_duration_secs),
        )
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Ask for permission to make one request.
    ///
    /// An `Open` breaker whose window has elapsed moves to `HalfOpen` and admits
    /// exactly this caller as the trial; concurrent callers are rejected until
    /// the trial reports back.
    pub fn admit(&self) -> Admission {
        let now = Instant::now();
        let mut inner = self.lock();
        match inner.state {
            BreakerState::Closed => Admission::Allowed,
            BreakerState::Open if now < inner.open_until => Admission::Rejected {
                open_until: inner.open_until,
            },
            BreakerState::Open => {
                inner.state = BreakerState::HalfOpen;
                inner.trial_in_flight = true;
                tracing::info!("circuit breaker half-open, admitting trial request");
                Admission::Allowed
            }
            // Latest instant a failed trial would keep the breaker open until.
            BreakerState::HalfOpen if inner.trial_in_flight => Admission::Rejected {
                open_until: now + self.open_duration,
            },
            BreakerState::HalfOpen => {
                inner.trial_in_flight = true;
                Admission::Allowed
            }
        }
    }

    pub fn should_attempt(&self) -> bool {
        self.admit() == Admission::Allowed
    }

    /// Record a failed request.
    ///
    /// In `Closed`, only rate-limit failures count towards opening. A failed
    /// half-open trial reopens the breaker whatever the cause.
    pub fn record_failure(&self, rate_limited: bool) {
        let mut inner = self.lock();
        let failures = if rate_limited {
            self.consecutive_rate_limit_failures
                .fetch_add(1, Ordering::AcqRel)
                .saturating_add(1)
        } else {
            self.consecutive_rate_limit_failures.load(Ordering::Acquire)
        };
        match inner.state {
            BreakerState::HalfOpen => self.open(&mut inner, failures),
            BreakerState::Closed if rate_limited && failures >= self.threshold => {
                self.open(&mut inner, failures)
            }
            BreakerState::Closed | BreakerState::Open => {}
        }
    }

    /// Record a successful request. Resets the failure counter; closes a
    /// half-open breaker.
    pub fn record_success(&self) {
        let mut inner = self.lock();
        self.consecutive_rate_limit_failures.store(0, Ordering::Release);
        if inner.state == BreakerState::HalfOpen {
            inner.state = BreakerState::Closed;
            inner.trial_in_flight = false;
            tracing::info!("circuit breaker closed after successful trial");
        }
    }

    /// Release the half-open trial slot without a verdict (e.g. the trial was cancelled).
    pub fn abandon_trial(&self) {
        let mut inner = self.lock();
        if inner.state == BreakerState::HalfOpen {
            inner.trial_in_flight = false;
        }
    }

    fn open(&self, inner: &mut Inner, failures: u32) {
        inner.state = BreakerState::Open;
        inner.open_until = Instant::now() + self.open_duration;
        inner.trial_in_flight = false;
        self.times_opened.fetch_add(1, Ordering::AcqRel);
        tracing::warn!(
            failures,
            open_for_secs = self.open_duration.as_secs(),
            "circuit breaker opened"
        );
    }

    pub fn state(&self) -> BreakerState {
        self.lock().state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_rate_limit_failures.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.lock();
        BreakerSnapshot {
            state: inner.state,
            open_until: (inner.state == BreakerState::Open).then_some(inner.open_until),
            consecutive_rate_limit_failures: self.consecutive_failures(),
            times_opened: self.times_opened.load(Ordering::Acquire),
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::from_config(&BreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(5, Duration::from_secs(30))
    }

    #[tokio::test(start_paused = true)]
    async fn opens_once_after_threshold_rate_limits() {
        let b = breaker();
        for _ in 0..4 {
            assert!(b.should_attempt());
            b.record_failure(true);
            assert_eq!(b.state(), BreakerState::Closed);
        }
        b.record_failure(true);
        assert_eq!(b.state(), BreakerState::Open);
        let snap = b.snapshot();
        assert_eq!(snap.times_opened, 1);
        assert_eq!(snap.open_until, Some(Instant::now() + Duration::from_secs(30)));

        // Late 429s from requests issued before the breaker opened do not reopen it.
        b.record_failure(true);
        b.record_failure(true);
        assert_eq!(b.snapshot().times_opened, 1);
        assert_eq!(b.snapshot().open_until, snap.open_until);
    }

    #[tokio::test(start_paused = true)]
    async fn rejects_within_open_window_with_open_until() {
        let b = breaker();
        for _ in 0..5 {
            b.record_failure(true);
        }
        let open_until = b.snapshot().open_until.unwrap();
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(b.admit(), Admission::Rejected { open_until });
    }

    #[tokio::test(start_paused = true)]
    async fn non_rate_limit_failures_do_not_move_closed_breaker() {
        let b = breaker();
        for _ in 0..20 {
            b.record_failure(false);
        }
        assert_eq!(b.state(), BreakerState::Closed);
        assert_eq!(b.consecutive_failures(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn success_resets_counter() {
        let b = breaker();
        for _ in 0..4 {
            b.record_failure(true);
        }
        b.record_success();
        assert_eq!(b.consecutive_failures(), 0);
        for _ in 0..4 {
            b.record_failure(true);
        }
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_admits_exactly_one_trial() {
        let b = breaker();
        for _ in 0..5 {
            b.record_failure(true);
        }
        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(b.admit(), Admission::Allowed);
        assert_eq!(b.state(), BreakerState::HalfOpen);
        assert!(matches!(b.admit(), Admission::Rejected { .. }));
        assert!(matches!(b.admit(), Admission::Rejected { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn rejection_during_trial_reports_future_instant() {
        let b = breaker();
        for _ in 0..5 {
            b.record_failure(true);
        }
        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(b.admit(), Admission::Allowed);
        tokio::time::advance(Duration::from_secs(2)).await;
        let now = Instant::now();
        match b.admit() {
            Admission::Rejected { open_until } => {
                assert!(open_until > now, "stale open_until");
                assert_eq!(open_until, now + Duration::from_secs(30));
            }
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn successful_trial_closes() {
        let b = breaker();
        for _ in 0..5 {
            b.record_failure(true);
        }
        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(b.should_attempt());
        b.record_success();
        let snap = b.snapshot();
        assert_eq!(snap.state, BreakerState::Closed);
        assert_eq!(snap.consecutive_rate_limit_failures, 0);
        assert_eq!(snap.open_until, None);
        assert!(b.should_attempt());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_trial_reopens_with_fresh_window() {
        let b = breaker();
        for _ in 0..5 {
            b.record_failure(true);
        }
        let first = b.snapshot().open_until.unwrap();
        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(b.should_attempt());
        b.record_failure(false);
        let snap = b.snapshot();
        assert_eq!(snap.state, BreakerState::Open);
        assert_eq!(snap.times_opened, 2);
        assert!(snap.open_until.unwrap() > first);
        assert_eq!(snap.open_until, Some(Instant::now() + Duration::from_secs(30)));
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_trial_frees_the_slot() {
        let b = breaker();
        for _ in 0..5 {
            b.record_failure(true);
        }
        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(b.should_attempt());
        b.abandon_trial();
        assert_eq!(b.state(), BreakerState::HalfOpen);
        assert!(b.should_attempt());
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_race_for_a_single_trial() {
        let b = Arc::new(breaker());
        for _ in 0..5 {
            b.record_failure(true);
        }
        tokio::time::advance(Duration::from_secs(31)).await;
        let rt = tokio::runtime::Handle::current();
        let mut handles = Vec::new();
        for _ in 0..8 {
            let b = Arc::clone(&b);
            let rt = rt.clone();
            handles.push(std::thread::spawn(move || {
                // Enter the runtime so the threads read the paused clock.
                let _guard = rt.enter();
                b.should_attempt()
            }));
        }
        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(admitted, 1);
    }
}
