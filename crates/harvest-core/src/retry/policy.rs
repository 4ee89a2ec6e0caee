use std::time::Duration;

use crate::config::RetryConfig;

/// High-level classification of a failed attempt for retry purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Server asked us to slow down (HTTP 429). The only retried kind.
    RateLimited,
    /// Connection reset, DNS failure, short body and similar network failures.
    Transient,
    /// The per-attempt timeout elapsed.
    Timeout,
    /// Non-2xx status other than 429.
    Protocol,
    /// Local disk or path problem.
    Filesystem,
    /// The circuit breaker rejected the attempt without a network call.
    BreakerOpen,
    /// The run was cancelled.
    Cancelled,
}

impl ErrorKind {
    /// Whether a task that ended with this kind has reached a terminal state.
    ///
    /// Breaker rejections and cancellations leave the task eligible for a later
    /// poll iteration.
    pub fn is_terminal(self) -> bool {
        !matches!(self, ErrorKind::BreakerOpen | ErrorKind::Cancelled)
    }
}

/// Decision returned by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Do not retry this error.
    NoRetry,
    /// Retry after the given delay.
    RetryAfter(Duration),
}

/// Exponential backoff policy for rate-limited attempts.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first).
    pub max_attempts: u32,
    /// Base delay for backoff; doubles with each attempt.
    pub base_delay: Duration,
    /// Upper bound on the computed backoff (not on server hints).
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(cfg: &RetryConfig) -> Self {
        let base = if cfg.base_delay_secs.is_finite() && cfg.base_delay_secs > 0.0 {
            Duration::from_secs_f64(cfg.base_delay_secs)
        } else {
            Duration::ZERO
        };
        Self {
            max_attempts: cfg.max_attempts.max(1),
            base_delay: base,
            max_delay: Duration::from_secs(cfg.max_delay_secs),
        }
    }

    /// Backoff before the attempt following `attempt` (1-based).
    ///
    /// `base * 2^(attempt-1)` capped at `max_delay`, raised to the server's
    /// `Retry-After` hint when that is longer. Jitter is added by the caller.
    pub fn next_delay(&self, attempt: u32, server_hint: Option<Duration>) -> Duration {
        let exp = 1u32 << attempt.saturating_sub(1).min(16);
        let backoff = self.base_delay.saturating_mul(exp).min(self.max_delay);
        match server_hint {
            Some(hint) => backoff.max(hint),
            None => backoff,
        }
    }

    /// Decide whether to retry after a failed attempt.
    ///
    /// `attempt` is 1-based (1 = first attempt). Only rate-limited failures are
    /// retried; everything else is a single-attempt failure.
    pub fn decide(&self, attempt: u32, kind: ErrorKind, server_hint: Option<Duration>) -> RetryDecision {
        if attempt >= self.max_attempts {
            return RetryDecision::NoRetry;
        }
        match kind {
            ErrorKind::RateLimited => RetryDecision::RetryAfter(self.next_delay(attempt, server_hint)),
            _ => RetryDecision::NoRetry,
        }
    }
}
