//! One logical download with bounded retries.
//!
//! Every attempt first asks the shared [`CircuitBreaker`] for admission, then
//! waits out the shared [`AdaptiveThrottle`] delay before calling the
//! [`Fetcher`]. Only HTTP 429 is retried, with the backoff from
//! [`RetryPolicy::next_delay`] raised to the server's `Retry-After`. Bodies land
//! in `<destination>.part` and are renamed into place on success.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::breaker::{Admission, CircuitBreaker};
use crate::config::HarvestConfig;
use crate::fetch::{FetchError, FetchRequest, Fetcher, ProgressFn};
use crate::retry::{parse_retry_after, DownloadError, ErrorKind, RetryDecision, RetryPolicy};
use crate::storage;
use crate::task::DownloadTask;
use crate::throttle::AdaptiveThrottle;

/// Result of a download invocation; reflects the last attempt made.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadOutcome {
    pub success: bool,
    pub bytes_written: u64,
    pub expected_bytes: Option<u64>,
    pub status: Option<u32>,
    pub error: Option<DownloadError>,
    /// Server-provided `Retry-After` of the last 429, if any.
    pub retry_after: Option<Duration>,
    /// Requests actually sent.
    pub attempts: u32,
    /// Set when the breaker short-circuited the invocation.
    pub breaker_open_until: Option<Instant>,
}

impl DownloadOutcome {
    pub fn kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(DownloadError::kind)
    }

    fn fail(&mut self, err: DownloadError) {
        self.success = false;
        self.error = Some(err);
    }
}

/// Per-attempt network limits and the disk-space warning floor.
#[derive(Debug, Clone, Copy)]
pub struct InvokerLimits {
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    pub min_free_bytes: u64,
    /// Server Retry-After hints above this are clamped to it.
    pub max_retry_after: Duration,
}

impl InvokerLimits {
    pub fn from_config(cfg: &HarvestConfig) -> Self {
        Self {
            request_timeout: Duration::from_secs(cfg.request_timeout_secs),
            connect_timeout: Duration::from_secs(cfg.connect_timeout_secs),
            min_free_bytes: cfg.min_free_bytes,
            max_retry_after: Duration::from_secs(cfg.max_retry_after_secs),
        }
    }
}

impl Default for InvokerLimits {
    fn default() -> Self {
        Self::from_config(&HarvestConfig::default())
    }
}

pub struct DownloadInvoker {
    fetcher: Arc<dyn Fetcher>,
    breaker: Arc<CircuitBreaker>,
    throttle: Arc<AdaptiveThrottle>,
    policy: RetryPolicy,
    limits: InvokerLimits,
}

impl DownloadInvoker {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        breaker: Arc<CircuitBreaker>,
        throttle: Arc<AdaptiveThrottle>,
        policy: RetryPolicy,
        limits: InvokerLimits,
    ) -> Self {
        Self {
            fetcher,
            breaker,
            throttle,
            policy,
            limits,
        }
    }

    /// Build an invoker with fresh breaker and throttle from configuration.
    pub fn from_config(fetcher: Arc<dyn Fetcher>, cfg: &HarvestConfig) -> Self {
        Self::new(
            fetcher,
            Arc::new(CircuitBreaker::from_config(&cfg.breaker_or_default())),
            Arc::new(AdaptiveThrottle::from_config(&cfg.throttle_or_default())),
            RetryPolicy::from_config(&cfg.retry_or_default()),
            InvokerLimits::from_config(cfg),
        )
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn throttle(&self) -> &Arc<AdaptiveThrottle> {
        &self.throttle
    }

    pub async fn download(&self, task: &DownloadTask, cancel: &CancellationToken) -> DownloadOutcome {
        self.download_with_progress(task, None, cancel).await
    }

    pub async fn download_with_progress(
        &self,
        task: &DownloadTask,
        progress: Option<ProgressFn>,
        cancel: &CancellationToken,
    ) -> DownloadOutcome {
        let temp = storage::temp_path(&task.destination);
        if let Some(dir) = task.destination.parent() {
            storage::warn_if_low_space(dir, self.limits.min_free_bytes);
        }
        let req = FetchRequest {
            url: task.url.clone(),
            dest: temp.clone(),
            timeout: self.limits.request_timeout,
            connect_timeout: self.limits.connect_timeout,
            progress,
        };

        let mut outcome = DownloadOutcome::default();
        for attempt in 1..=self.policy.max_attempts {
            if cancel.is_cancelled() {
                outcome.fail(DownloadError::Cancelled);
                break;
            }
            if let Admission::Rejected { open_until } = self.breaker.admit() {
                tracing::debug!(task_id = task.id, attempt, "circuit breaker open, skipping request");
                outcome.breaker_open_until = Some(open_until);
                outcome.fail(DownloadError::BreakerOpen {
                    retry_in: open_until.saturating_duration_since(Instant::now()),
                });
                break;
            }

            let wait = self.throttle.next_wait();
            if !wait.is_zero() {
                tracing::trace!(task_id = task.id, wait_ms = wait.as_millis() as u64, "throttle wait");
                if !sleep_or_cancel(wait, cancel).await {
                    self.breaker.abandon_trial();
                    outcome.fail(DownloadError::Cancelled);
                    break;
                }
            }

            outcome.attempts = attempt;
            tracing::debug!(task_id = task.id, attempt, url = %task.url, "requesting");
            let resp = match self.fetcher.fetch(req.clone(), cancel).await {
                Ok(resp) => resp,
                Err(FetchError::Cancelled) => {
                    self.breaker.abandon_trial();
                    outcome.fail(DownloadError::Cancelled);
                    break;
                }
                Err(e) => {
                    self.breaker.record_failure(false);
                    outcome.fail(self.map_fetch_error(e));
                    break;
                }
            };
            outcome.status = Some(resp.status);

            if resp.is_success() {
                outcome.bytes_written = resp.bytes_written;
                outcome.expected_bytes = resp.content_length;
                if let Some(expected) = resp.content_length {
                    if resp.bytes_written < expected {
                        self.breaker.record_failure(false);
                        outcome.fail(DownloadError::PartialTransfer {
                            expected,
                            received: resp.bytes_written,
                        });
                        break;
                    }
                }
                self.throttle.on_success();
                self.breaker.record_success();
                match storage::finalize(&temp, &task.destination) {
                    Ok(()) => {
                        outcome.success = true;
                        outcome.error = None;
                    }
                    Err(e) => outcome.fail(DownloadError::Filesystem {
                        path: task.destination.clone(),
                        message: e.to_string(),
                    }),
                }
                break;
            }

            let hint = resp
                .retry_after
                .as_deref()
                .and_then(|v| parse_retry_after(v, Utc::now()))
                .map(|h| self.clamp_retry_after(task.id, h));
            let err = DownloadError::from_status(resp.status, hint);
            let kind = err.kind();
            outcome.fail(err);
            if kind != ErrorKind::RateLimited {
                self.breaker.record_failure(false);
                break;
            }

            outcome.retry_after = hint;
            self.throttle.on_rate_limited();
            self.breaker.record_failure(true);
            match self.policy.decide(attempt, kind, hint) {
                RetryDecision::RetryAfter(delay) => {
                    let delay = delay.saturating_add(self.throttle.jitter());
                    tracing::info!(
                        task_id = task.id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "rate limited, backing off"
                    );
                    if !sleep_or_cancel(delay, cancel).await {
                        outcome.fail(DownloadError::Cancelled);
                        break;
                    }
                }
                RetryDecision::NoRetry => break,
            }
        }

        if !outcome.success {
            storage::discard(&temp);
        }
        outcome
    }

    fn clamp_retry_after(&self, task_id: i64, hint: Duration) -> Duration {
        let max = self.limits.max_retry_after;
        if hint <= max {
            return hint;
        }
        tracing::warn!(
            task_id,
            requested_secs = hint.as_secs(),
            max_secs = max.as_secs(),
            "Retry-After exceeds limit, clamping"
        );
        max
    }

    fn map_fetch_error(&self, e: FetchError) -> DownloadError {
        match e {
            FetchError::Timeout => DownloadError::Timeout(self.limits.request_timeout),
            FetchError::Cancelled => DownloadError::Cancelled,
            FetchError::Network(msg) => DownloadError::Transient(msg),
            FetchError::Storage { path, source } => DownloadError::Filesystem {
                path,
                message: source.to_string(),
            },
        }
    }
}

/// Sleep for `d` unless cancelled first. Returns false on cancellation.
pub(crate) async fn sleep_or_cancel(d: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(d) => true,
    }
}
