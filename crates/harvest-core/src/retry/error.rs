//! Per-task download error, discriminated by retry kind.

use std::path::PathBuf;
use std::time::Duration;

use super::classify::classify_http_status;
use super::policy::ErrorKind;

/// Why a download attempt (and therefore the task's last outcome) failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DownloadError {
    /// Server answered 429.
    #[error("rate limited by server (HTTP 429){}", fmt_hint(.retry_after))]
    RateLimited { retry_after: Option<Duration> },
    /// The circuit breaker is open; no request was made.
    #[error("circuit breaker open, retry in {:.1}s", secs(.retry_in))]
    BreakerOpen { retry_in: Duration },
    /// Network-level failure (connection, DNS, reset, short body).
    #[error("network error: {0}")]
    Transient(String),
    /// Transfer completed with fewer bytes than the server announced.
    #[error("partial transfer: expected {expected} bytes, got {received}")]
    PartialTransfer { expected: u64, received: u64 },
    #[error("request timed out after {:.0}s", secs(.0))]
    Timeout(Duration),
    /// Any non-2xx status other than 429.
    #[error("HTTP {0}")]
    Protocol(u32),
    #[error("filesystem error at {}: {message}", .path.display())]
    Filesystem { path: PathBuf, message: String },
    #[error("cancelled")]
    Cancelled,
}

fn secs(d: &Duration) -> f64 {
    d.as_secs_f64()
}

fn fmt_hint(hint: &Option<Duration>) -> String {
    match hint {
        Some(d) => format!(", retry after {}s", d.as_secs()),
        None => String::new(),
    }
}

impl DownloadError {
    /// Error for a non-2xx HTTP status.
    pub fn from_status(code: u32, retry_after: Option<Duration>) -> Self {
        match classify_http_status(code) {
            ErrorKind::RateLimited => DownloadError::RateLimited { retry_after },
            _ => DownloadError::Protocol(code),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            DownloadError::RateLimited { .. } => ErrorKind::RateLimited,
            DownloadError::BreakerOpen { .. } => ErrorKind::BreakerOpen,
            DownloadError::Transient(_) | DownloadError::PartialTransfer { .. } => {
                ErrorKind::Transient
            }
            DownloadError::Timeout(_) => ErrorKind::Timeout,
            DownloadError::Protocol(_) => ErrorKind::Protocol,
            DownloadError::Filesystem { .. } => ErrorKind::Filesystem,
            DownloadError::Cancelled => ErrorKind::Cancelled,
        }
    }
}
