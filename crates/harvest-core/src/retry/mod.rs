//! Retry and backoff policy.
//!
//! This module encapsulates error classification (rate limiting, timeouts,
//! connection failures, protocol errors) and the backoff computation so the
//! download invoker can run an explicit bounded retry loop.

mod classify;
mod error;
mod policy;
mod retry_after;

pub use classify::{classify_curl_error, classify_http_status};
pub use error::DownloadError;
pub use policy::{ErrorKind, RetryDecision, RetryPolicy};
pub use retry_after::parse_retry_after;
