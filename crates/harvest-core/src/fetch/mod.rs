//! HTTP GET boundary.
//!
//! The invoker talks to the network only through [`Fetcher`]. A fetch performs
//! exactly one request (redirects followed) and streams a 2xx body into the
//! temp file named in the request; non-2xx bodies are dropped. Status codes are
//! returned, not turned into errors, so the caller owns the retry decision.

mod transfer;
mod headers;
#[cfg(test)]
pub(crate) mod scripted;

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub use transfer::CurlFetcher;
pub use headers::ResponseHead;

/// Progress callback: `(bytes_written, expected_total)`.
pub type ProgressFn = Arc<dyn Fn(u64, Option<u64>) + Send + Sync>;

#[derive(Clone)]
pub struct FetchRequest {
    pub url: String,
    /// File the body is written to. Created or truncated by the fetcher.
    pub dest: PathBuf,
    /// Total per-attempt timeout.
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub progress: Option<ProgressFn>,
}

impl std::fmt::Debug for FetchRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchRequest")
            .field("url", &self.url)
            .field("dest", &self.dest)
            .field("timeout", &self.timeout)
            .field("connect_timeout", &self.connect_timeout)
            .finish_non_exhaustive()
    }
}

/// Final response of one fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchResponse {
    pub status: u32,
    /// Body bytes written to `dest` (0 for non-2xx).
    pub bytes_written: u64,
    /// Declared body length, when known and not content-encoded.
    pub content_length: Option<u64>,
    /// Raw `Retry-After` header value.
    pub retry_after: Option<String>,
}

impl FetchResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,
    #[error("transfer cancelled")]
    Cancelled,
    #[error("{0}")]
    Network(String),
    #[error("write {}: {source}", .path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(
        &self,
        req: FetchRequest,
        cancel: &CancellationToken,
    ) -> Result<FetchResponse, FetchError>;
}
