//! libcurl-backed fetcher.
//!
//! Each fetch runs a blocking `curl::easy::Easy` transfer on tokio's blocking
//! pool. Cancellation is polled from curl's progress callback.

use async_trait::async_trait;
use std::cell::RefCell;
use std::fs::File;
use std::io::{self, Write};
use std::str;
use tokio_util::sync::CancellationToken;

use super::headers::ResponseHead;
use super::{FetchError, FetchRequest, FetchResponse, Fetcher};
use crate::retry::{classify_curl_error, ErrorKind};
use crate::storage;

/// Production fetcher. Follows redirects and accepts every content encoding
/// libcurl was built with.
#[derive(Debug, Clone)]
pub struct CurlFetcher {
    max_redirections: u32,
}

impl CurlFetcher {
    pub fn new() -> Self {
        Self {
            max_redirections: 10,
        }
    }
}

impl Default for CurlFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Fetcher for CurlFetcher {
    async fn fetch(
        &self,
        req: FetchRequest,
        cancel: &CancellationToken,
    ) -> Result<FetchResponse, FetchError> {
        let cancel = cancel.clone();
        let max_redirections = self.max_redirections;
        tokio::task::spawn_blocking(move || fetch_blocking(&req, &cancel, max_redirections))
            .await
            .map_err(|e| FetchError::Network(format!("transfer task failed: {}", e)))?
    }
}

fn network(e: curl::Error) -> FetchError {
    FetchError::Network(e.to_string())
}

/// Body sink state shared between the header and write callbacks.
struct Sink {
    file: File,
    written: u64,
    error: Option<io::Error>,
}

fn fetch_blocking(
    req: &FetchRequest,
    cancel: &CancellationToken,
    max_redirections: u32,
) -> Result<FetchResponse, FetchError> {
    let storage_err = |source| FetchError::Storage {
        path: req.dest.clone(),
        source,
    };
    let file = storage::create_temp(&req.dest).map_err(storage_err)?;
    let sink = RefCell::new(Sink {
        file,
        written: 0,
        error: None,
    });
    let head = RefCell::new(ResponseHead::default());

    let mut easy = curl::easy::Easy::new();
    easy.url(&req.url).map_err(network)?;
    easy.follow_location(true).map_err(network)?;
    easy.max_redirections(max_redirections).map_err(network)?;
    // Empty string: advertise and decode every supported encoding.
    easy.accept_encoding("").map_err(network)?;
    easy.connect_timeout(req.connect_timeout).map_err(network)?;
    easy.timeout(req.timeout).map_err(network)?;
    easy.progress(true).map_err(network)?;

    let result = {
        let mut transfer = easy.transfer();
        transfer
            .header_function(|data| {
                if let Ok(line) = str::from_utf8(data) {
                    head.borrow_mut().feed_line(line);
                }
                true
            })
            .map_err(network)?;
        transfer
            .write_function(|data| {
                let (status, expected) = {
                    let h = head.borrow();
                    (h.status.unwrap_or(0), h.expected_body_len())
                };
                if !(200..300).contains(&status) {
                    return Ok(data.len());
                }
                let mut sink = sink.borrow_mut();
                if let Err(e) = sink.file.write_all(data) {
                    tracing::warn!(path = %req.dest.display(), "body write failed: {}", e);
                    sink.error = Some(e);
                    // Short count aborts the transfer with a write error.
                    return Ok(0);
                }
                sink.written += data.len() as u64;
                if let Some(cb) = &req.progress {
                    cb(sink.written, expected);
                }
                Ok(data.len())
            })
            .map_err(network)?;
        transfer
            .progress_function(|_, _, _, _| !cancel.is_cancelled())
            .map_err(network)?;
        transfer.perform()
    };

    let mut sink = sink.into_inner();
    if let Err(e) = result {
        return Err(match classify_curl_error(&e) {
            ErrorKind::Timeout => FetchError::Timeout,
            ErrorKind::Filesystem | ErrorKind::Cancelled if sink.error.is_some() => {
                storage_err(sink.error.take().unwrap_or_else(|| io::Error::other(e.to_string())))
            }
            ErrorKind::Cancelled => FetchError::Cancelled,
            ErrorKind::Filesystem => storage_err(io::Error::other(e.to_string())),
            _ => network(e),
        });
    }
    sink.file.flush().map_err(storage_err)?;

    let head = head.into_inner();
    let status = match easy.response_code().map_err(network)? {
        0 => head.status.unwrap_or(0),
        code => code,
    };
    let content_length = if (200..300).contains(&status) {
        head.expected_body_len()
    } else {
        None
    };
    Ok(FetchResponse {
        status,
        bytes_written: sink.written,
        content_length,
        retry_after: head.retry_after,
    })
}
