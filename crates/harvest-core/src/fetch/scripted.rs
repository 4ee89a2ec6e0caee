//! Scripted in-process fetcher for engine tests.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::{FetchError, FetchRequest, FetchResponse, Fetcher};

#[derive(Debug, Clone)]
pub(crate) enum Reply {
    /// 200 with this body.
    Body(Vec<u8>),
    /// 200 declaring `declared` bytes but delivering `body`.
    Short { body: Vec<u8>, declared: u64 },
    /// Non-2xx status with an optional `Retry-After`.
    Status(u32, Option<&'static str>),
    Network(&'static str),
    Timeout,
}

pub(crate) struct ScriptedFetcher {
    script: Mutex<VecDeque<Reply>>,
    fallback: Reply,
    latency: Duration,
    calls: AtomicUsize,
}

impl ScriptedFetcher {
    pub(crate) fn new(script: Vec<Reply>, fallback: Reply) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback,
            latency: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    /// Always answer with `reply`.
    pub(crate) fn always(reply: Reply) -> Self {
        Self::new(Vec::new(), reply)
    }

    pub(crate) fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_reply(&self) -> Reply {
        let mut script = self.script.lock().unwrap();
        script.pop_front().unwrap_or_else(|| self.fallback.clone())
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(
        &self,
        req: FetchRequest,
        cancel: &CancellationToken,
    ) -> Result<FetchResponse, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let reply = self.next_reply();
        if !self.latency.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                _ = tokio::time::sleep(self.latency) => {}
            }
        }
        let write = |body: &[u8]| -> Result<u64, FetchError> {
            if let Some(parent) = req.dest.parent() {
                std::fs::create_dir_all(parent).unwrap();
            }
            std::fs::write(&req.dest, body).map_err(|source| FetchError::Storage {
                path: req.dest.clone(),
                source,
            })?;
            if let Some(cb) = &req.progress {
                cb(body.len() as u64, Some(body.len() as u64));
            }
            Ok(body.len() as u64)
        };
        match reply {
            Reply::Body(body) => Ok(FetchResponse {
                status: 200,
                bytes_written: write(&body)?,
                content_length: Some(body.len() as u64),
                retry_after: None,
            }),
            Reply::Short { body, declared } => Ok(FetchResponse {
                status: 200,
                bytes_written: write(&body)?,
                content_length: Some(declared),
                retry_after: None,
            }),
            Reply::Status(status, retry_after) => {
                write(b"")?;
                Ok(FetchResponse {
                    status,
                    bytes_written: 0,
                    content_length: None,
                    retry_after: retry_after.map(str::to_string),
                })
            }
            Reply::Network(msg) => Err(FetchError::Network(msg.to_string())),
            Reply::Timeout => Err(FetchError::Timeout),
        }
    }
}
