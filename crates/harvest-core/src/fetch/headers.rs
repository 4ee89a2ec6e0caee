//! Incremental parsing of response header lines.

/// Headers of the most recent response seen on a transfer.
///
/// libcurl hands every response of a redirect chain to the header callback;
/// a new status line resets the state so only the final response remains.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseHead {
    pub status: Option<u32>,
    pub content_length: Option<u64>,
    /// `Content-Encoding`, when not `identity`.
    pub content_encoding: Option<String>,
    pub retry_after: Option<String>,
}

impl ResponseHead {
    pub fn feed_line(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        if line.starts_with("HTTP/") {
            *self = ResponseHead {
                status: line
                    .split_whitespace()
                    .nth(1)
                    .and_then(|c| c.parse().ok()),
                ..Default::default()
            };
            return;
        }
        let Some((name, value)) = line.split_once(':') else {
            return;
        };
        let name = name.trim();
        let value = value.trim();
        if name.eq_ignore_ascii_case("content-length") {
            self.content_length = value.parse::<u64>().ok();
        } else if name.eq_ignore_ascii_case("content-encoding") {
            if !value.eq_ignore_ascii_case("identity") {
                self.content_encoding = Some(value.to_string());
            }
        } else if name.eq_ignore_ascii_case("retry-after") {
            self.retry_after = Some(value.to_string());
        }
    }

    /// Length the decoded body is expected to have. Unknown when the body is
    /// content-encoded, since `Content-Length` then counts encoded bytes.
    pub fn expected_body_len(&self) -> Option<u64> {
        match self.content_encoding {
            Some(_) => None,
            None => self.content_length,
        }
    }
}
