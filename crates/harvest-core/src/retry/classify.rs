//! Classify HTTP status and curl errors into retry policy error kinds.

use crate::retry::policy::ErrorKind;

/// Classify a non-2xx HTTP status code.
pub fn classify_http_status(code: u32) -> ErrorKind {
    match code {
        429 => ErrorKind::RateLimited,
        _ => ErrorKind::Protocol,
    }
}

/// Classify a curl error.
pub fn classify_curl_error(e: &curl::Error) -> ErrorKind {
    if e.is_operation_timedout() {
        return ErrorKind::Timeout;
    }
    if e.is_aborted_by_callback() {
        return ErrorKind::Cancelled;
    }
    if e.is_write_error() {
        return ErrorKind::Filesystem;
    }
    ErrorKind::Transient
}
