//! URL modeling and destination derivation.
//!
//! Derives safe local paths for catalog entries from their destination hint
//! or URL path, sanitized for common filesystems.

mod path;
mod sanitize;

pub use path::filename_from_url_path;
pub use sanitize::sanitize_filename;

use chrono::NaiveDate;
use std::path::{Path, PathBuf};

/// Derives a safe filename for saving a download.
///
/// Prefers the last component of `hint`, then the last path segment of `url`,
/// then `entry-<id>.bin`.
///
/// # Examples
///
/// - `derive_filename(7, "https://example.com/archive.zip", None)` → `"archive.zip"`
/// - `derive_filename(7, "https://example.com/", Some("report?.pdf"))` → `"report_.pdf"`
pub fn derive_filename(id: i64, url: &str, hint: Option<&str>) -> String {
    let candidate = hint
        .and_then(|h| h.rsplit(['/', '\\']).find(|s| !s.trim().is_empty()))
        .map(str::to_string)
        .or_else(|| filename_from_url_path(url));

    let fallback = || format!("entry-{}.bin", id);
    let Some(raw) = candidate else {
        return fallback();
    };

    let sanitized = sanitize_filename(&raw);
    if sanitized.is_empty() || sanitized == "." || sanitized == ".." {
        fallback()
    } else {
        sanitized
    }
}

/// Destination for a catalog entry.
///
/// With a hint: `<root>/<YYYY-MM-DD>/<hint dirs>/<filename>`. Directory
/// components of the hint are sanitized individually; `.`/`..` and empty
/// components are dropped so the result stays under `root`.
///
/// Without a hint: `<root>/<YYYY-MM-DD>/<id>/<filename>`. URL-derived names
/// repeat across entries (`download.php?id=1`, `?id=2`), so each entry gets
/// its own directory, which also holds its expanded archive contents.
pub fn resolve_destination(
    root: &Path,
    publish_date: NaiveDate,
    id: i64,
    url: &str,
    hint: Option<&str>,
) -> PathBuf {
    let mut dest = root.join(publish_date.format("%Y-%m-%d").to_string());
    match hint.filter(|h| !h.trim().is_empty()) {
        Some(h) => {
            let parts: Vec<&str> = h.split(['/', '\\']).collect();
            for dir in &parts[..parts.len() - 1] {
                let clean = sanitize_filename(dir);
                if !clean.is_empty() && clean != "." && clean != ".." {
                    dest.push(clean);
                }
            }
        }
        None => dest.push(id.to_string()),
    }
    dest.join(derive_filename(id, url, hint))
}
