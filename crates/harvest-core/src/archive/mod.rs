//! Recursive archive expansion.
//!
//! [`ArchiveExpander`] extracts an archive with an [`Extractor`] and recurses
//! into archive-shaped entries, each into a sibling directory named after the
//! nested archive's stem, until the depth budget runs out. Archives left at
//! depth zero are returned as opaque files. Per-entry failures are collected,
//! never propagated; an archive is deleted only once it and everything nested
//! in it expanded cleanly.

mod expand;
mod zipfile;

use std::path::{Path, PathBuf};

pub use expand::{ArchiveExpander, Expansion, FailedEntry, ProducedFile};
pub use zipfile::ZipExtractor;

/// Extensions treated as archives when none are configured.
pub const DEFAULT_ARCHIVE_EXTENSIONS: &[&str] = &["zip"];

/// True when `path` has one of `extensions` (case-insensitive, without dot).
pub fn is_archive<S: AsRef<str>>(path: &Path, extensions: &[S]) -> bool {
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return false;
    };
    extensions
        .iter()
        .any(|allowed| allowed.as_ref().eq_ignore_ascii_case(ext))
}

/// Entries written by one extraction pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExtractReport {
    /// Regular files written, in archive order.
    pub files: Vec<PathBuf>,
    /// `(entry name, reason)` for entries that could not be extracted.
    pub failures: Vec<(String, String)>,
}

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("open {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{}: not a readable archive: {message}", .path.display())]
    Format { path: PathBuf, message: String },
}

/// Extracts every entry of one archive into a directory (no recursion).
///
/// Implementations create `dest` if needed, overwrite existing files, keep
/// all output under `dest`, and report per-entry failures in the report
/// rather than failing the whole call.
pub trait Extractor: Send + Sync {
    fn extract(&self, archive: &Path, dest: &Path) -> Result<ExtractReport, ExtractError>;
}
