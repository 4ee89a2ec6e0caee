//! Types exchanged with catalog collaborators.

use chrono::NaiveDate;
use serde::Serialize;
use std::path::PathBuf;

/// Inclusive range of publish dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub begin: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(begin: NaiveDate, end: NaiveDate) -> Self {
        Self { begin, end }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.begin <= date && date <= self.end
    }
}

/// One row returned by a catalog query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogEntry {
    pub id: i64,
    pub url: String,
    pub publish_date: NaiveDate,
    pub theme_id: i64,
    /// Relative destination path suggested by the catalog, if any.
    pub dest_hint: Option<String>,
}

/// Catalog entry plus its stored downloaded flag (for listings).
#[derive(Debug, Clone, Serialize)]
pub struct EntryStatus {
    #[serde(flatten)]
    pub entry: CatalogEntry,
    pub downloaded: bool,
    /// Unix seconds.
    pub downloaded_at: Option<i64>,
}

/// Metadata for one file produced by a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub entry_id: i64,
    pub path: PathBuf,
    pub size: u64,
    pub sha256: String,
    /// Archive the file was extracted from; `None` for the downloaded file itself.
    pub source_archive: Option<PathBuf>,
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("catalog database: {0}")]
    Database(#[from] sqlx::Error),
    #[error("catalog row {id}: {message}")]
    InvalidRow { id: i64, message: String },
    #[error("catalog unavailable: {0}")]
    Unavailable(String),
}
