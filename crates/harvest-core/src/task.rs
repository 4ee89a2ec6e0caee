//! The unit of work dispatched to the worker pool.

use chrono::NaiveDate;
use std::path::{Path, PathBuf};

use crate::catalog::CatalogEntry;
use crate::url_model::resolve_destination;

/// One catalog entry resolved to a concrete destination. Immutable once dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTask {
    pub id: i64,
    pub url: String,
    pub destination: PathBuf,
    pub publish_date: NaiveDate,
    pub theme_id: i64,
}

impl DownloadTask {
    pub fn from_entry(entry: &CatalogEntry, root: &Path) -> Self {
        Self {
            id: entry.id,
            url: entry.url.clone(),
            destination: resolve_destination(
                root,
                entry.publish_date,
                entry.id,
                &entry.url,
                entry.dest_hint.as_deref(),
            ),
            publish_date: entry.publish_date,
            theme_id: entry.theme_id,
        }
    }
}
