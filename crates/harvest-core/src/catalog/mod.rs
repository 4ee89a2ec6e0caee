//! Catalog collaborators: where pending entries come from, where the
//! downloaded flag goes, and where produced-file metadata is registered.
//!
//! The engine only sees the [`Catalog`] and [`MetadataRegistrar`] traits.
//! [`CatalogDb`] is the bundled SQLite adapter (via sqlx). Unit tests use an
//! in-process, fault-injecting `MemoryCatalog` instead.

mod db;
mod entries;
#[cfg(test)]
mod memory;
mod types;

use async_trait::async_trait;

pub use db::CatalogDb;
#[cfg(test)]
pub(crate) use memory::MemoryCatalog;
pub use types::{CatalogEntry, CatalogError, DateRange, EntryStatus, FileRecord};

/// Source of catalog entries and sink for the downloaded flag.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Entries for `theme_id` published within `range`. Must be safe to call
    /// again on every poll iteration.
    async fn query(&self, range: DateRange, theme_id: i64) -> Result<Vec<CatalogEntry>, CatalogError>;

    /// Mark an entry as downloaded. Idempotent.
    async fn mark_downloaded(&self, id: i64) -> Result<(), CatalogError>;
}

/// Records metadata for files produced by a task (downloaded or extracted).
#[async_trait]
pub trait MetadataRegistrar: Send + Sync {
    async fn register(&self, record: &FileRecord) -> Result<(), CatalogError>;
}
