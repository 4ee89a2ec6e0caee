//! Entry and file-metadata operations on the SQLite catalog.

use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::db::{unix_timestamp, CatalogDb};
use super::types::{CatalogEntry, CatalogError, DateRange, EntryStatus, FileRecord};
use super::{Catalog, MetadataRegistrar};

const DATE_FORMAT: &str = "%Y-%m-%d";

fn entry_from_row(row: &SqliteRow) -> Result<CatalogEntry, CatalogError> {
    let id: i64 = row.try_get("id")?;
    let date_str: String = row.try_get("publish_date")?;
    let publish_date =
        NaiveDate::parse_from_str(&date_str, DATE_FORMAT).map_err(|e| CatalogError::InvalidRow {
            id,
            message: format!("publish_date {:?}: {}", date_str, e),
        })?;
    Ok(CatalogEntry {
        id,
        url: row.try_get("url")?,
        publish_date,
        theme_id: row.try_get("theme_id")?,
        dest_hint: row.try_get("dest_hint")?,
    })
}

impl CatalogDb {
    /// Insert a new pending entry and return its id.
    pub async fn add_entry(
        &self,
        url: &str,
        publish_date: NaiveDate,
        theme_id: i64,
        dest_hint: Option<&str>,
    ) -> Result<i64, CatalogError> {
        let res = sqlx::query(
            r#"
            INSERT INTO entries (url, publish_date, theme_id, dest_hint, downloaded, created_at)
            VALUES (?, ?, ?, ?, 0, ?)
            "#,
        )
        .bind(url)
        .bind(publish_date.format(DATE_FORMAT).to_string())
        .bind(theme_id)
        .bind(dest_hint)
        .bind(unix_timestamp())
        .execute(&self.pool)
        .await?;
        Ok(res.last_insert_rowid())
    }

    /// Pending (not yet downloaded) entries for a theme in a date range, oldest first.
    pub async fn pending_entries(
        &self,
        range: DateRange,
        theme_id: i64,
    ) -> Result<Vec<CatalogEntry>, CatalogError> {
        let rows = sqlx::query(
            r#"
            SELECT id, url, publish_date, theme_id, dest_hint
            FROM entries
            WHERE theme_id = ? AND downloaded = 0 AND publish_date BETWEEN ? AND ?
            ORDER BY publish_date ASC, id ASC
            "#,
        )
        .bind(theme_id)
        .bind(range.begin.format(DATE_FORMAT).to_string())
        .bind(range.end.format(DATE_FORMAT).to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(entry_from_row).collect()
    }

    /// All entries with their downloaded flag, newest first.
    pub async fn list_entries(&self) -> Result<Vec<EntryStatus>, CatalogError> {
        let rows = sqlx::query(
            r#"
            SELECT id, url, publish_date, theme_id, dest_hint, downloaded, downloaded_at
            FROM entries
            ORDER BY publish_date DESC, id DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let downloaded: i64 = row.try_get("downloaded")?;
            out.push(EntryStatus {
                entry: entry_from_row(row)?,
                downloaded: downloaded != 0,
                downloaded_at: row.try_get("downloaded_at")?,
            });
        }
        Ok(out)
    }

    /// Set the downloaded flag. Re-marking keeps the first timestamp.
    pub async fn set_downloaded(&self, id: i64) -> Result<bool, CatalogError> {
        let res = sqlx::query(
            r#"
            UPDATE entries
            SET downloaded = 1, downloaded_at = COALESCE(downloaded_at, ?)
            WHERE id = ?
            "#,
        )
        .bind(unix_timestamp())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected() > 0)
    }

    /// Insert or refresh metadata for one produced file.
    pub async fn upsert_file(&self, record: &FileRecord) -> Result<(), CatalogError> {
        sqlx::query(
            r#"
            INSERT INTO file_metadata (entry_id, path, size, sha256, source_archive, registered_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (entry_id, path) DO UPDATE SET
                size = excluded.size,
                sha256 = excluded.sha256,
                source_archive = excluded.source_archive,
                registered_at = excluded.registered_at
            "#,
        )
        .bind(record.entry_id)
        .bind(record.path.to_string_lossy().into_owned())
        .bind(record.size as i64)
        .bind(&record.sha256)
        .bind(
            record
                .source_archive
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned()),
        )
        .bind(unix_timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Registered files for an entry, in path order.
    pub async fn files_for_entry(&self, entry_id: i64) -> Result<Vec<FileRecord>, CatalogError> {
        let rows = sqlx::query(
            r#"
            SELECT entry_id, path, size, sha256, source_archive
            FROM file_metadata
            WHERE entry_id = ?
            ORDER BY path ASC
            "#,
        )
        .bind(entry_id)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let path: String = row.try_get("path")?;
            let size: i64 = row.try_get("size")?;
            let source: Option<String> = row.try_get("source_archive")?;
            out.push(FileRecord {
                entry_id: row.try_get("entry_id")?,
                path: path.into(),
                size: size.max(0) as u64,
                sha256: row.try_get("sha256")?,
                source_archive: source.map(Into::into),
            });
        }
        Ok(out)
    }
}

#[async_trait]
impl Catalog for CatalogDb {
    async fn query(&self, range: DateRange, theme_id: i64) -> Result<Vec<CatalogEntry>, CatalogError> {
        self.pending_entries(range, theme_id).await
    }

    async fn mark_downloaded(&self, id: i64) -> Result<(), CatalogError> {
        if !self.set_downloaded(id).await? {
            tracing::warn!(entry_id = id, "mark_downloaded: no such catalog entry");
        }
        Ok(())
    }
}

#[async_trait]
impl MetadataRegistrar for CatalogDb {
    async fn register(&self, record: &FileRecord) -> Result<(), CatalogError> {
        self.upsert_file(record).await
    }
}
