//! In-process catalog and registrar for unit tests.
//!
//! Keeps entries, downloaded flags and registered files in memory. Supports
//! injecting query failures so callers can exercise their error paths.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use super::types::{CatalogEntry, CatalogError, DateRange, FileRecord};
use super::{Catalog, MetadataRegistrar};

#[derive(Default)]
struct State {
    entries: Vec<CatalogEntry>,
    downloaded: HashSet<i64>,
    files: Vec<FileRecord>,
}

#[derive(Default)]
pub struct MemoryCatalog {
    state: Mutex<State>,
    /// Also report entries already flagged as downloaded.
    report_downloaded: bool,
    failing_queries: AtomicUsize,
    failing_registrations: AtomicUsize,
    queries: AtomicUsize,
}

impl MemoryCatalog {
    pub fn new(entries: Vec<CatalogEntry>) -> Self {
        let cat = Self::default();
        cat.lock().entries = entries;
        cat
    }

    /// A catalog whose queries keep returning entries after they are flagged,
    /// like a store with a lagging flag column.
    pub fn reporting_downloaded(entries: Vec<CatalogEntry>) -> Self {
        let mut cat = Self::new(entries);
        cat.report_downloaded = true;
        cat
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn insert(&self, entry: CatalogEntry) {
        self.lock().entries.push(entry);
    }

    /// Make the next `n` queries fail.
    pub fn fail_next_queries(&self, n: usize) {
        self.failing_queries.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` registrations fail.
    pub fn fail_next_registrations(&self, n: usize) {
        self.failing_registrations.store(n, Ordering::SeqCst);
    }

    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    pub fn is_downloaded(&self, id: i64) -> bool {
        self.lock().downloaded.contains(&id)
    }

    pub fn registered_files(&self) -> Vec<FileRecord> {
        self.lock().files.clone()
    }
}

fn take_failure(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl Catalog for MemoryCatalog {
    async fn query(&self, range: DateRange, theme_id: i64) -> Result<Vec<CatalogEntry>, CatalogError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if take_failure(&self.failing_queries) {
            return Err(CatalogError::Unavailable("injected query failure".into()));
        }
        let state = self.lock();
        let mut rows: Vec<CatalogEntry> = state
            .entries
            .iter()
            .filter(|e| e.theme_id == theme_id && range.contains(e.publish_date))
            .filter(|e| self.report_downloaded || !state.downloaded.contains(&e.id))
            .cloned()
            .collect();
        rows.sort_by_key(|e| (e.publish_date, e.id));
        Ok(rows)
    }

    async fn mark_downloaded(&self, id: i64) -> Result<(), CatalogError> {
        self.lock().downloaded.insert(id);
        Ok(())
    }
}

#[async_trait]
impl MetadataRegistrar for MemoryCatalog {
    async fn register(&self, record: &FileRecord) -> Result<(), CatalogError> {
        if take_failure(&self.failing_registrations) {
            return Err(CatalogError::Unavailable("injected registration failure".into()));
        }
        self.lock().files.push(record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn entry(id: i64, day: u32) -> CatalogEntry {
        CatalogEntry {
            id,
            url: format!("https://e.com/{}.zip", id),
            publish_date: NaiveDate::from_ymd_opt(2024, 2, day).unwrap(),
            theme_id: 1,
            dest_hint: None,
        }
    }

    fn all() -> DateRange {
        DateRange::new(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 12, 31).unwrap(),
        )
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let cat = MemoryCatalog::new(vec![entry(1, 1)]);
        cat.fail_next_queries(1);
        assert!(cat.query(all(), 1).await.is_err());
        assert_eq!(cat.query(all(), 1).await.unwrap().len(), 1);
        assert_eq!(cat.query_count(), 2);
    }

    #[tokio::test]
    async fn flagged_entries_hidden_unless_reporting() {
        let cat = MemoryCatalog::new(vec![entry(2, 2), entry(1, 1)]);
        cat.mark_downloaded(1).await.unwrap();
        let ids: Vec<i64> = cat.query(all(), 1).await.unwrap().iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![2]);

        let cat = MemoryCatalog::reporting_downloaded(vec![entry(2, 2), entry(1, 1)]);
        cat.mark_downloaded(1).await.unwrap();
        let ids: Vec<i64> = cat.query(all(), 1).await.unwrap().iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }
}
