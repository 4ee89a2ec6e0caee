//! `harvest add <url>` – insert a catalog entry.

use anyhow::{bail, Result};
use chrono::NaiveDate;
use harvest_core::catalog::CatalogDb;

pub async fn run_add(
    db: &CatalogDb,
    url: &str,
    date: NaiveDate,
    theme_id: i64,
    dest: Option<&str>,
) -> Result<()> {
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        bail!("only http:// and https:// URLs are supported: {}", url);
    }
    let id = db.add_entry(url, date, theme_id, dest).await?;
    println!("Added entry {id} ({date}, theme {theme_id}) for URL: {url}");
    Ok(())
}
