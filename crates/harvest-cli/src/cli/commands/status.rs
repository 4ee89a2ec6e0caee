//! `harvest status` – list catalog entries.

use anyhow::Result;
use harvest_core::catalog::CatalogDb;

pub async fn run_status(db: &CatalogDb, json: bool) -> Result<()> {
    let entries = db.list_entries().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }
    if entries.is_empty() {
        println!("No entries in catalog.");
        return Ok(());
    }
    println!(
        "{:<6} {:<10} {:<6} {:<10} {}",
        "ID", "DATE", "THEME", "STATE", "URL"
    );
    for s in entries {
        let state = if s.downloaded { "done" } else { "pending" };
        println!(
            "{:<6} {:<10} {:<6} {:<10} {}",
            s.entry.id, s.entry.publish_date, s.entry.theme_id, state, s.entry.url
        );
    }
    Ok(())
}
