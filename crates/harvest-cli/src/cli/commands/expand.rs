//! `harvest expand <archive>` – run the archive expander on a local file.

use anyhow::{bail, Context, Result};
use harvest_core::archive::ArchiveExpander;
use harvest_core::config::ArchiveConfig;
use std::path::{Path, PathBuf};

pub async fn run_expand(cfg: &ArchiveConfig, archive: &Path, dest: Option<&Path>) -> Result<()> {
    if !archive.is_file() {
        bail!("not a file: {}", archive.display());
    }
    let expander = ArchiveExpander::from_config(cfg);
    if !expander.is_archive(archive) {
        bail!(
            "{} does not have an archive extension ({})",
            archive.display(),
            cfg.extensions.join(", ")
        );
    }
    let dest: PathBuf = match dest {
        Some(d) => d.to_path_buf(),
        None => archive
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(".")),
    };
    let archive_path = archive.to_path_buf();
    let max_depth = cfg.max_depth;
    let expansion =
        tokio::task::spawn_blocking(move || expander.expand(&archive_path, &dest, max_depth))
            .await
            .context("archive expansion task panicked")?;

    for path in expansion.paths() {
        println!("{}", path.display());
    }
    for opaque in expansion.opaque_archives() {
        println!("depth limit reached, left as-is: {}", opaque.display());
    }
    for failed in &expansion.failed_entries {
        eprintln!(
            "failed: {} {}: {}",
            failed.archive.display(),
            failed.entry,
            failed.message
        );
    }
    if !expansion.is_complete() {
        tracing::warn!(archive = %archive.display(), "expansion incomplete, archive kept");
    }
    Ok(())
}
