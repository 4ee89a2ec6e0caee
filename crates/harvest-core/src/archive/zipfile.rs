//! Zip extraction via the `zip` crate.

use std::fs::{self, File};
use std::io;
use std::path::{Component, Path, PathBuf};

use super::{ExtractError, ExtractReport, Extractor};
use crate::url_model::sanitize_filename;

#[derive(Debug, Clone, Copy, Default)]
pub struct ZipExtractor;

impl ZipExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl Extractor for ZipExtractor {
    fn extract(&self, archive: &Path, dest: &Path) -> Result<ExtractReport, ExtractError> {
        let file = File::open(archive).map_err(|source| ExtractError::Io {
            path: archive.to_path_buf(),
            source,
        })?;
        let mut zip = zip::ZipArchive::new(file).map_err(|e| ExtractError::Format {
            path: archive.to_path_buf(),
            message: e.to_string(),
        })?;
        fs::create_dir_all(dest).map_err(|source| ExtractError::Io {
            path: dest.to_path_buf(),
            source,
        })?;

        let mut report = ExtractReport::default();
        for i in 0..zip.len() {
            let mut entry = match zip.by_index(i) {
                Ok(entry) => entry,
                Err(e) => {
                    report.failures.push((format!("#{}", i), e.to_string()));
                    continue;
                }
            };
            let display_name = String::from_utf8_lossy(entry.name_raw()).into_owned();
            let Some(rel) = entry
                .enclosed_name()
                .or_else(|| fallback_relative_path(entry.name_raw()))
            else {
                report
                    .failures
                    .push((display_name, "entry name has no safe relative path".into()));
                continue;
            };
            let out = dest.join(&rel);

            if entry.is_dir() {
                if let Err(e) = fs::create_dir_all(&out) {
                    report.failures.push((display_name, e.to_string()));
                }
                continue;
            }

            let written = out
                .parent()
                .map_or(Ok(()), fs::create_dir_all)
                .and_then(|()| File::create(&out))
                .and_then(|mut f| io::copy(&mut entry, &mut f));
            match written {
                Ok(_) => report.files.push(out),
                Err(e) => {
                    let _ = fs::remove_file(&out);
                    report.failures.push((display_name, e.to_string()));
                }
            }
        }
        Ok(report)
    }
}

/// Second decoding pass for entry names the declared encoding could not map
/// to a safe path: UTF-8 if valid, otherwise one char per byte (Latin-1).
/// Each component is sanitized and `.`/`..` components are dropped.
fn fallback_relative_path(raw: &[u8]) -> Option<PathBuf> {
    let decoded = match std::str::from_utf8(raw) {
        Ok(s) => s.to_string(),
        Err(_) => raw.iter().map(|&b| b as char).collect(),
    };
    let mut out = PathBuf::new();
    for part in decoded.split(['/', '\\']) {
        let clean = sanitize_filename(part);
        if clean.is_empty() || clean == "." || clean == ".." {
            continue;
        }
        out.push(clean);
    }
    let confined = out
        .components()
        .all(|c| matches!(c, Component::Normal(_)));
    (confined && out.components().next().is_some()).then_some(out)
}
