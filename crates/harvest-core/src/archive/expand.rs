use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{is_archive, Extractor, ZipExtractor};
use crate::config::ArchiveConfig;

/// A concrete file left on disk by an expansion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducedFile {
    pub path: PathBuf,
    /// Archive the file was extracted from; `None` for the input itself.
    pub source_archive: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedEntry {
    pub archive: PathBuf,
    /// Entry name, or empty when the whole archive could not be read.
    pub entry: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Expansion {
    /// Every concrete file produced at any depth, opaque archives included.
    pub files: Vec<ProducedFile>,
    pub failed_entries: Vec<FailedEntry>,
    opaque: Vec<PathBuf>,
}

impl Expansion {
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.files.iter().map(|f| f.path.as_path())
    }

    /// Archives left unexpanded because the depth budget ran out.
    pub fn opaque_archives(&self) -> &[PathBuf] {
        &self.opaque
    }

    pub fn is_complete(&self) -> bool {
        self.failed_entries.is_empty()
    }
}

#[derive(Clone)]
pub struct ArchiveExpander {
    extractor: Arc<dyn Extractor>,
    extensions: Vec<String>,
}

impl ArchiveExpander {
    pub fn new(extractor: Arc<dyn Extractor>, extensions: Vec<String>) -> Self {
        Self {
            extractor,
            extensions,
        }
    }

    pub fn from_config(cfg: &ArchiveConfig) -> Self {
        Self::new(Arc::new(ZipExtractor::new()), cfg.extensions.clone())
    }

    pub fn is_archive(&self, path: &Path) -> bool {
        is_archive(path, &self.extensions)
    }

    /// Directory a nested archive is expanded into: its stem, next to it.
    pub fn nested_dir(archive: &Path) -> PathBuf {
        let stem = archive
            .file_stem()
            .map(|s| s.to_os_string())
            .unwrap_or_else(|| "extracted".into());
        archive
            .parent()
            .map(|p| p.join(&stem))
            .unwrap_or_else(|| PathBuf::from(stem))
    }

    /// Expand `archive` into `dest`, recursing into nested archives while
    /// `max_depth` allows. `max_depth == 0` returns the archive itself, opaque.
    ///
    /// Blocking; run it on the blocking pool from async code.
    pub fn expand(&self, archive: &Path, dest: &Path, max_depth: u32) -> Expansion {
        let mut out = Expansion::default();
        self.expand_into(archive, dest, max_depth, None, &mut out);
        out
    }

    /// Returns true when this archive and everything nested in it expanded
    /// without failures.
    fn expand_into(
        &self,
        archive: &Path,
        dest: &Path,
        depth: u32,
        source: Option<&Path>,
        out: &mut Expansion,
    ) -> bool {
        let produced = |path: &Path| ProducedFile {
            path: path.to_path_buf(),
            source_archive: source.map(Path::to_path_buf),
        };

        if depth == 0 {
            tracing::debug!(archive = %archive.display(), "depth budget exhausted, keeping archive");
            out.files.push(produced(archive));
            out.opaque.push(archive.to_path_buf());
            return true;
        }

        let report = match self.extractor.extract(archive, dest) {
            Ok(report) => report,
            Err(e) => {
                tracing::warn!(archive = %archive.display(), "extraction failed: {}", e);
                out.failed_entries.push(FailedEntry {
                    archive: archive.to_path_buf(),
                    entry: String::new(),
                    message: e.to_string(),
                });
                out.files.push(produced(archive));
                return false;
            }
        };

        let mut clean = report.failures.is_empty();
        for (entry, message) in report.failures {
            tracing::warn!(archive = %archive.display(), entry = %entry, "skipping entry: {}", message);
            out.failed_entries.push(FailedEntry {
                archive: archive.to_path_buf(),
                entry,
                message,
            });
        }

        for file in report.files {
            if self.is_archive(&file) {
                let sub = Self::nested_dir(&file);
                clean &= self.expand_into(&file, &sub, depth - 1, Some(archive), out);
            } else {
                out.files.push(ProducedFile {
                    path: file,
                    source_archive: Some(archive.to_path_buf()),
                });
            }
        }

        if clean {
            if let Err(e) = std::fs::remove_file(archive) {
                tracing::warn!(archive = %archive.display(), "could not remove expanded archive: {}", e);
            }
        } else {
            tracing::info!(archive = %archive.display(), "keeping partially expanded archive");
        }
        clean
    }
}

impl Default for ArchiveExpander {
    fn default() -> Self {
        Self::from_config(&ArchiveConfig::default())
    }
}
