//! Disk I/O and file lifecycle for downloads.
//!
//! Bodies are streamed into `<destination>.part` and atomically renamed to the
//! final name once the transfer is verified; failed attempts discard the temp
//! file. Also probes free space on the destination filesystem.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

/// Temporary file suffix used before atomic rename.
pub const TEMP_SUFFIX: &str = ".part";

/// Path for the temp file: appends `.part` to the final path (e.g. `file.zip` → `file.zip.part`).
pub fn temp_path(final_path: &Path) -> PathBuf {
    let mut o = final_path.as_os_str().to_owned();
    o.push(TEMP_SUFFIX);
    PathBuf::from(o)
}

/// Create (or truncate) the temp file, creating parent directories as needed.
pub fn create_temp(temp_path: &Path) -> io::Result<File> {
    if let Some(parent) = temp_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    File::options()
        .write(true)
        .create(true)
        .truncate(true)
        .open(temp_path)
}

/// Atomically rename the temp file to the final path, replacing any existing file.
pub fn finalize(temp_path: &Path, final_path: &Path) -> io::Result<()> {
    std::fs::rename(temp_path, final_path)
}

/// Remove a temp file left by a failed attempt. Missing files are not an error.
pub fn discard(temp_path: &Path) {
    match std::fs::remove_file(temp_path) {
        Ok(()) => tracing::debug!(path = %temp_path.display(), "discarded partial download"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %temp_path.display(), "could not remove partial download: {}", e),
    }
}

/// Bytes available to unprivileged users on the filesystem holding `path`.
///
/// Walks up to the nearest existing ancestor so it works before the
/// destination directory is created. `None` when unknown.
#[cfg(unix)]
pub fn available_space(path: &Path) -> Option<u64> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let existing = path.ancestors().find(|p| p.exists())?;
    let probe = if existing.as_os_str().is_empty() {
        Path::new(".")
    } else {
        existing
    };
    let c_path = CString::new(probe.as_os_str().as_bytes()).ok()?;
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    let r = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
    if r != 0 {
        return None;
    }
    Some((stat.f_bavail as u64).saturating_mul(stat.f_frsize as u64))
}

#[cfg(not(unix))]
pub fn available_space(_path: &Path) -> Option<u64> {
    None
}

/// Log a warning when the filesystem holding `dir` has less than `min_free` bytes.
/// Never blocks the download. Returns true when space is known to be short.
pub fn warn_if_low_space(dir: &Path, min_free: u64) -> bool {
    match available_space(dir) {
        Some(avail) if avail < min_free => {
            tracing::warn!(
                path = %dir.display(),
                available = avail,
                required = min_free,
                "low disk space on download destination"
            );
            true
        }
        _ => false,
    }
}
