//! Zip archiving and bulk deletion of account media

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{info, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::storage::{list_regular_files, MediaType};

/// Outcome of a successful archive operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveResult {
    pub archive_path: PathBuf,
    pub files_archived: usize,
    pub total_bytes: u64,
    /// Source files written into the archive, in entry order
    pub archived_files: Vec<PathBuf>,
}

/// `<handle>_archive_<YYYYMMDD_HHMMSS>.zip` in UTC.
pub fn generate_archive_name(handle: &str, now: DateTime<Utc>) -> String {
    format!("{}_archive_{}.zip", handle, now.format("%Y%m%d_%H%M%S"))
}

/// Pack every file of both media directories into a deflated zip placed in
/// `account_root`. Entries are stored as `images/<name>` and `videos/<name>`.
///
/// Returns `Ok(None)` when there is nothing to archive. The originals are
/// left untouched; callers delete exactly [`ArchiveResult::archived_files`]
/// once the archive is written. Names that are not valid UTF-8 are stored
/// lossily.
pub fn archive_account_files(
    account_root: &Path,
    images_dir: &Path,
    videos_dir: &Path,
    handle: &str,
) -> io::Result<Option<ArchiveResult>> {
    let mut entries = Vec::new();
    for (media_type, dir) in [(MediaType::Image, images_dir), (MediaType::Video, videos_dir)] {
        for path in list_regular_files(dir)? {
            entries.push((media_type, path));
        }
    }

    if entries.is_empty() {
        return Ok(None);
    }

    fs::create_dir_all(account_root)?;
    let archive_path = account_root.join(generate_archive_name(handle, Utc::now()));

    match write_archive(&archive_path, &entries) {
        Ok(total_bytes) => {
            let archived_files: Vec<PathBuf> = entries.into_iter().map(|(_, path)| path).collect();
            info!(
                handle,
                archive = %archive_path.display(),
                files = archived_files.len(),
                total_bytes,
                "Archived account media"
            );
            Ok(Some(ArchiveResult {
                archive_path,
                files_archived: archived_files.len(),
                total_bytes,
                archived_files,
            }))
        }
        Err(e) => {
            if let Err(cleanup) = fs::remove_file(&archive_path) {
                if cleanup.kind() != io::ErrorKind::NotFound {
                    warn!(archive = %archive_path.display(), error = %cleanup, "Failed to remove partial archive");
                }
            }
            Err(e)
        }
    }
}

fn write_archive(archive_path: &Path, entries: &[(MediaType, PathBuf)]) -> io::Result<u64> {
    let file = File::create(archive_path)?;
    let mut zip = ZipWriter::new(BufWriter::new(file));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut total_bytes = 0u64;

    for (media_type, path) in entries {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy())
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, format!("no file name: {}", path.display())))?;
        let entry_name = format!("{}/{}", media_type.dir_name(), name);
        zip.start_file(entry_name, options).map_err(io::Error::other)?;
        let mut source = File::open(path)?;
        total_bytes += io::copy(&mut source, &mut zip)?;
    }

    let mut writer = zip.finish().map_err(io::Error::other)?;
    writer.flush()?;
    writer.get_ref().sync_all()?;
    Ok(total_bytes)
}

/// Delete every regular file in the given directories, keeping the
/// directories themselves. Returns how many files were removed.
pub fn delete_account_files(dirs: &[&Path]) -> io::Result<usize> {
    let mut deleted = 0;
    for dir in dirs {
        for path in list_regular_files(dir)? {
            fs::remove_file(&path)?;
            deleted += 1;
        }
    }
    Ok(deleted)
}

/// Delete exactly the given files. Files already gone are skipped.
/// Returns how many files were removed.
pub fn delete_files(paths: &[PathBuf]) -> io::Result<usize> {
    let mut deleted = 0;
    for path in paths {
        match fs::remove_file(path) {
            Ok(()) => deleted += 1,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }
    Ok(deleted)
}
