//! Per-account storage layout
//!
//! Every account lives under `<download_root>/<handle>/` with one
//! sub-directory per media kind:
//!
//! ```text
//! <download_root>/<handle>/images/
//! <download_root>/<handle>/videos/
//! ```

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;
use walkdir::WalkDir;

/// Kind of media stored on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Image,
    Video,
}

impl MediaType {
    /// Name of the sub-directory holding this kind of media
    pub fn dir_name(self) -> &'static str {
        match self {
            MediaType::Image => "images",
            MediaType::Video => "videos",
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaType::Image => write!(f, "image"),
            MediaType::Video => write!(f, "video"),
        }
    }
}

/// Resolved directories of one account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountPaths {
    pub root: PathBuf,
    pub images: PathBuf,
    pub videos: PathBuf,
}

impl AccountPaths {
    pub fn media_dir(&self, media_type: MediaType) -> &Path {
        match media_type {
            MediaType::Image => &self.images,
            MediaType::Video => &self.videos,
        }
    }
}

/// Maps account handles to directories under a download root
#[derive(Debug, Clone)]
pub struct AccountStorageManager {
    download_root: PathBuf,
}

impl AccountStorageManager {
    pub fn new(download_root: impl AsRef<Path>) -> Self {
        let root = download_root.as_ref();
        let download_root = std::path::absolute(root).unwrap_or_else(|_| root.to_path_buf());
        Self { download_root }
    }

    pub fn download_root(&self) -> &Path {
        &self.download_root
    }

    /// Directories for a handle. Nothing is created.
    pub fn account_paths(&self, handle: &str) -> AccountPaths {
        let root = self.download_root.join(handle);
        AccountPaths {
            images: root.join(MediaType::Image.dir_name()),
            videos: root.join(MediaType::Video.dir_name()),
            root,
        }
    }

    /// Create the account directories if needed and return them.
    pub fn ensure_account_dirs(&self, handle: &str) -> io::Result<AccountPaths> {
        let paths = self.account_paths(handle);
        std::fs::create_dir_all(&paths.images)?;
        std::fs::create_dir_all(&paths.videos)?;
        debug!(handle, root = %paths.root.display(), "Account directories ready");
        Ok(paths)
    }

    pub fn media_dir(&self, handle: &str, media_type: MediaType) -> PathBuf {
        self.account_paths(handle).media_dir(media_type).to_path_buf()
    }

    /// Regular files directly inside one media directory, sorted by path.
    pub fn list_media_files(&self, handle: &str, media_type: MediaType) -> io::Result<Vec<PathBuf>> {
        list_regular_files(&self.media_dir(handle, media_type))
    }
}

/// Regular files directly inside `dir`, sorted. A missing directory is empty.
pub fn list_regular_files(dir: &Path) -> io::Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }
    files.sort();
    Ok(files)
}

/// Whether a path names a hidden (dot-prefixed) file.
pub fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with('.'))
}
