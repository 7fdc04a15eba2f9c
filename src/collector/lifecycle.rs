//! Account file lifecycle around starting and cancelling runs
//!
//! Before a fresh start, existing media can be deleted, packed into a zip
//! next to the media directories, or left in place for the run to replace
//! by hash. When a running task is cancelled, its media can be kept or
//! removed.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::collector::fs::archive::{archive_account_files, delete_account_files, delete_files};
use crate::collector::fs::storage::{AccountStorageManager, MediaType};

/// What to do with existing media before a fresh start
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartMode {
    Delete,
    IgnoreReplace,
    Pack,
}

impl fmt::Display for StartMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartMode::Delete => write!(f, "delete"),
            StartMode::IgnoreReplace => write!(f, "ignore_replace"),
            StartMode::Pack => write!(f, "pack"),
        }
    }
}

impl FromStr for StartMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "delete" => Ok(StartMode::Delete),
            "ignore_replace" => Ok(StartMode::IgnoreReplace),
            "pack" => Ok(StartMode::Pack),
            other => Err(format!("unknown start mode: {other}")),
        }
    }
}

/// What to do with downloaded media when a running task is cancelled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelMode {
    #[default]
    Keep,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExistingFilesInfo {
    pub has_files: bool,
    pub image_count: usize,
    pub video_count: usize,
    pub total_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StartPrepareResult {
    pub success: bool,
    pub mode: StartMode,
    pub files_deleted: usize,
    pub files_archived: usize,
    pub archive_path: Option<PathBuf>,
    pub error: Option<String>,
}

impl StartPrepareResult {
    fn ok(mode: StartMode) -> Self {
        Self {
            success: true,
            mode,
            files_deleted: 0,
            files_archived: 0,
            archive_path: None,
            error: None,
        }
    }

    fn failed(mode: StartMode, error: String) -> Self {
        Self {
            success: false,
            error: Some(error),
            ..Self::ok(mode)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CancelPrepareResult {
    pub success: bool,
    pub mode: CancelMode,
    pub files_deleted: usize,
    pub error: Option<String>,
}

/// Count the media files an account already has. Unlistable directories
/// count as empty.
pub fn check_existing_files(storage: &AccountStorageManager, handle: &str) -> ExistingFilesInfo {
    let count = |media_type: MediaType| match storage.list_media_files(handle, media_type) {
        Ok(files) => files.len(),
        Err(e) => {
            warn!(handle, %media_type, error = %e, "Cannot list media files");
            0
        }
    };

    let image_count = count(MediaType::Image);
    let video_count = count(MediaType::Video);
    let total_count = image_count + video_count;

    ExistingFilesInfo {
        has_files: total_count > 0,
        image_count,
        video_count,
        total_count,
    }
}

/// Get an account ready for a fresh start.
pub fn prepare_start_new(storage: &AccountStorageManager, handle: &str, mode: StartMode) -> StartPrepareResult {
    let paths = storage.account_paths(handle);

    let result = match mode {
        StartMode::IgnoreReplace => StartPrepareResult::ok(mode),

        StartMode::Delete => match delete_account_files(&[&paths.images, &paths.videos]) {
            Ok(files_deleted) => StartPrepareResult {
                files_deleted,
                ..StartPrepareResult::ok(mode)
            },
            Err(e) => StartPrepareResult::failed(mode, format!("Failed to delete files: {e}")),
        },

        StartMode::Pack => {
            let archived = std::fs::create_dir_all(&paths.root)
                .and_then(|_| archive_account_files(&paths.root, &paths.images, &paths.videos, handle));

            match archived {
                Ok(None) => StartPrepareResult::ok(mode),
                Ok(Some(archive)) => match delete_files(&archive.archived_files) {
                    Ok(files_deleted) => StartPrepareResult {
                        files_deleted,
                        files_archived: archive.files_archived,
                        archive_path: Some(archive.archive_path),
                        ..StartPrepareResult::ok(mode)
                    },
                    Err(e) => StartPrepareResult {
                        files_archived: archive.files_archived,
                        archive_path: Some(archive.archive_path),
                        ..StartPrepareResult::failed(mode, format!("Archived but failed to delete originals: {e}"))
                    },
                },
                Err(e) => StartPrepareResult::failed(mode, format!("Failed to archive files: {e}")),
            }
        }
    };

    if result.success {
        info!(
            handle,
            mode = %mode,
            files_deleted = result.files_deleted,
            files_archived = result.files_archived,
            "Prepared account for fresh start"
        );
    } else {
        warn!(handle, mode = %mode, error = ?result.error, "Start preparation failed");
    }

    result
}

/// Handle account media for a cancelled running task.
///
/// `Delete` removes every media file of the account, including files from
/// earlier runs.
pub fn prepare_cancel_running(storage: &AccountStorageManager, handle: &str, mode: CancelMode) -> CancelPrepareResult {
    match mode {
        CancelMode::Keep => CancelPrepareResult {
            success: true,
            mode,
            files_deleted: 0,
            error: None,
        },
        CancelMode::Delete => {
            let paths = storage.account_paths(handle);
            match delete_account_files(&[&paths.images, &paths.videos]) {
                Ok(files_deleted) => {
                    info!(handle, files_deleted, "Deleted media of cancelled run");
                    CancelPrepareResult {
                        success: true,
                        mode,
                        files_deleted,
                        error: None,
                    }
                }
                Err(e) => CancelPrepareResult {
                    success: false,
                    mode,
                    files_deleted: 0,
                    error: Some(format!("Failed to delete files: {e}")),
                },
            }
        }
    }
}
