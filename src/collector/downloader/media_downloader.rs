//! Per-account media downloader
//!
//! For each intent the downloader:
//! 1. Fetches the bytes through an injected [`FetchBytes`]
//! 2. Hashes them and skips content already seen in this account
//! 3. Writes new content atomically (hidden temp file, fsync, rename)
//! 4. In ignore+replace mode, removes older files carrying the same hash
//! 5. Records the outcome in [`DownloadStats`]
//!
//! Any failure turns into a `Failed` result; nothing is raised to the caller.

use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::collector::filter_engine::{DownloadIntent, MediaKind};
use crate::collector::fs::hashing::{compute_bytes_hash, compute_hash6, hash_files_parallel};
use crate::collector::fs::naming::{extension_from_url, generate_media_filename, NamingError};
use crate::collector::fs::storage::{is_hidden, list_regular_files, AccountPaths, AccountStorageManager, MediaType};
use crate::collector::net::{FetchBytes, FetchError};

use super::dedup::{DedupIndex, DedupOutcome};

/// Errors that can abort a single download
#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Naming error: {0}")]
    Naming(#[from] NamingError),
}

pub type DownloaderResult<T> = Result<T, DownloadError>;

/// How cross-run duplicates are treated
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DedupMode {
    /// Files already on disk win; new copies are skipped
    #[default]
    FirstWins,
    /// The current run wins; older same-hash files are removed after the
    /// new file is safely written
    IgnoreReplace,
}

/// One media file to download
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaIntent {
    pub url: String,
    pub tweet_id: String,
    pub created_at: DateTime<Utc>,
    pub media_type: MediaType,
    /// Inferred from the URL when absent
    pub extension: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub needs_post_min_short_side_check: bool,
}

impl MediaIntent {
    pub fn extension(&self) -> String {
        match &self.extension {
            Some(ext) if !ext.is_empty() => ext.clone(),
            _ => extension_from_url(&self.url),
        }
    }
}

impl From<&DownloadIntent> for MediaIntent {
    fn from(intent: &DownloadIntent) -> Self {
        Self {
            url: intent.url.clone(),
            tweet_id: intent.tweet_id.clone(),
            created_at: intent.tweet_created_at,
            media_type: match intent.kind {
                MediaKind::Image => MediaType::Image,
                MediaKind::Video => MediaType::Video,
            },
            extension: None,
            width: intent.width,
            height: intent.height,
            needs_post_min_short_side_check: intent.needs_post_min_short_side_check,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadStatus {
    Success,
    SkippedDuplicate,
    Failed,
}

/// What happened to one intent
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    Success {
        file_path: PathBuf,
        content_hash: String,
        bytes: u64,
    },
    SkippedDuplicate {
        content_hash: String,
        existing_file: Option<PathBuf>,
    },
    Failed {
        error: String,
    },
}

/// Result of one download attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadResult {
    pub media_url: String,
    pub tweet_id: String,
    pub created_at: DateTime<Utc>,
    pub media_type: MediaType,
    pub outcome: DownloadOutcome,
}

impl DownloadResult {
    pub fn status(&self) -> DownloadStatus {
        match self.outcome {
            DownloadOutcome::Success { .. } => DownloadStatus::Success,
            DownloadOutcome::SkippedDuplicate { .. } => DownloadStatus::SkippedDuplicate,
            DownloadOutcome::Failed { .. } => DownloadStatus::Failed,
        }
    }

    pub fn file_path(&self) -> Option<&Path> {
        match &self.outcome {
            DownloadOutcome::Success { file_path, .. } => Some(file_path),
            _ => None,
        }
    }

    pub fn existing_file(&self) -> Option<&Path> {
        match &self.outcome {
            DownloadOutcome::SkippedDuplicate { existing_file, .. } => existing_file.as_deref(),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            DownloadOutcome::Failed { error } => Some(error),
            _ => None,
        }
    }
}

/// Running totals of one downloader
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DownloadStats {
    pub images_downloaded: usize,
    pub videos_downloaded: usize,
    pub skipped_duplicate: usize,
    pub failed: usize,
    pub total_bytes: u64,
}

impl DownloadStats {
    pub fn record(&mut self, result: &DownloadResult) {
        match &result.outcome {
            DownloadOutcome::Success { bytes, .. } => {
                self.total_bytes += bytes;
                match result.media_type {
                    MediaType::Image => self.images_downloaded += 1,
                    MediaType::Video => self.videos_downloaded += 1,
                }
            }
            DownloadOutcome::SkippedDuplicate { .. } => self.skipped_duplicate += 1,
            DownloadOutcome::Failed { .. } => self.failed += 1,
        }
    }

    pub fn total_downloaded(&self) -> usize {
        self.images_downloaded + self.videos_downloaded
    }

    pub fn total_processed(&self) -> usize {
        self.total_downloaded() + self.skipped_duplicate + self.failed
    }
}

/// Results of a batch, possibly cut short
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub results: Vec<DownloadResult>,
    /// Set when the stop predicate ended the batch early
    pub interrupted: bool,
}

pub type ProgressFn<'a> = dyn FnMut(usize, usize, &DownloadResult) + 'a;

/// Downloads media for one account
pub struct MediaDownloader {
    handle: String,
    paths: AccountPaths,
    fetcher: Arc<dyn FetchBytes>,
    mode: DedupMode,
    dedup: DedupIndex,
    stats: DownloadStats,
    replace_candidates: HashMap<String, HashSet<PathBuf>>,
    replace_candidates_loaded: bool,
}

impl MediaDownloader {
    /// Create a downloader; the account directories are created up front.
    pub fn new(
        storage: &AccountStorageManager,
        handle: &str,
        fetcher: Arc<dyn FetchBytes>,
        mode: DedupMode,
    ) -> DownloaderResult<Self> {
        let paths = storage.ensure_account_dirs(handle)?;
        Ok(Self {
            handle: handle.to_string(),
            paths,
            fetcher,
            mode,
            dedup: DedupIndex::new(),
            stats: DownloadStats::default(),
            replace_candidates: HashMap::new(),
            replace_candidates_loaded: false,
        })
    }

    pub fn stats(&self) -> DownloadStats {
        self.stats
    }

    pub fn dedup_index(&self) -> &DedupIndex {
        &self.dedup
    }

    pub fn mode(&self) -> DedupMode {
        self.mode
    }

    /// Register files already on disk so they win over new copies.
    pub fn load_existing_files(&mut self) -> usize {
        let loaded = self
            .dedup
            .load_from_directories(&[&self.paths.images, &self.paths.videos]);
        info!(handle = %self.handle, loaded, "Loaded existing files for dedup");
        loaded
    }

    /// Collect on-disk files by hash as replacement candidates without
    /// registering them in the dedup index.
    pub fn load_existing_files_for_replace(&mut self) -> usize {
        self.replace_candidates.clear();

        let mut files = Vec::new();
        for dir in [&self.paths.images, &self.paths.videos] {
            match list_regular_files(dir) {
                Ok(listed) => files.extend(listed.into_iter().filter(|path| !is_hidden(path) && !is_temp_file(path))),
                Err(e) => warn!(dir = %dir.display(), error = %e, "Cannot list directory for replace scan"),
            }
        }

        let hashed = hash_files_parallel(files);
        let loaded = hashed.len();
        for (path, hash) in hashed {
            self.replace_candidates.entry(hash).or_default().insert(path);
        }

        self.replace_candidates_loaded = true;
        info!(handle = %self.handle, loaded, "Scanned existing files for replacement");
        loaded
    }

    /// Download one intent. Never fails; errors become `Failed` results.
    pub fn download(&mut self, intent: &MediaIntent) -> DownloadResult {
        if self.mode == DedupMode::IgnoreReplace && !self.replace_candidates_loaded {
            self.load_existing_files_for_replace();
        }

        let outcome = match self.download_impl(intent) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(handle = %self.handle, url = %intent.url, error = %e, "Download failed");
                DownloadOutcome::Failed { error: e.to_string() }
            }
        };

        let result = DownloadResult {
            media_url: intent.url.clone(),
            tweet_id: intent.tweet_id.clone(),
            created_at: intent.created_at,
            media_type: intent.media_type,
            outcome,
        };
        self.stats.record(&result);
        result
    }

    fn download_impl(&mut self, intent: &MediaIntent) -> DownloaderResult<DownloadOutcome> {
        let content = self.fetcher.fetch(&intent.url)?;
        let content_hash = compute_bytes_hash(&content);
        let hash6 = compute_hash6(&content_hash)?;

        let check = self.dedup.check(&content_hash);
        if check.outcome == DedupOutcome::Duplicate {
            debug!(handle = %self.handle, tweet_id = %intent.tweet_id, hash = %content_hash, "Skipping duplicate");
            return Ok(DownloadOutcome::SkippedDuplicate {
                content_hash,
                existing_file: check.existing_file,
            });
        }

        if intent.needs_post_min_short_side_check {
            debug!(url = %intent.url, "Media dimensions unknown; short-side threshold not enforced");
        }

        let filename = generate_media_filename(&intent.tweet_id, intent.created_at, &hash6, &intent.extension())?;
        let final_path = self.paths.media_dir(intent.media_type).join(filename);
        atomic_write(&final_path, &content)?;

        if self.mode == DedupMode::IgnoreReplace {
            self.delete_replaced_files(&content_hash, &final_path);
        }

        self.dedup.register(&content_hash, final_path.clone());

        Ok(DownloadOutcome::Success {
            file_path: final_path,
            content_hash,
            bytes: content.len() as u64,
        })
    }

    fn delete_replaced_files(&mut self, content_hash: &str, final_path: &Path) {
        let Some(old_paths) = self.replace_candidates.remove(content_hash) else {
            return;
        };

        for old_path in old_paths {
            if old_path == final_path {
                continue;
            }
            match std::fs::remove_file(&old_path) {
                Ok(()) => info!(handle = %self.handle, old = %old_path.display(), new = %final_path.display(), "Replaced historical file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(old = %old_path.display(), error = %e, "Failed to delete replaced file"),
            }
        }

        self.replace_candidates
            .insert(content_hash.to_string(), HashSet::from([final_path.to_path_buf()]));
    }

    /// Download a batch. With `sort_newest_first` the intents are processed
    /// by descending `created_at` (stable for ties).
    pub fn download_all(
        &mut self,
        intents: Vec<MediaIntent>,
        sort_newest_first: bool,
        on_progress: Option<&mut ProgressFn<'_>>,
    ) -> Vec<DownloadResult> {
        self.download_batch(intents, sort_newest_first, on_progress, &|| false)
            .results
    }

    /// Like [`MediaDownloader::download_all`], but checks `should_stop`
    /// before each item and ends the batch early when it returns true.
    pub fn download_batch(
        &mut self,
        mut intents: Vec<MediaIntent>,
        sort_newest_first: bool,
        mut on_progress: Option<&mut ProgressFn<'_>>,
        should_stop: &dyn Fn() -> bool,
    ) -> BatchReport {
        if sort_newest_first {
            intents.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        }

        let total = intents.len();
        let mut report = BatchReport::default();

        for (idx, intent) in intents.iter().enumerate() {
            if should_stop() {
                report.interrupted = true;
                break;
            }
            let result = self.download(intent);
            if let Some(callback) = on_progress.as_deref_mut() {
                callback(idx + 1, total, &result);
            }
            report.results.push(result);
        }

        report
    }
}

fn is_temp_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("tmp"))
}

/// Write via a hidden temp file in the destination directory, fsync, then
/// rename over the final path. The temp file is removed on any failure.
fn atomic_write(final_path: &Path, content: &[u8]) -> std::io::Result<()> {
    let parent = final_path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)?;

    let name = final_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("media");

    let mut temp = tempfile::Builder::new()
        .prefix(&format!(".{name}."))
        .suffix(".tmp")
        .tempfile_in(parent)?;
    temp.write_all(content)?;
    temp.flush()?;
    temp.as_file().sync_all()?;
    temp.persist(final_path).map_err(|e| e.error)?;
    Ok(())
}
