//! Content-hash deduplication within one account
//!
//! The index maps each known SHA-256 to the first file that carried it.
//! Registering a hash twice keeps the first path ("first wins"). Files
//! from previous runs can be loaded so they count as having won already.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use crate::collector::fs::hashing::hash_files_parallel;
use crate::collector::fs::storage::{is_hidden, list_regular_files};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupOutcome {
    New,
    Duplicate,
}

/// Result of checking one content hash
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupCheckResult {
    pub outcome: DedupOutcome,
    pub content_hash: String,
    /// First file with this hash, when it is a duplicate
    pub existing_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DedupStats {
    pub known_hashes: usize,
    pub total_checked: usize,
    pub duplicates_found: usize,
}

/// In-memory hash index for one account
#[derive(Debug, Default)]
pub struct DedupIndex {
    hash_to_file: HashMap<String, PathBuf>,
    total_checked: usize,
    duplicates_found: usize,
}

impl DedupIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn known_hash_count(&self) -> usize {
        self.hash_to_file.len()
    }

    pub fn is_known(&self, content_hash: &str) -> bool {
        self.hash_to_file.contains_key(&content_hash.to_ascii_lowercase())
    }

    /// Record a hash. An already-known hash keeps its original path.
    pub fn register(&mut self, content_hash: &str, file_path: PathBuf) {
        self.hash_to_file
            .entry(content_hash.to_ascii_lowercase())
            .or_insert(file_path);
    }

    /// Count a check without registering anything.
    ///
    /// Used when the file for a new hash has not been written yet; the
    /// caller registers it once the write succeeded.
    pub fn check(&mut self, content_hash: &str) -> DedupCheckResult {
        self.total_checked += 1;
        let content_hash = content_hash.to_ascii_lowercase();

        match self.hash_to_file.get(&content_hash) {
            Some(existing) => {
                self.duplicates_found += 1;
                DedupCheckResult {
                    outcome: DedupOutcome::Duplicate,
                    existing_file: Some(existing.clone()),
                    content_hash,
                }
            }
            None => DedupCheckResult {
                outcome: DedupOutcome::New,
                content_hash,
                existing_file: None,
            },
        }
    }

    /// Hash every visible regular file in `directory` and register it.
    /// Unreadable files are skipped. Returns how many were registered.
    pub fn load_from_directory(&mut self, directory: &Path) -> usize {
        let files = match list_regular_files(directory) {
            Ok(files) => files,
            Err(e) => {
                debug!(dir = %directory.display(), error = %e, "Cannot list directory for dedup");
                return 0;
            }
        };

        let visible: Vec<PathBuf> = files.into_iter().filter(|path| !is_hidden(path)).collect();
        let hashed = hash_files_parallel(visible);
        let loaded = hashed.len();
        for (path, hash) in hashed {
            self.register(&hash, path);
        }

        debug!(dir = %directory.display(), loaded, "Loaded existing hashes");
        loaded
    }

    pub fn load_from_directories(&mut self, directories: &[&Path]) -> usize {
        directories.iter().map(|dir| self.load_from_directory(dir)).sum()
    }

    pub fn existing_file(&self, content_hash: &str) -> Option<&Path> {
        self.hash_to_file
            .get(&content_hash.to_ascii_lowercase())
            .map(PathBuf::as_path)
    }

    pub fn stats(&self) -> DedupStats {
        DedupStats {
            known_hashes: self.hash_to_file.len(),
            total_checked: self.total_checked,
            duplicates_found: self.duplicates_found,
        }
    }
}
