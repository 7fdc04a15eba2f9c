//! Content hashing for media files
//!
//! This module provides:
//! 1. SHA-256 of in-memory byte buffers (lowercase hex)
//! 2. Streaming SHA-256 of files in 64 KiB chunks
//! 3. The 6-character `hash6` short prefix used in file names
//! 4. Parallel hashing of directory listings on the rayon pool

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use sha2::{Digest, Sha256};
use tracing::debug;

use super::naming::{NamingError, NamingResult};

/// Length of the short hash prefix embedded in file names
pub const HASH6_LENGTH: usize = 6;

const CHUNK_SIZE: usize = 64 * 1024;

/// Hash a byte buffer, returning the lowercase hex digest.
pub fn compute_bytes_hash(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Hash a file on disk without loading it whole into memory.
pub fn compute_file_hash(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = StreamHasher::new();
    let mut buffer = vec![0u8; CHUNK_SIZE];

    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(hasher.hexdigest())
}

/// Take the first six characters of a full hex digest.
pub fn compute_hash6(full_hash: &str) -> NamingResult<String> {
    full_hash
        .get(..HASH6_LENGTH)
        .map(str::to_string)
        .ok_or_else(|| NamingError::HashTooShort(full_hash.len()))
}

/// Incremental SHA-256 over chunks
#[derive(Default)]
pub struct StreamHasher {
    hasher: Sha256,
}

impl StreamHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
    }

    pub fn hexdigest(self) -> String {
        hex::encode(self.hasher.finalize())
    }
}

/// Hash many files in parallel. Unreadable files are skipped.
pub fn hash_files_parallel(paths: Vec<PathBuf>) -> Vec<(PathBuf, String)> {
    paths
        .into_par_iter()
        .filter_map(|path| match compute_file_hash(&path) {
            Ok(hash) => Some((path, hash)),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Skipping unreadable file");
                None
            }
        })
        .collect()
}
