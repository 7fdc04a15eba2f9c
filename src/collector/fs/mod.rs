//! Filesystem helpers: hashing, file naming, account layout and archiving

pub mod archive;
pub mod hashing;
pub mod naming;
pub mod storage;

pub use archive::{archive_account_files, delete_account_files, delete_files, generate_archive_name, ArchiveResult};
pub use hashing::{compute_bytes_hash, compute_file_hash, compute_hash6, hash_files_parallel, StreamHasher};
pub use naming::{
    extension_for_mime, extension_from_url, generate_media_filename, parse_media_filename,
    NamingError, NamingResult, ParsedFilename,
};
pub use storage::{AccountPaths, AccountStorageManager, MediaType};
