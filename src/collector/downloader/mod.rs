//! Media download with content-hash deduplication

pub mod dedup;
pub mod media_downloader;

pub use dedup::{DedupCheckResult, DedupIndex, DedupOutcome, DedupStats};
pub use media_downloader::{
    BatchReport, DedupMode, DownloadError, DownloadOutcome, DownloadResult, DownloadStats, DownloadStatus,
    DownloaderResult, MediaDownloader, MediaIntent, ProgressFn,
};
