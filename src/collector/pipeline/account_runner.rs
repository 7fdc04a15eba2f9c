//! Per-account pipeline executed by the scheduler
//!
//! One run goes through:
//! 1. Handle normalisation and filter config validation
//! 2. Lifecycle preparation for `start` runs (delete, pack or ignore+replace)
//! 3. Scraping behind the throttle and the retry policy
//! 4. Filtering into ordered download intents
//! 5. Sequential downloads on the blocking pool, checking for cancellation
//!    between items
//!
//! Cancellation is cooperative. The future returns only after the blocking
//! work it started has returned, so nothing writes to the account after the
//! run is reported Cancelled.
//!
//! Item failures do not stop the batch. They are reported together once the
//! batch is over.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::collector::downloader::{
    BatchReport, DedupMode, DownloadResult, DownloadStats, DownloadStatus, MediaDownloader, MediaIntent, ProgressFn,
};
use crate::collector::filter_engine::{apply_filters, FilterConfig};
use crate::collector::fs::AccountStorageManager;
use crate::collector::lifecycle::{prepare_start_new, StartMode};
use crate::collector::net::{
    with_retry_async, FetchBytes, FetchResult, HttpFetcher, HttpFetcherConfig, RetryConfig, Throttle, ThrottleConfig,
};
use crate::collector::scheduler::{CancelToken, Run, RunError, RunExecutor, RunKind};
use crate::collector::scraper::Scraper;

/// Builds the byte fetcher for one run from the run's throttle. Called on a
/// blocking thread.
pub type FetcherFactory = Arc<dyn Fn(Arc<Throttle>) -> FetchResult<Arc<dyn FetchBytes>> + Send + Sync>;

/// Live download counters of one handle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AccountProgress {
    pub processed: usize,
    pub total: usize,
    pub stats: DownloadStats,
}

/// Shared map of per-handle progress, updated from the download threads
#[derive(Debug, Clone, Default)]
pub struct ProgressBoard {
    inner: Arc<Mutex<BTreeMap<String, AccountProgress>>>,
}

impl ProgressBoard {
    pub fn get(&self, handle: &str) -> Option<AccountProgress> {
        self.inner.lock().get(handle).copied()
    }

    pub fn all(&self) -> BTreeMap<String, AccountProgress> {
        self.inner.lock().clone()
    }

    fn reset(&self, handle: &str, total: usize) {
        self.inner.lock().insert(
            handle.to_string(),
            AccountProgress {
                total,
                ..AccountProgress::default()
            },
        );
    }

    fn update(&self, handle: &str, processed: usize, total: usize, stats: DownloadStats) {
        self.inner.lock().insert(handle.to_string(), AccountProgress { processed, total, stats });
    }
}

/// Composes scraper, filter engine and downloader into a scheduler runner.
///
/// Every run gets its own [`Throttle`], shared by its scrape and its media
/// fetches. Runs of different accounts are not throttled against each other.
#[derive(Clone)]
pub struct AccountRunner {
    storage: Arc<AccountStorageManager>,
    scraper: Arc<dyn Scraper>,
    throttle: ThrottleConfig,
    retry: RetryConfig,
    fetcher: FetcherFactory,
    load_existing_files: bool,
    progress: ProgressBoard,
}

impl AccountRunner {
    /// Runner that downloads with a blocking HTTP client.
    pub fn new(
        storage: Arc<AccountStorageManager>,
        scraper: Arc<dyn Scraper>,
        throttle: ThrottleConfig,
        fetcher_config: HttpFetcherConfig,
    ) -> Self {
        let retry = fetcher_config.retry.clone();
        let fetcher: FetcherFactory = Arc::new(move |throttle: Arc<Throttle>| {
            let client = HttpFetcher::new(fetcher_config.clone(), throttle)?;
            Ok(Arc::new(client) as Arc<dyn FetchBytes>)
        });

        Self {
            storage,
            scraper,
            throttle,
            retry,
            fetcher,
            load_existing_files: true,
            progress: ProgressBoard::default(),
        }
    }

    /// Replace the byte fetcher with a fixed one.
    pub fn with_fetcher(mut self, fetcher: Arc<dyn FetchBytes>) -> Self {
        self.fetcher = Arc::new(move |_: Arc<Throttle>| Ok(fetcher.clone()));
        self
    }

    /// Whether first-wins runs pre-load hashes of files already on disk.
    pub fn with_load_existing_files(mut self, enabled: bool) -> Self {
        self.load_existing_files = enabled;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn progress(&self) -> ProgressBoard {
        self.progress.clone()
    }

    #[instrument(skip_all, fields(handle = %run.handle, kind = %run.kind))]
    async fn run_pipeline(self, run: Run, cancel: CancelToken) -> Result<(), RunError> {
        let handle = normalize_run_handle(&run.handle)?;
        let filter_config = FilterConfig::from_account_config(&run.account_config).map_err(RunError::failed)?;

        let mut mode = DedupMode::FirstWins;
        if run.kind == RunKind::Start {
            match run.start_mode {
                Some(StartMode::IgnoreReplace) => mode = DedupMode::IgnoreReplace,
                Some(start_mode) => self.prepare_start(&handle, start_mode).await?,
                None => {}
            }
        }

        // Start preparation always runs to completion; the token is only
        // honoured between phases.
        if cancel.is_cancelled() {
            return Err(RunError::Cancelled);
        }

        let throttle = Arc::new(Throttle::new(self.throttle.clone()));
        let scraped = {
            let scraper = &self.scraper;
            let throttle = &throttle;
            let handle = handle.as_str();
            tokio::select! {
                scraped = with_retry_async(&self.retry, || async move {
                    throttle.wait().await;
                    scraper.collect(handle).await
                }) => scraped,
                _ = cancel.cancelled() => {
                    info!("Cancelled while scraping");
                    return Err(RunError::Cancelled);
                }
            }
        };
        let tweets = scraped.map_err(|e| RunError::failed(format!("scrape failed: {e}")))?;

        let outcome = apply_filters(&tweets, &filter_config).map_err(RunError::failed)?;
        info!(
            tweets = tweets.len(),
            intents = outcome.intents.len(),
            filtered = ?outcome.filtered_counts,
            "Filtered tweets"
        );

        let intents: Vec<MediaIntent> = outcome.intents.iter().map(MediaIntent::from).collect();
        self.progress.reset(&handle, intents.len());

        let runner = self.clone();
        let token = cancel.clone();
        let report = tokio::task::spawn_blocking(move || runner.download_blocking(&handle, mode, intents, throttle, &token))
            .await
            .map_err(|e| RunError::failed(format!("download worker failed: {e}")))??;

        if report.interrupted {
            info!(processed = report.results.len(), "Download batch interrupted");
            return Err(RunError::Cancelled);
        }

        summarize_failures(&report.results)
    }

    async fn prepare_start(&self, handle: &str, start_mode: StartMode) -> Result<(), RunError> {
        let storage = self.storage.clone();
        let owned = handle.to_string();
        let prepared = tokio::task::spawn_blocking(move || prepare_start_new(&storage, &owned, start_mode))
            .await
            .map_err(|e| RunError::failed(format!("start preparation worker failed: {e}")))?;

        if !prepared.success {
            let error = prepared.error.unwrap_or_else(|| "unknown error".to_string());
            return Err(RunError::failed(format!("start preparation ({start_mode}) failed: {error}")));
        }

        info!(
            %start_mode,
            deleted = prepared.files_deleted,
            archived = prepared.files_archived,
            "Prepared account for fresh start"
        );
        Ok(())
    }

    fn download_blocking(
        &self,
        handle: &str,
        mode: DedupMode,
        intents: Vec<MediaIntent>,
        throttle: Arc<Throttle>,
        cancel: &CancelToken,
    ) -> Result<BatchReport, RunError> {
        let fetcher = (self.fetcher)(throttle).map_err(|e| RunError::failed(format!("cannot create media fetcher: {e}")))?;
        let mut downloader = MediaDownloader::new(&self.storage, handle, fetcher, mode).map_err(RunError::failed)?;

        if mode == DedupMode::FirstWins && self.load_existing_files {
            downloader.load_existing_files();
        }

        let total = intents.len();
        let progress = self.progress.clone();
        let mut stats = DownloadStats::default();
        let on_progress: &mut ProgressFn<'_> = &mut |index: usize, total: usize, result: &DownloadResult| {
            stats.record(result);
            progress.update(handle, index, total, stats);
            debug!(index, total, status = ?result.status(), url = %result.media_url, "Processed media");
        };

        let report = downloader.download_batch(intents, false, Some(on_progress), &|| cancel.is_cancelled());

        let final_stats = downloader.stats();
        let dedup = downloader.dedup_index().stats();
        progress.update(handle, report.results.len(), total, final_stats);
        info!(
            images = final_stats.images_downloaded,
            videos = final_stats.videos_downloaded,
            skipped_duplicate = final_stats.skipped_duplicate,
            failed = final_stats.failed,
            bytes = final_stats.total_bytes,
            known_hashes = dedup.known_hashes,
            "Download batch finished"
        );
        Ok(report)
    }
}

impl RunExecutor for AccountRunner {
    fn execute(&self, run: Run, cancel: CancelToken) -> BoxFuture<'static, Result<(), RunError>> {
        Box::pin(self.clone().run_pipeline(run, cancel))
    }
}

fn normalize_run_handle(raw: &str) -> Result<String, RunError> {
    let handle = raw.trim().trim_start_matches('@');
    if handle.is_empty() {
        return Err(RunError::failed("handle must not be empty"));
    }
    Ok(handle.to_string())
}

/// Turn per-item failures into one run error with up to three examples.
fn summarize_failures(results: &[DownloadResult]) -> Result<(), RunError> {
    let failed: Vec<&DownloadResult> = results
        .iter()
        .filter(|r| r.status() == DownloadStatus::Failed)
        .collect();
    if failed.is_empty() {
        return Ok(());
    }

    let count = |status: DownloadStatus| results.iter().filter(|r| r.status() == status).count();
    let examples = failed
        .iter()
        .take(3)
        .map(|r| format!("{}:{} -> {}", r.tweet_id, r.media_url, r.error().unwrap_or("unknown error")))
        .collect::<Vec<_>>()
        .join("; ");

    warn!(failed = failed.len(), total = results.len(), "Some downloads failed");
    Err(RunError::Failed(format!(
        "download failures: {}/{} failed (downloaded={}, skipped_duplicate={}). examples: {}",
        failed.len(),
        results.len(),
        count(DownloadStatus::Success),
        count(DownloadStatus::SkippedDuplicate),
        examples
    )))
}
