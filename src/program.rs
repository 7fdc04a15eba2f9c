use std::env::consts::{ARCH, FAMILY, OS};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Error};
use chrono::Utc;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, trace, warn};
use uuid::Uuid;

use x_media_collector::collector::fs::AccountStorageManager;
use x_media_collector::collector::metrics::compute_avg_speed;
use x_media_collector::collector::{
    normalize_handle, prepare_cancel_running, AccountRunner, CancelMode, ConfigManager, JsonDumpScraper, Logger,
    ProgressBoard, Scheduler, SchedulerConfig, TaskStatus,
};

/// The name of the cargo package.
const NAME: &str = env!("CARGO_PKG_NAME");

/// The version of the cargo package.
const VERSION: &str = env!("CARGO_PKG_VERSION");

const PROGRESS_TEMPLATE: &str = "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} accounts {msg}";

/// Drives one collection session from config to final summary.
pub(crate) struct Program {
    config_dir: PathBuf,
}

/// One enqueued account
struct Submitted {
    handle: String,
    run_id: Uuid,
}

impl Program {
    pub(crate) fn new(config_dir: PathBuf) -> Self {
        Self { config_dir }
    }

    pub(crate) async fn run(&self) -> Result<(), Error> {
        let mut manager = ConfigManager::new(&self.config_dir)
            .with_context(|| format!("loading config from {}", self.config_dir.display()))?;
        let config = manager.get_app_config();

        let logger = Logger::init(&config.logging, &config.paths.log_directory)?;
        trace!("Program Name: {}", NAME);
        trace!("Program Version: {}", VERSION);
        log_system_information();
        logger.log_system_event("startup", &format!("config at {}", manager.config_path().display()));

        if let Err(e) = manager.watch() {
            warn!(error = %e, "Config hot reload disabled");
        }
        let mut reloads = manager.subscribe();

        config
            .download
            .proxy
            .validate()
            .map_err(|e| anyhow!("invalid proxy setting: {e}"))?;

        let storage = Arc::new(AccountStorageManager::new(&config.paths.download_root));
        let scraper = Arc::new(JsonDumpScraper::new(&config.paths.tweets_directory));
        let runner = AccountRunner::new(storage.clone(), scraper, config.throttle.clone(), config.fetcher_config())
            .with_load_existing_files(config.download.load_existing_files);
        let progress = runner.progress();

        let scheduler = Scheduler::new(
            SchedulerConfig {
                max_concurrent: config.scheduler.max_concurrent,
                runs_dir: PathBuf::from(&config.paths.runs_directory),
            },
            Arc::new(runner),
        )?;

        let mut submitted = Vec::new();
        for entry in &config.accounts {
            let handle = match normalize_handle(&entry.handle) {
                Ok(handle) => handle,
                Err(e) => {
                    warn!(input = %entry.handle, error = %e, "Skipping account");
                    continue;
                }
            };
            match scheduler.enqueue(&handle, &entry.kind, entry.account_config(), entry.start_mode) {
                Ok(run) => submitted.push(Submitted {
                    handle,
                    run_id: run.run_id,
                }),
                Err(e) => warn!(handle = %handle, error = %e, "Could not enqueue account"),
            }
        }

        if submitted.is_empty() {
            info!("No accounts to collect. Add [[accounts]] entries to {}", manager.config_path().display());
            return Ok(());
        }

        let bar = progress_bar(submitted.len() as u64);
        let mut ticker = tokio::time::interval(Duration::from_millis(250));
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);
        let mut interrupted = false;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    update_progress(&bar, &scheduler, &progress, &submitted);
                    if scheduler.is_idle() {
                        break;
                    }
                }
                event = reloads.recv() => match event {
                    Ok(_) | Err(RecvError::Lagged(_)) => {
                        let max_concurrent = manager.get_app_config().scheduler.max_concurrent;
                        match scheduler.set_max_concurrent(max_concurrent) {
                            Ok(()) => scheduler.reschedule(),
                            Err(e) => warn!(error = %e, "Ignoring reloaded concurrency limit"),
                        }
                    }
                    Err(RecvError::Closed) => {}
                },
                signal = &mut ctrl_c, if !interrupted => {
                    interrupted = true;
                    if let Err(e) = signal {
                        error!(error = %e, "Failed to listen for Ctrl-C");
                    }
                    let affected = scheduler.cancel_all();
                    bar.println(format!("Interrupted, cancelling {affected} account(s)..."));
                    info!(affected, "Cancellation requested for all accounts");
                }
            }
        }

        scheduler.flush_persistence().await;
        bar.finish_and_clear();

        let cancel_mode = config.download.cancel_mode;
        println!("\n{NAME} {VERSION} summary");
        for item in &submitted {
            let state = scheduler.get_handle_state(&item.handle)?;
            let run = scheduler.get_run(item.run_id);
            let account = progress.get(&item.handle);
            let error = run.as_ref().and_then(|run| run.error.clone());

            logger.log_run_summary(&item.handle, Some(item.run_id), state.status, account.as_ref(), error.as_deref());

            let stats = account.map(|a| a.stats).unwrap_or_default();
            let runtime = run.as_ref().map(|run| run.runtime_secs(Utc::now())).unwrap_or(0.0);
            let speed = compute_avg_speed(
                stats.images_downloaded,
                stats.videos_downloaded,
                stats.skipped_duplicate,
                runtime,
            );
            println!(
                "  @{:<16} {:<10} images={} videos={} skipped={} failed={} runtime={:.1}s speed={:.2}/s",
                item.handle,
                state.status.to_string(),
                stats.images_downloaded,
                stats.videos_downloaded,
                stats.skipped_duplicate,
                stats.failed,
                runtime,
                speed
            );
            if let Some(error) = error {
                println!("      error: {error}");
            }

            if state.status == TaskStatus::Cancelled && cancel_mode == CancelMode::Delete {
                let storage = storage.clone();
                let handle = item.handle.clone();
                let cleaned = tokio::task::spawn_blocking(move || prepare_cancel_running(&storage, &handle, cancel_mode))
                    .await?;
                match cleaned.error {
                    None => println!("      removed {} file(s) of the cancelled run", cleaned.files_deleted),
                    Some(e) => println!("      cleanup failed: {e}"),
                }
            }
        }

        logger.log_system_event("shutdown", if interrupted { "interrupted" } else { "completed" });
        Ok(())
    }
}

/// Logs important information about the system being used.
fn log_system_information() {
    trace!("ARCH:   \"{}\"", ARCH);
    trace!("FAMILY: \"{}\"", FAMILY);
    trace!("OS:     \"{}\"", OS);
}

fn progress_bar(len: u64) -> ProgressBar {
    let style = ProgressStyle::default_bar()
        .template(PROGRESS_TEMPLATE)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=>-");
    let bar = ProgressBar::new(len);
    bar.set_style(style);
    bar.set_draw_target(ProgressDrawTarget::stderr_with_hz(5));
    bar
}

fn update_progress(bar: &ProgressBar, scheduler: &Scheduler, progress: &ProgressBoard, submitted: &[Submitted]) {
    let snapshot = scheduler.snapshot();
    let finished = submitted
        .iter()
        .filter(|item| {
            snapshot
                .handles
                .iter()
                .any(|h| h.handle == item.handle && h.status.is_terminal())
        })
        .count();

    let (images, videos, skipped) = progress.all().values().fold((0, 0, 0), |acc, p| {
        (
            acc.0 + p.stats.images_downloaded,
            acc.1 + p.stats.videos_downloaded,
            acc.2 + p.stats.skipped_duplicate,
        )
    });

    bar.set_position(finished as u64);
    bar.set_message(format!(
        "| running {} queued {} | images {} videos {} skipped {}",
        snapshot.running_count, snapshot.queued_count, images, videos, skipped
    ));
}
