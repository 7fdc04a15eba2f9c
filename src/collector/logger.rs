//! Structured logging
//!
//! This module provides:
//! 1. A console layer on stderr
//! 2. An optional daily rotating log file in JSON or line format
//! 3. Helpers for run-level events carrying handle, run id and status

use std::path::Path;

use thiserror::Error;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan, time::ChronoUtc},
    prelude::*,
    EnvFilter,
};
use uuid::Uuid;

use crate::collector::config_loader::Logging;
use crate::collector::pipeline::AccountProgress;
use crate::collector::scheduler::TaskStatus;

pub const LOG_FILE_PREFIX: &str = "x_media_collector.log";

#[derive(Error, Debug)]
pub enum LoggerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Logging error: {0}")]
    Logging(String),
}

pub type LoggerResult<T> = Result<T, LoggerError>;

/// Keeps the file writer alive for as long as it exists
pub struct Logger {
    _guard: Option<WorkerGuard>,
}

impl Logger {
    /// Install the global subscriber. `RUST_LOG` overrides the configured level.
    pub fn init(logging: &Logging, log_dir: impl AsRef<Path>) -> LoggerResult<Self> {
        let log_dir = log_dir.as_ref().to_path_buf();

        let filter = EnvFilter::try_from_default_env().or_else(|_| level_filter(&logging.log_level))?;

        let console = fmt::layer()
            .with_writer(std::io::stderr)
            .with_timer(ChronoUtc::rfc_3339())
            .with_target(false);

        let (file_layer, guard) = if logging.log_to_file {
            std::fs::create_dir_all(&log_dir)?;
            let file_appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, LOG_FILE_PREFIX);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            let layer = match logging.log_format.as_str() {
                "json" => fmt::layer()
                    .json()
                    .with_writer(non_blocking)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_span_events(FmtSpan::CLOSE)
                    .boxed(),
                _ => fmt::layer()
                    .with_ansi(false)
                    .with_writer(non_blocking)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_span_events(FmtSpan::CLOSE)
                    .boxed(),
            };
            (Some(layer), Some(guard))
        } else {
            (None, None)
        };

        tracing_subscriber::registry()
            .with(filter)
            .with(console)
            .with(file_layer)
            .try_init()
            .map_err(|e| LoggerError::Logging(e.to_string()))?;

        info!(
            log_format = %logging.log_format,
            log_level = %logging.log_level,
            log_to_file = logging.log_to_file,
            log_dir = %log_dir.display(),
            "Logger initialized"
        );

        Ok(Self { _guard: guard })
    }

    pub fn log_system_event(&self, event_type: &str, details: &str) {
        info!(entry_type = "system", event_type, details, "System event: {}", event_type);
    }

    /// Final line for one handle
    pub fn log_run_summary(
        &self,
        handle: &str,
        run_id: Option<Uuid>,
        status: TaskStatus,
        progress: Option<&AccountProgress>,
        error: Option<&str>,
    ) {
        let stats = progress.map(|p| p.stats).unwrap_or_default();
        match error {
            Some(error) => warn!(
                entry_type = "run",
                handle,
                run_id = ?run_id,
                %status,
                images = stats.images_downloaded,
                videos = stats.videos_downloaded,
                skipped_duplicate = stats.skipped_duplicate,
                failed = stats.failed,
                error,
                "Run summary"
            ),
            None => info!(
                entry_type = "run",
                handle,
                run_id = ?run_id,
                %status,
                images = stats.images_downloaded,
                videos = stats.videos_downloaded,
                skipped_duplicate = stats.skipped_duplicate,
                failed = stats.failed,
                "Run summary"
            ),
        }
    }
}

fn level_filter(level: &str) -> LoggerResult<EnvFilter> {
    EnvFilter::try_new(level).map_err(|e| LoggerError::Logging(e.to_string()))
}
