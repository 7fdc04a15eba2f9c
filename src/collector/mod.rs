//! X media collector
//! Schedules per-account runs that scrape, filter and download media

pub mod config_loader;
pub mod downloader;
pub mod filter_engine;
pub mod fs;
pub mod lifecycle;
pub mod logger;
pub mod metrics;
pub mod net;
pub mod pipeline;
pub mod scheduler;
pub mod scraper;
pub mod validators;

// Re-export commonly used types for convenience
pub use config_loader::{
    AccountEntry, AppConfig, ConfigError, ConfigManager, ConfigReloadEvent, ConfigResult,
};

pub use scheduler::{
    CancelToken, HandleState, Run, RunError, RunExecutor, RunKind, Scheduler, SchedulerConfig,
    SchedulerError, SchedulerResult, SchedulerSnapshot, TaskStatus,
};

pub use pipeline::{AccountProgress, AccountRunner, ProgressBoard};

pub use lifecycle::{
    check_existing_files, prepare_cancel_running, prepare_start_new, CancelMode, StartMode,
};

pub use logger::{Logger, LoggerError, LoggerResult};
pub use scraper::{JsonDumpScraper, ScrapeError, ScrapeResult, Scraper};
pub use validators::{normalize_handle, validate_x_url, ValidationError};
