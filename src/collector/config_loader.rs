//! Application configuration
//!
//! `config.toml` is loaded into [`AppConfig`]. A missing file is created
//! with defaults; an unparsable one is moved to `config.toml.backup` and
//! replaced by defaults. [`ConfigManager`] keeps the current config behind
//! a lock, watches the config directory and broadcasts reload events.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::collector::lifecycle::{CancelMode, StartMode};
use crate::collector::net::{HttpFetcherConfig, ProxyConfig, RetryConfig, ThrottleConfig, DEFAULT_USER_AGENT};

pub const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(String),

    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Paths {
    pub download_root: String,
    pub runs_directory: String,
    pub log_directory: String,
    /// Where the JSON tweet dumps are read from
    pub tweets_directory: String,
}

impl Default for Paths {
    fn default() -> Self {
        Self {
            download_root: "./downloads".to_string(),
            runs_directory: "./data/runs".to_string(),
            log_directory: "./logs".to_string(),
            tweets_directory: "./data/tweets".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct SchedulerSettings {
    pub max_concurrent: usize,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self { max_concurrent: 3 }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct DownloadSettings {
    pub timeout_secs: u64,
    pub user_agent: String,
    pub load_existing_files: bool,
    /// What happens to an account's media when its running task is interrupted
    pub cancel_mode: CancelMode,
    pub proxy: ProxyConfig,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            load_existing_files: true,
            cancel_mode: CancelMode::Keep,
            proxy: ProxyConfig::default(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Logging {
    pub log_level: String,
    /// `json` or `line`
    pub log_format: String,
    pub log_to_file: bool,
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "line".to_string(),
            log_to_file: true,
        }
    }
}

/// One account to collect
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AccountEntry {
    /// Bare handle, `@handle` or `https://x.com/<handle>`
    pub handle: String,
    #[serde(default = "default_kind")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_mode: Option<StartMode>,
    /// Filter options handed to the run as its account config
    #[serde(default)]
    pub config: toml::Table,
}

fn default_kind() -> String {
    "start".to_string()
}

impl AccountEntry {
    /// The filter options as JSON. TOML dates become ISO-8601 strings.
    pub fn account_config(&self) -> Value {
        Value::Object(
            self.config
                .iter()
                .map(|(key, value)| (key.clone(), toml_to_json(value)))
                .collect(),
        )
    }
}

fn toml_to_json(value: &toml::Value) -> Value {
    match value {
        toml::Value::String(s) => Value::String(s.clone()),
        toml::Value::Integer(i) => Value::from(*i),
        toml::Value::Float(f) => Value::from(*f),
        toml::Value::Boolean(b) => Value::Bool(*b),
        toml::Value::Datetime(dt) => Value::String(dt.to_string()),
        toml::Value::Array(items) => Value::Array(items.iter().map(toml_to_json).collect()),
        toml::Value::Table(table) => Value::Object(
            table
                .iter()
                .map(|(key, value)| (key.clone(), toml_to_json(value)))
                .collect(),
        ),
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(default)]
pub struct AppConfig {
    pub paths: Paths,
    pub scheduler: SchedulerSettings,
    pub throttle: ThrottleConfig,
    pub retry: RetryConfig,
    pub download: DownloadSettings,
    pub logging: Logging,
    pub accounts: Vec<AccountEntry>,
}

impl AppConfig {
    /// Bring every numeric setting back into its valid range.
    pub fn sanitized(mut self) -> Self {
        self.scheduler.max_concurrent = self.scheduler.max_concurrent.max(1);
        self.throttle = self.throttle.sanitized();
        self.retry = self.retry.sanitized();
        self.download.timeout_secs = self.download.timeout_secs.max(1);
        if self.download.user_agent.trim().is_empty() {
            self.download.user_agent = DEFAULT_USER_AGENT.to_string();
        }
        if !matches!(self.logging.log_format.as_str(), "json" | "line") {
            warn!(log_format = %self.logging.log_format, "Unknown log format, using line");
            self.logging.log_format = "line".to_string();
        }
        self
    }

    pub fn fetcher_config(&self) -> HttpFetcherConfig {
        HttpFetcherConfig {
            timeout: Duration::from_secs(self.download.timeout_secs),
            user_agent: self.download.user_agent.clone(),
            proxy: self.download.proxy.clone(),
            retry: self.retry.clone(),
        }
    }
}

/// Parse a config file without touching it.
pub fn read_app_config(config_path: &Path) -> ConfigResult<AppConfig> {
    let content = fs::read_to_string(config_path)?;
    let config: AppConfig = toml::from_str(&content)?;
    Ok(config.sanitized())
}

/// Load `config.toml`, creating it with defaults when missing and backing
/// up a corrupt one before replacing it.
pub fn load_app_config(config_path: &Path) -> ConfigResult<AppConfig> {
    if !config_path.exists() {
        warn!(path = %config_path.display(), "Config file not found, writing defaults");
        let default_config = AppConfig::default();
        write_app_config(config_path, &default_config)?;
        return Ok(default_config);
    }

    match read_app_config(config_path) {
        Ok(config) => Ok(config),
        Err(ConfigError::Toml(e)) => {
            error!(path = %config_path.display(), error = %e, "Failed to parse config file");
            info!("Backing up old config and creating new one with default values");

            if let Err(backup_err) = fs::rename(config_path, config_path.with_extension("toml.backup")) {
                warn!(error = %backup_err, "Failed to backup old config");
            }

            let default_config = AppConfig::default();
            if let Err(write_err) = write_app_config(config_path, &default_config) {
                error!(error = %write_err, "Failed to write new config file");
            }
            Ok(default_config)
        }
        Err(e) => Err(e),
    }
}

pub fn write_app_config(config_path: &Path, config: &AppConfig) -> ConfigResult<()> {
    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent)?;
    }
    let toml_string = toml::to_string_pretty(config).map_err(|e| ConfigError::TomlSer(e.to_string()))?;
    fs::write(config_path, toml_string)?;
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigReloadEvent {
    AppConfig,
}

/// Owns the live configuration
pub struct ConfigManager {
    app_config: Arc<RwLock<AppConfig>>,
    config_dir: PathBuf,
    _watcher: Option<RecommendedWatcher>,
    reload_tx: broadcast::Sender<ConfigReloadEvent>,
}

impl ConfigManager {
    pub fn new(config_dir: impl AsRef<Path>) -> ConfigResult<Self> {
        let config_dir = config_dir.as_ref().to_path_buf();
        if !config_dir.exists() {
            info!(path = %config_dir.display(), "Creating config directory");
            fs::create_dir_all(&config_dir)?;
        }

        let app_config = load_app_config(&config_dir.join(CONFIG_FILE_NAME))?;
        let (reload_tx, _) = broadcast::channel(16);

        Ok(Self {
            app_config: Arc::new(RwLock::new(app_config)),
            config_dir,
            _watcher: None,
            reload_tx,
        })
    }

    pub fn config_path(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE_NAME)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConfigReloadEvent> {
        self.reload_tx.subscribe()
    }

    pub fn get_app_config(&self) -> AppConfig {
        self.app_config.read().clone()
    }

    /// Re-read the config file. A file that does not parse leaves the
    /// current config in place.
    pub fn reload(&self) -> ConfigResult<AppConfig> {
        reload_into(&self.config_path(), &self.app_config, &self.reload_tx)
    }

    /// Watch the config directory and reload on every change to the
    /// config file. Events are handled on a dedicated thread.
    pub fn watch(&mut self) -> ConfigResult<()> {
        let (tx, rx) = std::sync::mpsc::channel();
        let mut watcher = RecommendedWatcher::new(tx, Config::default())?;
        watcher.watch(&self.config_dir, RecursiveMode::NonRecursive)?;

        let config_path = self.config_path();
        let app_config = self.app_config.clone();
        let reload_tx = self.reload_tx.clone();

        std::thread::Builder::new()
            .name("config-watcher".to_string())
            .spawn(move || {
                for res in rx {
                    match res {
                        Ok(Event {
                            kind: EventKind::Modify(_) | EventKind::Create(_),
                            paths,
                            ..
                        }) => {
                            let touches_config = paths
                                .iter()
                                .any(|path| path.file_name().is_some_and(|name| name == CONFIG_FILE_NAME));
                            if touches_config {
                                if let Err(e) = reload_into(&config_path, &app_config, &reload_tx) {
                                    error!(error = %e, "Failed to reload app config");
                                }
                            }
                        }
                        Err(e) => error!(error = %e, "Watch error"),
                        _ => {}
                    }
                }
            })?;

        self._watcher = Some(watcher);
        Ok(())
    }
}

fn reload_into(
    config_path: &Path,
    app_config: &RwLock<AppConfig>,
    reload_tx: &broadcast::Sender<ConfigReloadEvent>,
) -> ConfigResult<AppConfig> {
    let new_config = read_app_config(config_path)?;
    {
        let mut current = app_config.write();
        if *current == new_config {
            return Ok(new_config);
        }
        *current = new_config.clone();
    }
    let _ = reload_tx.send(ConfigReloadEvent::AppConfig);
    info!("Reloaded app config");
    Ok(new_config)
}
