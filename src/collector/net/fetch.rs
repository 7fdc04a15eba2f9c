//! Blocking HTTP fetch of media bytes
//!
//! [`HttpFetcher`] wraps a blocking reqwest client with the shared
//! [`Throttle`] and the retry policy. It is meant to be created, used and
//! dropped on a blocking worker thread, never inside an async task.

use std::sync::Arc;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, REFERER, USER_AGENT};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument};
use url::Url;

use super::retry::{with_retry, RetryClassify, RetryConfig};
use super::throttle::Throttle;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

const REFERER_VALUE: &str = "https://x.com/";

/// Errors from fetching media bytes
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("HTTP {status} for {url}")]
    Status { status: u16, url: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Client error: {0}")]
    Client(String),
}

pub type FetchResult<T> = Result<T, FetchError>;

impl RetryClassify for FetchError {
    fn retry_hint(&self) -> Option<bool> {
        match self {
            FetchError::Transport(_) => Some(true),
            FetchError::InvalidUrl(_) | FetchError::Client(_) => Some(false),
            FetchError::Status { .. } => None,
        }
    }

    fn status_code(&self) -> Option<u16> {
        match self {
            FetchError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Anything that can turn a URL into bytes.
///
/// Implemented for plain closures so tests can inject canned responses.
pub trait FetchBytes: Send + Sync {
    fn fetch(&self, url: &str) -> FetchResult<Vec<u8>>;
}

impl<F> FetchBytes for F
where
    F: Fn(&str) -> FetchResult<Vec<u8>> + Send + Sync,
{
    fn fetch(&self, url: &str) -> FetchResult<Vec<u8>> {
        self(url)
    }
}

/// Optional outbound proxy
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub enabled: bool,
    pub url: String,
}

impl ProxyConfig {
    const SCHEMES: [&'static str; 4] = ["http", "https", "socks4", "socks5"];

    /// Proxy URL when enabled and non-blank
    pub fn active_url(&self) -> Option<&str> {
        let url = self.url.trim();
        (self.enabled && !url.is_empty()).then_some(url)
    }

    pub fn validate(&self) -> Result<(), String> {
        if !self.enabled {
            return Ok(());
        }
        let url = self.url.trim();
        if url.is_empty() {
            return Err("Proxy is enabled but URL is empty".to_string());
        }
        let parsed = Url::parse(url).map_err(|e| format!("Invalid proxy URL: {e}"))?;
        if !Self::SCHEMES.contains(&parsed.scheme()) {
            return Err(format!(
                "Unsupported proxy scheme: {}. Use: {}",
                parsed.scheme(),
                Self::SCHEMES.join(", ")
            ));
        }
        if parsed.host_str().is_none_or(str::is_empty) {
            return Err("Proxy URL must include host (and optionally port)".to_string());
        }
        Ok(())
    }
}

/// Settings for building an [`HttpFetcher`]
#[derive(Debug, Clone)]
pub struct HttpFetcherConfig {
    pub timeout: Duration,
    pub user_agent: String,
    pub proxy: ProxyConfig,
    pub retry: RetryConfig,
}

impl Default for HttpFetcherConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            proxy: ProxyConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

/// Throttled, retrying media fetcher
pub struct HttpFetcher {
    client: Client,
    throttle: Arc<Throttle>,
    retry: RetryConfig,
}

impl HttpFetcher {
    pub fn new(config: HttpFetcherConfig, throttle: Arc<Throttle>) -> FetchResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent).map_err(|e| FetchError::Client(e.to_string()))?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
        headers.insert(REFERER, HeaderValue::from_static(REFERER_VALUE));

        let mut builder = Client::builder()
            .default_headers(headers)
            .timeout(config.timeout);

        if let Some(proxy_url) = config.proxy.active_url() {
            config.proxy.validate().map_err(FetchError::Client)?;
            let proxy = reqwest::Proxy::all(proxy_url).map_err(|e| FetchError::Client(e.to_string()))?;
            builder = builder.proxy(proxy);
        }

        let client = builder.build().map_err(|e| FetchError::Client(e.to_string()))?;

        Ok(Self {
            client,
            throttle,
            retry: config.retry.sanitized(),
        })
    }

    fn fetch_once(&self, url: &str) -> FetchResult<Vec<u8>> {
        self.throttle.wait_blocking();

        let response = self.client.get(url).send().map_err(|e| {
            if e.is_builder() {
                FetchError::InvalidUrl(url.to_string())
            } else {
                FetchError::Transport(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let bytes = response
            .bytes()
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

impl FetchBytes for HttpFetcher {
    #[instrument(skip(self), level = "debug")]
    fn fetch(&self, url: &str) -> FetchResult<Vec<u8>> {
        let bytes = with_retry(&self.retry, || self.fetch_once(url))?;
        debug!(url, bytes = bytes.len(), "Fetched media");
        Ok(bytes)
    }
}
