//! Tweet sources
//!
//! The pipeline only needs one operation from a scraper: collect every
//! tweet of a handle, newest first, with media already resolved. The
//! bundled [`JsonDumpScraper`] reads that list from a JSON file per handle.

use std::io;
use std::path::{Path, PathBuf};

use futures::future::BoxFuture;
use thiserror::Error;
use tracing::{debug, info};

use crate::collector::filter_engine::Tweet;
use crate::collector::net::RetryClassify;

/// Errors raised while collecting tweets
#[derive(Error, Debug)]
pub enum ScrapeError {
    #[error("No tweet source for @{0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Malformed tweet data: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Upstream responded with HTTP {0}")]
    Status(u16),

    #[error("Temporary upstream failure: {0}")]
    Transient(String),
}

pub type ScrapeResult<T> = Result<T, ScrapeError>;

impl RetryClassify for ScrapeError {
    fn retry_hint(&self) -> Option<bool> {
        match self {
            ScrapeError::Transient(_) => Some(true),
            ScrapeError::Status(_) => None,
            _ => Some(false),
        }
    }

    fn status_code(&self) -> Option<u16> {
        match self {
            ScrapeError::Status(status) => Some(*status),
            _ => None,
        }
    }
}

/// Produces the tweets of one account
pub trait Scraper: Send + Sync {
    /// Every tweet of `handle`, newest first
    fn collect<'a>(&'a self, handle: &'a str) -> BoxFuture<'a, ScrapeResult<Vec<Tweet>>>;
}

/// Reads `<dir>/<handle>.json`, a JSON array of tweet records.
#[derive(Debug, Clone)]
pub struct JsonDumpScraper {
    directory: PathBuf,
}

impl JsonDumpScraper {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn source_path(&self, handle: &str) -> PathBuf {
        self.directory.join(format!("{handle}.json"))
    }

    async fn load(&self, handle: &str) -> ScrapeResult<Vec<Tweet>> {
        let path = self.source_path(handle);
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ScrapeError::NotFound(handle.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        debug!(path = %path.display(), bytes = raw.len(), "Read tweet dump");

        let mut tweets: Vec<Tweet> = serde_json::from_slice::<Vec<Tweet>>(&raw)?
            .into_iter()
            .map(Tweet::truncate_quote_depth)
            .collect();
        tweets.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        info!(handle = %handle, tweets = tweets.len(), "Collected tweets");
        Ok(tweets)
    }
}

impl Scraper for JsonDumpScraper {
    fn collect<'a>(&'a self, handle: &'a str) -> BoxFuture<'a, ScrapeResult<Vec<Tweet>>> {
        Box::pin(self.load(handle))
    }
}
