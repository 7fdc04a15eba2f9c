//! Media file naming
//!
//! Files are named `<tweet_id>_<YYYY-MM-DD>_<hash6>.<ext>`, where the date is
//! the UTC date of the owning tweet and `hash6` is the first six hex
//! characters of the SHA-256 content hash.

use std::path::Path;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use url::Url;

/// Errors raised while generating or interpreting file names
#[derive(Error, Debug, PartialEq, Eq)]
pub enum NamingError {
    #[error("hash6 must be 6 hex characters, got {0:?}")]
    InvalidHash6(String),

    #[error("hash is too short for hash6 ({0} characters)")]
    HashTooShort(usize),
}

pub type NamingResult<T> = Result<T, NamingError>;

/// Extension used when nothing better can be derived
pub const FALLBACK_EXTENSION: &str = "bin";

static FILENAME_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(\d+)_(\d{4}-\d{2}-\d{2})_([a-f0-9]{6})\.(\w+)$")
        .expect("filename pattern is valid")
});

static URL_EXTENSION_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9]{1,10}$").expect("extension pattern is valid"));

/// Components recovered from a media file name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFilename {
    pub tweet_id: String,
    pub date: String,
    pub hash6: String,
    pub extension: String,
}

/// Build the canonical file name for a downloaded media item.
pub fn generate_media_filename(
    tweet_id: &str,
    created_at: DateTime<Utc>,
    hash6: &str,
    extension: &str,
) -> NamingResult<String> {
    let hash6 = hash6.to_ascii_lowercase();
    if hash6.len() != 6 || !hash6.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(NamingError::InvalidHash6(hash6));
    }

    let extension = extension.strip_prefix('.').unwrap_or(extension);
    let date = created_at.format("%Y-%m-%d");

    Ok(format!("{tweet_id}_{date}_{hash6}.{extension}"))
}

/// Parse a file name (or the final component of a path).
///
/// Returns `None` when the name does not follow the canonical format.
/// `hash6` and the extension come back lowercased.
pub fn parse_media_filename(name: &str) -> Option<ParsedFilename> {
    let file_name = Path::new(name).file_name()?.to_str()?;
    let caps = FILENAME_PATTERN.captures(file_name)?;

    Some(ParsedFilename {
        tweet_id: caps[1].to_string(),
        date: caps[2].to_string(),
        hash6: caps[3].to_ascii_lowercase(),
        extension: caps[4].to_lowercase(),
    })
}

/// Map a MIME type to a file extension.
pub fn extension_for_mime(mime_type: &str) -> String {
    let mime = mime_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    match mime.as_str() {
        "image/jpeg" | "image/jpg" => "jpg".to_string(),
        "image/png" => "png".to_string(),
        "image/gif" => "gif".to_string(),
        "image/webp" => "webp".to_string(),
        "video/mp4" => "mp4".to_string(),
        "video/webm" => "webm".to_string(),
        "video/quicktime" => "mov".to_string(),
        other => match other.split_once('/') {
            Some((_, subtype)) if !subtype.is_empty() => subtype.to_string(),
            _ => FALLBACK_EXTENSION.to_string(),
        },
    }
}

/// Derive an extension from the last dot-segment of a URL path.
///
/// Query strings and fragments are ignored. Anything that is not 1-10
/// alphanumeric characters falls back to `bin`.
pub fn extension_from_url(url: &str) -> String {
    let path = match Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => url
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .to_string(),
    };

    let last_segment = path.rsplit('/').next().unwrap_or_default();
    match last_segment.rsplit_once('.') {
        Some((_, ext)) if URL_EXTENSION_PATTERN.is_match(ext) => ext.to_ascii_lowercase(),
        _ => FALLBACK_EXTENSION.to_string(),
    }
}
