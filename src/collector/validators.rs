//! Strict account URL validation
//!
//! Only `https://x.com/<handle>` is accepted, where the handle is 1 to 15
//! letters, digits or underscores. Every rejection carries a message that
//! can be shown to the user as is.

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use url::{ParseError, Url};

pub const MAX_HANDLE_LENGTH: usize = 15;

static HANDLE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_]{1,15}$").expect("handle pattern is valid"));

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("URL must not be empty")]
    Empty,

    #[error("Enter the full URL instead of the @handle form (expected https://x.com/handle)")]
    AtHandle,

    #[error("Use the https:// scheme (http:// is not supported)")]
    InsecureScheme,

    #[error("URL is missing its scheme, expected https://x.com/handle")]
    MissingScheme,

    #[error("Unsupported scheme {0}://, use https://")]
    UnsupportedScheme(String),

    #[error("Use the x.com domain (twitter.com is not supported)")]
    TwitterDomain,

    #[error("Use the x.com domain without www")]
    WwwDomain,

    #[error("Domain must be x.com (got {0})")]
    WrongDomain(String),

    #[error("URL must not contain query parameters (anything after ?)")]
    Query,

    #[error("URL must not contain a fragment (anything after #)")]
    Fragment,

    #[error("URL must not end with a slash /")]
    TrailingSlash,

    #[error("Missing user name, enter the full URL (e.g. https://x.com/elonmusk)")]
    MissingHandle,

    #[error("URL contains an extra path (such as /media or /likes), keep only the profile URL")]
    ExtraPath,

    #[error("User name is too long (at most 15 characters, got {0})")]
    HandleTooLong(usize),

    #[error("User name contains invalid characters: {0} (only letters, digits and underscores are allowed)")]
    InvalidCharacters(String),

    #[error("URL is malformed: {0}")]
    Malformed(String),
}

pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validate a profile URL and return its handle with case preserved.
pub fn validate_x_url(url: &str) -> ValidationResult<String> {
    let url = url.trim();
    if url.is_empty() {
        return Err(ValidationError::Empty);
    }
    if url.starts_with('@') {
        return Err(ValidationError::AtHandle);
    }

    let parsed = match Url::parse(url) {
        Ok(parsed) => parsed,
        Err(ParseError::RelativeUrlWithoutBase) => return Err(ValidationError::MissingScheme),
        Err(e) => return Err(ValidationError::Malformed(e.to_string())),
    };

    match parsed.scheme() {
        "https" => {}
        "http" => return Err(ValidationError::InsecureScheme),
        other => return Err(ValidationError::UnsupportedScheme(other.to_string())),
    }

    let host = parsed.host_str().unwrap_or_default();
    match host {
        "x.com" => {}
        "twitter.com" | "www.twitter.com" => return Err(ValidationError::TwitterDomain),
        "www.x.com" => return Err(ValidationError::WwwDomain),
        _ => return Err(ValidationError::WrongDomain(host.to_string())),
    }
    if let Some(port) = parsed.port() {
        return Err(ValidationError::WrongDomain(format!("{host}:{port}")));
    }
    if !parsed.username().is_empty() || parsed.password().is_some() {
        return Err(ValidationError::Malformed("credentials are not allowed".to_string()));
    }

    if parsed.query().is_some() {
        return Err(ValidationError::Query);
    }
    if parsed.fragment().is_some() {
        return Err(ValidationError::Fragment);
    }

    let path = parsed.path();
    if path.len() > 1 && path.ends_with('/') {
        return Err(ValidationError::TrailingSlash);
    }
    let segment = path.strip_prefix('/').unwrap_or(path);
    if segment.is_empty() {
        return Err(ValidationError::MissingHandle);
    }
    if segment.contains('/') {
        return Err(ValidationError::ExtraPath);
    }

    // The parsed path is percent-encoded; report characters as typed.
    let handle = url.rsplit('/').next().unwrap_or(segment);
    check_handle(handle)?;
    Ok(handle.to_string())
}

/// Accept a bare handle (optionally prefixed with `@`) or a profile URL.
pub fn normalize_handle(input: &str) -> ValidationResult<String> {
    let input = input.trim();
    if input.contains("://") || input.contains('/') {
        return validate_x_url(input);
    }

    let handle = input.strip_prefix('@').unwrap_or(input).trim();
    if handle.is_empty() {
        return Err(ValidationError::MissingHandle);
    }
    check_handle(handle)?;
    Ok(handle.to_string())
}

fn check_handle(handle: &str) -> ValidationResult<()> {
    if HANDLE_PATTERN.is_match(handle) {
        return Ok(());
    }

    let length = handle.chars().count();
    if length > MAX_HANDLE_LENGTH {
        return Err(ValidationError::HandleTooLong(length));
    }

    let mut invalid: Vec<char> = handle
        .chars()
        .filter(|c| !(c.is_ascii_alphanumeric() || *c == '_'))
        .collect();
    invalid.sort_unstable();
    invalid.dedup();
    let listed = invalid.iter().map(char::to_string).collect::<Vec<_>>().join(", ");
    Err(ValidationError::InvalidCharacters(listed))
}
