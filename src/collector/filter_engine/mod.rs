//! Filter engine: pure selection of which media to download

pub mod engine;
pub mod models;

pub use engine::{apply_filters, classify_tweet_source_type, is_reply_plus_quote, FILTER_REASON_MIN_SHORT_SIDE};
pub use models::{
    parse_iso_datetime, DownloadIntent, FilterConfig, FilterError, FilterOutcome, FilterResult, MediaCandidate,
    MediaKind, MediaOrigin, MediaTypeFilter, Tweet, TweetSourceType,
};
