//! Data model of the filter engine: tweets, media candidates, filter
//! settings and the resulting download intents.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Errors from building a filter configuration or applying it
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FilterError {
    #[error("Invalid filter config: {0}")]
    InvalidConfig(String),

    #[error("start_date {start} must not be after end_date {end}")]
    InvertedDateRange { start: NaiveDate, end: NaiveDate },

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),
}

pub type FilterResult<T> = Result<T, FilterError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    pub(crate) fn rank(self) -> u8 {
        match self {
            MediaKind::Image => 0,
            MediaKind::Video => 1,
        }
    }
}

/// Which media kinds an account wants
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaTypeFilter {
    Images,
    Videos,
    #[default]
    Both,
}

impl MediaTypeFilter {
    pub fn allows(self, kind: MediaKind) -> bool {
        match self {
            MediaTypeFilter::Both => true,
            MediaTypeFilter::Images => kind == MediaKind::Image,
            MediaTypeFilter::Videos => kind == MediaKind::Video,
        }
    }
}

impl FromStr for MediaTypeFilter {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "images" => Ok(MediaTypeFilter::Images),
            "videos" => Ok(MediaTypeFilter::Videos),
            "both" => Ok(MediaTypeFilter::Both),
            other => Err(FilterError::InvalidConfig(format!("unknown media_type: {other}"))),
        }
    }
}

/// Source classification of a triggering tweet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TweetSourceType {
    Original,
    Reply,
    Retweet,
    Quote,
}

impl TweetSourceType {
    pub const ALL: [TweetSourceType; 4] = [
        TweetSourceType::Original,
        TweetSourceType::Reply,
        TweetSourceType::Retweet,
        TweetSourceType::Quote,
    ];
}

impl fmt::Display for TweetSourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TweetSourceType::Original => "Original",
            TweetSourceType::Reply => "Reply",
            TweetSourceType::Retweet => "Retweet",
            TweetSourceType::Quote => "Quote",
        };
        f.write_str(name)
    }
}

impl FromStr for TweetSourceType {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TweetSourceType::ALL
            .into_iter()
            .find(|t| t.to_string() == s.trim())
            .ok_or_else(|| FilterError::InvalidConfig(format!("unknown source type: {s}")))
    }
}

/// A media item attached to a tweet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaCandidate {
    #[serde(deserialize_with = "de_id")]
    pub media_id: String,
    pub kind: MediaKind,
    pub url: String,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
}

impl MediaCandidate {
    /// Shorter of the two dimensions, when both are known
    pub fn short_side(&self) -> Option<u32> {
        Some(self.width?.min(self.height?))
    }
}

/// A post as delivered by a scraper
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tweet {
    #[serde(deserialize_with = "de_id")]
    pub tweet_id: String,
    #[serde(deserialize_with = "de_timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub is_reply: bool,
    #[serde(default)]
    pub is_retweet: bool,
    #[serde(default)]
    pub quoted_tweet: Option<Box<Tweet>>,
    #[serde(default)]
    pub media: Vec<MediaCandidate>,
}

impl Tweet {
    /// Drop anything quoted by the quoted tweet; only one level is meaningful.
    pub fn truncate_quote_depth(mut self) -> Self {
        if let Some(quoted) = self.quoted_tweet.as_mut() {
            quoted.quoted_tweet = None;
        }
        self
    }
}

/// Per-account filter settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterConfig {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub media_type: MediaTypeFilter,
    pub source_types: BTreeSet<TweetSourceType>,
    pub include_quote_media_in_reply: bool,
    pub min_short_side: Option<u32>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            start_date: None,
            end_date: None,
            media_type: MediaTypeFilter::Both,
            source_types: TweetSourceType::ALL.into_iter().collect(),
            include_quote_media_in_reply: false,
            min_short_side: None,
        }
    }
}

impl FilterConfig {
    /// Build from an account config object.
    ///
    /// Both camelCase (`startDate`, `mediaType`, `minShortSide`,
    /// `includeQuoteMediaInReply`, `sourceTypes`) and snake_case keys are
    /// accepted; camelCase wins when both are present. `sourceTypes` may be
    /// a list of names or a `{name: bool}` map. A non-positive
    /// `minShortSide` disables the threshold.
    pub fn from_account_config(value: &Value) -> FilterResult<Self> {
        let empty = Map::new();
        let obj = match value {
            Value::Null => &empty,
            Value::Object(obj) => obj,
            other => {
                return Err(FilterError::InvalidConfig(format!(
                    "account config must be an object, got {other}"
                )));
            }
        };

        let start_date = parse_date(pick(obj, "startDate", "start_date"), "start_date")?;
        let end_date = parse_date(pick(obj, "endDate", "end_date"), "end_date")?;

        let media_type = match pick(obj, "mediaType", "media_type") {
            None | Some(Value::Null) => MediaTypeFilter::Both,
            Some(Value::String(s)) => s.parse()?,
            Some(other) => {
                return Err(FilterError::InvalidConfig(format!("media_type must be a string, got {other}")));
            }
        };

        let source_types = match pick(obj, "sourceTypes", "source_types") {
            None | Some(Value::Null) => TweetSourceType::ALL.into_iter().collect(),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| match item {
                    Value::String(s) => s.parse(),
                    other => other.to_string().parse(),
                })
                .collect::<FilterResult<BTreeSet<_>>>()?,
            Some(Value::Object(flags)) => flags
                .iter()
                .filter(|(_, enabled)| truthy(enabled))
                .map(|(name, _)| name.parse())
                .collect::<FilterResult<BTreeSet<_>>>()?,
            Some(other) => {
                return Err(FilterError::InvalidConfig(format!(
                    "source_types must be a list or a map, got {other}"
                )));
            }
        };

        let include_quote_media_in_reply = pick(obj, "includeQuoteMediaInReply", "include_quote_media_in_reply")
            .is_some_and(truthy);

        let min_short_side = parse_min_short_side(pick(obj, "minShortSide", "min_short_side"))?;

        Ok(Self {
            start_date,
            end_date,
            media_type,
            source_types,
            include_quote_media_in_reply,
            min_short_side,
        })
    }

    pub fn validate(&self) -> FilterResult<()> {
        if let (Some(start), Some(end)) = (self.start_date, self.end_date) {
            if start > end {
                return Err(FilterError::InvertedDateRange { start, end });
            }
        }
        Ok(())
    }
}

/// Where a media item came from relative to the triggering tweet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaOrigin {
    #[serde(rename = "self")]
    SelfPost,
    Quoted,
}

impl MediaOrigin {
    pub(crate) fn rank(self) -> u8 {
        match self {
            MediaOrigin::SelfPost => 0,
            MediaOrigin::Quoted => 1,
        }
    }
}

/// One media item the account runner should download
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadIntent {
    pub media_id: String,
    pub kind: MediaKind,
    pub url: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Tweet that owns the media
    pub tweet_id: String,
    pub tweet_created_at: DateTime<Utc>,
    /// Tweet that matched the filters
    pub trigger_tweet_id: String,
    pub trigger_created_at: DateTime<Utc>,
    pub origin: MediaOrigin,
    pub needs_post_min_short_side_check: bool,
}

/// Filter output: ordered intents plus counts of items dropped per reason
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FilterOutcome {
    pub intents: Vec<DownloadIntent>,
    pub filtered_counts: BTreeMap<String, usize>,
}

/// Parse an ISO-8601 timestamp. A trailing `Z` or an offset is honoured;
/// naive timestamps are taken as UTC.
pub fn parse_iso_datetime(raw: &str) -> FilterResult<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(FilterError::InvalidTimestamp("created_at must not be empty".to_string()));
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(naive.and_utc());
        }
    }

    Err(FilterError::InvalidTimestamp(raw.to_string()))
}

fn pick<'a>(obj: &'a Map<String, Value>, camel: &str, snake: &str) -> Option<&'a Value> {
    obj.get(camel).or_else(|| obj.get(snake))
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

fn parse_date(value: Option<&Value>, field: &str) -> FilterResult<Option<NaiveDate>> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if !s.trim().is_empty() => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
            .map(Some)
            .map_err(|e| FilterError::InvalidConfig(format!("{field} must be YYYY-MM-DD: {e}"))),
        Some(other) => Err(FilterError::InvalidConfig(format!(
            "{field} must be YYYY-MM-DD or null, got {other}"
        ))),
    }
}

fn parse_min_short_side(value: Option<&Value>) -> FilterResult<Option<u32>> {
    let raw = match value {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.trunc() as i64))
            .ok_or_else(|| FilterError::InvalidConfig(format!("min_short_side out of range: {n}")))?,
        Some(Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| FilterError::InvalidConfig(format!("min_short_side must be an integer, got {s:?}")))?,
        Some(other) => {
            return Err(FilterError::InvalidConfig(format!(
                "min_short_side must be an integer, got {other}"
            )));
        }
    };

    if raw <= 0 {
        return Ok(None);
    }
    u32::try_from(raw)
        .map(Some)
        .map_err(|_| FilterError::InvalidConfig(format!("min_short_side out of range: {raw}")))
}

fn de_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum IdRepr {
        Text(String),
        Number(u64),
    }

    Ok(match IdRepr::deserialize(deserializer)? {
        IdRepr::Text(s) => s,
        IdRepr::Number(n) => n.to_string(),
    })
}

fn de_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_iso_datetime(&raw).map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_iso_datetime_variants() {
        let z = parse_iso_datetime("2026-01-13T12:00:00Z").unwrap();
        let offset = parse_iso_datetime("2026-01-13T20:00:00+08:00").unwrap();
        let naive = parse_iso_datetime("2026-01-13 12:00:00").unwrap();
        assert_eq!(z, offset);
        assert_eq!(z, naive);
        assert!(parse_iso_datetime("  ").is_err());
        assert!(parse_iso_datetime("yesterday").is_err());
    }

    #[test]
    fn test_tweet_deserialization() {
        let tweet: Tweet = serde_json::from_value(json!({
            "tweet_id": 100,
            "created_at": "2026-01-10T08:00:00Z",
            "is_reply": true,
            "quoted_tweet": {
                "tweet_id": "90",
                "created_at": "2026-01-09T08:00:00Z",
                "media": [{"media_id": "m9", "kind": "video", "url": "https://v/9.mp4"}]
            },
            "media": [{"media_id": 1, "kind": "image", "url": "https://i/1.jpg", "width": 800, "height": 600}]
        }))
        .unwrap();

        assert_eq!(tweet.tweet_id, "100");
        assert_eq!(tweet.media[0].media_id, "1");
        assert_eq!(tweet.media[0].short_side(), Some(600));
        assert_eq!(tweet.quoted_tweet.as_ref().unwrap().media[0].short_side(), None);
        assert!(!tweet.is_retweet);
    }

    #[test]
    fn test_filter_config_defaults() {
        let config = FilterConfig::from_account_config(&Value::Null).unwrap();
        assert_eq!(config, FilterConfig::default());
        assert_eq!(config.source_types.len(), 4);
    }

    #[test]
    fn test_filter_config_camel_case() {
        let config = FilterConfig::from_account_config(&json!({
            "startDate": "2026-01-01",
            "endDate": "2026-01-31",
            "mediaType": "images",
            "minShortSide": 720,
            "includeQuoteMediaInReply": true,
            "sourceTypes": {"Original": true, "Reply": false, "Quote": 1}
        }))
        .unwrap();

        assert_eq!(config.start_date, NaiveDate::from_ymd_opt(2026, 1, 1));
        assert_eq!(config.end_date, NaiveDate::from_ymd_opt(2026, 1, 31));
        assert_eq!(config.media_type, MediaTypeFilter::Images);
        assert_eq!(config.min_short_side, Some(720));
        assert!(config.include_quote_media_in_reply);
        assert_eq!(
            config.source_types,
            [TweetSourceType::Original, TweetSourceType::Quote].into_iter().collect()
        );
    }

    #[test]
    fn test_filter_config_snake_case_and_list() {
        let config = FilterConfig::from_account_config(&json!({
            "media_type": "videos",
            "min_short_side": 0,
            "source_types": ["Retweet"]
        }))
        .unwrap();
        assert_eq!(config.media_type, MediaTypeFilter::Videos);
        assert_eq!(config.min_short_side, None);
        assert_eq!(config.source_types, [TweetSourceType::Retweet].into_iter().collect());
    }

    #[test]
    fn test_filter_config_rejects_garbage() {
        assert!(FilterConfig::from_account_config(&json!({"mediaType": "gifs"})).is_err());
        assert!(FilterConfig::from_account_config(&json!({"sourceTypes": ["Thread"]})).is_err());
        assert!(FilterConfig::from_account_config(&json!({"startDate": "13/01/2026"})).is_err());
        assert!(FilterConfig::from_account_config(&json!("nope")).is_err());
    }

    #[test]
    fn test_validate_inverted_range() {
        let config = FilterConfig {
            start_date: NaiveDate::from_ymd_opt(2026, 2, 1),
            end_date: NaiveDate::from_ymd_opt(2026, 1, 1),
            ..FilterConfig::default()
        };
        assert!(matches!(config.validate(), Err(FilterError::InvertedDateRange { .. })));
    }
}
