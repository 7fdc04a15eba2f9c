//! Tweet classification and filtering
//!
//! Date and source-type checks apply to the triggering tweet. Media of a
//! quoted tweet is only considered for replies that quote something, and
//! only when the account asks for it. The output order is fully
//! deterministic for a given input set.

use std::cmp::Reverse;

use super::models::{
    DownloadIntent, FilterConfig, FilterOutcome, FilterResult, MediaCandidate, MediaOrigin, Tweet,
    TweetSourceType,
};

/// Counter key for media dropped by the short-side threshold
pub const FILTER_REASON_MIN_SHORT_SIDE: &str = "min_short_side";

/// A reply always counts as a reply, even when it also quotes.
pub fn classify_tweet_source_type(tweet: &Tweet) -> TweetSourceType {
    if tweet.is_reply {
        TweetSourceType::Reply
    } else if tweet.is_retweet {
        TweetSourceType::Retweet
    } else if tweet.quoted_tweet.is_some() {
        TweetSourceType::Quote
    } else {
        TweetSourceType::Original
    }
}

pub fn is_reply_plus_quote(tweet: &Tweet) -> bool {
    tweet.is_reply && tweet.quoted_tweet.is_some()
}

fn in_date_range(tweet: &Tweet, config: &FilterConfig) -> bool {
    let date = tweet.created_at.date_naive();
    config.start_date.is_none_or(|start| date >= start) && config.end_date.is_none_or(|end| date <= end)
}

fn candidate_media<'a>(
    tweet: &'a Tweet,
    include_quoted: bool,
) -> impl Iterator<Item = (&'a MediaCandidate, MediaOrigin, &'a Tweet)> + 'a {
    let own = tweet.media.iter().map(move |m| (m, MediaOrigin::SelfPost, tweet));
    let quoted = tweet
        .quoted_tweet
        .as_deref()
        .filter(|_| include_quoted)
        .into_iter()
        .flat_map(|quoted| quoted.media.iter().map(move |m| (m, MediaOrigin::Quoted, quoted)));
    own.chain(quoted)
}

/// Turn a batch of tweets into an ordered list of download intents.
///
/// Fails only when the configured date range is inverted.
pub fn apply_filters(tweets: &[Tweet], config: &FilterConfig) -> FilterResult<FilterOutcome> {
    config.validate()?;

    let mut outcome = FilterOutcome::default();

    for tweet in tweets {
        if !in_date_range(tweet, config) {
            continue;
        }
        if !config.source_types.contains(&classify_tweet_source_type(tweet)) {
            continue;
        }

        let include_quoted = is_reply_plus_quote(tweet) && config.include_quote_media_in_reply;

        for (media, origin, owner) in candidate_media(tweet, include_quoted) {
            if !config.media_type.allows(media.kind) {
                continue;
            }

            let mut needs_post_check = false;
            if let Some(threshold) = config.min_short_side {
                match media.short_side() {
                    Some(side) if side < threshold => {
                        *outcome
                            .filtered_counts
                            .entry(FILTER_REASON_MIN_SHORT_SIDE.to_string())
                            .or_insert(0) += 1;
                        continue;
                    }
                    Some(_) => {}
                    None => needs_post_check = true,
                }
            }

            outcome.intents.push(DownloadIntent {
                media_id: media.media_id.clone(),
                kind: media.kind,
                url: media.url.clone(),
                width: media.width,
                height: media.height,
                tweet_id: owner.tweet_id.clone(),
                tweet_created_at: owner.created_at,
                trigger_tweet_id: tweet.tweet_id.clone(),
                trigger_created_at: tweet.created_at,
                origin,
                needs_post_min_short_side_check: needs_post_check,
            });
        }
    }

    outcome.intents.sort_by(|a, b| sort_key(a).cmp(&sort_key(b)));

    Ok(outcome)
}

fn sort_key(intent: &DownloadIntent) -> (Reverse<i64>, &str, u8, u8, &str, &str) {
    (
        Reverse(intent.trigger_created_at.timestamp_micros()),
        intent.trigger_tweet_id.as_str(),
        intent.origin.rank(),
        intent.kind.rank(),
        intent.tweet_id.as_str(),
        intent.media_id.as_str(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::filter_engine::models::{FilterError, MediaKind, MediaTypeFilter};
    use chrono::{NaiveDate, TimeZone, Utc};

    fn media(id: &str, kind: MediaKind, dims: Option<(u32, u32)>) -> MediaCandidate {
        MediaCandidate {
            media_id: id.to_string(),
            kind,
            url: format!("https://media.example/{id}"),
            width: dims.map(|d| d.0),
            height: dims.map(|d| d.1),
        }
    }

    fn tweet(id: &str, day: u32, hour: u32, media: Vec<MediaCandidate>) -> Tweet {
        Tweet {
            tweet_id: id.to_string(),
            created_at: Utc.with_ymd_and_hms(2026, 1, day, hour, 0, 0).unwrap(),
            is_reply: false,
            is_retweet: false,
            quoted_tweet: None,
            media,
        }
    }

    fn ids(outcome: &FilterOutcome) -> Vec<&str> {
        outcome.intents.iter().map(|i| i.media_id.as_str()).collect()
    }

    #[test]
    fn test_classification_priority() {
        let mut t = tweet("1", 1, 0, vec![]);
        assert_eq!(classify_tweet_source_type(&t), TweetSourceType::Original);

        t.quoted_tweet = Some(Box::new(tweet("0", 1, 0, vec![])));
        assert_eq!(classify_tweet_source_type(&t), TweetSourceType::Quote);

        t.is_retweet = true;
        assert_eq!(classify_tweet_source_type(&t), TweetSourceType::Retweet);

        t.is_reply = true;
        assert_eq!(classify_tweet_source_type(&t), TweetSourceType::Reply);
        assert!(is_reply_plus_quote(&t));
    }

    #[test]
    fn test_inverted_date_range_rejected() {
        let config = FilterConfig {
            start_date: NaiveDate::from_ymd_opt(2026, 1, 5),
            end_date: NaiveDate::from_ymd_opt(2026, 1, 4),
            ..FilterConfig::default()
        };
        assert!(matches!(
            apply_filters(&[], &config),
            Err(FilterError::InvertedDateRange { .. })
        ));
    }

    #[test]
    fn test_date_range_is_closed_on_utc_date() {
        let tweets = vec![
            tweet("1", 1, 23, vec![media("a", MediaKind::Image, None)]),
            tweet("2", 2, 0, vec![media("b", MediaKind::Image, None)]),
            tweet("3", 3, 12, vec![media("c", MediaKind::Image, None)]),
            tweet("4", 4, 0, vec![media("d", MediaKind::Image, None)]),
        ];
        let config = FilterConfig {
            start_date: NaiveDate::from_ymd_opt(2026, 1, 2),
            end_date: NaiveDate::from_ymd_opt(2026, 1, 3),
            ..FilterConfig::default()
        };
        let outcome = apply_filters(&tweets, &config).unwrap();
        assert_eq!(ids(&outcome), vec!["c", "b"]);
    }

    #[test]
    fn test_quoted_media_only_for_reply_plus_quote_when_enabled() {
        let quoted = tweet("50", 1, 0, vec![media("q", MediaKind::Video, None)]);

        let mut reply = tweet("60", 2, 0, vec![media("r", MediaKind::Image, None)]);
        reply.is_reply = true;
        reply.quoted_tweet = Some(Box::new(quoted.clone()));

        let mut quote = tweet("70", 3, 0, vec![media("s", MediaKind::Image, None)]);
        quote.quoted_tweet = Some(Box::new(quoted));

        let tweets = vec![reply, quote];

        let off = apply_filters(&tweets, &FilterConfig::default()).unwrap();
        assert_eq!(ids(&off), vec!["s", "r"]);

        let config = FilterConfig {
            include_quote_media_in_reply: true,
            ..FilterConfig::default()
        };
        let on = apply_filters(&tweets, &config).unwrap();
        assert_eq!(ids(&on), vec!["s", "r", "q"]);

        let quoted_intent = &on.intents[2];
        assert_eq!(quoted_intent.origin, MediaOrigin::Quoted);
        assert_eq!(quoted_intent.tweet_id, "50");
        assert_eq!(quoted_intent.trigger_tweet_id, "60");
        assert_eq!(quoted_intent.trigger_created_at, on.intents[1].trigger_created_at);
    }

    #[test]
    fn test_source_type_and_media_kind_filters() {
        let mut rt = tweet("1", 1, 0, vec![media("rt-img", MediaKind::Image, None)]);
        rt.is_retweet = true;
        let original = tweet(
            "2",
            2,
            0,
            vec![media("img", MediaKind::Image, None), media("vid", MediaKind::Video, None)],
        );

        let config = FilterConfig {
            source_types: [TweetSourceType::Original].into_iter().collect(),
            media_type: MediaTypeFilter::Videos,
            ..FilterConfig::default()
        };
        let outcome = apply_filters(&[rt, original], &config).unwrap();
        assert_eq!(ids(&outcome), vec!["vid"]);
    }

    #[test]
    fn test_min_short_side() {
        let t = tweet(
            "1",
            1,
            0,
            vec![
                media("small", MediaKind::Image, Some((1920, 400))),
                media("large", MediaKind::Image, Some((1080, 1920))),
                media("unknown", MediaKind::Video, None),
            ],
        );
        let config = FilterConfig {
            min_short_side: Some(720),
            ..FilterConfig::default()
        };
        let outcome = apply_filters(&[t], &config).unwrap();

        assert_eq!(ids(&outcome), vec!["large", "unknown"]);
        assert_eq!(outcome.filtered_counts.get(FILTER_REASON_MIN_SHORT_SIDE), Some(&1));
        assert!(!outcome.intents[0].needs_post_min_short_side_check);
        assert!(outcome.intents[1].needs_post_min_short_side_check);
    }

    #[test]
    fn test_ordering_is_deterministic() {
        let a = tweet(
            "10",
            5,
            0,
            vec![media("v1", MediaKind::Video, None), media("i2", MediaKind::Image, None), media("i1", MediaKind::Image, None)],
        );
        let b = tweet("9", 5, 0, vec![media("x", MediaKind::Image, None)]);
        let newest = tweet("1", 6, 0, vec![media("n", MediaKind::Video, None)]);

        let forward = apply_filters(&[a.clone(), b.clone(), newest.clone()], &FilterConfig::default()).unwrap();
        let reversed = apply_filters(&[newest, b, a], &FilterConfig::default()).unwrap();

        // "10" sorts before "9" as a string
        assert_eq!(ids(&forward), vec!["n", "i1", "i2", "v1", "x"]);
        assert_eq!(forward, reversed);
    }
}
