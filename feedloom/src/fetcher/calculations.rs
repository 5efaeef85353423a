//! Pure scheduling and transformation helpers: backoff schedule,
//! `Cache-Control` / `Retry-After` parsing and feed-item mapping.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::time::Duration;

use super::models::Article;

/// First backoff step; doubles per retry.
const BACKOFF_BASE_MINUTES: i64 = 15;
/// Exponent saturates here so the schedule stays bounded.
const BACKOFF_MAX_EXPONENT: i64 = 5;
/// Hard cap on the backoff delay.
const BACKOFF_CAP_MINUTES: i64 = 360;

/// Next fetch time after a successful (200/304) response: the larger of
/// our own minimum interval and the server's `Cache-Control: max-age`.
pub fn calculate_next_fetch(
    cache_control: Option<&str>,
    success_interval: Duration,
    now: DateTime<Utc>,
) -> DateTime<Utc> {
    let server_interval = cache_control.and_then(parse_cache_control_max_age);

    let interval = match server_interval {
        Some(server) if server > success_interval => server,
        _ => success_interval,
    };

    now + ChronoDuration::from_std(interval).unwrap_or_else(|_| ChronoDuration::seconds(0))
}

/// Extracts the `max-age` directive from a `Cache-Control` header.
/// Malformed directives are ignored.
fn parse_cache_control_max_age(cache_control: &str) -> Option<Duration> {
    for part in cache_control.split(',') {
        let part = part.trim();
        if let Some(rest) = part.strip_prefix("max-age=") {
            if let Ok(seconds) = rest.parse::<u64>() {
                return Some(Duration::from_secs(seconds));
            }
        }
    }
    None
}

/// Exponential backoff for transient failures:
/// 15 min doubling per retry, capped at 6 hours.
pub fn calculate_backoff(retry_count: i64, now: DateTime<Utc>) -> DateTime<Utc> {
    let exponent = retry_count.clamp(0, BACKOFF_MAX_EXPONENT) as u32;
    let minutes = (BACKOFF_BASE_MINUTES << exponent).min(BACKOFF_CAP_MINUTES);
    now + ChronoDuration::minutes(minutes)
}

/// Resolves a `Retry-After` header to a next fetch time: integer seconds
/// first, then an HTTP-date, otherwise the backoff schedule.
pub fn parse_retry_after(
    retry_after: Option<&str>,
    retry_count: i64,
    now: DateTime<Utc>,
) -> DateTime<Utc> {
    let Some(retry_after) = retry_after.map(str::trim).filter(|v| !v.is_empty()) else {
        return calculate_backoff(retry_count, now);
    };

    if let Ok(seconds) = retry_after.parse::<i64>() {
        if seconds >= 0 {
            return now + ChronoDuration::seconds(seconds);
        }
        return calculate_backoff(retry_count, now);
    }

    // RFC 1123 dates are a subset of the RFC 2822 grammar chrono accepts
    if let Ok(parsed) = DateTime::parse_from_rfc2822(retry_after) {
        return parsed.with_timezone(&Utc);
    }

    calculate_backoff(retry_count, now)
}

/// Maps parsed feed entries to articles, preserving order.
///
/// Items without a title or link are dropped. Published time falls back
/// from `published` to `updated` to the fetch time; content prefers the
/// item description (summary) over the full content body.
pub fn transform_entries(entries: Vec<feed_rs::model::Entry>, now: DateTime<Utc>) -> Vec<Article> {
    entries
        .into_iter()
        .filter_map(|entry| {
            let title = entry
                .title
                .map(|t| t.content)
                .filter(|t| !t.is_empty())?;
            let url = entry
                .links
                .first()
                .map(|l| l.href.clone())
                .filter(|u| !u.is_empty())?;

            let published_at = entry.published.or(entry.updated).unwrap_or(now);

            let content = entry
                .summary
                .map(|s| s.content)
                .filter(|c| !c.is_empty())
                .or_else(|| entry.content.and_then(|c| c.body))
                .filter(|c| !c.is_empty());

            Some(Article {
                title,
                url,
                content,
                published_at,
            })
        })
        .collect()
}
