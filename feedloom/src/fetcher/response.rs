//! Maps an HTTP response to a `FetchDecision`.
//!
//! This is the protocol state table: every status code a feed origin can
//! return is folded into one of the five outcomes. Redirects are emitted
//! as decisions and resolved by the fetch walk, never followed here.

use chrono::{DateTime, Utc};
use std::time::Duration;

use super::calculations::{calculate_next_fetch, parse_retry_after, transform_entries};
use super::client::FeedResponse;
use super::models::FetchDecision;

/// Statuses are interpreted relative to the feed's current retry count
/// (for backoff) and the reader's minimum success interval.
pub struct ResponseInterpreter {
    success_interval: Duration,
    max_articles: usize,
}

impl ResponseInterpreter {
    pub fn new(success_interval: Duration, max_articles: usize) -> Self {
        Self {
            success_interval,
            max_articles,
        }
    }

    pub fn interpret(
        &self,
        response: &FeedResponse,
        retry_count: i64,
        now: DateTime<Utc>,
    ) -> FetchDecision {
        let status = response.status.as_u16();
        tracing::debug!(status, "received HTTP response");

        match status {
            200 => self.on_success(response, now),
            304 => self.on_not_modified(response, now),
            301 | 302 | 303 | 307 | 308 => on_redirect(response),
            401 | 403 => FetchDecision::unauthorized(format!(
                "Authorization required (HTTP {})",
                status
            )),
            429 => {
                let next = parse_retry_after(response.header("retry-after"), retry_count, now);
                FetchDecision::temporary_error("Rate limited by server (HTTP 429)", next)
            }
            404 | 410 => {
                FetchDecision::permanent_error(format!("Feed not found (HTTP {})", status))
            }
            400..=499 => {
                FetchDecision::permanent_error(format!("Client error (HTTP {})", status))
            }
            500..=599 => {
                let next = parse_retry_after(response.header("retry-after"), retry_count, now);
                FetchDecision::temporary_error(format!("Server error (HTTP {})", status), next)
            }
            _ => {
                // 1xx and stray 2xx/3xx: nothing protocol-correct to do,
                // retry like a server error
                tracing::warn!(status, "unexpected HTTP status");
                let next = parse_retry_after(response.header("retry-after"), retry_count, now);
                FetchDecision::temporary_error(format!("Unexpected HTTP status: {}", status), next)
            }
        }
    }

    fn on_success(&self, response: &FeedResponse, now: DateTime<Utc>) -> FetchDecision {
        let etag = response.header("etag").map(str::to_owned);
        let last_modified = response.header("last-modified").map(str::to_owned);

        let parsed = match feed_rs::parser::parse(response.body.as_slice()) {
            Ok(feed) => feed,
            Err(err) => {
                tracing::warn!(error = %err, "failed to parse feed body");
                return FetchDecision::permanent_error(format!("Failed to parse feed: {}", err));
            }
        };

        let mut articles = transform_entries(parsed.entries, now);
        if articles.len() > self.max_articles {
            tracing::warn!(
                total = articles.len(),
                limit = self.max_articles,
                "feed has too many articles, truncating"
            );
            articles.truncate(self.max_articles);
        }

        let next = calculate_next_fetch(response.header("cache-control"), self.success_interval, now);

        FetchDecision::success(next, etag, last_modified, articles)
    }

    fn on_not_modified(&self, response: &FeedResponse, now: DateTime<Utc>) -> FetchDecision {
        tracing::debug!("feed not modified");
        let next = calculate_next_fetch(response.header("cache-control"), self.success_interval, now);
        FetchDecision::success(next, None, None, Vec::new())
    }
}

fn on_redirect(response: &FeedResponse) -> FetchDecision {
    match response.header("location").filter(|l| !l.is_empty()) {
        Some(location) => FetchDecision::redirect(location.to_owned()),
        None => {
            tracing::warn!(status = %response.status, "redirect without Location header");
            FetchDecision::permanent_error("Redirect without Location header")
        }
    }
}
