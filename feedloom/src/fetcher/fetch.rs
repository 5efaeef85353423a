//! Drives a single feed fetch end to end: request, redirect walk,
//! response interpretation.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use url::Url;

use super::calculations::calculate_backoff;
use super::client::{is_ssrf_error, Transport};
use super::models::{FetchDecision, FetchStatus};
use super::response::ResponseInterpreter;
use crate::storage::Feed;

/// Redirect chains longer than this are abandoned as broken.
const MAX_REDIRECTS: u32 = 10;

/// After this many consecutive transport failures a feed is written off.
const MAX_RETRY_COUNT: i64 = 10;

pub struct FeedFetcher {
    transport: Arc<dyn Transport>,
    interpreter: ResponseInterpreter,
}

impl FeedFetcher {
    pub fn new(transport: Arc<dyn Transport>, interpreter: ResponseInterpreter) -> Self {
        Self {
            transport,
            interpreter,
        }
    }

    /// Fetches `feed` once, following redirects manually with loop
    /// detection. Never returns a `Redirect` decision to the caller:
    /// redirects are either resolved to a terminal outcome or fail the
    /// fetch. When the walk crossed a permanent redirect, `new_url`
    /// carries the final destination so the stored URL can be rewritten.
    pub async fn fetch(&self, feed: &Feed, now: DateTime<Utc>) -> FetchDecision {
        let mut base = match Url::parse(&feed.url) {
            Ok(url) => url,
            Err(err) => {
                tracing::error!(feed_id = %feed.id, url = %feed.url, error = %err, "invalid feed URL");
                return FetchDecision::permanent_error("Invalid feed URL");
            }
        };

        let mut current_url = feed.url.clone();
        let mut visited: HashSet<String> = HashSet::new();
        let mut redirect_count: u32 = 0;
        let mut saw_permanent_redirect = false;

        loop {
            if redirect_count >= MAX_REDIRECTS {
                tracing::error!(feed_id = %feed.id, count = redirect_count, "too many redirects");
                return FetchDecision::permanent_error(format!(
                    "Too many redirects (stopped after {})",
                    MAX_REDIRECTS
                ));
            }
            if !visited.insert(current_url.clone()) {
                tracing::error!(feed_id = %feed.id, url = %current_url, "redirect loop detected");
                return FetchDecision::permanent_error("Redirect loop detected");
            }

            // Validators belong to the original URL only. Sending them to
            // a redirect target could yield a bogus 304 from a different
            // resource.
            let (etag, last_modified) = if redirect_count == 0 {
                (feed.etag.as_deref(), feed.last_modified.as_deref())
            } else {
                (None, None)
            };

            let response = match self.transport.execute(&current_url, etag, last_modified).await {
                Ok(response) => response,
                Err(err) => return self.on_transport_error(feed, &current_url, &err, now),
            };
            let http_status = response.status;

            let mut decision = self.interpreter.interpret(&response, feed.retry_count, now);

            if decision.status == FetchStatus::Redirect {
                if let Some(location) = decision.new_url.take() {
                    let target = match base.join(&location) {
                        Ok(url) => url,
                        Err(err) => {
                            tracing::error!(
                                feed_id = %feed.id,
                                location = %location,
                                error = %err,
                                "invalid redirect URL"
                            );
                            return FetchDecision::permanent_error(format!(
                                "Invalid redirect URL: {}",
                                err
                            ));
                        }
                    };

                    if http_status == StatusCode::MOVED_PERMANENTLY
                        || http_status == StatusCode::PERMANENT_REDIRECT
                    {
                        saw_permanent_redirect = true;
                    }

                    tracing::debug!(
                        from = %current_url,
                        to = %target,
                        count = redirect_count + 1,
                        "following redirect"
                    );

                    current_url = target.to_string();
                    base = target;
                    redirect_count += 1;
                    continue;
                }
            }

            if saw_permanent_redirect {
                decision.new_url = Some(current_url);
            }
            return decision;
        }
    }

    fn on_transport_error(
        &self,
        feed: &Feed,
        url: &str,
        err: &anyhow::Error,
        now: DateTime<Utc>,
    ) -> FetchDecision {
        let message = format!("{:#}", err);
        tracing::error!(feed_id = %feed.id, url, error = %message, "HTTP request failed");

        if is_ssrf_error(err) {
            return FetchDecision::permanent_error(message);
        }

        let retry_count = feed.retry_count + 1;
        if retry_count >= MAX_RETRY_COUNT {
            tracing::warn!(feed_id = %feed.id, retry_count, "feed reached max retry count");
            return FetchDecision::permanent_error(message);
        }
        FetchDecision::temporary_error(message, calculate_backoff(retry_count, now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::client::{FeedResponse, SSRF_SENTINEL};
    use anyhow::anyhow;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq)]
    struct RecordedRequest {
        url: String,
        etag: Option<String>,
        last_modified: Option<String>,
    }

    /// Replays a scripted sequence of responses and records each request.
    struct ScriptedTransport {
        responses: Mutex<VecDeque<anyhow::Result<FeedResponse>>>,
        requests: Mutex<Vec<RecordedRequest>>,
    }

    impl ScriptedTransport {
        fn new(responses: Vec<anyhow::Result<FeedResponse>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn requests(&self) -> Vec<RecordedRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn execute(
            &self,
            url: &str,
            etag: Option<&str>,
            last_modified: Option<&str>,
        ) -> anyhow::Result<FeedResponse> {
            self.requests.lock().unwrap().push(RecordedRequest {
                url: url.to_owned(),
                etag: etag.map(str::to_owned),
                last_modified: last_modified.map(str::to_owned),
            });
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(anyhow!("script exhausted")))
        }
    }

    fn response(status: u16, headers: &[(&str, &str)], body: &str) -> FeedResponse {
        let mut map = HeaderMap::new();
        for (name, value) in headers {
            map.insert(
                name.parse::<HeaderName>().unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        FeedResponse {
            status: StatusCode::from_u16(status).unwrap(),
            headers: map,
            body: body.as_bytes().to_vec(),
        }
    }

    const SAMPLE_RSS: &str = r#"<?xml version="1.0"?>
        <rss version="2.0"><channel>
            <title>s</title><link>https://a.test</link><description>s</description>
            <item><title>one</title><link>https://a.test/1</link></item>
        </channel></rss>"#;

    fn feed(url: &str) -> Feed {
        Feed {
            id: "feed-1".into(),
            user_id: "user-1".into(),
            url: url.into(),
            etag: Some("\"v1\"".into()),
            last_modified: Some("Mon, 01 Jan 2024 00:00:00 GMT".into()),
            fetch_after: None,
            last_fetched_at: None,
            retry_count: 0,
            last_fetch_status: None,
            last_fetch_error: None,
            created_at: "2024-01-01T00:00:00Z".into(),
            updated_at: "2024-01-01T00:00:00Z".into(),
        }
    }

    fn fetcher(transport: Arc<dyn Transport>) -> FeedFetcher {
        FeedFetcher::new(
            transport,
            ResponseInterpreter::new(Duration::from_secs(3600), 100),
        )
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn invalid_url_is_permanent_without_a_request() {
        let transport = Arc::new(ScriptedTransport::new(vec![]));
        let decision = fetcher(transport.clone()).fetch(&feed("::not a url::"), now()).await;

        assert_eq!(decision.status, FetchStatus::PermanentError);
        assert_eq!(decision.error_message.as_deref(), Some("Invalid feed URL"));
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn validators_are_sent_only_on_the_first_hop() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Ok(response(302, &[("location", "https://b.test/feed")], "")),
            Ok(response(200, &[], SAMPLE_RSS)),
        ]));
        let decision = fetcher(transport.clone())
            .fetch(&feed("https://a.test/feed"), now())
            .await;

        assert_eq!(decision.status, FetchStatus::Success);
        // temporary redirect only, stored URL stays
        assert_eq!(decision.new_url, None);

        let requests = transport.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].etag.as_deref(), Some("\"v1\""));
        assert_eq!(requests[1].url, "https://b.test/feed");
        assert_eq!(requests[1].etag, None);
        assert_eq!(requests[1].last_modified, None);
    }

    #[tokio::test]
    async fn relative_locations_resolve_against_the_current_url() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Ok(response(302, &[("location", "/moved/feed.xml")], "")),
            Ok(response(200, &[], SAMPLE_RSS)),
        ]));
        let decision = fetcher(transport.clone())
            .fetch(&feed("https://a.test/old/feed.xml"), now())
            .await;

        assert_eq!(decision.status, FetchStatus::Success);
        assert_eq!(transport.requests()[1].url, "https://a.test/moved/feed.xml");
    }

    #[tokio::test]
    async fn permanent_redirect_reports_the_final_destination() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Ok(response(301, &[("location", "https://b.test/feed")], "")),
            Ok(response(302, &[("location", "https://c.test/feed")], "")),
            Ok(response(200, &[], SAMPLE_RSS)),
        ]));
        let decision = fetcher(transport)
            .fetch(&feed("https://a.test/feed"), now())
            .await;

        assert_eq!(decision.status, FetchStatus::Success);
        assert_eq!(decision.new_url.as_deref(), Some("https://c.test/feed"));
    }

    #[tokio::test]
    async fn redirect_loop_is_detected() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Ok(response(302, &[("location", "https://b.test/feed")], "")),
            Ok(response(302, &[("location", "https://a.test/feed")], "")),
        ]));
        let decision = fetcher(transport)
            .fetch(&feed("https://a.test/feed"), now())
            .await;

        assert_eq!(decision.status, FetchStatus::PermanentError);
        assert_eq!(
            decision.error_message.as_deref(),
            Some("Redirect loop detected")
        );
    }

    #[tokio::test]
    async fn long_redirect_chains_are_abandoned() {
        let responses = (0..10)
            .map(|i| {
                Ok(response(
                    302,
                    &[("location", format!("https://a.test/hop/{}", i).as_str())],
                    "",
                ))
            })
            .collect();
        let transport = Arc::new(ScriptedTransport::new(responses));
        let decision = fetcher(transport.clone())
            .fetch(&feed("https://a.test/feed"), now())
            .await;

        assert_eq!(decision.status, FetchStatus::PermanentError);
        assert_eq!(
            decision.error_message.as_deref(),
            Some("Too many redirects (stopped after 10)")
        );
        assert_eq!(transport.requests().len(), 10);
    }

    #[tokio::test]
    async fn ssrf_rejection_is_permanent() {
        let transport = Arc::new(ScriptedTransport::new(vec![Err(anyhow!(
            "{} for 127.0.0.1: access to localhost is forbidden",
            SSRF_SENTINEL
        ))]));
        let decision = fetcher(transport)
            .fetch(&feed("https://a.test/feed"), now())
            .await;

        assert_eq!(decision.status, FetchStatus::PermanentError);
        assert!(decision
            .error_message
            .as_deref()
            .unwrap()
            .contains(SSRF_SENTINEL));
        assert_eq!(decision.next_fetch_time, None);
    }

    #[tokio::test]
    async fn transport_errors_back_off_with_the_next_retry_count() {
        let transport = Arc::new(ScriptedTransport::new(vec![Err(anyhow!(
            "connection refused"
        ))]));
        let mut f = feed("https://a.test/feed");
        f.retry_count = 1;
        let decision = fetcher(transport).fetch(&f, now()).await;

        assert_eq!(decision.status, FetchStatus::TemporaryError);
        // backoff for retry count 2: 15 * 2^2 minutes
        assert_eq!(
            decision.next_fetch_time,
            Some(now() + chrono::Duration::minutes(60))
        );
    }

    #[tokio::test]
    async fn transport_errors_become_permanent_at_the_retry_ceiling() {
        let transport = Arc::new(ScriptedTransport::new(vec![Err(anyhow!(
            "connection refused"
        ))]));
        let mut f = feed("https://a.test/feed");
        f.retry_count = 9;
        let decision = fetcher(transport).fetch(&f, now()).await;

        assert_eq!(decision.status, FetchStatus::PermanentError);
        assert_eq!(decision.next_fetch_time, None);
    }
}
