//! Per-host politeness delay shared by all fetch workers.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use url::Url;

/// Enforces a minimum delay between requests to the same host. Cheap to
/// share behind an `Arc`; all workers funnel through the same map.
pub struct RateLimiter {
    host_last_request: Mutex<HashMap<String, Instant>>,
    host_delay: Duration,
}

impl RateLimiter {
    pub fn new(host_delay: Duration) -> Self {
        Self {
            host_last_request: Mutex::new(HashMap::new()),
            host_delay,
        }
    }

    /// Blocks until `host_delay` has passed since the last request to the
    /// URL's host, then claims the slot. URLs that do not parse are
    /// passed through without limiting so the fetch path can record a
    /// proper permanent error for them.
    pub async fn wait(&self, feed_url: &str) {
        let host = match Url::parse(feed_url) {
            Ok(url) => match url.host_str() {
                Some(host) => host.to_owned(),
                None => return,
            },
            Err(_) => return,
        };

        loop {
            let wait_for = {
                let mut map = self.host_last_request.lock().await;
                match map.get(&host) {
                    Some(last) => {
                        let elapsed = last.elapsed();
                        if elapsed >= self.host_delay {
                            map.insert(host.clone(), Instant::now());
                            return;
                        }
                        self.host_delay - elapsed
                    }
                    None => {
                        map.insert(host.clone(), Instant::now());
                        return;
                    }
                }
            };
            // Sleep outside the lock, then recheck: another worker may
            // have claimed the slot in the meantime.
            tokio::time::sleep(wait_for).await;
        }
    }

    /// Drops hosts whose last request is older than `cutoff`. Keeps the
    /// map from growing without bound across long runs.
    pub async fn clean(&self, cutoff: Instant) {
        let mut map = self.host_last_request.lock().await;
        map.retain(|_, last| *last >= cutoff);
    }

    pub async fn tracked_hosts(&self) -> usize {
        self.host_last_request.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn first_request_passes_immediately() {
        let limiter = RateLimiter::new(Duration::from_secs(3));
        let before = Instant::now();
        limiter.wait("https://a.test/feed").await;
        assert_eq!(Instant::now(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn second_request_to_same_host_waits_out_the_delay() {
        let limiter = RateLimiter::new(Duration::from_secs(3));
        limiter.wait("https://a.test/feed").await;

        let before = Instant::now();
        limiter.wait("https://a.test/other").await;
        assert_eq!(Instant::now() - before, Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn different_hosts_do_not_block_each_other() {
        let limiter = RateLimiter::new(Duration::from_secs(3));
        limiter.wait("https://a.test/feed").await;

        let before = Instant::now();
        limiter.wait("https://b.test/feed").await;
        assert_eq!(Instant::now(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_waiters_are_serialized() {
        let limiter = Arc::new(RateLimiter::new(Duration::from_secs(3)));
        let before = Instant::now();

        let mut handles = Vec::new();
        for _ in 0..3 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                limiter.wait("https://a.test/feed").await;
                Instant::now() - before
            }));
        }

        let mut elapsed: Vec<Duration> = Vec::new();
        for handle in handles {
            elapsed.push(handle.await.unwrap());
        }
        elapsed.sort();

        assert_eq!(elapsed[0], Duration::from_secs(0));
        assert_eq!(elapsed[1], Duration::from_secs(3));
        assert_eq!(elapsed[2], Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn unparseable_urls_pass_through() {
        let limiter = RateLimiter::new(Duration::from_secs(3));
        let before = Instant::now();
        limiter.wait("::not a url::").await;
        limiter.wait("::not a url::").await;
        assert_eq!(Instant::now(), before);
        assert_eq!(limiter.tracked_hosts().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn clean_drops_stale_hosts_only() {
        let limiter = RateLimiter::new(Duration::from_secs(3));
        limiter.wait("https://old.test/feed").await;
        tokio::time::advance(Duration::from_secs(600)).await;
        limiter.wait("https://fresh.test/feed").await;

        limiter
            .clean(Instant::now() - Duration::from_secs(300))
            .await;
        assert_eq!(limiter.tracked_hosts().await, 1);
    }
}
