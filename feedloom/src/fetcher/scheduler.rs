//! Periodic batch orchestration: decides when feeds are fetched and
//! pushes them through the rate limiter, fetcher and status manager.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::FetcherConfig;
use tokio::sync::watch;
use tokio::time::Instant;

use super::fetch::FeedFetcher;
use super::rate_limit::RateLimiter;
use super::repository::FeedRepository;
use super::status::FeedStatusManager;
use super::worker_pool::WorkerPool;
use crate::storage::Feed;

/// The per-feed pipeline shared by batch runs and immediate fetches.
/// Wait for the host slot, fetch, persist, all under one job timeout.
pub struct FetchPipeline {
    rate_limiter: Arc<RateLimiter>,
    fetcher: FeedFetcher,
    status_manager: FeedStatusManager,
    job_timeout: Duration,
}

impl FetchPipeline {
    pub fn new(
        rate_limiter: Arc<RateLimiter>,
        fetcher: FeedFetcher,
        status_manager: FeedStatusManager,
        job_timeout: Duration,
    ) -> Self {
        Self {
            rate_limiter,
            fetcher,
            status_manager,
            job_timeout,
        }
    }

    /// Processes one feed. The timeout covers the whole job including
    /// rate-limit waiting, so a stalled host cannot pin a worker.
    pub async fn process(&self, feed: Feed) {
        tracing::debug!(feed_id = %feed.id, url = %feed.url, "processing feed");

        let work = async {
            self.rate_limiter.wait(&feed.url).await;
            let decision = self.fetcher.fetch(&feed, Utc::now()).await;
            if let Err(err) = self.status_manager.apply(&feed, decision).await {
                tracing::error!(
                    feed_id = %feed.id,
                    error = %format!("{:#}", err),
                    "failed to apply fetch decision"
                );
            }
        };

        if tokio::time::timeout(self.job_timeout, work).await.is_err() {
            tracing::warn!(feed_id = %feed.id, url = %feed.url, "feed job timed out");
        }
    }
}

pub struct Scheduler {
    repo: Arc<dyn FeedRepository>,
    worker_pool: Arc<WorkerPool>,
    rate_limiter: Arc<RateLimiter>,
    pipeline: Arc<FetchPipeline>,
    config: FetcherConfig,
    shutdown: watch::Receiver<bool>,
}

impl Scheduler {
    pub fn new(
        repo: Arc<dyn FeedRepository>,
        worker_pool: WorkerPool,
        rate_limiter: Arc<RateLimiter>,
        pipeline: Arc<FetchPipeline>,
        config: FetcherConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            repo,
            worker_pool: Arc::new(worker_pool),
            rate_limiter,
            pipeline,
            config,
            shutdown,
        }
    }

    /// Main loop. Runs a batch immediately, then every `fetch_interval`
    /// until shutdown is requested.
    pub async fn run(self) {
        tracing::info!(
            fetch_interval_seconds = self.config.fetch_interval_seconds,
            worker_count = self.config.worker_count,
            domain_delay_seconds = self.config.domain_delay_seconds,
            "starting feed scheduler"
        );

        let mut ticker = tokio::time::interval(self.config.fetch_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut shutdown = self.shutdown.clone();

        loop {
            tokio::select! {
                _ = ticker.tick() => self.process_batch().await,
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!("feed scheduler shutting down");
                        return;
                    }
                }
            }
        }
    }

    /// Fetches every feed currently due, up to the batch size.
    pub async fn process_batch(&self) {
        tracing::info!("starting feed batch");

        // Hosts not seen for two delay windows can be forgotten.
        if let Some(cutoff) = Instant::now().checked_sub(2 * self.config.domain_delay()) {
            self.rate_limiter.clean(cutoff).await;
        }

        let feeds = match self
            .repo
            .find_feeds_due(Utc::now(), self.config.batch_size)
            .await
        {
            Ok(feeds) => feeds,
            Err(err) => {
                tracing::error!(error = %format!("{:#}", err), "failed to find feeds due for fetch");
                return;
            }
        };

        if feeds.is_empty() {
            tracing::info!("no feeds due for fetch");
            return;
        }

        let count = feeds.len();
        tracing::info!(count, "processing feeds");
        self.dispatch(feeds).await;
        tracing::info!(processed = count, "feed batch completed");
    }

    /// Kicks off an immediate fetch for one feed without blocking the
    /// caller. The job still goes through the worker pool and pipeline,
    /// so concurrency and politeness limits hold; the returned handle
    /// resolves when the fetch has been applied.
    pub fn fetch_now(&self, feed_id: &str) -> tokio::task::JoinHandle<()> {
        tracing::info!(feed_id, "immediate fetch requested");

        let repo = self.repo.clone();
        let worker_pool = self.worker_pool.clone();
        let pipeline = self.pipeline.clone();
        let shutdown = self.shutdown.clone();
        let feed_id = feed_id.to_owned();

        tokio::spawn(async move {
            let feed = match repo.find_feed_by_id(&feed_id).await {
                Ok(feed) => feed,
                Err(err) => {
                    tracing::error!(feed_id = %feed_id, error = %format!("{:#}", err), "failed to find feed for immediate fetch");
                    return;
                }
            };

            worker_pool
                .process(vec![feed], &shutdown, move |feed| {
                    let pipeline = pipeline.clone();
                    async move { pipeline.process(feed).await }
                })
                .await;
        })
    }

    async fn dispatch(&self, feeds: Vec<Feed>) {
        let pipeline = self.pipeline.clone();
        self.worker_pool
            .process(feeds, &self.shutdown, move |feed| {
                let pipeline = pipeline.clone();
                async move { pipeline.process(feed).await }
            })
            .await;
    }
}
