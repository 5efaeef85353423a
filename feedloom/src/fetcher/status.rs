//! Persists the outcome of a fetch attempt.

use anyhow::{Context, Result};
use chrono::Utc;
use std::sync::Arc;

use super::models::{Article, FetchDecision, FetchStatus};
use super::repository::FeedRepository;
use crate::storage::{rfc3339, Feed, FeedUpdate, NewArticle};

pub struct FeedStatusManager {
    repo: Arc<dyn FeedRepository>,
}

impl FeedStatusManager {
    pub fn new(repo: Arc<dyn FeedRepository>) -> Self {
        Self { repo }
    }

    /// Writes a decision back to the store. Articles are saved first but
    /// their failure never blocks the status update: losing one batch of
    /// articles is recoverable, losing scheduling state is not.
    pub async fn apply(&self, feed: &Feed, decision: FetchDecision) -> Result<()> {
        if decision.status == FetchStatus::Redirect {
            // The fetch walk resolves redirects before returning; seeing
            // one here means a bug upstream. Record it as-is.
            tracing::warn!(feed_id = %feed.id, "unresolved redirect decision reached the store");
        }

        if !decision.articles.is_empty() {
            if let Err(err) = self.save_articles(&feed.id, &decision.articles).await {
                tracing::error!(feed_id = %feed.id, error = %format!("{:#}", err), "failed to save articles");
            }
        }

        let retry_count = match decision.status {
            FetchStatus::Success => Some(0),
            FetchStatus::TemporaryError => Some(feed.retry_count + 1),
            _ => None,
        };

        let update = FeedUpdate {
            last_fetch_status: decision.status.as_str().to_owned(),
            last_fetch_error: decision.error_message,
            last_fetched_at: rfc3339(Utc::now()),
            url: decision.new_url,
            etag: decision.etag,
            last_modified: decision.last_modified,
            fetch_after: decision.next_fetch_time.map(rfc3339),
            retry_count,
        };

        self.repo
            .update_feed_after_fetch(&feed.id, update)
            .await
            .context("failed to update feed status")
    }

    async fn save_articles(&self, feed_id: &str, articles: &[Article]) -> Result<()> {
        tracing::info!(feed_id, count = articles.len(), "saving articles");

        let rows: Vec<NewArticle> = articles
            .iter()
            .map(|article| NewArticle {
                feed_id: feed_id.to_owned(),
                title: article.title.clone(),
                url: article.url.clone(),
                content: article.content.clone(),
                published_at: rfc3339(article.published_at),
            })
            .collect();

        self.repo
            .insert_articles(&rows)
            .await
            .context("failed to insert articles")
    }
}
