//! Data access for the fetch pipeline.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use uuid::Uuid;

use crate::storage::{rfc3339, Feed, FeedUpdate, NewArticle};

/// Everything the scheduler and status manager need from the store.
/// A trait so the pipeline can be tested against a scripted store.
#[async_trait]
pub trait FeedRepository: Send + Sync {
    /// Feeds whose `fetch_after` is unset or in the past, least recently
    /// fetched first (never-fetched feeds sort ahead of everything).
    async fn find_feeds_due(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Feed>>;

    async fn find_feed_by_id(&self, feed_id: &str) -> Result<Feed>;

    /// Applies a partial update to one feed row. Errors if the feed no
    /// longer exists (deleted mid-fetch).
    async fn update_feed_after_fetch(&self, feed_id: &str, update: FeedUpdate) -> Result<()>;

    /// Bulk-inserts articles, silently skipping rows that collide with
    /// an existing `(feed_id, url)` pair.
    async fn insert_articles(&self, articles: &[NewArticle]) -> Result<()>;
}

pub struct SqliteFeedRepository {
    pool: SqlitePool,
}

impl SqliteFeedRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FeedRepository for SqliteFeedRepository {
    async fn find_feeds_due(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Feed>> {
        // RFC3339 strings compare chronologically, and ASC puts NULL
        // last_fetched_at (never fetched) first.
        let feeds = sqlx::query_as::<_, Feed>(
            r#"
            SELECT * FROM feeds
            WHERE fetch_after IS NULL OR fetch_after <= ?
            ORDER BY last_fetched_at ASC
            LIMIT ?
            "#,
        )
        .bind(rfc3339(now))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("failed to find feeds due for fetch")?;

        Ok(feeds)
    }

    async fn find_feed_by_id(&self, feed_id: &str) -> Result<Feed> {
        let feed = sqlx::query_as::<_, Feed>("SELECT * FROM feeds WHERE id = ?")
            .bind(feed_id)
            .fetch_optional(&self.pool)
            .await
            .context("failed to find feed by id")?;

        match feed {
            Some(feed) => Ok(feed),
            None => bail!("feed not found: {}", feed_id),
        }
    }

    async fn update_feed_after_fetch(&self, feed_id: &str, update: FeedUpdate) -> Result<()> {
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("UPDATE feeds SET last_fetch_status = ");
        builder.push_bind(&update.last_fetch_status);
        builder.push(", last_fetch_error = ");
        builder.push_bind(&update.last_fetch_error);
        builder.push(", last_fetched_at = ");
        builder.push_bind(&update.last_fetched_at);
        builder.push(", updated_at = ");
        builder.push_bind(&update.last_fetched_at);

        if let Some(url) = &update.url {
            builder.push(", url = ");
            builder.push_bind(url);
        }
        if let Some(etag) = &update.etag {
            builder.push(", etag = ");
            builder.push_bind(etag);
        }
        if let Some(last_modified) = &update.last_modified {
            builder.push(", last_modified = ");
            builder.push_bind(last_modified);
        }
        if let Some(fetch_after) = &update.fetch_after {
            builder.push(", fetch_after = ");
            builder.push_bind(fetch_after);
        }
        if let Some(retry_count) = update.retry_count {
            builder.push(", retry_count = ");
            builder.push_bind(retry_count);
        }

        builder.push(" WHERE id = ");
        builder.push_bind(feed_id);

        let result = builder
            .build()
            .execute(&self.pool)
            .await
            .context("failed to update feed after fetch")?;

        if result.rows_affected() == 0 {
            bail!("feed not found: {}", feed_id);
        }
        Ok(())
    }

    async fn insert_articles(&self, articles: &[NewArticle]) -> Result<()> {
        if articles.is_empty() {
            return Ok(());
        }

        let created_at = rfc3339(Utc::now());
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "INSERT INTO articles (id, feed_id, title, url, content, published_at, created_at) ",
        );
        builder.push_values(articles, |mut row, article| {
            row.push_bind(Uuid::new_v4().to_string())
                .push_bind(&article.feed_id)
                .push_bind(&article.title)
                .push_bind(&article.url)
                .push_bind(&article.content)
                .push_bind(&article.published_at)
                .push_bind(&created_at);
        });
        builder.push(" ON CONFLICT (feed_id, url) DO NOTHING");

        builder
            .build()
            .execute(&self.pool)
            .await
            .context("failed to insert articles")?;

        Ok(())
    }
}
