//! Storage schema and row types shared by the fetcher.
//!
//! Timestamps are persisted as RFC3339 UTC strings (`2024-01-01T00:00:00Z`),
//! so lexicographic comparison in SQL is chronological. `ensure_schema` is
//! idempotent and safe to run on every startup.

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::SqlitePool;

/// One subscribed feed, as stored in the `feeds` table.
///
/// The fetcher reads all columns and writes only the scheduling and
/// conditional-request subset (plus `url` after a permanent redirect).
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Feed {
    pub id: String,
    pub user_id: String,
    pub url: String,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub fetch_after: Option<String>,
    pub last_fetched_at: Option<String>,
    pub retry_count: i64,
    pub last_fetch_status: Option<String>,
    pub last_fetch_error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Partial update applied to a feed row after a fetch attempt.
///
/// Status, error and `last_fetched_at` are written on every attempt
/// (an absent error clears the previous one). The remaining fields
/// leave their columns untouched when `None`.
#[derive(Debug, Clone, Default)]
pub struct FeedUpdate {
    pub last_fetch_status: String,
    pub last_fetch_error: Option<String>,
    pub last_fetched_at: String,
    pub url: Option<String>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub fetch_after: Option<String>,
    pub retry_count: Option<i64>,
}

/// Article row ready for insertion.
#[derive(Debug, Clone)]
pub struct NewArticle {
    pub feed_id: String,
    pub title: String,
    pub url: String,
    pub content: Option<String>,
    pub published_at: String,
}

/// Formats a timestamp the way the store expects it.
pub fn rfc3339(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Creates the tables and indexes the fetcher relies on.
pub async fn ensure_schema(pool: &SqlitePool) -> Result<()> {
    tracing::debug!("ensuring DB schema");

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS feeds (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            url TEXT NOT NULL,
            etag TEXT,
            last_modified TEXT,
            fetch_after TEXT,
            last_fetched_at TEXT,
            retry_count INTEGER NOT NULL DEFAULT 0,
            last_fetch_status TEXT,
            last_fetch_error TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        "#,
    )
    .execute(pool)
    .await
    .context("failed to create feeds table")?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS articles (
            id TEXT PRIMARY KEY,
            feed_id TEXT NOT NULL REFERENCES feeds(id) ON DELETE CASCADE,
            title TEXT NOT NULL,
            url TEXT NOT NULL,
            content TEXT,
            published_at TEXT NOT NULL,
            created_at TEXT NOT NULL,
            UNIQUE (feed_id, url)
        );
        "#,
    )
    .execute(pool)
    .await
    .context("failed to create articles table")?;

    // Covers the due-feed scan: fetch_after filter + last_fetched_at order
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_feeds_due ON feeds (fetch_after, last_fetched_at)",
    )
    .execute(pool)
    .await
    .context("failed to create feeds index")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn rfc3339_is_utc_and_second_precision() {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(rfc3339(t), "2024-01-01T00:00:00Z");
    }

    #[test]
    fn rfc3339_orders_lexicographically() {
        let a = Utc.with_ymd_and_hms(2024, 1, 1, 9, 59, 59).unwrap();
        let b = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        assert!(rfc3339(a) < rfc3339(b));
    }
}
