use chrono::{DateTime, Utc};
use std::fmt;

/// Outcome of one fetch attempt, persisted to `feeds.last_fetch_status`
/// (except `Redirect`, which is always resolved inside the fetch walk).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStatus {
    Success,
    TemporaryError,
    PermanentError,
    Unauthorized,
    Redirect,
}

impl FetchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchStatus::Success => "success",
            FetchStatus::TemporaryError => "temporary_error",
            FetchStatus::PermanentError => "permanent_error",
            FetchStatus::Unauthorized => "unauthorized",
            FetchStatus::Redirect => "redirect",
        }
    }
}

impl fmt::Display for FetchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One item parsed from a feed body.
#[derive(Debug, Clone, PartialEq)]
pub struct Article {
    pub title: String,
    pub url: String,
    pub content: Option<String>,
    pub published_at: DateTime<Utc>,
}

/// Everything the status manager needs to update state after one
/// HTTP exchange. Fields that don't apply to the outcome stay `None`
/// and never reach the database.
#[derive(Debug, Clone)]
pub struct FetchDecision {
    pub status: FetchStatus,
    pub error_message: Option<String>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub new_url: Option<String>,
    pub next_fetch_time: Option<DateTime<Utc>>,
    pub articles: Vec<Article>,
}

impl FetchDecision {
    fn bare(status: FetchStatus) -> Self {
        Self {
            status,
            error_message: None,
            etag: None,
            last_modified: None,
            new_url: None,
            next_fetch_time: None,
            articles: Vec::new(),
        }
    }

    pub fn success(
        next_fetch_time: DateTime<Utc>,
        etag: Option<String>,
        last_modified: Option<String>,
        articles: Vec<Article>,
    ) -> Self {
        Self {
            etag,
            last_modified,
            next_fetch_time: Some(next_fetch_time),
            articles,
            ..Self::bare(FetchStatus::Success)
        }
    }

    pub fn redirect(location: String) -> Self {
        Self {
            new_url: Some(location),
            ..Self::bare(FetchStatus::Redirect)
        }
    }

    pub fn temporary_error(message: impl Into<String>, next_fetch_time: DateTime<Utc>) -> Self {
        Self {
            error_message: Some(message.into()),
            next_fetch_time: Some(next_fetch_time),
            ..Self::bare(FetchStatus::TemporaryError)
        }
    }

    pub fn permanent_error(message: impl Into<String>) -> Self {
        Self {
            error_message: Some(message.into()),
            ..Self::bare(FetchStatus::PermanentError)
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self {
            error_message: Some(message.into()),
            ..Self::bare(FetchStatus::Unauthorized)
        }
    }
}
