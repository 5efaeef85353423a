//! Feed acquisition engine: scheduler, worker pool, rate limiter,
//! SSRF-hardened HTTP client, response interpretation and persistence.

pub mod calculations;
pub mod client;
pub mod fetch;
pub mod models;
pub mod rate_limit;
pub mod repository;
pub mod response;
pub mod scheduler;
pub mod status;
pub mod worker_pool;

pub use client::{HttpClientConfig, SafeHttpClient, Transport};
pub use fetch::FeedFetcher;
pub use models::{Article, FetchDecision, FetchStatus};
pub use rate_limit::RateLimiter;
pub use repository::{FeedRepository, SqliteFeedRepository};
pub use response::ResponseInterpreter;
pub use scheduler::{FetchPipeline, Scheduler};
pub use status::FeedStatusManager;
pub use worker_pool::WorkerPool;
