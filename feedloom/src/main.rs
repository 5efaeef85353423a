/*
feedloom - feed acquisition daemon
Polls subscribed feeds on a schedule and stores new articles in SQLite.
*/

use anyhow::Result;
use clap::Parser;
use common::{init_db_pool, Config};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use feedloom::fetcher::{
    FeedFetcher, FeedStatusManager, FetchPipeline, HttpClientConfig, RateLimiter,
    ResponseInterpreter, SafeHttpClient, Scheduler, SqliteFeedRepository, WorkerPool,
};
use feedloom::storage;

#[derive(Parser, Debug)]
#[command(name = "feedloom", about = "Feedloom feed fetcher daemon")]
struct Args {
    /// Path to config.toml
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Run one batch and exit instead of looping
    #[arg(long)]
    once: bool,

    /// Fetch a single feed by id and exit
    #[arg(long, value_name = "FEED_ID")]
    fetch: Option<String>,

    /// Override log level (info, debug, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let default_path = PathBuf::from("config.default.toml");
    let override_path = if let Some(p) = args.config {
        if !p.exists() {
            error!(path = ?p, "specified config file not found");
            return Err(anyhow::anyhow!("Config file not found: {}", p.display()));
        }
        Some(p)
    } else {
        let p = PathBuf::from("config.toml");
        if p.exists() {
            Some(p)
        } else {
            None
        }
    };

    let config = match Config::load_with_defaults(
        if default_path.exists() {
            Some(&default_path)
        } else {
            None
        },
        override_path.as_deref(),
    )
    .await
    {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(%e, "failed to load configuration");
            return Err(e);
        }
    };
    info!(default = ?default_path, overrides = ?override_path, "configuration loaded");

    let db_pool = match init_db_pool(&config.database.path).await {
        Ok(pool) => pool,
        Err(e) => {
            error!(%e, db_path = %config.database.path, "failed to initialize database pool");
            return Err(e);
        }
    };
    storage::ensure_schema(&db_pool).await?;

    let fetcher_cfg = &config.fetcher;

    let transport = Arc::new(SafeHttpClient::new(HttpClientConfig {
        request_timeout: fetcher_cfg.request_timeout(),
        max_body_bytes: fetcher_cfg.max_body_bytes,
        validate_addresses: true,
    })?);
    let interpreter =
        ResponseInterpreter::new(fetcher_cfg.success_interval(), fetcher_cfg.max_articles);
    let fetcher = FeedFetcher::new(transport, interpreter);

    let repo = Arc::new(SqliteFeedRepository::new(db_pool.clone()));
    let status_manager = FeedStatusManager::new(repo.clone());
    let rate_limiter = Arc::new(RateLimiter::new(fetcher_cfg.domain_delay()));
    let pipeline = Arc::new(FetchPipeline::new(
        rate_limiter.clone(),
        fetcher,
        status_manager,
        fetcher_cfg.job_timeout(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = Scheduler::new(
        repo,
        WorkerPool::new(fetcher_cfg.worker_count),
        rate_limiter,
        pipeline,
        fetcher_cfg.clone(),
        shutdown_rx,
    );

    if let Some(feed_id) = args.fetch {
        scheduler.fetch_now(&feed_id).await?;
        return Ok(());
    }

    if args.once {
        scheduler.process_batch().await;
        return Ok(());
    }

    let scheduler_handle = tokio::spawn(scheduler.run());

    tokio::signal::ctrl_c().await?;
    info!("ctrl-c received, shutting down");
    let _ = shutdown_tx.send(true);

    // Give in-flight fetch jobs a grace period before giving up.
    match tokio::time::timeout(Duration::from_secs(20), scheduler_handle).await {
        Ok(Ok(())) => info!("scheduler exited cleanly"),
        Ok(Err(join_err)) => error!(%join_err, "scheduler task panicked"),
        Err(_) => info!("timed out waiting for scheduler to exit; continuing shutdown"),
    }

    info!("shutdown complete");
    Ok(())
}
