//! Single-binary entry point: loads config, connects to Postgres, then runs
//! the feed orchestrator and the summarize job engine side by side until
//! shutdown is requested.
//!
//! CLI via `clap`, `tokio::select!` racing the orchestrator loop against
//! `ctrl_c`, with a shared `CancellationToken` for cooperative shutdown
//! across the orchestrator and every job-engine worker.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use preprocessor::config::ConfigStore;
use preprocessor::http::{CircuitBreaker, HardenedHttpClient};
use preprocessor::jobs::SummarizeJobEngine;
use preprocessor::logging::{Logger, ServiceIdentity};
use preprocessor::orchestrator::{LoggingDlqSink, Orchestrator};
use preprocessor::repo::{ArticleRepository, ExternalApiRepository, FeedRepository, SummarizeJobRepository, SummaryRepository};

#[derive(Parser, Debug)]
#[command(name = "preprocessor", about = "Article ingestion and summarization pre-processor")]
struct Args {
    /// Optional TOML file providing config values not set via environment.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Run the orchestrator loop once and exit instead of looping forever.
    #[arg(long)]
    once: bool,

    /// Disable the summarize job engine (orchestrator only).
    #[arg(long)]
    no_jobs: bool,

    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let logger = Logger::init(
        ServiceIdentity { service: "preprocessor".to_string(), version: env!("CARGO_PKG_VERSION").to_string() },
        &args.log_level,
    );
    info!("preprocessor starting");

    let config_store = match ConfigStore::load(args.config.as_deref()).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!(%e, "failed to load configuration");
            return Err(anyhow::anyhow!(e));
        }
    };
    let config = config_store.get().await;

    let database_url = std::env::var("DATABASE_URL").map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;
    let max_connections: u32 = std::env::var("DATABASE_MAX_CONNECTIONS").ok().and_then(|v| v.parse().ok()).unwrap_or(10);

    let pool = common::init_db_pool(&database_url, max_connections).await?;
    common::run_migrations(&pool).await?;
    info!("database connected and migrations applied");

    let feeds = Arc::new(FeedRepository::new(pool.clone()));
    let articles = Arc::new(ArticleRepository::new(pool.clone()));
    let summaries = Arc::new(SummaryRepository::new(pool.clone()));
    let jobs = Arc::new(SummarizeJobRepository::new(pool.clone()));
    let external_api = Arc::new(ExternalApiRepository::new(config.news_creator.clone(), config.alt_service.clone()));

    let circuit_breaker = CircuitBreaker::new(5, std::time::Duration::from_secs(30));
    let http = Arc::new(HardenedHttpClient::new(config.http.clone(), Some(circuit_breaker))?);

    let dlq = Arc::new(LoggingDlqSink::new(config.dlq.queue_name.clone()));
    let orchestrator = Orchestrator::new(
        feeds,
        articles.clone(),
        summaries.clone(),
        jobs.clone(),
        external_api.clone(),
        http.clone(),
        config_store.clone(),
        dlq,
        logger.clone(),
    );

    let cancel = CancellationToken::new();

    let mut job_handles = Vec::new();
    if !args.no_jobs {
        let engine = Arc::new(SummarizeJobEngine::new(
            jobs,
            articles,
            summaries,
            external_api,
            http,
            config.summarize_queue.clone(),
            logger.clone(),
        ));
        job_handles = engine.spawn(cancel.clone());
    }

    let orchestrator_cancel = cancel.clone();
    let once = args.once;
    let orchestrator_handle = tokio::spawn(async move {
        loop {
            match orchestrator.run_once(100, &orchestrator_cancel).await {
                Ok(persisted) => info!(persisted, "orchestrator pass completed"),
                Err(e) => error!(error = %e, "orchestrator pass failed"),
            }
            if once || orchestrator_cancel.is_cancelled() {
                break;
            }
            tokio::select! {
                _ = orchestrator_cancel.cancelled() => break,
                _ = tokio::time::sleep(std::time::Duration::from_secs(30)) => {}
            }
        }
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("ctrl-c received, shutting down");
            cancel.cancel();
        }
        res = orchestrator_handle => {
            if let Err(e) = res {
                error!(error = %e, "orchestrator task panicked");
            }
            cancel.cancel();
        }
    }

    for handle in job_handles {
        let _ = tokio::time::timeout(std::time::Duration::from_secs(config.server.shutdown_timeout.as_secs()), handle).await;
    }

    info!(service = %logger.identity().service, "preprocessor stopped");
    Ok(())
}
