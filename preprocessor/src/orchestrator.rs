//! The ingestion driver loop: walk unprocessed feeds, fetch, normalize,
//! persist, and enqueue summarization jobs.
//!
//! Fetch-then-classify-status shape, routed through
//! `HardenedHttpClient::get_with_retry` rather than a bespoke retry loop.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Instrument};
use uuid::Uuid;

use common::Cursor;

use crate::config::{Config, ConfigStore};
use crate::error::ServiceError;
use crate::http::{FetchOutcome, HardenedHttpClient};
use crate::logging::{Logger, OperationContext};
use crate::repo::models::NewArticle;
use crate::repo::{ArticleRepository, ExternalApiRepository, FeedRepository, SummarizeJobRepository, SummaryRepository};

/// Sink for terminal fetch failures. The dead-letter queue's own wire
/// format is out of scope here; this is a minimal structured-log sink,
/// matching the rest of the service's logging-first observability posture.
pub trait DlqSink: Send + Sync {
    fn record(&self, feed_url: &str, reason: &str);
}

pub struct LoggingDlqSink {
    queue_name: String,
}

impl LoggingDlqSink {
    pub fn new(queue_name: impl Into<String>) -> Self {
        Self { queue_name: queue_name.into() }
    }
}

impl DlqSink for LoggingDlqSink {
    fn record(&self, feed_url: &str, reason: &str) {
        warn!(queue = %self.queue_name, feed_url, reason, "feed fetch sent to dead-letter queue");
    }
}

pub struct Orchestrator {
    feeds: Arc<FeedRepository>,
    articles: Arc<ArticleRepository>,
    summaries: Arc<SummaryRepository>,
    jobs: Arc<SummarizeJobRepository>,
    external_api: Arc<ExternalApiRepository>,
    http: Arc<HardenedHttpClient>,
    config: Arc<ConfigStore>,
    dlq: Arc<dyn DlqSink>,
    logger: Logger,
}

/// Treated as a pure function of raw bytes: feed/article parsing itself is
/// out of scope, so normalization here only extracts a title (first
/// non-empty line) and keeps the remainder as content.
fn normalize_article(raw: &[u8], url: &str, feed_url: &str, user_id: Option<Uuid>) -> NewArticle {
    let text = String::from_utf8_lossy(raw);
    let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());
    let title = lines.next().unwrap_or("untitled").to_string();
    let content = text.to_string();

    NewArticle { title, content, url: url.to_string(), feed_url: feed_url.to_string(), user_id }
}

impl Orchestrator {
    pub fn new(
        feeds: Arc<FeedRepository>,
        articles: Arc<ArticleRepository>,
        summaries: Arc<SummaryRepository>,
        jobs: Arc<SummarizeJobRepository>,
        external_api: Arc<ExternalApiRepository>,
        http: Arc<HardenedHttpClient>,
        config: Arc<ConfigStore>,
        dlq: Arc<dyn DlqSink>,
        logger: Logger,
    ) -> Self {
        Self { feeds, articles, summaries, jobs, external_api, http, config, dlq, logger }
    }

    /// Runs the driver loop to completion (no rows returned) or until
    /// `cancel` fires. Returns the number of articles persisted.
    pub async fn run_once(&self, page_size: i64, cancel: &CancellationToken) -> Result<u64, ServiceError> {
        let trace_id = Uuid::new_v4().to_string();
        let span = self.logger.child(&OperationContext::for_operation("orchestrator_run").with_trace_id(trace_id.clone()));
        self.run_once_inner(page_size, cancel, &trace_id).instrument(span).await
    }

    async fn run_once_inner(&self, page_size: i64, cancel: &CancellationToken, trace_id: &str) -> Result<u64, ServiceError> {
        let mut cursor: Option<Cursor> = None;
        let mut persisted_total = 0u64;

        let user_id = match self.external_api.get_system_user_id(cancel).await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(error = %e, "failed to resolve system user id, ingesting articles without an owner");
                None
            }
        };

        loop {
            if cancel.is_cancelled() {
                info!("orchestrator stopping on cancellation");
                return Ok(persisted_total);
            }

            let (feed_urls, next_cursor) = self.feeds.get_unprocessed_feeds(cursor.as_ref(), page_size).await?;
            if feed_urls.is_empty() {
                break;
            }

            let config = self.config.get().await;
            let mut batch = Vec::with_capacity(feed_urls.len());

            for feed_url in &feed_urls {
                let span = self.logger.child(
                    &OperationContext::for_operation("fetch_feed").with_request_id(feed_url.clone()).with_trace_id(trace_id.to_string()),
                );
                match self.fetch_one(feed_url, &config, cancel, user_id).instrument(span).await {
                    Ok(Some(article)) => batch.push(article),
                    Ok(None) => {
                        // Content too short: skip silently, per spec.
                    }
                    Err(e) => {
                        self.dlq.record(feed_url, &e.to_string());
                    }
                }
            }

            if !batch.is_empty() {
                self.articles.upsert_articles(&batch).await?;
                persisted_total += batch.len() as u64;
                self.enqueue_summarize_jobs(&batch, config.summarize_queue.max_retries as i32).await;
            }

            cursor = next_cursor;
            if cursor.is_none() {
                break;
            }
        }

        match self.feeds.get_processing_stats().await {
            Ok(stats) => info!(
                total_feeds = stats.total_feeds,
                processed_feeds = stats.processed_feeds,
                remaining_feeds = stats.remaining_feeds,
                "orchestrator pass processing stats"
            ),
            Err(e) => warn!(error = %e, "failed to fetch feed processing stats"),
        }

        Ok(persisted_total)
    }

    async fn fetch_one(
        &self,
        feed_url: &str,
        config: &Config,
        cancel: &CancellationToken,
        user_id: Option<Uuid>,
    ) -> Result<Option<NewArticle>, ServiceError> {
        let url = url::Url::parse(feed_url).map_err(|e| ServiceError::Validation(format!("invalid feed url {feed_url}: {e}")))?;

        let domain_intervals: HashMap<String, Duration> = config.rate_limit.domain_intervals.clone();
        let outcome = self
            .http
            .get_with_retry(&url, &config.retry, &domain_intervals, config.rate_limit.default_interval, cancel)
            .await?;

        match outcome {
            FetchOutcome::ContentTooShort => Ok(None),
            FetchOutcome::Body(bytes) => Ok(Some(normalize_article(&bytes, feed_url, feed_url, user_id))),
        }
    }

    /// For each freshly upserted article lacking a summary, creates a
    /// summarize job.
    async fn enqueue_summarize_jobs(&self, articles: &[NewArticle], max_retries: i32) {
        for article in articles {
            let id = match self.articles.find_id_by_url(&article.url).await {
                Ok(Some(id)) => id,
                Ok(None) => continue,
                Err(e) => {
                    warn!(url = %article.url, error = %e, "failed to resolve article id for job creation, skipping");
                    continue;
                }
            };

            match self.summaries.exists(id).await {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => {
                    warn!(article_id = id, error = %e, "failed to check summary existence, skipping job creation");
                    continue;
                }
            }

            if let Err(e) = self.jobs.create_job(id, max_retries).await {
                warn!(article_id = id, error = %e, "failed to create summarize job");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_article_extracts_first_line_as_title() {
        let raw = b"Headline Here\nBody paragraph one.\nBody paragraph two.";
        let article = normalize_article(raw, "http://x/1", "http://feed", None);
        assert_eq!(article.title, "Headline Here");
        assert_eq!(article.feed_url, "http://feed");
    }

    #[test]
    fn normalize_article_handles_empty_input() {
        let article = normalize_article(b"", "http://x/1", "http://feed", None);
        assert_eq!(article.title, "untitled");
    }

    #[test]
    fn normalize_article_carries_resolved_user_id() {
        let user_id = Uuid::new_v4();
        let article = normalize_article(b"Title\nBody", "http://x/1", "http://feed", Some(user_id));
        assert_eq!(article.user_id, Some(user_id));
    }
}
