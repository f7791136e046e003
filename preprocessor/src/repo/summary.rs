//! `SummaryRepository`: persistence for generated article summaries.

use sqlx::PgPool;
use tracing::{debug, info};

use common::Cursor;

use crate::error::{NilConnectionError, ServiceError};
use crate::repo::models::{Article, ArticleSummary};

pub struct SummaryRepository {
    pool: Option<PgPool>,
}

impl SummaryRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Some(pool) }
    }

    pub fn disconnected() -> Self {
        Self { pool: None }
    }

    fn pool(&self) -> Result<&PgPool, ServiceError> {
        self.pool.as_ref().ok_or_else(|| ServiceError::Fatal(NilConnectionError.to_string()))
    }

    pub async fn create(&self, article_id: i64, article_title: &str, summary_japanese: &str) -> Result<i64, ServiceError> {
        let pool = self.pool()?;
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO article_summaries (article_id, article_title, summary_japanese) \
             VALUES ($1, $2, $3) \
             ON CONFLICT (article_id) DO UPDATE SET summary_japanese = EXCLUDED.summary_japanese \
             RETURNING id",
        )
        .bind(article_id)
        .bind(article_title)
        .bind(summary_japanese)
        .fetch_one(pool)
        .await
        .map_err(|e| ServiceError::TransientExternal(format!("failed to create article summary: {e}")))?;
        info!(article_id, summary_id = id, "article summary created");
        Ok(id)
    }

    /// Rejects `limit <= 0` — a negative or zero page size is a caller bug,
    /// not an empty-result condition.
    pub async fn find_articles_with_summaries(&self, cursor: Option<&Cursor>, limit: i64) -> Result<(Vec<(Article, ArticleSummary)>, Option<Cursor>), ServiceError> {
        if limit <= 0 {
            return Err(ServiceError::Validation("limit must be > 0".to_string()));
        }
        let pool = self.pool()?;
        let (last_created_at, last_id) = match cursor {
            Some(c) => (c.last_created_at, c.last_id),
            None => (chrono::Utc::now(), i64::MAX),
        };

        debug!(limit, "fetching articles with summaries page");
        let rows: Vec<(i64, String, String, String, i64, Option<uuid::Uuid>, chrono::DateTime<chrono::Utc>, i64, String, String, chrono::DateTime<chrono::Utc>)> = sqlx::query_as(
            "SELECT a.id, a.title, a.content, a.url, a.feed_id, a.user_id, a.created_at, \
                    s.id, s.article_title, s.summary_japanese, s.created_at \
             FROM articles a JOIN article_summaries s ON s.article_id = a.id \
             WHERE (a.created_at, a.id) < ($1, $2) \
             ORDER BY a.created_at DESC, a.id DESC LIMIT $3",
        )
        .bind(last_created_at)
        .bind(last_id)
        .bind(limit)
        .fetch_all(pool)
        .await
        .map_err(|e| ServiceError::TransientExternal(format!("failed to fetch articles with summaries: {e}")))?;

        let next_cursor = rows.last().map(|r| Cursor { last_created_at: r.6, last_id: r.0 });
        let pairs = rows
            .into_iter()
            .map(|r| {
                (
                    Article { id: r.0, title: r.1, content: r.2, url: r.3, feed_id: r.4, user_id: r.5, created_at: r.6 },
                    ArticleSummary { id: r.7, article_id: r.0, article_title: r.8, summary_japanese: r.9, created_at: r.10 },
                )
            })
            .collect();
        Ok((pairs, next_cursor))
    }

    /// Returns `NotFound` if no summary exists for `article_id`.
    pub async fn delete(&self, article_id: i64) -> Result<(), ServiceError> {
        let pool = self.pool()?;
        let result = sqlx::query("DELETE FROM article_summaries WHERE article_id = $1")
            .bind(article_id)
            .execute(pool)
            .await
            .map_err(|e| ServiceError::TransientExternal(format!("failed to delete article summary: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(ServiceError::NotFound(format!("summary for article {article_id}")));
        }
        Ok(())
    }

    pub async fn exists(&self, article_id: i64) -> Result<bool, ServiceError> {
        let pool = self.pool()?;
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM article_summaries WHERE article_id = $1")
            .bind(article_id)
            .fetch_one(pool)
            .await
            .map_err(|e| ServiceError::TransientExternal(format!("failed to check summary existence: {e}")))?;
        Ok(count > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_non_positive_limit() {
        let repo = SummaryRepository::disconnected();
        let err = repo.find_articles_with_summaries(None, 0).await.unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
    }

    #[tokio::test]
    async fn disconnected_repository_returns_nil_connection_error() {
        let repo = SummaryRepository::disconnected();
        let err = repo.exists(1).await.unwrap_err();
        assert!(matches!(err, ServiceError::Fatal(_)));
    }
}
