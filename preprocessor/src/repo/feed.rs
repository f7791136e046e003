//! `FeedRepository`: keyset-paginated access to unprocessed feeds.

use sqlx::PgPool;
use tracing::debug;

use common::Cursor;

use crate::error::{NilConnectionError, ServiceError};

pub struct ProcessingStats {
    pub total_feeds: i64,
    pub processed_feeds: i64,
    pub remaining_feeds: i64,
}

pub struct FeedRepository {
    pool: Option<PgPool>,
}

impl FeedRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Some(pool) }
    }

    pub fn disconnected() -> Self {
        Self { pool: None }
    }

    fn pool(&self) -> Result<&PgPool, ServiceError> {
        self.pool.as_ref().ok_or_else(|| ServiceError::Fatal(NilConnectionError.to_string()))
    }

    /// Keyset pagination: `WHERE (created_at, id) < (last_created_at, last_id)
    /// ORDER BY created_at DESC, id DESC LIMIT n`. An empty cursor starts at
    /// the newest row.
    pub async fn get_unprocessed_feeds(&self, cursor: Option<&Cursor>, limit: i64) -> Result<(Vec<String>, Option<Cursor>), ServiceError> {
        let pool = self.pool()?;
        let (last_created_at, last_id) = match cursor {
            Some(c) => (c.last_created_at, c.last_id),
            None => (chrono::Utc::now(), i64::MAX),
        };

        debug!(limit, "fetching unprocessed feeds page");
        let rows: Vec<(i64, String, chrono::DateTime<chrono::Utc>)> = sqlx::query_as(
            "SELECT id, link, created_at FROM feeds \
             WHERE processed_at IS NULL AND (created_at, id) < ($1, $2) \
             ORDER BY created_at DESC, id DESC LIMIT $3",
        )
        .bind(last_created_at)
        .bind(last_id)
        .bind(limit)
        .fetch_all(pool)
        .await
        .map_err(|e| ServiceError::TransientExternal(format!("failed to fetch unprocessed feeds: {e}")))?;

        let next_cursor = rows.last().map(|(id, _, created_at)| Cursor { last_created_at: *created_at, last_id: *id });
        let links = rows.into_iter().map(|(_, link, _)| link).collect();
        Ok((links, next_cursor))
    }

    /// Derived view over the feeds table, never stored: total feeds,
    /// how many have been processed, and how many remain.
    pub async fn get_processing_stats(&self) -> Result<ProcessingStats, ServiceError> {
        let pool = self.pool()?;
        let row: (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COUNT(*) FILTER (WHERE processed_at IS NOT NULL) FROM feeds",
        )
        .fetch_one(pool)
        .await
        .map_err(|e| ServiceError::TransientExternal(format!("failed to fetch feed processing stats: {e}")))?;

        let (total_feeds, processed_feeds) = row;
        Ok(ProcessingStats { total_feeds, processed_feeds, remaining_feeds: total_feeds - processed_feeds })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disconnected_repository_returns_nil_connection_error() {
        let repo = FeedRepository::disconnected();
        let err = repo.get_unprocessed_feeds(None, 10).await.unwrap_err();
        assert!(matches!(err, ServiceError::Fatal(_)));
    }

    #[tokio::test]
    async fn disconnected_repository_rejects_processing_stats() {
        let repo = FeedRepository::disconnected();
        let err = repo.get_processing_stats().await.unwrap_err();
        assert!(matches!(err, ServiceError::Fatal(_)));
    }
}
