//! Row types shared by the repositories. Mirrors the schema in
//! `common::run_migrations`'s migration set.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Feed {
    pub id: i64,
    pub link: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Article {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub url: String,
    pub feed_id: i64,
    pub user_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Article as supplied by an upstream ingest source, prior to persistence.
#[derive(Debug, Clone, Default)]
pub struct NewArticle {
    pub title: String,
    pub content: String,
    pub url: String,
    pub feed_url: String,
    pub user_id: Option<Uuid>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ArticleSummary {
    pub id: i64,
    pub article_id: i64,
    pub article_title: String,
    pub summary_japanese: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    DeadLetter,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::DeadLetter => "dead_letter",
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SummarizeJob {
    pub id: i64,
    pub job_id: Uuid,
    pub article_id: i64,
    pub status: String,
    pub summary: Option<String>,
    pub error_message: Option<String>,
    pub retry_count: i32,
    pub max_retries: i32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl SummarizeJob {
    pub fn status(&self) -> JobStatus {
        match self.status.as_str() {
            "pending" => JobStatus::Pending,
            "running" => JobStatus::Running,
            "completed" => JobStatus::Completed,
            "failed" => JobStatus::Failed,
            "dead_letter" => JobStatus::DeadLetter,
            other => panic!("unknown job status stored in database: {other}"),
        }
    }
}

/// Request payload for `ExternalAPIRepository::summarize_article`.
#[derive(Debug, Clone, Serialize)]
pub struct SummarizeRequest {
    pub article_id: i64,
    pub title: String,
    pub content: String,
    pub model: String,
    pub priority: u8,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SummarizeResponse {
    pub article_id: i64,
    pub summary_japanese: String,
}
