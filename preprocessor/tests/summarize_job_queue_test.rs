//! Integration tests for the summarize job queue against a real Postgres
//! instance: `FOR UPDATE SKIP LOCKED` and the status `CHECK` constraint are
//! the reason this service runs on Postgres at all.
//!
//! Requires `TEST_DATABASE_URL` to point at a scratch Postgres database;
//! skips with a message when it isn't set.

use sqlx::PgPool;

use preprocessor::repo::models::{JobStatus, NewArticle};
use preprocessor::repo::{ArticleRepository, SummarizeJobRepository};

async fn setup_test_db() -> Option<PgPool> {
    let _ = dotenv::dotenv();
    let url = std::env::var("TEST_DATABASE_URL").ok()?;
    let pool = PgPool::connect(&url).await.expect("connect to test database");
    common::run_migrations(&pool).await.expect("run migrations");

    sqlx::query("TRUNCATE summarize_job_queue, article_summaries, articles, feeds RESTART IDENTITY CASCADE")
        .execute(&pool)
        .await
        .expect("truncate tables");

    Some(pool)
}

async fn seed_article(pool: &PgPool, url: &str) -> i64 {
    let articles = ArticleRepository::new(pool.clone());
    sqlx::query("INSERT INTO feeds (link) VALUES ($1) ON CONFLICT DO NOTHING").bind("http://feed.example").execute(pool).await.unwrap();
    articles
        .upsert_articles(&[NewArticle {
            title: "headline".into(),
            content: "body".into(),
            url: url.into(),
            feed_url: "http://feed.example".into(),
            user_id: None,
        }])
        .await
        .expect("seed article");

    sqlx::query_scalar("SELECT id FROM articles WHERE url = $1").bind(url).fetch_one(pool).await.unwrap()
}

#[tokio::test]
async fn happy_path_job_completes() {
    let Some(pool) = setup_test_db().await else {
        eprintln!("skipping: TEST_DATABASE_URL not set");
        return;
    };

    let article_id = seed_article(&pool, "http://a1").await;
    let jobs = SummarizeJobRepository::new(pool.clone());

    let job_id = jobs.create_job(article_id, 3).await.expect("create job");
    jobs.update_job_status(job_id, JobStatus::Running, None, None).await.expect("mark running");
    jobs.update_job_status(job_id, JobStatus::Completed, Some("OK"), None).await.expect("mark completed");

    let job = jobs.get_job(job_id).await.expect("get job");
    assert_eq!(job.status(), JobStatus::Completed);
    assert_eq!(job.summary.as_deref(), Some("OK"));
    assert!(job.completed_at.is_some());
}

#[tokio::test]
async fn retry_then_success_increments_retry_count() {
    let Some(pool) = setup_test_db().await else {
        eprintln!("skipping: TEST_DATABASE_URL not set");
        return;
    };

    let article_id = seed_article(&pool, "http://a2").await;
    let jobs = SummarizeJobRepository::new(pool.clone());
    let job_id = jobs.create_job(article_id, 3).await.expect("create job");

    jobs.update_job_status(job_id, JobStatus::Failed, None, Some("500")).await.expect("fail 1");
    let job = jobs.get_job(job_id).await.expect("get job");
    assert_eq!(job.retry_count, 1);
    assert_eq!(job.status(), JobStatus::Pending);

    jobs.update_job_status(job_id, JobStatus::Failed, None, Some("500")).await.expect("fail 2");
    let job = jobs.get_job(job_id).await.expect("get job");
    assert_eq!(job.retry_count, 2);
    assert_eq!(job.status(), JobStatus::Pending);

    jobs.update_job_status(job_id, JobStatus::Completed, Some("OK"), None).await.expect("complete");
    let job = jobs.get_job(job_id).await.expect("get job");
    assert_eq!(job.retry_count, 2);
    assert_eq!(job.status(), JobStatus::Completed);
}

#[tokio::test]
async fn three_failures_with_max_retries_three_dead_letters() {
    let Some(pool) = setup_test_db().await else {
        eprintln!("skipping: TEST_DATABASE_URL not set");
        return;
    };

    let article_id = seed_article(&pool, "http://a3").await;
    let jobs = SummarizeJobRepository::new(pool.clone());
    let job_id = jobs.create_job(article_id, 3).await.expect("create job");

    for _ in 0..3 {
        jobs.update_job_status(job_id, JobStatus::Failed, None, Some("500")).await.expect("fail");
    }

    let job = jobs.get_job(job_id).await.expect("get job");
    assert_eq!(job.retry_count, 3);
    assert_eq!(job.status(), JobStatus::DeadLetter);
    assert!(job.completed_at.is_some());

    let pending = jobs.get_pending_jobs(10).await.expect("get pending");
    assert!(pending.iter().all(|j| j.job_id != job_id));
}

#[tokio::test]
async fn concurrent_work_stealing_never_double_assigns() {
    let Some(pool) = setup_test_db().await else {
        eprintln!("skipping: TEST_DATABASE_URL not set");
        return;
    };

    let a1 = seed_article(&pool, "http://b1").await;
    let a2 = seed_article(&pool, "http://b2").await;
    let a3 = seed_article(&pool, "http://b3").await;

    let jobs = SummarizeJobRepository::new(pool.clone());
    for article_id in [a1, a2, a3] {
        jobs.create_job(article_id, 3).await.expect("create job");
    }

    let jobs_a = SummarizeJobRepository::new(pool.clone());
    let jobs_b = SummarizeJobRepository::new(pool.clone());
    let (batch_a, batch_b) = tokio::join!(jobs_a.get_pending_jobs(2), jobs_b.get_pending_jobs(2));
    let batch_a = batch_a.expect("claim batch a");
    let batch_b = batch_b.expect("claim batch b");

    let mut seen = std::collections::HashSet::new();
    for job in batch_a.iter().chain(batch_b.iter()) {
        assert!(seen.insert(job.job_id), "job {} was returned to two concurrent callers", job.job_id);
        assert_eq!(job.status(), JobStatus::Running, "claimed job must already be marked running");
    }
    assert_eq!(seen.len(), 3, "all 3 jobs should have been claimed across both concurrent callers combined");
}

#[tokio::test]
async fn upsert_with_empty_feed_url_is_a_noop_success() {
    let Some(pool) = setup_test_db().await else {
        eprintln!("skipping: TEST_DATABASE_URL not set");
        return;
    };

    let articles = ArticleRepository::new(pool.clone());
    let inserted = articles
        .upsert_articles(&[NewArticle { title: "t".into(), content: "c".into(), url: "http://skip".into(), feed_url: "".into(), user_id: None }])
        .await
        .expect("upsert does not fail on all-skipped input");
    assert_eq!(inserted, 0);

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM articles WHERE url = 'http://skip'").fetch_one(&pool).await.unwrap();
    assert_eq!(count, 0);
}
