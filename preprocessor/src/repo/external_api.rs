//! `ExternalAPIRepository`: HTTP client for the NewsCreator (LLM) and
//! AltService (auth) dependencies.
//!
//! A bearer JSON client wrapped in `tokio::time::timeout`, covering the
//! NewsCreator/AltService wire contract and error kinds.

use std::time::Duration;

use bytes::Bytes;
use futures_util::Stream;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::{AltServiceConfig, NewsCreatorConfig};
use crate::error::ServiceError;
use crate::repo::models::{Article, SummarizeRequest, SummarizeResponse};

pub struct ExternalApiRepository {
    client: reqwest::Client,
    news_creator: NewsCreatorConfig,
    alt_service: AltServiceConfig,
}

#[derive(Deserialize)]
struct SystemUserResponse {
    user_id: String,
}

impl ExternalApiRepository {
    pub fn new(news_creator: NewsCreatorConfig, alt_service: AltServiceConfig) -> Self {
        Self { client: reqwest::Client::new(), news_creator, alt_service }
    }

    fn validate(article: &Article) -> Result<(), ServiceError> {
        if article.content.trim().is_empty() {
            return Err(ServiceError::Validation("article content must not be empty".to_string()));
        }
        Ok(())
    }

    pub async fn summarize_article(&self, article: &Article, priority: u8) -> Result<SummarizeResponse, ServiceError> {
        Self::validate(article)?;

        let url = format!("{}{}", self.news_creator.host, self.news_creator.api_path);
        let body = SummarizeRequest {
            article_id: article.id,
            title: article.title.clone(),
            content: article.content.clone(),
            model: self.news_creator.model.clone(),
            priority,
        };

        debug!(article_id = article.id, %url, "summarizing article via NewsCreator");
        let response = tokio::time::timeout(
            self.news_creator.timeout,
            self.client.post(&url).header("Content-Type", "application/json").json(&body).send(),
        )
        .await
        .map_err(|_| ServiceError::TransientExternal("news creator request timed out".to_string()))?
        .map_err(|e| ServiceError::TransientExternal(format!("news creator request failed: {e}")))?;

        classify_status(response.status(), "news creator")?;

        let text = response.text().await.map_err(|e| ServiceError::TransientExternal(format!("failed to read news creator response: {e}")))?;

        if text.trim().is_empty() || text.len() < 4 {
            return Err(ServiceError::ContentTooShort(format!("article {} summary too short", article.id)));
        }

        serde_json::from_str(&text).map_err(|e| ServiceError::TransientExternal(format!("failed to parse news creator response: {e}")))
    }

    /// Byte stream variant of `summarize_article`, used when the caller
    /// wants incremental output rather than the full JSON object.
    pub async fn stream_summarize_article(
        &self,
        article: &Article,
        priority: u8,
    ) -> Result<impl Stream<Item = reqwest::Result<Bytes>>, ServiceError> {
        Self::validate(article)?;

        let url = format!("{}{}", self.news_creator.host, self.news_creator.api_path);
        let body = SummarizeRequest {
            article_id: article.id,
            title: article.title.clone(),
            content: article.content.clone(),
            model: self.news_creator.model.clone(),
            priority,
        };

        let response = tokio::time::timeout(
            self.news_creator.timeout,
            self.client.post(&url).header("Content-Type", "application/json").json(&body).send(),
        )
        .await
        .map_err(|_| ServiceError::TransientExternal("news creator stream request timed out".to_string()))?
        .map_err(|e| ServiceError::TransientExternal(format!("news creator stream request failed: {e}")))?;

        classify_status(response.status(), "news creator")?;
        Ok(response.bytes_stream())
    }

    pub async fn check_health(&self, url: &str) -> Result<(), ServiceError> {
        let health_url = format!("{}/health", url.trim_end_matches('/'));
        let response = self
            .client
            .get(&health_url)
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map_err(|e| ServiceError::TransientExternal(format!("health check request failed: {e}")))?;

        if response.status().as_u16() != 200 {
            return Err(ServiceError::TransientExternal(format!("health check returned {}", response.status())));
        }
        Ok(())
    }

    /// Up to 3 attempts against the auth service, backing off 2s then 4s
    /// between attempts. Aborts early on cancellation.
    pub async fn get_system_user_id(&self, cancel: &CancellationToken) -> Result<Uuid, ServiceError> {
        let backoffs = [Duration::from_secs(2), Duration::from_secs(4)];
        let url = format!("{}/v1/internal/system-user", self.alt_service.host);

        let mut last_err = None;
        for attempt in 0..3 {
            if attempt > 0 {
                let delay = backoffs[attempt - 1];
                tokio::select! {
                    _ = cancel.cancelled() => return Err(ServiceError::TransientExternal("system user lookup canceled".to_string())),
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            let result = tokio::time::timeout(self.alt_service.timeout, self.client.get(&url).send()).await;
            match result {
                Ok(Ok(response)) if response.status().is_success() => {
                    let parsed: SystemUserResponse = match response.json().await {
                        Ok(p) => p,
                        Err(e) => {
                            last_err = Some(ServiceError::TransientExternal(format!("failed to parse system user response: {e}")));
                            continue;
                        }
                    };
                    if parsed.user_id.trim().is_empty() {
                        return Err(ServiceError::PermanentExternal("system user id was empty".to_string()));
                    }
                    return Uuid::parse_str(&parsed.user_id)
                        .map_err(|e| ServiceError::PermanentExternal(format!("system user id was not a uuid: {e}")));
                }
                Ok(Ok(response)) => {
                    warn!(status = %response.status(), attempt, "system user lookup returned non-success status");
                    last_err = Some(ServiceError::TransientExternal(format!("system user lookup returned {}", response.status())));
                }
                Ok(Err(e)) => {
                    warn!(error = %e, attempt, "system user lookup transport error");
                    last_err = Some(ServiceError::TransientExternal(format!("system user lookup failed: {e}")));
                }
                Err(_) => {
                    last_err = Some(ServiceError::TransientExternal("system user lookup timed out".to_string()));
                }
            }
        }

        Err(last_err.unwrap_or_else(|| ServiceError::TransientExternal("system user lookup exhausted retries".to_string())))
    }
}

fn classify_status(status: reqwest::StatusCode, dependency: &str) -> Result<(), ServiceError> {
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return Err(ServiceError::Auth(format!("{dependency} returned {status}")));
    }
    if status.is_server_error() {
        return Err(ServiceError::TransientExternal(format!("{dependency} returned {status}")));
    }
    if status.is_client_error() {
        return Err(ServiceError::PermanentExternal(format!("{dependency} returned {status}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn article(content: &str) -> Article {
        Article { id: 1, title: "t".into(), content: content.into(), url: "http://x".into(), feed_id: 1, user_id: None, created_at: chrono::Utc::now() }
    }

    fn cfg(host: String) -> (NewsCreatorConfig, AltServiceConfig) {
        (
            NewsCreatorConfig { host, api_path: "/summarize".into(), model: "default".into(), timeout: Duration::from_secs(5) },
            AltServiceConfig { host: "http://alt.local".into(), timeout: Duration::from_secs(5) },
        )
    }

    #[tokio::test]
    async fn rejects_empty_content_before_any_network_call() {
        let (nc, alt) = cfg("http://unreachable.invalid".into());
        let repo = ExternalApiRepository::new(nc, alt);
        let err = repo.summarize_article(&article(""), 1).await.unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
    }

    #[tokio::test]
    async fn summarize_article_success() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/summarize")
            .with_status(200)
            .with_body(r#"{"article_id":1,"summary_japanese":"要約"}"#)
            .create_async()
            .await;

        let (nc, alt) = cfg(server.url());
        let repo = ExternalApiRepository::new(nc, alt);
        let result = repo.summarize_article(&article("some long content"), 1).await.unwrap();
        assert_eq!(result.article_id, 1);
        assert_eq!(result.summary_japanese, "要約");
    }

    #[tokio::test]
    async fn auth_error_is_not_retried_and_surfaces_as_auth() {
        let mut server = mockito::Server::new_async().await;
        server.mock("POST", "/summarize").with_status(401).create_async().await;

        let (nc, alt) = cfg(server.url());
        let repo = ExternalApiRepository::new(nc, alt);
        let err = repo.summarize_article(&article("some long content"), 1).await.unwrap_err();
        assert!(matches!(err, ServiceError::Auth(_)));
    }

    #[tokio::test]
    async fn check_health_requires_200() {
        let mut server = mockito::Server::new_async().await;
        server.mock("GET", "/health").with_status(503).create_async().await;

        let (nc, alt) = cfg(server.url());
        let repo = ExternalApiRepository::new(nc, alt);
        let err = repo.check_health(&server.url()).await.unwrap_err();
        assert!(matches!(err, ServiceError::TransientExternal(_)));
    }

    #[tokio::test]
    async fn get_system_user_id_rejects_empty_user_id() {
        let mut server = mockito::Server::new_async().await;
        server.mock("GET", "/v1/internal/system-user").with_status(200).with_body(r#"{"user_id":""}"#).create_async().await;

        let (nc, _) = cfg("http://unused.invalid".into());
        let alt = AltServiceConfig { host: server.url(), timeout: Duration::from_secs(5) };
        let repo = ExternalApiRepository::new(nc, alt);
        let cancel = CancellationToken::new();
        let err = repo.get_system_user_id(&cancel).await.unwrap_err();
        assert!(matches!(err, ServiceError::PermanentExternal(_)));
    }
}
