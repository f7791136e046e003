//! `HardenedHttpClient`: rate-limited, circuit-breaker-guarded, UA-rotating
//! GET client with retry. Request construction order: rate-limit wait, URL
//! rewrite for proxy mode, header synthesis, pooled execution,
//! circuit-breaker bookkeeping on 5xx.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use crate::config::HttpConfig;
use crate::error::ServiceError;
use crate::http::circuit_breaker::CircuitBreaker;
use crate::http::rate_limit::RateLimiter;
use crate::http::retry::{delay_for_attempt, is_retryable_status};
use crate::http::user_agent::{is_chrome_class, is_firefox_class, UserAgentRotator};

pub struct HardenedHttpClient {
    inner: reqwest::Client,
    config: HttpConfig,
    rate_limiter: RateLimiter,
    user_agents: UserAgentRotator,
    circuit_breaker: Option<CircuitBreaker>,
}

/// Result of a fetch that has passed response filtering.
pub enum FetchOutcome {
    Body(Vec<u8>),
    /// `skip_error_responses` screened this one out.
    ContentTooShort,
}

impl HardenedHttpClient {
    pub fn new(config: HttpConfig, circuit_breaker: Option<CircuitBreaker>) -> Result<Self, ServiceError> {
        let inner = reqwest::Client::builder()
            .timeout(config.timeout)
            .pool_max_idle_per_host(config.max_idle_conns_per_host)
            .pool_idle_timeout(config.idle_conn_timeout)
            .connect_timeout(config.tls_handshake_timeout)
            .redirect(if config.follow_redirects {
                reqwest::redirect::Policy::limited(config.max_redirects as usize)
            } else {
                reqwest::redirect::Policy::none()
            })
            .build()
            .map_err(|e| ServiceError::Fatal(format!("failed to build http client: {e}")))?;

        let user_agents = UserAgentRotator::new(
            config.user_agent.clone(),
            config.user_agents.clone(),
            config.user_agent_rotation || config.user_agent_random,
        );

        Ok(Self { inner, config, rate_limiter: RateLimiter::new(), user_agents, circuit_breaker })
    }

    /// Blocks on the rate limiter for `url`'s host using the configured
    /// per-domain interval, falling back to the default interval.
    pub async fn wait(&self, url: &Url, domain_intervals: &std::collections::HashMap<String, Duration>, default_interval: Duration) {
        let host = url.host_str().unwrap_or_default();
        let interval = domain_intervals.get(host).copied().unwrap_or(default_interval);
        self.rate_limiter.wait(host, interval).await;
    }

    fn rewrite_for_proxy(&self, url: &Url) -> Result<Url, ServiceError> {
        if !self.config.use_envoy_proxy {
            return Ok(url.clone());
        }
        let rest = format!("{}{}", url.path(), url.query().map(|q| format!("?{q}")).unwrap_or_default());
        let rewritten = format!("{}{}{}", self.config.envoy_proxy_url, self.config.envoy_proxy_path, rest);
        Url::parse(&rewritten).map_err(|e| ServiceError::Validation(format!("invalid proxy rewrite target: {e}")))
    }

    async fn build_request(&self, url: &Url) -> reqwest::RequestBuilder {
        let user_agent = if self.config.user_agent_random {
            self.user_agents.random()
        } else if self.config.user_agent_rotation {
            self.user_agents.next_round_robin().await
        } else {
            self.user_agents.random()
        };

        let mut builder = self.inner.get(url.clone()).header("User-Agent", &user_agent);

        if self.config.enable_browser_headers {
            builder = builder
                .header("Accept", "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8")
                .header("Accept-Language", "en-US,en;q=0.9")
                .header("Accept-Encoding", "gzip, deflate, br")
                .header("DNT", "1")
                .header("Connection", "keep-alive")
                .header("Upgrade-Insecure-Requests", "1");

            if is_chrome_class(&user_agent) {
                builder = builder
                    .header("sec-ch-ua", "\"Not_A Brand\";v=\"8\", \"Chromium\";v=\"120\"")
                    .header("sec-ch-ua-mobile", "?0")
                    .header("sec-ch-ua-platform", "\"Linux\"");
            } else if is_firefox_class(&user_agent) {
                builder = builder.header("Cache-Control", "no-cache");
            }
        }

        builder
    }

    /// A single attempt: rate-limit wait, proxy rewrite, header synthesis,
    /// pooled execution, circuit-breaker bookkeeping, response filtering.
    pub async fn get_with_context(
        &self,
        url: &Url,
        domain_intervals: &std::collections::HashMap<String, Duration>,
        default_interval: Duration,
        cancel: &CancellationToken,
    ) -> Result<FetchOutcome, ServiceError> {
        if let Some(cb) = &self.circuit_breaker {
            if !cb.allow().await {
                return Err(ServiceError::TransientExternal("circuit breaker open".into()));
            }
        }

        self.wait(url, domain_intervals, default_interval).await;

        let target = self.rewrite_for_proxy(url)?;
        let request = self.build_request(&target).await;

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(ServiceError::TransientExternal("request canceled".into())),
            res = request.send() => res,
        };

        let response = match response {
            Ok(r) => r,
            Err(e) => {
                if let Some(cb) = &self.circuit_breaker {
                    cb.record_failure().await;
                }
                return Err(ServiceError::TransientExternal(format!("http transport error: {e}")));
            }
        };

        let status = response.status();
        if let Some(cb) = &self.circuit_breaker {
            if is_retryable_status(status) {
                cb.record_failure().await;
            } else {
                cb.record_success().await;
            }
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| ServiceError::TransientExternal(format!("failed to read response body: {e}")))?;

        if self.config.skip_error_responses && status.as_u16() >= 400 && body.len() < self.config.min_content_length {
            return Ok(FetchOutcome::ContentTooShort);
        }

        if status.is_client_error() {
            return Err(ServiceError::PermanentExternal(format!("http {status}")));
        }
        if is_retryable_status(status) {
            return Err(ServiceError::TransientExternal(format!("http {status}")));
        }

        Ok(FetchOutcome::Body(body.to_vec()))
    }

    /// Applies the backoff-and-retry policy around `get_with_context`.
    pub async fn get_with_retry(
        &self,
        url: &Url,
        retry: &crate::config::RetryConfig,
        domain_intervals: &std::collections::HashMap<String, Duration>,
        default_interval: Duration,
        cancel: &CancellationToken,
    ) -> Result<FetchOutcome, ServiceError> {
        let mut last_err: Option<ServiceError> = None;

        for attempt in 0..retry.max_attempts {
            if attempt > 0 {
                let delay = delay_for_attempt(attempt, retry);
                debug!(attempt, delay_ms = delay.as_millis() as u64, "backing off before retry");
                tokio::select! {
                    _ = cancel.cancelled() => return Err(ServiceError::TransientExternal("retry loop canceled".into())),
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            match self.get_with_context(url, domain_intervals, default_interval, cancel).await {
                Ok(outcome) => return Ok(outcome),
                Err(ServiceError::PermanentExternal(msg)) => {
                    return Err(ServiceError::PermanentExternal(msg));
                }
                Err(e) => {
                    warn!(attempt, error = %e, "fetch attempt failed");
                    last_err = Some(e);
                }
            }
        }

        Err(ServiceError::TransientExternal(format!(
            "max retries exceeded: {}",
            last_err.map(|e| e.to_string()).unwrap_or_default()
        )))
    }
}
