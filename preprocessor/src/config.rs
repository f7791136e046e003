//! Typed, environment-driven configuration with validation rules and a
//! hot-swappable `ConfigStore`.
//!
//! A nested-struct-per-concern shape, with environment variables as the
//! primary source and a TOML file as a secondary, optional source for local
//! development. `Config::validate` enforces the rules below before a
//! loaded or updated config is considered usable.

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;

use crate::error::ServiceError;

#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub port: u16,
    pub shutdown_timeout: Duration,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpConfig {
    pub timeout: Duration,
    pub max_idle_conns: usize,
    pub max_idle_conns_per_host: usize,
    pub idle_conn_timeout: Duration,
    pub tls_handshake_timeout: Duration,
    pub expect_continue_timeout: Duration,
    pub user_agent: String,
    pub user_agent_rotation: bool,
    pub user_agent_random: bool,
    pub user_agents: Vec<String>,
    pub enable_browser_headers: bool,
    pub skip_error_responses: bool,
    pub min_content_length: usize,
    pub max_redirects: u32,
    pub follow_redirects: bool,
    pub use_envoy_proxy: bool,
    pub envoy_proxy_url: String,
    pub envoy_proxy_path: String,
    pub envoy_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    pub jitter_factor: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitConfig {
    pub default_interval: Duration,
    pub domain_intervals: HashMap<String, Duration>,
    pub burst_size: u32,
    pub enable_adaptive: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DlqConfig {
    pub queue_name: String,
    pub timeout: Duration,
    pub retry_enabled: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
    pub path: String,
    pub update_interval: Duration,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub idle_timeout: Duration,
    pub shutdown_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewsCreatorConfig {
    pub host: String,
    pub api_path: String,
    pub model: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SummarizeQueueConfig {
    pub worker_interval: Duration,
    pub max_retries: u32,
    pub polling_interval: Duration,
    pub worker_pool_size: u32,
    pub batch_size: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AltServiceConfig {
    pub host: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub server: ServerConfig,
    pub http: HttpConfig,
    pub retry: RetryConfig,
    pub rate_limit: RateLimitConfig,
    pub dlq: DlqConfig,
    pub metrics: MetricsConfig,
    pub news_creator: NewsCreatorConfig,
    pub summarize_queue: SummarizeQueueConfig,
    pub alt_service: AltServiceConfig,
}

impl Config {
    /// Validate every field's constraints. All must hold or `Load`/`Update`
    /// fails and the caller's previous config (if any) is left untouched.
    pub fn validate(&self) -> Result<(), ServiceError> {
        let mut errors = Vec::new();

        if !(1..=65535).contains(&self.server.port) {
            errors.push("server.port must be in 1..=65535".to_string());
        }
        if !(1..=65535).contains(&self.metrics.port) {
            errors.push("metrics.port must be in 1..=65535".to_string());
        }
        if self.http.timeout.is_zero() {
            errors.push("http.timeout must be > 0".to_string());
        }
        // min_content_length is usize, so it's always >= 0; nothing to check.
        if self.retry.max_attempts == 0 {
            errors.push("retry.max_attempts must be > 0".to_string());
        }
        if self.retry.backoff_factor <= 1.0 {
            errors.push("retry.backoff_factor must be > 1.0".to_string());
        }
        if self.rate_limit.default_interval.is_zero() {
            errors.push("rate_limit.default_interval must be > 0".to_string());
        }
        if self.news_creator.host.is_empty() {
            errors.push("news_creator.host must not be empty".to_string());
        }
        if self.news_creator.timeout.is_zero() {
            errors.push("news_creator.timeout must be > 0".to_string());
        }
        if self.summarize_queue.worker_interval.is_zero() {
            errors.push("summarize_queue.worker_interval must be > 0".to_string());
        }
        if self.summarize_queue.polling_interval.is_zero() {
            errors.push("summarize_queue.polling_interval must be > 0".to_string());
        }
        if self.summarize_queue.worker_pool_size == 0 {
            errors.push("summarize_queue.worker_pool_size must be > 0".to_string());
        }
        if self.summarize_queue.batch_size <= 0 {
            errors.push("summarize_queue.batch_size must be > 0".to_string());
        }
        if (self.http.user_agent_rotation || self.http.user_agent_random)
            && (self.http.user_agents.is_empty()
                || self.http.user_agents.iter().any(|ua| ua.trim().is_empty()))
        {
            errors.push(
                "http.user_agents must be non-empty with no whitespace-only entries when http.user_agent_rotation or http.user_agent_random is set"
                    .to_string(),
            );
        }
        if self.http.use_envoy_proxy {
            if self.http.envoy_proxy_url.is_empty() {
                errors.push("http.envoy_proxy_url must not be empty when http.use_envoy_proxy is set".to_string());
            }
            if self.http.envoy_proxy_path.is_empty() {
                errors.push("http.envoy_proxy_path must not be empty when http.use_envoy_proxy is set".to_string());
            }
            if self.http.envoy_timeout.is_zero() {
                errors.push("http.envoy_timeout must be > 0 when http.use_envoy_proxy is set".to_string());
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ServiceError::Validation(errors.join("; ")))
        }
    }
}

/// Typed, environment-driven `ConfigStore` with a hot-swappable current
/// value. Readers get a deep copy (`Config` is plain data, so `Clone`
/// suffices); `Update` validates before swapping and leaves the previous
/// config in place on failure.
pub struct ConfigStore {
    inner: RwLock<Arc<Config>>,
}

impl ConfigStore {
    /// Build a store from an already-loaded, already-validated config.
    pub fn new(config: Config) -> Self {
        Self { inner: RwLock::new(Arc::new(config)) }
    }

    /// Read environment variables (with an optional TOML file as a
    /// secondary source for values the environment doesn't set) into a
    /// `Config`, then validate it. A malformed value or a failed check
    /// fails the whole load — there is no partially-applied config.
    pub async fn load(toml_path: Option<&Path>) -> Result<Self, ServiceError> {
        let toml_value = match toml_path {
            Some(path) if path.exists() => {
                let data = tokio::fs::read_to_string(path)
                    .await
                    .map_err(|e| ServiceError::Validation(format!("failed to read config file: {e}")))?;
                toml::from_str(&data)
                    .map_err(|e| ServiceError::Validation(format!("failed to parse config file: {e}")))?
            }
            _ => toml::Value::Table(toml::map::Map::new()),
        };

        let src = Env::new(&toml_value);
        let config = Config {
            server: ServerConfig {
                port: src.num("SERVER_PORT", &["server", "port"], 8080u16)?,
                shutdown_timeout: src.duration_secs("SERVER_SHUTDOWN_TIMEOUT_SECONDS", &["server", "shutdown_timeout_seconds"], 30)?,
                read_timeout: src.duration_secs("SERVER_READ_TIMEOUT_SECONDS", &["server", "read_timeout_seconds"], 15)?,
                write_timeout: src.duration_secs("SERVER_WRITE_TIMEOUT_SECONDS", &["server", "write_timeout_seconds"], 15)?,
            },
            http: HttpConfig {
                timeout: src.duration_secs("HTTP_TIMEOUT_SECONDS", &["http", "timeout_seconds"], 30)?,
                max_idle_conns: src.num("HTTP_MAX_IDLE_CONNS", &["http", "max_idle_conns"], 100usize)?,
                max_idle_conns_per_host: src.num("HTTP_MAX_IDLE_CONNS_PER_HOST", &["http", "max_idle_conns_per_host"], 10usize)?,
                idle_conn_timeout: src.duration_secs("HTTP_IDLE_CONN_TIMEOUT_SECONDS", &["http", "idle_conn_timeout_seconds"], 90)?,
                tls_handshake_timeout: src.duration_secs("HTTP_TLS_HANDSHAKE_TIMEOUT_SECONDS", &["http", "tls_handshake_timeout_seconds"], 10)?,
                expect_continue_timeout: src.duration_secs("HTTP_EXPECT_CONTINUE_TIMEOUT_SECONDS", &["http", "expect_continue_timeout_seconds"], 1)?,
                user_agent: src.string("HTTP_USER_AGENT", &["http", "user_agent"], "preprocessor/0.1"),
                user_agent_rotation: src.boolean("HTTP_USER_AGENT_ROTATION", &["http", "user_agent_rotation"], false),
                user_agent_random: src.boolean("HTTP_USER_AGENT_RANDOM", &["http", "user_agent_random"], false),
                user_agents: src.string_list("HTTP_USER_AGENTS", &["http", "user_agents"]),
                enable_browser_headers: src.boolean("HTTP_ENABLE_BROWSER_HEADERS", &["http", "enable_browser_headers"], false),
                skip_error_responses: src.boolean("HTTP_SKIP_ERROR_RESPONSES", &["http", "skip_error_responses"], false),
                min_content_length: src.num("HTTP_MIN_CONTENT_LENGTH", &["http", "min_content_length"], 0usize)?,
                max_redirects: src.num("HTTP_MAX_REDIRECTS", &["http", "max_redirects"], 5u32)?,
                follow_redirects: src.boolean("HTTP_FOLLOW_REDIRECTS", &["http", "follow_redirects"], true),
                use_envoy_proxy: src.boolean("HTTP_USE_ENVOY_PROXY", &["http", "use_envoy_proxy"], false),
                envoy_proxy_url: src.string("HTTP_ENVOY_PROXY_URL", &["http", "envoy_proxy_url"], ""),
                envoy_proxy_path: src.string("HTTP_ENVOY_PROXY_PATH", &["http", "envoy_proxy_path"], ""),
                envoy_timeout: src.duration_secs("HTTP_ENVOY_TIMEOUT_SECONDS", &["http", "envoy_timeout_seconds"], 10)?,
            },
            retry: RetryConfig {
                max_attempts: src.num("RETRY_MAX_ATTEMPTS", &["retry", "max_attempts"], 3u32)?,
                base_delay: src.duration_millis("RETRY_BASE_DELAY_MS", &["retry", "base_delay_ms"], 500)?,
                max_delay: src.duration_millis("RETRY_MAX_DELAY_MS", &["retry", "max_delay_ms"], 10_000)?,
                backoff_factor: src.float("RETRY_BACKOFF_FACTOR", &["retry", "backoff_factor"], 2.0)?,
                jitter_factor: src.float("RETRY_JITTER_FACTOR", &["retry", "jitter_factor"], 0.2)?,
            },
            rate_limit: RateLimitConfig {
                default_interval: src.duration_millis("RATE_LIMIT_DEFAULT_INTERVAL_MS", &["rate_limit", "default_interval_ms"], 1000)?,
                domain_intervals: src.interval_map("RATE_LIMIT_DOMAIN_INTERVALS_MS", &["rate_limit", "domain_intervals_ms"])?,
                burst_size: src.num("RATE_LIMIT_BURST_SIZE", &["rate_limit", "burst_size"], 1u32)?,
                enable_adaptive: src.boolean("RATE_LIMIT_ENABLE_ADAPTIVE", &["rate_limit", "enable_adaptive"], false),
            },
            dlq: DlqConfig {
                queue_name: src.string("DLQ_QUEUE_NAME", &["dlq", "queue_name"], "preprocessor.dlq"),
                timeout: src.duration_secs("DLQ_TIMEOUT_SECONDS", &["dlq", "timeout_seconds"], 5)?,
                retry_enabled: src.boolean("DLQ_RETRY_ENABLED", &["dlq", "retry_enabled"], true),
            },
            metrics: MetricsConfig {
                enabled: src.boolean("METRICS_ENABLED", &["metrics", "enabled"], true),
                port: src.num("METRICS_PORT", &["metrics", "port"], 9090u16)?,
                path: src.string("METRICS_PATH", &["metrics", "path"], "/metrics"),
                update_interval: src.duration_secs("METRICS_UPDATE_INTERVAL_SECONDS", &["metrics", "update_interval_seconds"], 15)?,
                read_timeout: src.duration_secs("METRICS_READ_TIMEOUT_SECONDS", &["metrics", "read_timeout_seconds"], 5)?,
                write_timeout: src.duration_secs("METRICS_WRITE_TIMEOUT_SECONDS", &["metrics", "write_timeout_seconds"], 5)?,
                idle_timeout: src.duration_secs("METRICS_IDLE_TIMEOUT_SECONDS", &["metrics", "idle_timeout_seconds"], 30)?,
                shutdown_timeout: src.duration_secs("METRICS_SHUTDOWN_TIMEOUT_SECONDS", &["metrics", "shutdown_timeout_seconds"], 5)?,
            },
            news_creator: NewsCreatorConfig {
                host: src.string("NEWS_CREATOR_HOST", &["news_creator", "host"], ""),
                api_path: src.string("NEWS_CREATOR_API_PATH", &["news_creator", "api_path"], "/summarize"),
                model: src.string("NEWS_CREATOR_MODEL", &["news_creator", "model"], "default"),
                timeout: src.duration_secs("NEWS_CREATOR_TIMEOUT_SECONDS", &["news_creator", "timeout_seconds"], 60)?,
            },
            summarize_queue: SummarizeQueueConfig {
                worker_interval: src.duration_secs("SUMMARIZE_QUEUE_WORKER_INTERVAL_SECONDS", &["summarize_queue", "worker_interval_seconds"], 5)?,
                max_retries: src.num("SUMMARIZE_QUEUE_MAX_RETRIES", &["summarize_queue", "max_retries"], 3u32)?,
                polling_interval: src.duration_secs("SUMMARIZE_QUEUE_POLLING_INTERVAL_SECONDS", &["summarize_queue", "polling_interval_seconds"], 2)?,
                worker_pool_size: src.num("SUMMARIZE_QUEUE_WORKER_POOL_SIZE", &["summarize_queue", "worker_pool_size"], 4u32)?,
                batch_size: src.num("SUMMARIZE_QUEUE_BATCH_SIZE", &["summarize_queue", "batch_size"], 10i64)?,
            },
            alt_service: AltServiceConfig {
                host: src.string("ALT_SERVICE_HOST", &["alt_service", "host"], ""),
                timeout: src.duration_secs("ALT_SERVICE_TIMEOUT_SECONDS", &["alt_service", "timeout_seconds"], 10)?,
            },
        };

        config.validate()?;
        Ok(Self::new(config))
    }

    /// Deep copy of the current config.
    pub async fn get(&self) -> Arc<Config> {
        self.inner.read().await.clone()
    }

    /// Validate then atomically swap. On failure, the current config is
    /// untouched and the error is returned.
    pub async fn update(&self, new_config: Config) -> Result<(), ServiceError> {
        new_config.validate()?;
        let mut guard = self.inner.write().await;
        *guard = Arc::new(new_config);
        Ok(())
    }
}

/// Small env-then-toml-then-default lookup helper. Not a general-purpose
/// config crate reimplementation — just enough indirection to keep the
/// `load` body above from repeating the same three-way fallback by hand
/// forty times.
struct Env<'a> {
    toml: &'a toml::Value,
}

impl<'a> Env<'a> {
    fn new(toml: &'a toml::Value) -> Self {
        Self { toml }
    }

    fn raw(&self, env_key: &str, toml_path: &[&str]) -> Option<String> {
        if let Ok(v) = std::env::var(env_key) {
            return Some(v);
        }
        let mut cur = self.toml;
        for segment in toml_path {
            cur = cur.get(segment)?;
        }
        match cur {
            toml::Value::String(s) => Some(s.clone()),
            toml::Value::Integer(i) => Some(i.to_string()),
            toml::Value::Float(f) => Some(f.to_string()),
            toml::Value::Boolean(b) => Some(b.to_string()),
            _ => None,
        }
    }

    fn string(&self, env_key: &str, toml_path: &[&str], default: &str) -> String {
        self.raw(env_key, toml_path).unwrap_or_else(|| default.to_string())
    }

    fn boolean(&self, env_key: &str, toml_path: &[&str], default: bool) -> bool {
        self.raw(env_key, toml_path)
            .and_then(|v| v.parse::<bool>().ok())
            .unwrap_or(default)
    }

    fn num<T: FromStr>(&self, env_key: &str, toml_path: &[&str], default: T) -> Result<T, ServiceError> {
        match self.raw(env_key, toml_path) {
            Some(v) => v
                .parse::<T>()
                .map_err(|_| ServiceError::Validation(format!("{env_key} is not a valid number: {v}"))),
            None => Ok(default),
        }
    }

    fn float(&self, env_key: &str, toml_path: &[&str], default: f64) -> Result<f64, ServiceError> {
        self.num(env_key, toml_path, default)
    }

    fn duration_secs(&self, env_key: &str, toml_path: &[&str], default_secs: u64) -> Result<Duration, ServiceError> {
        let secs: u64 = self.num(env_key, toml_path, default_secs)?;
        Ok(Duration::from_secs(secs))
    }

    fn duration_millis(&self, env_key: &str, toml_path: &[&str], default_ms: u64) -> Result<Duration, ServiceError> {
        let ms: u64 = self.num(env_key, toml_path, default_ms)?;
        Ok(Duration::from_millis(ms))
    }

    fn string_list(&self, env_key: &str, toml_path: &[&str]) -> Vec<String> {
        match self.raw(env_key, toml_path) {
            Some(v) => v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect(),
            None => Vec::new(),
        }
    }

    /// Parses "host=seconds,host2=seconds2" style maps. Values are
    /// milliseconds to match the other duration fields' env convention.
    fn interval_map(&self, env_key: &str, toml_path: &[&str]) -> Result<HashMap<String, Duration>, ServiceError> {
        let raw = match self.raw(env_key, toml_path) {
            Some(v) => v,
            None => return Ok(HashMap::new()),
        };
        let mut map = HashMap::new();
        for entry in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let (host, ms) = entry
                .split_once('=')
                .ok_or_else(|| ServiceError::Validation(format!("{env_key} entry missing '=': {entry}")))?;
            let ms: u64 = ms
                .trim()
                .parse()
                .map_err(|_| ServiceError::Validation(format!("{env_key} entry has non-numeric interval: {entry}")))?;
            map.insert(host.trim().to_string(), Duration::from_millis(ms));
        }
        Ok(map)
    }
}
