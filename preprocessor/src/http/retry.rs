//! Exponential backoff with jitter for `GetWithRetry`.

use std::time::Duration;

use rand::Rng;

use crate::config::RetryConfig;

/// Delay before retry attempt `attempt` (1-indexed: `attempt = 1` is the
/// wait before the *first* retry, i.e. after the initial attempt failed).
/// `min(max_delay, base_delay * backoff_factor^(attempt-1))` plus uniform
/// jitter in `[0, jitter_factor * backoff)`.
pub fn delay_for_attempt(attempt: u32, cfg: &RetryConfig) -> Duration {
    let exponent = attempt.saturating_sub(1) as i32;
    let backoff_secs = cfg.base_delay.as_secs_f64() * cfg.backoff_factor.powi(exponent);
    let capped_secs = backoff_secs.min(cfg.max_delay.as_secs_f64());

    let jitter_secs = rand::thread_rng().gen_range(0.0..cfg.jitter_factor.max(0.0)) * capped_secs;
    Duration::from_secs_f64(capped_secs + jitter_secs)
}

/// Whether a transport failure or HTTP status should be retried.
/// 4xx responses are final; transport errors and 5xx are retried.
pub fn is_retryable_status(status: reqwest::StatusCode) -> bool {
    status.is_server_error()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(backoff_factor: f64, jitter_factor: f64) -> RetryConfig {
        RetryConfig {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            backoff_factor,
            jitter_factor,
        }
    }

    #[test]
    fn delay_grows_exponentially_and_caps() {
        let c = cfg(2.0, 0.0);
        assert_eq!(delay_for_attempt(1, &c), Duration::from_millis(100));
        assert_eq!(delay_for_attempt(2, &c), Duration::from_millis(200));
        assert_eq!(delay_for_attempt(3, &c), Duration::from_millis(400));
        // 100ms * 2^10 would exceed max_delay of 2s; must cap.
        assert_eq!(delay_for_attempt(11, &c), Duration::from_secs(2));
    }

    #[test]
    fn jitter_only_adds_delay_never_subtracts() {
        let c = cfg(2.0, 0.5);
        for _ in 0..50 {
            let d = delay_for_attempt(2, &c);
            assert!(d >= Duration::from_millis(200));
            assert!(d <= Duration::from_millis(300));
        }
    }

    #[test]
    fn retryable_status_is_5xx_only() {
        assert!(is_retryable_status(reqwest::StatusCode::INTERNAL_SERVER_ERROR));
        assert!(is_retryable_status(reqwest::StatusCode::SERVICE_UNAVAILABLE));
        assert!(!is_retryable_status(reqwest::StatusCode::NOT_FOUND));
        assert!(!is_retryable_status(reqwest::StatusCode::OK));
    }
}
