//! Typed error kinds for the pre-processor service.
//!
//! `anyhow::Error` remains the catch-all at `main`'s boundary (matching the
//! teacher's use of `anyhow` throughout), but the retry/dead-letter and
//! validation logic in the job engine and HTTP client need to match on a
//! concrete kind rather than downcast a dynamic `dyn Error`, so those seams
//! use this enum instead.

use std::fmt;

/// Stable, matchable error kinds used across the HTTP client, job engine,
/// and repository layers to decide retry/dead-letter/fatal handling.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Bad config or bad argument. Surfaced immediately, never retried.
    #[error("validation error: {0}")]
    Validation(String),

    /// Distinct sentinel returned by `GetJob` / `FindByID` when no row matches.
    #[error("not found: {0}")]
    NotFound(String),

    /// Sentinel from the LLM path; callers treat this as success-skip.
    #[error("content too short: {0}")]
    ContentTooShort(String),

    /// Network, 5xx, or DB timeout. Eligible for retry.
    #[error("transient external error: {0}")]
    TransientExternal(String),

    /// 4xx (non-auth) from an external dependency. Eligible for dead-letter.
    #[error("permanent external error: {0}")]
    PermanentExternal(String),

    /// 401/403 from the LLM server. Propagated as-is, never retried.
    #[error("auth error: {0}")]
    Auth(String),

    /// Nil DB pool, or failed config validation at startup. The process
    /// refuses to start.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl ServiceError {
    /// Whether the job engine's retry path should apply to this error.
    pub fn is_transient(&self) -> bool {
        matches!(self, ServiceError::TransientExternal(_))
    }

    /// Whether this error should promote a job straight to dead-letter
    /// instead of going through the ordinary retry counter.
    pub fn is_permanent(&self) -> bool {
        matches!(self, ServiceError::PermanentExternal(_))
    }
}

/// A "nil connection" error — every repository operation returns this when
/// invoked without a live pool. Kept distinct from `Fatal` because callers
/// test for it explicitly (see the repository contract tests).
#[derive(Debug, Clone, Copy)]
pub struct NilConnectionError;

impl fmt::Display for NilConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "nil connection: repository invoked without a live pool")
    }
}

impl std::error::Error for NilConnectionError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_transient_and_permanent() {
        let t = ServiceError::TransientExternal("boom".into());
        let p = ServiceError::PermanentExternal("boom".into());
        assert!(t.is_transient());
        assert!(!t.is_permanent());
        assert!(p.is_permanent());
        assert!(!p.is_transient());
    }
}
