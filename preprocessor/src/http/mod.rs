//! Hardened outbound HTTP: rate limiting, circuit breaking, User-Agent
//! rotation, and retry, composed into a single client used by the
//! orchestrator and the `ExternalAPIRepository`.

pub mod circuit_breaker;
pub mod client;
pub mod rate_limit;
pub mod retry;
pub mod user_agent;

pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use client::{FetchOutcome, HardenedHttpClient};
pub use rate_limit::RateLimiter;
pub use user_agent::UserAgentRotator;
