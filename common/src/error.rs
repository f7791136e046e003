//! Error kinds shared across config loading and repository plumbing.
//! Domain-specific variants (retry/dead-letter classification) live in
//! `preprocessor::error`; this module only covers what `common` itself
//! can fail at: config validation.

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Validation(String),
}
