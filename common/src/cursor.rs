//! Opaque keyset-pagination cursor shared by `FeedRepository` and the
//! summary-traversal repositories. Encodes `(last_created_at, last_id)` as
//! a base64 token so callers never depend on its internal shape.

use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    pub last_created_at: DateTime<Utc>,
    pub last_id: i64,
}

impl Cursor {
    pub fn new(last_created_at: DateTime<Utc>, last_id: i64) -> Self {
        Self { last_created_at, last_id }
    }

    /// Encode as an opaque token. Callers must treat this as a black box.
    pub fn encode(&self) -> String {
        let json = serde_json::to_vec(self).expect("cursor serializes");
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(json)
    }

    /// Decode a token produced by `encode`. A malformed token is a caller
    /// bug (stale/foreign token), surfaced as an error rather than panicking.
    pub fn decode(token: &str) -> Result<Self, CursorError> {
        let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|_| CursorError::Malformed)?;
        serde_json::from_slice(&bytes).map_err(|_| CursorError::Malformed)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CursorError {
    #[error("malformed cursor token")]
    Malformed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let c = Cursor::new(Utc::now(), 42);
        let token = c.encode();
        let decoded = Cursor::decode(&token).expect("decode");
        assert_eq!(c, decoded);
    }

    #[test]
    fn rejects_malformed_token() {
        assert!(Cursor::decode("not-a-valid-token!!!").is_err());
    }
}
