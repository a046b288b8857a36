//! Reading the expiry claim of the federation token.
//!
//! The token is trusted as-is: its signature is never checked. We only need
//! `exp` to know when to refresh.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};

use crate::error::{ApiError, CloudResult};

/// Extracts the expiry instant from an opaque token.
pub trait ExpiryReader: Send + Sync {
    fn read_expiry(&self, token: &str) -> CloudResult<DateTime<Utc>>;
}

/// Decodes the JWT payload segment and reads `exp` (seconds since epoch).
#[derive(Debug, Clone, Copy, Default)]
pub struct UnverifiedJwtReader;

impl ExpiryReader for UnverifiedJwtReader {
    fn read_expiry(&self, token: &str) -> CloudResult<DateTime<Utc>> {
        let payload = token
            .split('.')
            .nth(1)
            .ok_or_else(|| ApiError::Decode("federation token is not a JWT".into()))?;

        let bytes = URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .map_err(|e| ApiError::Decode(format!("federation token payload: {e}")))?;

        let claims: serde_json::Value = serde_json::from_slice(&bytes)
            .map_err(|e| ApiError::Decode(format!("federation token claims: {e}")))?;

        let exp = claims
            .get("exp")
            .and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f as i64)))
            .ok_or_else(|| ApiError::Decode("federation token has no exp claim".into()))?;

        DateTime::from_timestamp(exp, 0)
            .ok_or_else(|| ApiError::Decode(format!("exp claim out of range: {exp}")).into())
    }
}
