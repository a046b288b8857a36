//! Cloud client error types.
//!
//! Two kinds matter to callers: [`AuthError`] (the credential chain must be
//! partly or fully redone) and [`ApiError`] (transient, safe to retry with
//! the credentials already held).

use thiserror::Error;

/// Authentication failures. These truncate the credential chain.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("credentials rejected by {endpoint} (HTTP {status})")]
    Rejected { endpoint: String, status: u16 },

    #[error("response missing {0}")]
    MissingField(&'static str),

    #[error("{0} expired")]
    Expired(&'static str),

    #[error("{0} not available")]
    Unavailable(&'static str),
}

/// Everything that is not an authentication failure.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("HTTP {status} from {endpoint}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("decode error: {0}")]
    Decode(String),

    #[error("invalid request: {0}")]
    Request(String),

    #[error("signing error: {0}")]
    Signing(String),
}

#[derive(Debug, Error)]
pub enum CloudError {
    #[error("auth error: {0}")]
    Auth(#[from] AuthError),

    #[error("API error: {0}")]
    Api(#[from] ApiError),
}

impl CloudError {
    pub fn is_auth(&self) -> bool {
        matches!(self, CloudError::Auth(_))
    }

    /// True when the server explicitly refused the presented token (401/403).
    pub fn is_rejection(&self) -> bool {
        matches!(self, CloudError::Auth(AuthError::Rejected { .. }))
    }
}

/// Convenience alias for cloud client results.
pub type CloudResult<T> = Result<T, CloudError>;
