//! Outputs of the three credential-chain stages.
//!
//! These are held in memory only. `Debug` output redacts every secret so the
//! types can be logged with `?` safely.

use std::fmt;

use chrono::{DateTime, Utc};

const REDACTED: &str = "<redacted>";

/// Stage 1 result: the account session.
#[derive(Clone, PartialEq, Eq)]
pub struct AccountSession {
    /// Session token returned by the account login.
    pub session_token: String,
    /// Account country code (e.g. "RO"), sent with device listings.
    pub country: String,
    /// Username as the account service knows it (may differ from the login).
    pub account_username: String,
}

impl fmt::Debug for AccountSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountSession")
            .field("session_token", &REDACTED)
            .field("country", &self.country)
            .field("account_username", &self.account_username)
            .finish()
    }
}

/// Stage 2 result: API token plus the federation token and its expiry.
#[derive(Clone, PartialEq, Eq)]
pub struct ExchangedTokens {
    /// Short-lived token for the device-listing API.
    pub api_token: String,
    /// Token presented to the identity-federation service.
    pub federation_token: String,
    /// Expiry read from the federation token's `exp` claim.
    pub federation_expiry: DateTime<Utc>,
}

impl ExchangedTokens {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.federation_expiry
    }
}

impl fmt::Debug for ExchangedTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExchangedTokens")
            .field("api_token", &REDACTED)
            .field("federation_token", &REDACTED)
            .field("federation_expiry", &self.federation_expiry)
            .finish()
    }
}

/// Stage 3 result: temporary signing credentials for the shadow service.
#[derive(Clone, PartialEq, Eq)]
pub struct SigningCredentials {
    pub access_key_id: String,
    pub secret_key: String,
    pub session_token: String,
    pub expiry: DateTime<Utc>,
}

impl SigningCredentials {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expiry
    }
}

impl fmt::Debug for SigningCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_key", &REDACTED)
            .field("session_token", &REDACTED)
            .field("expiry", &self.expiry)
            .finish()
    }
}
