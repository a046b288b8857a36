//! Credential chain: account login → token exchange → credential issuance.
//!
//! [`Authenticator`] owns the single [`ChainState`] for an account and is the
//! only place it is mutated. Every refresh runs under one async mutex, so
//! concurrent callers that find the same stage expired wait for the first
//! caller's result instead of repeating the network call.
//!
//! Refresh policy: each stage is kept while valid and only the trailing run
//! of stages needed to restore validity is re-executed. A stage that fails
//! with an [`AuthError`](crate::error::AuthError) is cleared together with
//! everything downstream of it; an `ApiError` leaves the chain untouched.

pub mod account;
pub mod exchange;
pub mod issuer;
pub mod jwt;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use tcl_protocol::credentials::{AccountSession, ExchangedTokens, SigningCredentials};

use crate::clock::Clock;
use crate::config::CloudConfig;
use crate::error::{AuthError, CloudError, CloudResult};
use crate::transport::HttpTransport;

pub use account::{AccountAuthenticator, password_hash};
pub use exchange::TokenExchanger;
pub use issuer::CredentialIssuer;
pub use jwt::{ExpiryReader, UnverifiedJwtReader};

/// A link of the credential chain, in upstream → downstream order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    Account,
    Tokens,
    Credentials,
}

impl Stage {
    /// Stage that produced the token this stage presents.
    fn presented_by(self) -> Stage {
        match self {
            Stage::Account | Stage::Tokens => Stage::Account,
            Stage::Credentials => Stage::Tokens,
        }
    }
}

/// Coarse position in the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Unauthenticated,
    AccountAuthenticated,
    TokenExchanged,
    CredentialsIssued,
}

/// Everything the chain currently holds. Never persisted.
#[derive(Debug, Clone, Default)]
pub struct ChainState {
    pub account: Option<AccountSession>,
    pub tokens: Option<ExchangedTokens>,
    pub credentials: Option<SigningCredentials>,
}

impl ChainState {
    pub fn state(&self) -> AuthState {
        match (&self.account, &self.tokens, &self.credentials) {
            (None, _, _) => AuthState::Unauthenticated,
            (Some(_), None, _) => AuthState::AccountAuthenticated,
            (Some(_), Some(_), None) => AuthState::TokenExchanged,
            (Some(_), Some(_), Some(_)) => AuthState::CredentialsIssued,
        }
    }

    /// Clear `stage` and every stage downstream of it.
    pub fn truncate_from(&mut self, stage: Stage) {
        if stage <= Stage::Account {
            self.account = None;
        }
        if stage <= Stage::Tokens {
            self.tokens = None;
        }
        self.credentials = None;
    }

    /// API token and account country, for device listing.
    pub fn api_access(&self) -> CloudResult<(String, String)> {
        let tokens = self
            .tokens
            .as_ref()
            .ok_or(AuthError::Unavailable("api token"))?;
        let account = self
            .account
            .as_ref()
            .ok_or(AuthError::Unavailable("account session"))?;
        Ok((tokens.api_token.clone(), account.country.clone()))
    }

    /// Whether `stage` still holds the token identified by `presented`:
    /// the session token, the API token or the access key id.
    pub fn holds(&self, stage: Stage, presented: &str) -> bool {
        match stage {
            Stage::Account => self
                .account
                .as_ref()
                .is_some_and(|a| a.session_token == presented),
            Stage::Tokens => self.tokens.as_ref().is_some_and(|t| t.api_token == presented),
            Stage::Credentials => self
                .credentials
                .as_ref()
                .is_some_and(|c| c.access_key_id == presented),
        }
    }

    pub fn signing_credentials(&self) -> CloudResult<SigningCredentials> {
        self.credentials
            .clone()
            .ok_or_else(|| AuthError::Unavailable("signing credentials").into())
    }
}

/// The three network stages of the chain. Mockable in tests.
#[async_trait]
pub trait AuthBackend: Send + Sync {
    async fn login(&self, username: &str, password_hash: &str) -> CloudResult<AccountSession>;

    async fn exchange(&self, account_username: &str, session_token: &str) -> CloudResult<ExchangedTokens>;

    async fn issue(&self, federation_token: &str) -> CloudResult<SigningCredentials>;
}

/// Production backend talking to the real endpoints.
pub struct HttpAuthBackend {
    account: AccountAuthenticator,
    exchanger: TokenExchanger,
    issuer: CredentialIssuer,
}

impl HttpAuthBackend {
    pub fn new(transport: HttpTransport, config: Arc<CloudConfig>, clock: Arc<dyn Clock>) -> Self {
        Self::with_expiry_reader(transport, config, clock, Arc::new(UnverifiedJwtReader))
    }

    pub fn with_expiry_reader(
        transport: HttpTransport,
        config: Arc<CloudConfig>,
        clock: Arc<dyn Clock>,
        expiry_reader: Arc<dyn ExpiryReader>,
    ) -> Self {
        Self {
            account: AccountAuthenticator::new(transport.clone(), config.clone()),
            exchanger: TokenExchanger::new(transport.clone(), config.clone(), expiry_reader),
            issuer: CredentialIssuer::new(transport, config, clock),
        }
    }
}

#[async_trait]
impl AuthBackend for HttpAuthBackend {
    async fn login(&self, username: &str, password_hash: &str) -> CloudResult<AccountSession> {
        self.account.authenticate(username, password_hash).await
    }

    async fn exchange(&self, account_username: &str, session_token: &str) -> CloudResult<ExchangedTokens> {
        self.exchanger.exchange(account_username, session_token).await
    }

    async fn issue(&self, federation_token: &str) -> CloudResult<SigningCredentials> {
        self.issuer.issue(federation_token).await
    }
}

pub struct Authenticator {
    backend: Arc<dyn AuthBackend>,
    clock: Arc<dyn Clock>,
    username: String,
    password_hash: String,
    chain: Mutex<ChainState>,
}

impl Authenticator {
    /// `password_hash` is the MD5 hex of the password (see [`password_hash`]).
    pub fn new(
        backend: Arc<dyn AuthBackend>,
        clock: Arc<dyn Clock>,
        username: impl Into<String>,
        password_hash: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            clock,
            username: username.into(),
            password_hash: password_hash.into(),
            chain: Mutex::new(ChainState::default()),
        }
    }

    /// Make the whole chain valid, down to signing credentials.
    pub async fn ensure_authenticated(&self) -> CloudResult<ChainState> {
        self.ensure(Stage::Credentials).await
    }

    /// Make the chain valid down to `required`, running only the stages
    /// that are missing or expired. Returns a snapshot of the chain.
    pub async fn ensure(&self, required: Stage) -> CloudResult<ChainState> {
        let mut chain = self.chain.lock().await;
        let now = self.clock.now();

        if chain.account.is_none() {
            tracing::info!("no account session, logging in");
            let result = self.backend.login(&self.username, &self.password_hash).await;
            let session = settle(&mut chain, Stage::Account, result)?;
            chain.truncate_from(Stage::Tokens);
            chain.account = Some(session);
        }

        let tokens_valid = chain.tokens.as_ref().is_some_and(|t| !t.is_expired_at(now));
        if required >= Stage::Tokens && !tokens_valid {
            if chain.tokens.is_some() {
                tracing::info!("federation token expired, exchanging session token");
            }
            let (account_username, session_token) = match chain.account.as_ref() {
                Some(a) => (a.account_username.clone(), a.session_token.clone()),
                None => return Err(AuthError::Unavailable("account session").into()),
            };
            let result = self.backend.exchange(&account_username, &session_token).await;
            let tokens = settle(&mut chain, Stage::Tokens, result)?;
            chain.credentials = None;
            chain.tokens = Some(tokens);
        }

        if required >= Stage::Credentials {
            let credentials_valid = chain
                .credentials
                .as_ref()
                .is_some_and(|c| !c.is_expired_at(now));
            if !credentials_valid {
                if chain.credentials.is_some() {
                    tracing::info!("signing credentials expired, reissuing");
                }
                let federation_token = match chain.tokens.as_ref() {
                    Some(t) => t.federation_token.clone(),
                    None => return Err(AuthError::Unavailable("federation token").into()),
                };
                let result = self.backend.issue(&federation_token).await;
                let credentials = settle(&mut chain, Stage::Credentials, result)?;
                chain.credentials = Some(credentials);
            }
        }

        Ok(chain.clone())
    }

    /// Drop `stage` and everything downstream, e.g. after the service
    /// rejected a token that was believed valid.
    pub async fn invalidate(&self, stage: Stage) {
        tracing::info!(stage = ?stage, "invalidating credential chain");
        self.chain.lock().await.truncate_from(stage);
    }

    /// Drop `stage` and everything downstream after a service rejected the
    /// token identified by `presented`, unless the chain has already moved
    /// on to a newer one. Returns whether anything was dropped.
    pub async fn invalidate_rejected(&self, stage: Stage, presented: &str) -> bool {
        let mut chain = self.chain.lock().await;
        if !chain.holds(stage, presented) {
            tracing::debug!(stage = ?stage, "rejected token already replaced");
            return false;
        }
        tracing::info!(stage = ?stage, "invalidating rejected token");
        chain.truncate_from(stage);
        true
    }

    pub async fn snapshot(&self) -> ChainState {
        self.chain.lock().await.clone()
    }

    pub async fn state(&self) -> AuthState {
        self.chain.lock().await.state()
    }
}

/// Apply the failure policy for `stage` and pass the result through.
///
/// A rejection (401/403) means the token presented to the stage was refused,
/// so the chain is cut at the stage that produced that token. Other auth
/// failures cut at `stage` itself. API failures leave the chain alone.
fn settle<T>(chain: &mut ChainState, stage: Stage, result: CloudResult<T>) -> CloudResult<T> {
    if let Err(e) = &result {
        match e {
            CloudError::Auth(AuthError::Rejected { .. }) => chain.truncate_from(stage.presented_by()),
            CloudError::Auth(_) => chain.truncate_from(stage),
            CloudError::Api(_) => {}
        }
        tracing::warn!(stage = ?stage, error = %e, "credential stage failed");
    }
    result
}
