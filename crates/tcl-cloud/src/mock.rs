//! Test doubles for the credential chain.
//!
//! [`ManualClock`] lets tests move time forward across expiry boundaries and
//! [`MockAuthBackend`] records every stage call and can be scripted to fail.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use tcl_protocol::credentials::{AccountSession, ExchangedTokens, SigningCredentials};

use crate::auth::{AuthBackend, Stage};
use crate::clock::Clock;
use crate::error::{ApiError, AuthError, CloudError, CloudResult};

/// Clock that only moves when told to.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap() = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

/// Failure a scripted stage call returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    /// The endpoint refused the presented token (HTTP 401).
    Rejected,
    /// A required field was absent from the response.
    MissingField,
    /// Transient failure (timeout).
    Api,
}

impl MockFailure {
    fn into_error(self, stage: Stage) -> CloudError {
        match self {
            MockFailure::Rejected => AuthError::Rejected {
                endpoint: format!("mock/{stage:?}"),
                status: 401,
            }
            .into(),
            MockFailure::MissingField => AuthError::MissingField("mock field").into(),
            MockFailure::Api => ApiError::Timeout(format!("mock/{stage:?}")).into(),
        }
    }
}

/// In-memory [`AuthBackend`].
///
/// Each successful call returns fresh values numbered by how many times the
/// stage has succeeded (`api-1`, `api-2`, ...). Federation tokens expire
/// `token_ttl` after issuance and signing credentials `credentials_ttl` after.
pub struct MockAuthBackend {
    clock: Arc<dyn Clock>,
    token_ttl: Duration,
    credentials_ttl: Duration,
    calls: Mutex<Vec<Stage>>,
    issued: Mutex<HashMap<Stage, usize>>,
    failures: Mutex<Vec<(Stage, MockFailure)>>,
    delay: Mutex<Option<StdDuration>>,
}

impl MockAuthBackend {
    pub fn new(clock: Arc<dyn Clock>, token_ttl: Duration, credentials_ttl: Duration) -> Self {
        Self {
            clock,
            token_ttl,
            credentials_ttl,
            calls: Mutex::new(Vec::new()),
            issued: Mutex::new(HashMap::new()),
            failures: Mutex::new(Vec::new()),
            delay: Mutex::new(None),
        }
    }

    /// Every stage call so far, in order.
    pub fn calls(&self) -> Vec<Stage> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, stage: Stage) -> usize {
        self.calls.lock().unwrap().iter().filter(|s| **s == stage).count()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    /// Make the next call to `stage` fail with `failure`.
    pub fn fail_next(&self, stage: Stage, failure: MockFailure) {
        self.failures.lock().unwrap().push((stage, failure));
    }

    /// Hold every call for `delay` before answering.
    pub fn set_delay(&self, delay: StdDuration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    /// Record the call, wait out the delay, and pop any scripted failure.
    /// Returns the success number for this stage.
    async fn enter(&self, stage: Stage) -> CloudResult<usize> {
        self.calls.lock().unwrap().push(stage);
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let failure = {
            let mut failures = self.failures.lock().unwrap();
            failures
                .iter()
                .position(|(s, _)| *s == stage)
                .map(|i| failures.remove(i).1)
        };
        if let Some(f) = failure {
            return Err(f.into_error(stage));
        }
        let mut issued = self.issued.lock().unwrap();
        let n = issued.entry(stage).or_insert(0);
        *n += 1;
        Ok(*n)
    }
}

#[async_trait]
impl AuthBackend for MockAuthBackend {
    async fn login(&self, username: &str, _password_hash: &str) -> CloudResult<AccountSession> {
        let n = self.enter(Stage::Account).await?;
        Ok(AccountSession {
            session_token: format!("session-{n}"),
            country: "RO".into(),
            account_username: format!("{username}-account"),
        })
    }

    async fn exchange(&self, _account_username: &str, _session_token: &str) -> CloudResult<ExchangedTokens> {
        let n = self.enter(Stage::Tokens).await?;
        Ok(ExchangedTokens {
            api_token: format!("api-{n}"),
            federation_token: format!("fed-{n}"),
            federation_expiry: self.clock.now() + self.token_ttl,
        })
    }

    async fn issue(&self, _federation_token: &str) -> CloudResult<SigningCredentials> {
        let n = self.enter(Stage::Credentials).await?;
        Ok(SigningCredentials {
            access_key_id: format!("AKID-{n}"),
            secret_key: format!("secret-{n}"),
            session_token: format!("token-{n}"),
            expiry: self.clock.now() + self.credentials_ttl,
        })
    }
}
