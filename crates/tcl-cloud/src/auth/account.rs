//! Stage 1: account login (username + password hash → session token).

use std::sync::Arc;

use md5::{Digest, Md5};
use reqwest::Method;
use serde::{Deserialize, Serialize};

use tcl_protocol::credentials::AccountSession;

use crate::config::CloudConfig;
use crate::error::{AuthError, CloudResult};
use crate::transport::{HttpRequest, HttpTransport};

const CONTENT_TYPE: &str = "application/json; charset=UTF-8";

/// Lowercase hex MD5 of the clear-text password, as the login expects it.
pub fn password_hash(password: &str) -> String {
    md5_hex(password)
}

pub(crate) fn md5_hex(input: &str) -> String {
    hex::encode(Md5::digest(input.as_bytes()))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LoginRequest<'a> {
    equipment: u8,
    password: &'a str,
    os_type: u8,
    username: &'a str,
    client_version: &'a str,
    os_version: &'a str,
    device_model: &'a str,
    captcha_rule: u8,
    channel: &'a str,
}

#[derive(Deserialize)]
struct LoginResponse {
    token: Option<String>,
    user: Option<LoginUser>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginUser {
    country_abbr: Option<String>,
    username: Option<String>,
}

pub struct AccountAuthenticator {
    transport: HttpTransport,
    config: Arc<CloudConfig>,
}

impl AccountAuthenticator {
    pub fn new(transport: HttpTransport, config: Arc<CloudConfig>) -> Self {
        Self { transport, config }
    }

    pub async fn authenticate(&self, username: &str, password_hash: &str) -> CloudResult<AccountSession> {
        let app = &self.config.app;
        let url = format!("{}?clientId={}", self.config.login_url, self.config.client_id);
        let body = LoginRequest {
            equipment: 2,
            password: password_hash,
            os_type: 1,
            username,
            client_version: &app.version,
            os_version: "6.0",
            device_model: &app.device_model,
            captcha_rule: 2,
            channel: "app",
        };

        let request = HttpRequest::new(Method::POST, &url)?
            .header("th_platform", app.platform.as_str())
            .header("th_version", app.version.as_str())
            .header("th_appbuild", app.build.as_str())
            .header("user-agent", app.user_agent.as_str())
            .header("content-type", CONTENT_TYPE)
            .json(&body)?;

        tracing::info!("authenticating account");
        let response = self.transport.execute(request).await?.error_for_status()?;
        if response.is_empty() {
            return Err(AuthError::MissingField("token").into());
        }
        let parsed: LoginResponse = response.json()?;

        let session_token = parsed
            .token
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::MissingField("token"))?;
        let user = parsed.user.ok_or(AuthError::MissingField("user"))?;
        let country = user
            .country_abbr
            .filter(|c| !c.is_empty())
            .ok_or(AuthError::MissingField("user.countryAbbr"))?;
        let account_username = user
            .username
            .filter(|u| !u.is_empty())
            .ok_or(AuthError::MissingField("user.username"))?;

        tracing::info!(country = %country, "account authenticated");
        Ok(AccountSession {
            session_token,
            country,
            account_username,
        })
    }
}
