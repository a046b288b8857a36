//! Stage 2: session token → API token + federation token.

use std::sync::Arc;

use reqwest::Method;
use serde::{Deserialize, Serialize};

use tcl_protocol::credentials::ExchangedTokens;

use crate::auth::jwt::ExpiryReader;
use crate::config::CloudConfig;
use crate::error::{AuthError, CloudResult};
use crate::transport::{HttpRequest, HttpTransport};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    user_id: &'a str,
    sso_token: &'a str,
    app_id: &'a str,
}

#[derive(Deserialize)]
struct RefreshResponse {
    data: Option<RefreshData>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshData {
    cognito_token: Option<String>,
    saas_token: Option<String>,
}

pub struct TokenExchanger {
    transport: HttpTransport,
    config: Arc<CloudConfig>,
    expiry_reader: Arc<dyn ExpiryReader>,
}

impl TokenExchanger {
    pub fn new(
        transport: HttpTransport,
        config: Arc<CloudConfig>,
        expiry_reader: Arc<dyn ExpiryReader>,
    ) -> Self {
        Self {
            transport,
            config,
            expiry_reader,
        }
    }

    pub async fn exchange(&self, account_username: &str, session_token: &str) -> CloudResult<ExchangedTokens> {
        let body = RefreshRequest {
            user_id: account_username,
            sso_token: session_token,
            app_id: &self.config.app_id,
        };
        let request = HttpRequest::new(Method::POST, &self.config.refresh_tokens_url)?
            .header("user-agent", self.config.app.user_agent.as_str())
            .header("content-type", "application/json")
            .json(&body)?;

        tracing::info!("exchanging session token");
        let response = self.transport.execute(request).await?.error_for_status()?;
        if response.is_empty() {
            return Err(AuthError::MissingField("data").into());
        }
        let data = response
            .json::<RefreshResponse>()?
            .data
            .ok_or(AuthError::MissingField("data"))?;

        let api_token = data
            .saas_token
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::MissingField("data.saasToken"))?;
        let federation_token = data
            .cognito_token
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::MissingField("data.cognitoToken"))?;
        let federation_expiry = self.expiry_reader.read_expiry(&federation_token)?;

        tracing::info!(federation_expiry = %federation_expiry, "session token exchanged");
        Ok(ExchangedTokens {
            api_token,
            federation_token,
            federation_expiry,
        })
    }
}
