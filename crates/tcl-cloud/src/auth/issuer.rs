//! Stage 3: federation token → temporary signing credentials.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::Deserialize;

use tcl_protocol::credentials::SigningCredentials;

use crate::clock::Clock;
use crate::config::CloudConfig;
use crate::error::{AuthError, CloudResult};
use crate::transport::{HttpRequest, HttpTransport};

const TARGET: &str = "AWSCognitoIdentityService.GetCredentialsForIdentity";
const CONTENT_TYPE: &str = "application/x-amz-json-1.1";
const LOGIN_PROVIDER: &str = "cognito-identity.amazonaws.com";

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GetCredentialsResponse {
    credentials: Option<RawCredentials>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawCredentials {
    access_key_id: Option<String>,
    secret_key: Option<String>,
    session_token: Option<String>,
    expiration: Option<f64>,
}

/// Convert the service's millisecond `Expiration` to an instant.
pub fn expiry_from_millis(millis: f64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis as i64)
}

pub struct CredentialIssuer {
    transport: HttpTransport,
    config: Arc<CloudConfig>,
    clock: Arc<dyn Clock>,
}

impl CredentialIssuer {
    pub fn new(transport: HttpTransport, config: Arc<CloudConfig>, clock: Arc<dyn Clock>) -> Self {
        Self {
            transport,
            config,
            clock,
        }
    }

    /// The caller is responsible for checking that `federation_token` is unexpired.
    pub async fn issue(&self, federation_token: &str) -> CloudResult<SigningCredentials> {
        let body = serde_json::json!({
            "IdentityId": self.config.identity_id,
            "Logins": { LOGIN_PROVIDER: federation_token },
        });
        let amz_date = self.clock.now().format("%Y%m%dT%H%M%SZ").to_string();
        let request = HttpRequest::new(Method::POST, &self.config.identity_url)?
            .header("x-amz-target", TARGET)
            .header("content-type", CONTENT_TYPE)
            .header("x-amz-date", amz_date)
            .json(&body)?;

        tracing::info!("requesting signing credentials");
        let response = self.transport.execute(request).await?;

        // The identity service reports a refused login as 400 NotAuthorizedException.
        if response.status == 400 && response.excerpt().contains("NotAuthorizedException") {
            return Err(AuthError::Rejected {
                endpoint: response.endpoint,
                status: 400,
            }
            .into());
        }
        let response = response.error_for_status()?;
        if response.is_empty() {
            return Err(AuthError::MissingField("Credentials").into());
        }

        let raw = response
            .json::<GetCredentialsResponse>()?
            .credentials
            .ok_or(AuthError::MissingField("Credentials"))?;

        let access_key_id = raw
            .access_key_id
            .filter(|s| !s.is_empty())
            .ok_or(AuthError::MissingField("Credentials.AccessKeyId"))?;
        let secret_key = raw
            .secret_key
            .filter(|s| !s.is_empty())
            .ok_or(AuthError::MissingField("Credentials.SecretKey"))?;
        let session_token = raw
            .session_token
            .filter(|s| !s.is_empty())
            .ok_or(AuthError::MissingField("Credentials.SessionToken"))?;
        let expiry = raw
            .expiration
            .and_then(expiry_from_millis)
            .ok_or(AuthError::MissingField("Credentials.Expiration"))?;

        tracing::info!(access_key_id = %access_key_id, expiry = %expiry, "signing credentials issued");
        Ok(SigningCredentials {
            access_key_id,
            secret_key,
            session_token,
            expiry,
        })
    }
}
