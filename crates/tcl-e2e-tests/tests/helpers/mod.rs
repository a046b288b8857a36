//! Shared test harness for E2E integration tests.
//!
//! Stands up one `MockServer` for every cloud endpoint and wires the real
//! credential chain, signer and shadow client against it, driven by a
//! manual clock so expiry can be crossed on demand.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Value, json};
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

use tcl_cloud::signer::SHADOW_SERVICE;
use tcl_cloud::{
    Authenticator, BlockingSigner, CloudConfig, DeviceShadowClient, HttpAuthBackend,
    HttpTransport, ManualClock, SigV4, password_hash,
};

pub const LOGIN_PATH: &str = "/account/login";
pub const EXCHANGE_PATH: &str = "/v3/auth/refresh_tokens";
pub const IDENTITY_PATH: &str = "/";
pub const THINGS_PATH: &str = "/v3/user/get_things";

/// Federation tokens live one hour from the harness start.
pub const TOKEN_TTL_SECS: i64 = 3600;
/// Signing credentials live thirty minutes from the harness start.
pub const CREDENTIALS_TTL_SECS: i64 = 1800;

pub fn start_time() -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000, 0).unwrap()
}

/// Compact JWT whose payload carries `exp`. The signature is junk.
pub fn federation_token(exp: i64) -> String {
    format!(
        "{}.{}.c2lnbmF0dXJl",
        URL_SAFE_NO_PAD.encode(r#"{"kid":"eu-central-11","typ":"JWS","alg":"RS512"}"#),
        URL_SAFE_NO_PAD.encode(format!(r#"{{"sub":"eu-central-1:abc","exp":{exp}}}"#))
    )
}

/// Real cloud client wired to a mock cloud.
pub struct CloudHarness {
    pub server: MockServer,
    pub clock: Arc<ManualClock>,
    pub client: Arc<DeviceShadowClient>,
}

impl CloudHarness {
    /// Harness with nothing mounted yet.
    pub async fn bare() -> Self {
        let server = MockServer::start().await;
        let clock = Arc::new(ManualClock::new(start_time()));
        let config = Arc::new(CloudConfig::with_base_url(&server.uri()));
        let transport = HttpTransport::new(Duration::from_secs(5)).unwrap();

        let backend = HttpAuthBackend::new(transport.clone(), config.clone(), clock.clone());
        let auth = Authenticator::new(
            Arc::new(backend),
            clock.clone(),
            "user@example.com",
            password_hash("password"),
        );
        let signer = BlockingSigner::new(
            SigV4::new(config.region.clone(), SHADOW_SERVICE),
            clock.clone(),
        );
        let client = DeviceShadowClient::from_parts(
            config,
            transport,
            Arc::new(auth),
            Arc::new(signer),
            clock.clone(),
        );

        Self {
            server,
            clock,
            client: Arc::new(client),
        }
    }

    /// Harness with the three credential endpoints answering successfully.
    pub async fn with_auth_chain() -> Self {
        let harness = Self::bare().await;
        harness.mount_auth_chain().await;
        harness
    }

    pub async fn mount_auth_chain(&self) {
        let exp = start_time().timestamp() + TOKEN_TTL_SECS;
        let expiration_ms = (start_time().timestamp() + CREDENTIALS_TTL_SECS) * 1000;

        Mock::given(method("POST"))
            .and(path(LOGIN_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "token": "sso-token",
                "user": {"countryAbbr": "RO", "username": "u_123456"}
            })))
            .mount(&self.server)
            .await;

        Mock::given(method("POST"))
            .and(path(EXCHANGE_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 0,
                "data": {"cognitoToken": federation_token(exp), "saasToken": "saas-token"}
            })))
            .mount(&self.server)
            .await;

        Mock::given(method("POST"))
            .and(path(IDENTITY_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "IdentityId": "eu-central-1:61e8f839-2d72-c035-a2bf-7ef50a856ddd",
                "Credentials": {
                    "AccessKeyId": "ASIAEXAMPLE",
                    "SecretKey": "secret",
                    "SessionToken": "session-token",
                    "Expiration": expiration_ms
                }
            })))
            .mount(&self.server)
            .await;
    }

    pub async fn mount_listing(&self, body: Value) {
        Mock::given(method("POST"))
            .and(path(THINGS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&self.server)
            .await;
    }

    pub async fn mount_shadow(&self, device_id: &str, response: ResponseTemplate) {
        Mock::given(method("GET"))
            .and(path(format!("/things/{device_id}/shadow")))
            .respond_with(response)
            .mount(&self.server)
            .await;
    }

    /// Shadow GET that answers `response` only `times` times, ahead of any
    /// later-mounted mock for the same path.
    pub async fn mount_shadow_times(&self, device_id: &str, response: ResponseTemplate, times: u64) {
        Mock::given(method("GET"))
            .and(path(format!("/things/{device_id}/shadow")))
            .respond_with(response)
            .up_to_n_times(times)
            .with_priority(1)
            .mount(&self.server)
            .await;
    }

    pub async fn mount_update(&self, device_id: &str) {
        Mock::given(method("POST"))
            .and(path_regex(format!("^/topics/.+aws/things/{device_id}/shadow/update$")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "state": {"desired": {}},
                "version": 2
            })))
            .mount(&self.server)
            .await;
    }

    /// Paths of every request the mock cloud received, in order.
    pub async fn request_paths(&self) -> Vec<String> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .map(|r| r.url.path().to_string())
            .collect()
    }

    pub async fn count(&self, request_path: &str) -> usize {
        self.request_paths()
            .await
            .iter()
            .filter(|p| *p == request_path)
            .count()
    }

    /// Bodies of every request sent to the shadow update path.
    pub async fn update_bodies(&self) -> Vec<Value> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|r| r.url.path().ends_with("/shadow/update"))
            .map(|r| serde_json::from_slice(&r.body).unwrap())
            .collect()
    }
}

pub fn shadow_body(reported: Value, desired: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "state": {"reported": reported, "desired": desired},
        "metadata": {},
        "version": 3,
        "timestamp": 1_700_000_100
    }))
}
