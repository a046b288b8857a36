//! Device listing and shadow access on top of the credential chain.
//!
//! Every operation first asks the [`Authenticator`] for the stage it needs,
//! then builds, signs and sends its request. A 401/403 from a service drops
//! the token that service was shown, so the next call refreshes it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use reqwest::Method;
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use uuid::Uuid;

use tcl_protocol::device::{DeviceDescriptor, DeviceListResponse};
use tcl_protocol::shadows::{ShadowDocument, ShadowResponse, ShadowUpdateRequest};

use crate::auth::account::md5_hex;
use crate::auth::{Authenticator, HttpAuthBackend, Stage, password_hash};
use crate::clock::{Clock, SystemClock};
use crate::commands::{self, FreshAirCommand};
use crate::config::CloudConfig;
use crate::error::{ApiError, CloudResult};
use crate::signer::{BlockingSigner, RequestSigner, SHADOW_SERVICE, SigV4};
use crate::transport::{HttpRequest, HttpResponse, HttpTransport};

const LISTING_CONTENT_TYPE: &str = "application/json; charset=UTF-8";
const SHADOW_CONTENT_TYPE: &str = "application/x-amz-json-1.0";

pub struct DeviceShadowClient {
    config: Arc<CloudConfig>,
    transport: HttpTransport,
    auth: Arc<Authenticator>,
    signer: Arc<dyn RequestSigner>,
    clock: Arc<dyn Clock>,
    devices: Mutex<Option<Vec<DeviceDescriptor>>>,
    device_locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl DeviceShadowClient {
    /// Production wiring: real endpoints, system clock, SigV4 signing.
    pub fn new(config: CloudConfig, username: &str, password: &str) -> CloudResult<Self> {
        let config = Arc::new(config);
        let transport = HttpTransport::new(Duration::from_secs(config.timeout_secs))?;
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let backend = HttpAuthBackend::new(transport.clone(), config.clone(), clock.clone());
        let auth = Authenticator::new(
            Arc::new(backend),
            clock.clone(),
            username,
            password_hash(password),
        );
        let signer = BlockingSigner::new(SigV4::new(config.region.clone(), SHADOW_SERVICE), clock.clone());
        Ok(Self::from_parts(
            config,
            transport,
            Arc::new(auth),
            Arc::new(signer),
            clock,
        ))
    }

    pub fn from_parts(
        config: Arc<CloudConfig>,
        transport: HttpTransport,
        auth: Arc<Authenticator>,
        signer: Arc<dyn RequestSigner>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            transport,
            auth,
            signer,
            clock,
            devices: Mutex::new(None),
            device_locks: StdMutex::new(HashMap::new()),
        }
    }

    pub fn authenticator(&self) -> &Arc<Authenticator> {
        &self.auth
    }

    /// Devices bound to the account. Fetched once, then served from cache.
    pub async fn list_devices(&self) -> CloudResult<Vec<DeviceDescriptor>> {
        let mut cache = self.devices.lock().await;
        if let Some(devices) = cache.as_ref() {
            return Ok(devices.clone());
        }
        let devices = self.fetch_devices().await?;
        *cache = Some(devices.clone());
        Ok(devices)
    }

    /// Re-fetch the listing and replace the cache.
    pub async fn refresh_devices(&self) -> CloudResult<Vec<DeviceDescriptor>> {
        let mut cache = self.devices.lock().await;
        let devices = self.fetch_devices().await?;
        *cache = Some(devices.clone());
        Ok(devices)
    }

    pub async fn find_device(&self, device_id: &str) -> CloudResult<Option<DeviceDescriptor>> {
        Ok(self
            .list_devices()
            .await?
            .into_iter()
            .find(|d| d.id == device_id))
    }

    async fn fetch_devices(&self) -> CloudResult<Vec<DeviceDescriptor>> {
        let chain = self.auth.ensure(Stage::Tokens).await?;
        let (api_token, country) = chain.api_access()?;

        let app = &self.config.app;
        let timestamp = self.clock.now().timestamp_millis().to_string();
        let nonce = Uuid::new_v4().simple().to_string();
        let sign = md5_hex(&format!("{timestamp}{nonce}{api_token}"));

        let request = HttpRequest::new(Method::POST, &self.config.things_url)?
            .header("platform", app.platform.as_str())
            .header("appversion", app.listing_version.as_str())
            .header("thomeversion", app.version.as_str())
            .header("accesstoken", api_token.as_str())
            .header("countrycode", country)
            .header("accept-language", app.language.as_str())
            .header("timestamp", timestamp)
            .header("nonce", nonce)
            .header("sign", sign)
            .header("user-agent", app.user_agent.as_str())
            .header("content-type", LISTING_CONTENT_TYPE)
            .json(&serde_json::json!({}))?;

        tracing::info!("fetching device listing");
        let response = self.transport.execute(request).await?;
        let response = self.check(response, Stage::Tokens, &api_token).await?;
        if response.is_empty() {
            return Err(ApiError::Decode(format!("{}: empty device listing", response.endpoint)).into());
        }
        let listing: DeviceListResponse = response.json()?;

        let entries = match listing.data {
            Some(entries) => entries,
            None if listing.code == Some(0) => {
                tracing::warn!("device listing succeeded without data, assuming no devices");
                Vec::new()
            }
            None => {
                return Err(ApiError::Decode(format!(
                    "device listing has no data (code {:?}, msg {:?})",
                    listing.code, listing.msg
                ))
                .into());
            }
        };

        let devices: Vec<DeviceDescriptor> = entries
            .into_iter()
            .filter_map(|entry| {
                let parsed = DeviceDescriptor::from_listing_entry(entry);
                if parsed.is_none() {
                    tracing::warn!("skipping device listing entry without deviceId");
                }
                parsed
            })
            .collect();
        tracing::info!(count = devices.len(), "device listing fetched");
        Ok(devices)
    }

    /// Current shadow. A device the service holds no shadow for yields an
    /// empty document.
    pub async fn get_shadow(&self, device_id: &str) -> CloudResult<ShadowDocument> {
        let lock = self.device_lock(device_id);
        let _guard = lock.lock().await;

        let url = format!("{}/things/{device_id}/shadow", self.config.iot_base());
        let request = HttpRequest::new(Method::GET, &url)?
            .header("content-type", SHADOW_CONTENT_TYPE)
            .header("user-agent", self.config.app.shadow_user_agent.as_str());

        tracing::debug!(device_id = %device_id, "fetching shadow");
        let (response, access_key_id) = self.send_signed(request).await?;
        if response.status == 404 || (response.is_success() && response.is_empty()) {
            tracing::debug!(device_id = %device_id, "no shadow recorded");
            return Ok(ShadowDocument::empty(device_id));
        }
        let response = self.check(response, Stage::Credentials, &access_key_id).await?;
        let parsed: ShadowResponse = response.json()?;
        Ok(ShadowDocument::from_response(device_id, parsed))
    }

    /// Merge `desired` into the shadow's desired section.
    ///
    /// Success means the cloud accepted the patch; whether the device applied
    /// it shows up in a later [`get_shadow`](Self::get_shadow).
    pub async fn update_shadow(&self, device_id: &str, desired: Map<String, Value>) -> CloudResult<()> {
        let lock = self.device_lock(device_id);
        let _guard = lock.lock().await;

        let url = format!(
            "{}/topics/%24aws/things/{device_id}/shadow/update?qos=0",
            self.config.iot_base()
        );
        let fields: Vec<String> = desired.keys().cloned().collect();
        tracing::info!(device_id = %device_id, fields = ?fields, "updating desired state");

        let body = ShadowUpdateRequest::new(desired, self.clock.now());
        let request = HttpRequest::new(Method::POST, &url)?
            .header("content-type", SHADOW_CONTENT_TYPE)
            .header("user-agent", self.config.app.shadow_user_agent.as_str())
            .json(&body)?;

        let (response, access_key_id) = self.send_signed(request).await?;
        self.check(response, Stage::Credentials, &access_key_id).await?;
        Ok(())
    }

    pub async fn set_power(&self, device_id: &str, on: bool) -> CloudResult<()> {
        self.update_shadow(device_id, commands::power_patch(on)).await
    }

    pub async fn set_target_temperature(&self, device_id: &str, celsius: f64) -> CloudResult<()> {
        self.update_shadow(device_id, commands::target_temperature_patch(celsius))
            .await
    }

    /// Returns `false` without calling the service when `command` is empty.
    pub async fn set_fresh_air(&self, device_id: &str, command: &FreshAirCommand) -> CloudResult<bool> {
        match command.patch() {
            Some(patch) => {
                self.update_shadow(device_id, patch).await?;
                Ok(true)
            }
            None => {
                tracing::warn!(device_id = %device_id, "empty fresh air command, nothing sent");
                Ok(false)
            }
        }
    }

    /// Sign and send. Also returns the access key id the request was signed with.
    async fn send_signed(&self, request: HttpRequest) -> CloudResult<(HttpResponse, String)> {
        let credentials = self.auth.ensure_authenticated().await?.signing_credentials()?;
        let request = self.signer.sign(request, &credentials).await?;
        let response = self.transport.execute(request).await?;
        Ok((response, credentials.access_key_id))
    }

    /// Status check that also drops the rejected token from the chain.
    /// `presented` identifies the token of `stage` the request carried.
    async fn check(&self, response: HttpResponse, stage: Stage, presented: &str) -> CloudResult<HttpResponse> {
        match response.error_for_status() {
            Err(e) if e.is_rejection() => {
                tracing::warn!(error = %e, "request rejected, dropping credentials");
                self.auth.invalidate_rejected(stage, presented).await;
                Err(e)
            }
            other => other,
        }
    }

    /// Lock serializing operations on one device. Locks nobody holds are
    /// pruned here, so the map only tracks devices with operations running.
    fn device_lock(&self, device_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.device_locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks.entry(device_id.to_string()).or_default().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthState;
    use crate::error::CloudError;
    use crate::mock::{ManualClock, MockAuthBackend};
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use wiremock::matchers::{
        body_partial_json, header, header_exists, method, path, path_regex, query_param,
    };
    use wiremock::{Mock, MockServer, Request, ResponseTemplate};

    async fn client_for(server: &MockServer) -> DeviceShadowClient {
        let clock = Arc::new(ManualClock::new(Utc.timestamp_opt(1_700_000_000, 0).unwrap()));
        let backend = Arc::new(MockAuthBackend::new(
            clock.clone(),
            chrono::Duration::hours(1),
            chrono::Duration::hours(1),
        ));
        let auth = Arc::new(Authenticator::new(backend, clock.clone(), "user", "hash"));
        let config = Arc::new(CloudConfig::with_base_url(&server.uri()));
        let signer = Arc::new(BlockingSigner::new(
            SigV4::new(config.region.clone(), SHADOW_SERVICE),
            clock.clone(),
        ));
        DeviceShadowClient::from_parts(
            config,
            HttpTransport::new(Duration::from_secs(2)).unwrap(),
            auth,
            signer,
            clock,
        )
    }

    fn listing_sign_is_valid(req: &Request) -> bool {
        let get = |name: &str| {
            req.headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string()
        };
        let expected = md5_hex(&format!("{}{}{}", get("timestamp"), get("nonce"), "api-1"));
        get("nonce").len() == 32 && get("sign") == expected
    }

    #[tokio::test]
    async fn list_devices_signs_and_caches() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v3/user/get_things"))
            .and(header("accesstoken", "api-1"))
            .and(header("countrycode", "RO"))
            .and(header("appversion", "5.4.1"))
            .and(header("timestamp", "1700000000000"))
            .and(listing_sign_is_valid)
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 0,
                "data": [
                    {"deviceId": "ac-1", "nickName": "Bedroom", "deviceType": "AC"},
                    {"nickName": "orphan"},
                    {"deviceId": "ac-2"}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let devices = client.list_devices().await.unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].display_name, "Bedroom");
        assert_eq!(devices[1].display_name, "ac-2");

        let again = client.list_devices().await.unwrap();
        assert_eq!(again, devices);
        assert!(client.find_device("ac-2").await.unwrap().is_some());
        assert!(client.find_device("nope").await.unwrap().is_none());
        assert_eq!(client.authenticator().state().await, AuthState::TokenExchanged);
    }

    #[tokio::test]
    async fn empty_listing_is_not_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"code": 0, "data": []})))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        assert!(client.list_devices().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn success_code_without_data_is_empty() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"code": 0, "msg": "ok"})))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        assert!(client.list_devices().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn malformed_listing_is_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"code": 1, "msg": "bad sign"})))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let err = client.list_devices().await.unwrap_err();
        assert!(matches!(err, CloudError::Api(ApiError::Decode(_))));
    }

    #[tokio::test]
    async fn rejected_listing_drops_api_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        assert!(client.list_devices().await.unwrap_err().is_rejection());
        assert_eq!(
            client.authenticator().state().await,
            AuthState::AccountAuthenticated
        );
    }

    #[tokio::test]
    async fn refresh_devices_refetches() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": [{"deviceId": "ac-1"}]})))
            .expect(2)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        client.list_devices().await.unwrap();
        assert_eq!(client.refresh_devices().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn get_shadow_is_signed_and_parsed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/things/ac-1/shadow"))
            .and(header("content-type", SHADOW_CONTENT_TYPE))
            .and(header("x-amz-security-token", "token-1"))
            .and(header_exists("authorization"))
            .and(header_exists("x-amz-date"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "state": {
                    "reported": {"powerSwitch": 1, "targetTemperature": 23},
                    "desired": {"targetTemperature": 24}
                },
                "version": 7
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let doc = client.get_shadow("ac-1").await.unwrap();
        assert_eq!(doc.reported_value("powerSwitch"), Some(&json!(1)));
        assert_eq!(doc.version, Some(7));
        assert_eq!(doc.delta().len(), 1);
    }

    #[tokio::test]
    async fn missing_shadow_is_empty_document() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/things/ac-404/shadow"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({"message": "No shadow exists"})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/things/ac-empty/shadow"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let doc = client.get_shadow("ac-404").await.unwrap();
        assert!(doc.is_empty());
        assert_eq!(doc.device_id, "ac-404");
        assert!(client.get_shadow("ac-empty").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rejected_shadow_drops_only_signing_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        assert!(client.get_shadow("ac-1").await.unwrap_err().is_rejection());
        assert_eq!(client.authenticator().state().await, AuthState::TokenExchanged);
    }

    #[tokio::test]
    async fn shadow_server_error_keeps_chain() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let err = client.get_shadow("ac-1").await.unwrap_err();
        assert!(!err.is_auth());
        assert_eq!(
            client.authenticator().state().await,
            AuthState::CredentialsIssued
        );
    }

    #[tokio::test]
    async fn update_shadow_posts_desired_patch() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path_regex(r"^/topics/.+aws/things/ac-1/shadow/update$"))
            .and(query_param("qos", "0"))
            .and(header_exists("authorization"))
            .and(body_partial_json(json!({
                "state": {"desired": {"powerSwitch": 0, "verticalDirection": 8, "horizontalDirection": 8}},
                "clientToken": "mobile_1700000000000"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"state": {}})))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        client.set_power("ac-1", false).await.unwrap();
    }

    #[tokio::test]
    async fn empty_fresh_air_command_sends_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let sent = client
            .set_fresh_air("ac-1", &FreshAirCommand::default())
            .await
            .unwrap();
        assert!(!sent);
    }

    #[tokio::test]
    async fn same_device_shares_one_lock() {
        let server = MockServer::start().await;
        let client = client_for(&server).await;
        assert!(Arc::ptr_eq(&client.device_lock("a"), &client.device_lock("a")));
        assert!(!Arc::ptr_eq(&client.device_lock("a"), &client.device_lock("b")));
    }

    #[tokio::test]
    async fn idle_device_locks_are_pruned() {
        let server = MockServer::start().await;
        let client = client_for(&server).await;

        let held = client.device_lock("a");
        drop(client.device_lock("b"));
        let _c = client.device_lock("c");

        let locks = client.device_locks.lock().unwrap();
        assert!(locks.contains_key("a"));
        assert!(!locks.contains_key("b"));
        assert!(locks.contains_key("c"));
        drop(locks);
        assert!(Arc::ptr_eq(&held, &client.device_lock("a")));
    }

    #[tokio::test]
    async fn concurrent_rejections_reissue_credentials_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/things/ac-1/shadow"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/things/ac-2/shadow"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"state": {}})))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let first = client.authenticator().ensure_authenticated().await.unwrap();
        let stale = first.credentials.unwrap().access_key_id;

        // One rejection is handled and the next call reissues credentials.
        assert!(client.get_shadow("ac-1").await.unwrap_err().is_rejection());
        client.get_shadow("ac-2").await.unwrap();
        let reissued = client.authenticator().snapshot().await.credentials.unwrap();
        assert_ne!(reissued.access_key_id, stale);

        // A rejection of the old key reported late leaves the new one alone.
        let response = HttpResponse {
            status: 403,
            body: Vec::new(),
            endpoint: "things/ac-3/shadow".into(),
        };
        assert!(client.check(response, Stage::Credentials, &stale).await.is_err());
        assert_eq!(
            client.authenticator().snapshot().await.credentials,
            Some(reissued)
        );
    }
}
