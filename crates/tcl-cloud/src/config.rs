//! Cloud endpoint configuration, loadable from TOML.
//!
//! Defaults are the production EU endpoints; every URL can be overridden
//! (tests point them at a local mock server).

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct CloudConfig {
    /// Account login endpoint (without the `clientId` query).
    #[serde(default = "default_login_url")]
    pub login_url: String,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    /// Session-token → API/federation token exchange endpoint.
    #[serde(default = "default_refresh_tokens_url")]
    pub refresh_tokens_url: String,
    #[serde(default = "default_app_id")]
    pub app_id: String,
    /// Identity-federation (Cognito) endpoint.
    #[serde(default = "default_identity_url")]
    pub identity_url: String,
    /// Fixed identity id presented to the federation service.
    #[serde(default = "default_identity_id")]
    pub identity_id: String,
    /// Device listing endpoint.
    #[serde(default = "default_things_url")]
    pub things_url: String,
    /// Base URL of the shadow service (scheme + host).
    #[serde(default = "default_iot_endpoint")]
    pub iot_endpoint: String,
    /// Signing region of the shadow service.
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub app: AppIdentity,
    /// Per-request HTTP timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// How the client presents itself to the vendor account service.
#[derive(Debug, Clone, Deserialize)]
pub struct AppIdentity {
    #[serde(default = "default_platform")]
    pub platform: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default = "default_build")]
    pub build: String,
    /// App version advertised on device listing calls.
    #[serde(default = "default_listing_version")]
    pub listing_version: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// User agent sent to the shadow service.
    #[serde(default = "default_shadow_user_agent")]
    pub shadow_user_agent: String,
    #[serde(default = "default_device_model")]
    pub device_model: String,
    #[serde(default = "default_language")]
    pub language: String,
}

fn default_login_url() -> String {
    "https://pa.account.tcl.com/account/login".into()
}
fn default_client_id() -> String {
    "54148614".into()
}
fn default_refresh_tokens_url() -> String {
    "https://prod-eu.aws.tcljd.com/v3/auth/refresh_tokens".into()
}
fn default_app_id() -> String {
    "wx6e1af3fa84fbe523".into()
}
fn default_identity_url() -> String {
    "https://cognito-identity.eu-central-1.amazonaws.com/".into()
}
fn default_identity_id() -> String {
    "eu-central-1:61e8f839-2d72-c035-a2bf-7ef50a856ddd".into()
}
fn default_things_url() -> String {
    "https://prod-eu.aws.tcljd.com/v3/user/get_things".into()
}
fn default_iot_endpoint() -> String {
    "https://a2qjkbbsk6qn2u-ats.iot.eu-central-1.amazonaws.com".into()
}
fn default_region() -> String {
    "eu-central-1".into()
}
fn default_timeout_secs() -> u64 {
    15
}
fn default_platform() -> String {
    "android".into()
}
fn default_version() -> String {
    "4.8.1".into()
}
fn default_build() -> String {
    "830".into()
}
fn default_listing_version() -> String {
    "5.4.1".into()
}
fn default_user_agent() -> String {
    "Android".into()
}
fn default_shadow_user_agent() -> String {
    "aws-sdk-iOS/2.26.2 iOS/18.4.1 en_RO".into()
}
fn default_device_model() -> String {
    "Android SDK built for x86".into()
}
fn default_language() -> String {
    "en".into()
}

impl Default for AppIdentity {
    fn default() -> Self {
        Self {
            platform: default_platform(),
            version: default_version(),
            build: default_build(),
            listing_version: default_listing_version(),
            user_agent: default_user_agent(),
            shadow_user_agent: default_shadow_user_agent(),
            device_model: default_device_model(),
            language: default_language(),
        }
    }
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            login_url: default_login_url(),
            client_id: default_client_id(),
            refresh_tokens_url: default_refresh_tokens_url(),
            app_id: default_app_id(),
            identity_url: default_identity_url(),
            identity_id: default_identity_id(),
            things_url: default_things_url(),
            iot_endpoint: default_iot_endpoint(),
            region: default_region(),
            app: AppIdentity::default(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl CloudConfig {
    /// Point every endpoint at one base URL (local development and tests).
    pub fn with_base_url(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            login_url: format!("{base}/account/login"),
            refresh_tokens_url: format!("{base}/v3/auth/refresh_tokens"),
            identity_url: format!("{base}/"),
            things_url: format!("{base}/v3/user/get_things"),
            iot_endpoint: base.to_string(),
            ..Self::default()
        }
    }

    /// Shadow endpoint without a trailing slash.
    pub fn iot_base(&self) -> &str {
        self.iot_endpoint.trim_end_matches('/')
    }
}
