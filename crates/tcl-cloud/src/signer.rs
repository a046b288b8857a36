//! AWS Signature Version 4 for shadow-service requests.
//!
//! [`SigV4`] is a pure, synchronous computation over a prepared
//! [`HttpRequest`]. The rest of the crate only sees [`RequestSigner`];
//! [`BlockingSigner`] runs the computation on the blocking pool.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use tcl_protocol::credentials::SigningCredentials;

use crate::clock::Clock;
use crate::error::{ApiError, CloudResult};
use crate::transport::HttpRequest;

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";
pub const SHADOW_SERVICE: &str = "iotdata";

/// Asynchronous signing capability.
#[async_trait]
pub trait RequestSigner: Send + Sync {
    /// Return `request` with the signature headers added.
    async fn sign(&self, request: HttpRequest, credentials: &SigningCredentials) -> CloudResult<HttpRequest>;
}

#[derive(Debug, Clone)]
pub struct SigV4 {
    region: String,
    service: String,
}

impl SigV4 {
    pub fn new(region: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            service: service.into(),
        }
    }

    /// Headers to add to `request`: `x-amz-date`, `x-amz-security-token`
    /// (when the credentials carry one) and `authorization`.
    pub fn sign(
        &self,
        request: &HttpRequest,
        credentials: &SigningCredentials,
        now: DateTime<Utc>,
    ) -> CloudResult<Vec<(String, String)>> {
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date = now.format("%Y%m%d").to_string();

        let mut added = vec![("x-amz-date".to_string(), amz_date.clone())];
        if !credentials.session_token.is_empty() {
            added.push((
                "x-amz-security-token".to_string(),
                credentials.session_token.clone(),
            ));
        }

        let (canonical, signed_headers) = self.canonical_request(request, &added);
        let scope = format!("{date}/{}/{}/aws4_request", self.region, self.service);
        let string_to_sign = format!(
            "{ALGORITHM}\n{amz_date}\n{scope}\n{}",
            hex::encode(Sha256::digest(canonical.as_bytes()))
        );

        let key = self.signing_key(&credentials.secret_key, &date)?;
        let signature = hex::encode(hmac(&key, string_to_sign.as_bytes())?);

        added.push((
            "authorization".to_string(),
            format!(
                "{ALGORITHM} Credential={}/{scope}, SignedHeaders={signed_headers}, Signature={signature}",
                credentials.access_key_id
            ),
        ));
        Ok(added)
    }

    /// Canonical request text and the `SignedHeaders` list.
    ///
    /// Signs `host`, `content-type` and every `x-amz-*` header. Caller
    /// `x-amz-date` values are replaced by the one in `added`.
    pub fn canonical_request(&self, request: &HttpRequest, added: &[(String, String)]) -> (String, String) {
        let mut headers = BTreeMap::new();
        headers.insert("host".to_string(), request.host());
        for (name, value) in request.headers.iter().chain(added) {
            let name = name.to_ascii_lowercase();
            if name == "content-type" || name.starts_with("x-amz-") {
                headers.insert(name, value.trim().to_string());
            }
        }

        let canonical_headers: String = headers
            .iter()
            .map(|(name, value)| format!("{name}:{value}\n"))
            .collect();
        let signed_headers = headers.keys().cloned().collect::<Vec<_>>().join(";");

        let canonical = format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            request.method.as_str(),
            canonical_uri(request.url.path()),
            canonical_query(request),
            canonical_headers,
            signed_headers,
            hex::encode(Sha256::digest(&request.body)),
        );
        (canonical, signed_headers)
    }

    pub fn signing_key(&self, secret: &str, date: &str) -> CloudResult<Vec<u8>> {
        let k_date = hmac(format!("AWS4{secret}").as_bytes(), date.as_bytes())?;
        let k_region = hmac(&k_date, self.region.as_bytes())?;
        let k_service = hmac(&k_region, self.service.as_bytes())?;
        hmac(&k_service, b"aws4_request")
    }
}

fn hmac(key: &[u8], data: &[u8]) -> CloudResult<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|e| ApiError::Signing(e.to_string()))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Percent-encode everything outside the unreserved set.
fn uri_encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(byte as char),
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

/// The wire path is already encoded; each segment is encoded once more.
fn canonical_uri(path: &str) -> String {
    if path.is_empty() {
        return "/".to_string();
    }
    path.split('/').map(uri_encode).collect::<Vec<_>>().join("/")
}

fn canonical_query(request: &HttpRequest) -> String {
    let mut pairs: Vec<(String, String)> = request
        .url
        .query_pairs()
        .map(|(k, v)| (uri_encode(&k), uri_encode(&v)))
        .collect();
    pairs.sort();
    pairs
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

/// Runs [`SigV4`] on the blocking thread pool, stamped with the injected clock.
pub struct BlockingSigner {
    sigv4: Arc<SigV4>,
    clock: Arc<dyn Clock>,
}

impl BlockingSigner {
    pub fn new(sigv4: SigV4, clock: Arc<dyn Clock>) -> Self {
        Self {
            sigv4: Arc::new(sigv4),
            clock,
        }
    }
}

#[async_trait]
impl RequestSigner for BlockingSigner {
    async fn sign(&self, request: HttpRequest, credentials: &SigningCredentials) -> CloudResult<HttpRequest> {
        let sigv4 = self.sigv4.clone();
        let credentials = credentials.clone();
        let now = self.clock.now();

        tokio::task::spawn_blocking(move || -> CloudResult<HttpRequest> {
            let added = sigv4.sign(&request, &credentials, now)?;
            let mut request = request;
            request
                .headers
                .retain(|(name, _)| !name.eq_ignore_ascii_case("x-amz-date"));
            request.headers.extend(added);
            Ok(request)
        })
        .await
        .map_err(|e| ApiError::Signing(format!("signing task failed: {e}")))?
    }
}
