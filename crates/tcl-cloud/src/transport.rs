//! HTTP transport shared by every cloud call.
//!
//! Requests are built as plain [`HttpRequest`] values first so the signer can
//! see the exact method, URL, headers and body before anything is sent.

use std::time::Duration;

use reqwest::{Method, Url};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{ApiError, AuthError, CloudResult};

/// Longest body excerpt carried in error messages.
const BODY_EXCERPT: usize = 200;

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpRequest {
    pub fn new(method: Method, url: &str) -> CloudResult<Self> {
        let url = Url::parse(url).map_err(|e| ApiError::Request(format!("{url}: {e}")))?;
        Ok(Self {
            method,
            url,
            headers: Vec::new(),
            body: Vec::new(),
        })
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn json<T: Serialize>(mut self, body: &T) -> CloudResult<Self> {
        self.body = serde_json::to_vec(body).map_err(|e| ApiError::Request(e.to_string()))?;
        Ok(self)
    }

    /// Value the `Host` header will carry on the wire.
    pub fn host(&self) -> String {
        let host = self.url.host_str().unwrap_or_default();
        match self.url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        }
    }

    /// Short label for logs and errors (no query string).
    pub fn endpoint(&self) -> String {
        format!("{}{}", self.host(), self.url.path())
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
    pub endpoint: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// True when the body is absent or whitespace only.
    pub fn is_empty(&self) -> bool {
        self.body.iter().all(u8::is_ascii_whitespace)
    }

    pub fn excerpt(&self) -> String {
        String::from_utf8_lossy(&self.body).chars().take(BODY_EXCERPT).collect()
    }

    pub fn json<T: DeserializeOwned>(&self) -> CloudResult<T> {
        serde_json::from_slice(&self.body).map_err(|e| {
            ApiError::Decode(format!("{}: {e}: {}", self.endpoint, self.excerpt())).into()
        })
    }

    /// Map 401/403 to [`AuthError::Rejected`] and other non-2xx to [`ApiError::Status`].
    pub fn error_for_status(self) -> CloudResult<Self> {
        match self.status {
            200..=299 => Ok(self),
            401 | 403 => Err(AuthError::Rejected {
                endpoint: self.endpoint,
                status: self.status,
            }
            .into()),
            status => Err(ApiError::Status {
                endpoint: self.endpoint.clone(),
                status,
                body: self.excerpt(),
            }
            .into()),
        }
    }
}

/// reqwest-backed transport. Cheap to clone (shares the connection pool).
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> CloudResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Request(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Send the request. Only connection-level failures are errors here;
    /// status handling is left to the caller.
    pub async fn execute(&self, request: HttpRequest) -> CloudResult<HttpResponse> {
        let endpoint = request.endpoint();
        tracing::debug!(method = %request.method, endpoint = %endpoint, "sending request");

        let mut builder = self.client.request(request.method, request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !request.body.is_empty() {
            builder = builder.body(request.body);
        }

        let response = builder.send().await.map_err(|e| transport_error(&endpoint, e))?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| transport_error(&endpoint, e))?
            .to_vec();

        tracing::debug!(endpoint = %endpoint, status, bytes = body.len(), "response received");
        Ok(HttpResponse {
            status,
            body,
            endpoint,
        })
    }
}

fn transport_error(endpoint: &str, e: reqwest::Error) -> ApiError {
    if e.is_timeout() {
        ApiError::Timeout(endpoint.to_string())
    } else {
        ApiError::Connection(format!("{endpoint}: {e}"))
    }
}
