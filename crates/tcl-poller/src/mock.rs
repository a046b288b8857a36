//! Mock shadow source for testing the coordinator without a cloud.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};

use tcl_cloud::{ApiError, AuthError, CloudError, CloudResult};
use tcl_protocol::shadows::ShadowDocument;

use crate::source::ShadowSource;

/// Serves a settable shadow per device and records every fetch.
///
/// Devices with no shadow set get an empty document. Scripted failures are
/// consumed one per fetch before the shadow is served again.
pub struct MockShadowSource {
    shadows: Mutex<HashMap<String, ShadowDocument>>,
    failures: Mutex<HashMap<String, VecDeque<bool>>>,
    fetches: Mutex<Vec<String>>,
    delay: Mutex<Option<Duration>>,
}

impl MockShadowSource {
    pub fn new() -> Self {
        Self {
            shadows: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
            fetches: Mutex::new(Vec::new()),
            delay: Mutex::new(None),
        }
    }

    pub fn set_shadow(&self, shadow: ShadowDocument) {
        self.shadows
            .lock()
            .unwrap()
            .insert(shadow.device_id.clone(), shadow);
    }

    /// Replace the reported section of a device's shadow.
    pub fn set_reported(&self, device_id: &str, reported: Map<String, Value>) {
        let mut shadows = self.shadows.lock().unwrap();
        let doc = shadows
            .entry(device_id.to_string())
            .or_insert_with(|| ShadowDocument::empty(device_id));
        doc.reported = reported;
    }

    /// Fail the next fetch for `device_id` with a timeout.
    pub fn fail_next(&self, device_id: &str) {
        self.push_failure(device_id, false);
    }

    /// Fail the next fetch for `device_id` with a credential rejection.
    pub fn reject_next(&self, device_id: &str) {
        self.push_failure(device_id, true);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn fetch_count(&self, device_id: &str) -> usize {
        self.fetches
            .lock()
            .unwrap()
            .iter()
            .filter(|d| *d == device_id)
            .count()
    }

    fn push_failure(&self, device_id: &str, auth: bool) {
        self.failures
            .lock()
            .unwrap()
            .entry(device_id.to_string())
            .or_default()
            .push_back(auth);
    }
}

impl Default for MockShadowSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ShadowSource for MockShadowSource {
    async fn fetch_shadow(&self, device_id: &str) -> CloudResult<ShadowDocument> {
        self.fetches.lock().unwrap().push(device_id.to_string());
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let failure = self
            .failures
            .lock()
            .unwrap()
            .get_mut(device_id)
            .and_then(VecDeque::pop_front);
        match failure {
            Some(true) => Err(CloudError::from(AuthError::Rejected {
                endpoint: format!("mock/things/{device_id}/shadow"),
                status: 403,
            })),
            Some(false) => Err(ApiError::Timeout(format!("mock/things/{device_id}/shadow")).into()),
            None => Ok(self
                .shadows
                .lock()
                .unwrap()
                .get(device_id)
                .cloned()
                .unwrap_or_else(|| ShadowDocument::empty(device_id))),
        }
    }
}
