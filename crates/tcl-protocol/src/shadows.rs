use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Snapshot of a device shadow: reported (from device) and desired (from cloud).
///
/// An empty document (no reported, no desired) is a valid result and means the
/// service has no state recorded for the device yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShadowDocument {
    pub device_id: String,
    #[serde(default)]
    pub reported: Map<String, Value>,
    #[serde(default)]
    pub desired: Map<String, Value>,
    /// Shadow version assigned by the service.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    /// When the service last touched the shadow.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl ShadowDocument {
    pub fn empty(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            reported: Map::new(),
            desired: Map::new(),
            version: None,
            timestamp: None,
        }
    }

    /// Build a document from the service's GET response.
    pub fn from_response(device_id: impl Into<String>, response: ShadowResponse) -> Self {
        let (reported, desired) = match response.state {
            Some(state) => (
                state.reported.unwrap_or_default(),
                state.desired.unwrap_or_default(),
            ),
            None => (Map::new(), Map::new()),
        };
        Self {
            device_id: device_id.into(),
            reported,
            desired,
            version: response.version,
            timestamp: response
                .timestamp
                .and_then(|secs| DateTime::from_timestamp(secs, 0)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.reported.is_empty() && self.desired.is_empty()
    }

    pub fn reported_value(&self, field: &str) -> Option<&Value> {
        self.reported.get(field)
    }

    /// Desired fields the device has not reported yet (pending convergence).
    pub fn delta(&self) -> Map<String, Value> {
        self.desired
            .iter()
            .filter(|(k, v)| self.reported.get(*k) != Some(*v))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// Raw GET-shadow response body.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ShadowResponse {
    #[serde(default)]
    pub state: Option<ShadowStateSection>,
    #[serde(default)]
    pub version: Option<u64>,
    /// Epoch seconds.
    #[serde(default)]
    pub timestamp: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ShadowStateSection {
    #[serde(default)]
    pub reported: Option<Map<String, Value>>,
    #[serde(default)]
    pub desired: Option<Map<String, Value>>,
}

/// Body of a shadow update: a desired-state patch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShadowUpdateRequest {
    pub state: DesiredPatch,
    #[serde(rename = "clientToken")]
    pub client_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DesiredPatch {
    pub desired: Map<String, Value>,
}

impl ShadowUpdateRequest {
    pub fn new(desired: Map<String, Value>, now: DateTime<Utc>) -> Self {
        Self {
            state: DesiredPatch { desired },
            client_token: format!("mobile_{}", now.timestamp_millis()),
        }
    }
}
