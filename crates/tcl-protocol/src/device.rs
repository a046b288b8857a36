use serde::{Deserialize, Serialize};

/// An appliance bound to the account, as returned by the device listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// Thing name used for shadow calls.
    pub id: String,
    /// User-assigned nickname (falls back to `id`).
    pub display_name: String,
    /// Vendor device type, if the listing provided one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_type: Option<String>,
    /// The full listing entry, untouched.
    #[serde(default)]
    pub raw_metadata: serde_json::Value,
}

impl DeviceDescriptor {
    /// Build a descriptor from one raw listing entry.
    ///
    /// Returns `None` when the entry has no usable `deviceId`.
    pub fn from_listing_entry(entry: serde_json::Value) -> Option<Self> {
        let id = entry.get("deviceId")?.as_str()?.trim().to_string();
        if id.is_empty() {
            return None;
        }
        let display_name = entry
            .get("nickName")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .unwrap_or(&id)
            .to_string();
        let device_type = entry
            .get("deviceType")
            .and_then(|v| match v {
                serde_json::Value::String(s) => Some(s.clone()),
                serde_json::Value::Number(n) => Some(n.to_string()),
                _ => None,
            });

        Some(Self {
            id,
            display_name,
            device_type,
            raw_metadata: entry,
        })
    }
}

/// Envelope of the device-listing response.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceListResponse {
    /// Vendor status code; `0` means success.
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub msg: Option<String>,
    /// Listing entries. Absent on some success responses with no devices.
    #[serde(default)]
    pub data: Option<Vec<serde_json::Value>>,
}
