use async_trait::async_trait;

use tcl_cloud::{CloudResult, DeviceShadowClient};
use tcl_protocol::shadows::ShadowDocument;

/// Where the coordinator fetches shadows from.
#[async_trait]
pub trait ShadowSource: Send + Sync {
    async fn fetch_shadow(&self, device_id: &str) -> CloudResult<ShadowDocument>;
}

#[async_trait]
impl ShadowSource for DeviceShadowClient {
    async fn fetch_shadow(&self, device_id: &str) -> CloudResult<ShadowDocument> {
        self.get_shadow(device_id).await
    }
}
