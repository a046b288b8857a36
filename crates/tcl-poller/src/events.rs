//! Notifications broadcast by the coordinator.

use std::sync::Arc;

use tcl_protocol::shadows::ShadowDocument;

#[derive(Debug, Clone)]
pub enum PollEvent {
    /// A fetch succeeded; `shadow` replaces the previous snapshot.
    Updated {
        device_id: String,
        shadow: Arc<ShadowDocument>,
    },
    /// A fetch failed. `last_shadow` is the retained last good snapshot.
    FetchFailed {
        device_id: String,
        consecutive_failures: u32,
        error: String,
        /// The failure was an authentication error.
        auth: bool,
        last_shadow: Option<Arc<ShadowDocument>>,
    },
}

impl PollEvent {
    pub fn device_id(&self) -> &str {
        match self {
            PollEvent::Updated { device_id, .. } | PollEvent::FetchFailed { device_id, .. } => device_id,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, PollEvent::FetchFailed { .. })
    }
}
