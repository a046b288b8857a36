//! Delay between polling ticks.

use std::time::Duration;

/// Decides how long to wait before the next tick of a device.
pub trait IntervalPolicy: Send + Sync {
    fn next_interval(&self, consecutive_failures: u32) -> Duration;
}

/// Shortest delay any tick waits.
pub const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Same interval regardless of failures. Never shorter than [`MIN_INTERVAL`].
#[derive(Debug, Clone, Copy)]
pub struct FixedInterval(pub Duration);

impl FixedInterval {
    pub fn from_secs(secs: u64) -> Self {
        Self(Duration::from_secs(secs))
    }
}

impl IntervalPolicy for FixedInterval {
    fn next_interval(&self, _consecutive_failures: u32) -> Duration {
        self.0.max(MIN_INTERVAL)
    }
}
