//! Shadow polling for registered devices.
//!
//! - `PollingCoordinator` runs one cancellable polling task per device
//! - `ShadowSource` is where shadows come from (`DeviceShadowClient` in
//!   production, `MockShadowSource` in tests)
//! - `IntervalPolicy` decides the delay between ticks
//! - `PollEvent` is broadcast for every completed fetch

pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod mock;
pub mod policy;
pub mod source;

// Re-exports for convenience.
pub use config::PollerConfig;
pub use coordinator::{DeviceSnapshot, PollingCoordinator};
pub use error::{PollResult, PollerError};
pub use events::PollEvent;
pub use mock::MockShadowSource;
pub use policy::{FixedInterval, IntervalPolicy, MIN_INTERVAL};
pub use source::ShadowSource;
