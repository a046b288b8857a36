//! TCL Home cloud client.
//!
//! Talks to the vendor cloud on behalf of one account:
//! - `Authenticator` runs the credential chain (login → token exchange →
//!   signing credentials) and refreshes only the stages that expired
//! - `RequestSigner` / `BlockingSigner` sign shadow requests with SigV4
//! - `DeviceShadowClient` lists devices and reads/updates their shadows
//! - `mock` holds test doubles for the chain backend and the clock

pub mod auth;
pub mod client;
pub mod clock;
pub mod commands;
pub mod config;
pub mod error;
pub mod mock;
pub mod signer;
pub mod transport;

// Re-exports for convenience.
pub use auth::{AuthBackend, AuthState, Authenticator, ChainState, HttpAuthBackend, Stage, password_hash};
pub use client::DeviceShadowClient;
pub use clock::{Clock, SystemClock};
pub use commands::{FreshAirCommand, FreshAirMode};
pub use config::{AppIdentity, CloudConfig};
pub use error::{ApiError, AuthError, CloudError, CloudResult};
pub use mock::{ManualClock, MockAuthBackend, MockFailure};
pub use signer::{BlockingSigner, RequestSigner, SigV4};
pub use transport::{HttpRequest, HttpResponse, HttpTransport};
