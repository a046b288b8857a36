//! TCL poller: keeps the shadows of an account's air conditioners fresh.
//!
//! Authenticates, lists the account's devices, polls the selected ones and
//! logs every update or failure until interrupted.

use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

use tcl_cloud::DeviceShadowClient;
use tcl_poller::config::PollerConfig;
use tcl_poller::{FixedInterval, PollEvent, PollingCoordinator};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "tcl-poller starting");

    // ── Load config ─────────────────────────────────────────────
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/etc/tcl-poller/poller.toml".to_string());
    let config = PollerConfig::from_file(&config_path)?;
    let password = config.resolve_password()?;
    tracing::info!(
        poll_interval_secs = config.poll_interval_secs,
        selected = config.devices.len(),
        "config loaded"
    );

    // ── Cloud client + device discovery ─────────────────────────
    let client = Arc::new(DeviceShadowClient::new(
        config.cloud.clone(),
        &config.username,
        &password,
    )?);
    let devices = client.list_devices().await?;
    tracing::info!(count = devices.len(), "devices listed");

    // ── Polling ─────────────────────────────────────────────────
    let coordinator = PollingCoordinator::new(
        client.clone(),
        Arc::new(FixedInterval::from_secs(config.poll_interval_secs)),
    );
    let mut events = coordinator.subscribe();

    for device in devices.iter().filter(|d| config.selects(&d.id)) {
        tracing::info!(device_id = %device.id, name = %device.display_name, "polling device");
        coordinator.register(&device.id);
    }
    for wanted in &config.devices {
        if !devices.iter().any(|d| &d.id == wanted) {
            tracing::warn!(device_id = %wanted, "configured device not found on account");
        }
    }

    tracing::info!("tcl-poller ready");

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(PollEvent::Updated { device_id, shadow }) => {
                    tracing::info!(
                        device_id = %device_id,
                        version = ?shadow.version,
                        reported = %serde_json::Value::Object(shadow.reported.clone()),
                        pending = shadow.delta().len(),
                        "shadow updated"
                    );
                }
                Ok(PollEvent::FetchFailed { device_id, consecutive_failures, error, auth, .. }) => {
                    tracing::warn!(
                        device_id = %device_id,
                        consecutive_failures,
                        auth,
                        error = %error,
                        "shadow fetch failed"
                    );
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event log lagging");
                }
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown signal received");
                break;
            }
        }
    }

    coordinator.shutdown();
    tracing::info!("tcl-poller stopped");
    Ok(())
}
