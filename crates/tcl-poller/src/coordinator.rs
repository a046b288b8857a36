//! Per-device polling sessions.
//!
//! Each registered device gets a ticker task that fires immediately and then
//! after every [`IntervalPolicy`] delay. A tick spawns a fetch unless one is
//! already running for the device, in which case the tick is skipped. Every
//! completed fetch updates the device's snapshot under a single lock and
//! broadcasts exactly one [`PollEvent`].
//!
//! Cancelling a device aborts its ticker and any fetch it started. Snapshot
//! updates contain no await point, so an abort never leaves one half applied.
//! A [`refresh_now`](PollingCoordinator::refresh_now) fetch still running on
//! the caller's task when its device is cancelled is discarded unpublished.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::task::{JoinHandle, JoinSet};

use tcl_cloud::{Clock, SystemClock};
use tcl_protocol::shadows::ShadowDocument;

use crate::error::{PollResult, PollerError};
use crate::events::PollEvent;
use crate::policy::IntervalPolicy;
use crate::source::ShadowSource;

const EVENT_CAPACITY: usize = 256;

/// Read-only view of one device's polling state.
#[derive(Debug, Clone, Default)]
pub struct DeviceSnapshot {
    pub last_shadow: Option<Arc<ShadowDocument>>,
    pub consecutive_failures: u32,
    pub last_success: Option<DateTime<Utc>>,
    pub next_poll: Option<DateTime<Utc>>,
    pub in_flight: bool,
}

#[derive(Default)]
struct SessionState {
    last_shadow: Option<Arc<ShadowDocument>>,
    consecutive_failures: u32,
    last_success: Option<DateTime<Utc>>,
    next_poll: Option<DateTime<Utc>>,
}

struct DeviceWorker {
    device_id: String,
    source: Arc<dyn ShadowSource>,
    events: broadcast::Sender<PollEvent>,
    clock: Arc<dyn Clock>,
    state: Mutex<SessionState>,
    in_flight: AtomicBool,
    /// Cleared when the device is cancelled.
    active: AtomicBool,
}

/// Clears the in-flight flag when a fetch ends, including by abort.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl DeviceWorker {
    fn state(&self) -> std::sync::MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Fetch once. `None` when a fetch was already in flight.
    async fn poll_once(&self) -> Option<PollEvent> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!(device_id = %self.device_id, "fetch in flight, skipping tick");
            return None;
        }
        let _in_flight = InFlight(&self.in_flight);

        let result = self.source.fetch_shadow(&self.device_id).await;
        if !self.active.load(Ordering::Acquire) {
            tracing::debug!(device_id = %self.device_id, "device cancelled, discarding fetch");
            return None;
        }

        let event = {
            let mut state = self.state();
            match result {
                Ok(shadow) => {
                    let shadow = Arc::new(shadow);
                    state.last_shadow = Some(shadow.clone());
                    state.consecutive_failures = 0;
                    state.last_success = Some(self.clock.now());
                    PollEvent::Updated {
                        device_id: self.device_id.clone(),
                        shadow,
                    }
                }
                Err(e) => {
                    state.consecutive_failures = state.consecutive_failures.saturating_add(1);
                    tracing::warn!(
                        device_id = %self.device_id,
                        consecutive_failures = state.consecutive_failures,
                        error = %e,
                        "shadow fetch failed"
                    );
                    PollEvent::FetchFailed {
                        device_id: self.device_id.clone(),
                        consecutive_failures: state.consecutive_failures,
                        error: e.to_string(),
                        auth: e.is_auth(),
                        last_shadow: state.last_shadow.clone(),
                    }
                }
            }
        };

        // No receivers is fine.
        let _ = self.events.send(event.clone());
        Some(event)
    }

    fn snapshot(&self) -> DeviceSnapshot {
        let state = self.state();
        DeviceSnapshot {
            last_shadow: state.last_shadow.clone(),
            consecutive_failures: state.consecutive_failures,
            last_success: state.last_success,
            next_poll: state.next_poll,
            in_flight: self.in_flight.load(Ordering::Acquire),
        }
    }
}

async fn run_ticker(worker: Arc<DeviceWorker>, policy: Arc<dyn IntervalPolicy>) {
    let mut fetches = JoinSet::new();
    loop {
        while fetches.try_join_next().is_some() {}

        let w = worker.clone();
        fetches.spawn(async move {
            w.poll_once().await;
        });

        let interval = policy.next_interval(worker.state().consecutive_failures);
        let next = chrono::Duration::from_std(interval)
            .ok()
            .and_then(|d| worker.clock.now().checked_add_signed(d));
        worker.state().next_poll = next;
        tokio::time::sleep(interval).await;
    }
}

struct Session {
    worker: Arc<DeviceWorker>,
    ticker: JoinHandle<()>,
}

impl Session {
    fn stop(&self) {
        self.worker.active.store(false, Ordering::Release);
        self.ticker.abort();
    }
}

pub struct PollingCoordinator {
    source: Arc<dyn ShadowSource>,
    policy: Arc<dyn IntervalPolicy>,
    clock: Arc<dyn Clock>,
    events: broadcast::Sender<PollEvent>,
    sessions: Mutex<HashMap<String, Session>>,
}

impl PollingCoordinator {
    pub fn new(source: Arc<dyn ShadowSource>, policy: Arc<dyn IntervalPolicy>) -> Self {
        Self::with_clock(source, policy, Arc::new(SystemClock))
    }

    /// Like [`new`](Self::new), stamping snapshots with `clock`.
    pub fn with_clock(
        source: Arc<dyn ShadowSource>,
        policy: Arc<dyn IntervalPolicy>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            source,
            policy,
            clock,
            events,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn sessions(&self) -> std::sync::MutexGuard<'_, HashMap<String, Session>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PollEvent> {
        self.events.subscribe()
    }

    /// Start polling `device_id`. Returns `false` if it is already polled.
    /// Must be called from within a tokio runtime.
    pub fn register(&self, device_id: &str) -> bool {
        let mut sessions = self.sessions();
        if sessions.contains_key(device_id) {
            return false;
        }
        let worker = Arc::new(DeviceWorker {
            device_id: device_id.to_string(),
            source: self.source.clone(),
            events: self.events.clone(),
            clock: self.clock.clone(),
            state: Mutex::new(SessionState::default()),
            in_flight: AtomicBool::new(false),
            active: AtomicBool::new(true),
        });
        let ticker = tokio::spawn(run_ticker(worker.clone(), self.policy.clone()));
        sessions.insert(device_id.to_string(), Session { worker, ticker });
        tracing::info!(device_id = %device_id, "polling registered");
        true
    }

    /// Stop polling `device_id`. Returns `false` if it was not registered.
    pub fn cancel(&self, device_id: &str) -> bool {
        match self.sessions().remove(device_id) {
            Some(session) => {
                session.stop();
                tracing::info!(device_id = %device_id, "polling cancelled");
                true
            }
            None => false,
        }
    }

    pub fn shutdown(&self) {
        let drained: Vec<(String, Session)> = self.sessions().drain().collect();
        for (_, session) in &drained {
            session.stop();
        }
        tracing::info!(devices = drained.len(), "polling stopped");
    }

    pub fn devices(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn snapshot(&self, device_id: &str) -> Option<DeviceSnapshot> {
        self.sessions().get(device_id).map(|s| s.worker.snapshot())
    }

    /// Fetch now, outside the schedule (e.g. right after a command).
    /// `Ok(None)` when a fetch for the device is already in flight, or when
    /// the device is cancelled before the fetch completes.
    pub async fn refresh_now(&self, device_id: &str) -> PollResult<Option<PollEvent>> {
        let worker = self
            .sessions()
            .get(device_id)
            .map(|s| s.worker.clone())
            .ok_or_else(|| PollerError::UnknownDevice(device_id.to_string()))?;
        Ok(worker.poll_once().await)
    }
}

impl Drop for PollingCoordinator {
    fn drop(&mut self) {
        for session in self.sessions().values() {
            session.stop();
        }
    }
}
