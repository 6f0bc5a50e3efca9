//! Main tracking client
//!
//! `track()` enriches an event and either sends it right away or queues it.
//! Queued records are delivered by background flush rounds driven by a single
//! timer; see [`crate::scheduler`] for the state machine.

use serde::Serialize;
use serde_json::{json, Map, Value};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::backoff::Backoff;
use crate::clock::{Clock, TokioClock};
use crate::config::{load_tracker_config, TrackerConfig};
use crate::device::{DeviceInfoCache, DeviceInfoProvider};
use crate::enrich::{Enricher, UmamiEnricher};
use crate::error::{Result, TrackerError};
use crate::events::{IdentifyPayload, TrackPayload};
use crate::identity::IdentityManager;
use crate::network::{OnlineOracle, Reachability};
use crate::queue::{DeliveryQueue, QueuedRecord};
use crate::scheduler::{FlushScheduler, FlushState};
use crate::storage::{FileStore, KeyValueStore, MemoryStore};
use crate::transport::{deliver, DebugTransport, HttpTransport, Transport};

/// Delay before re-checking connectivity after an offline round
pub const OFFLINE_RETRY_DELAY: Duration = Duration::from_millis(2000);

/// Point-in-time view of the delivery subsystem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueStatus {
    pub pending: usize,
    pub state: FlushState,
    pub timers_armed: u64,
}

#[derive(Debug, Default)]
struct DeliveryState {
    queue: DeliveryQueue,
    scheduler: FlushScheduler,
}

struct Inner {
    config: TrackerConfig,
    backoff: Backoff,
    transport: Arc<dyn Transport>,
    oracle: OnlineOracle,
    enricher: Arc<dyn Enricher>,
    identity: Arc<IdentityManager>,
    clock: Arc<dyn Clock>,
    state: Mutex<DeliveryState>,
    /// Signalled whenever a round ends with the queue empty
    drained: Notify,
}

/// Tracking client handle; clones share one queue and scheduler.
///
/// Must be used from within a Tokio runtime: flush timers are spawned tasks.
#[derive(Clone)]
pub struct UmamiClient {
    inner: Arc<Inner>,
}

/// Wires optional collaborators into a client.
pub struct UmamiClientBuilder {
    config: TrackerConfig,
    transport: Option<Arc<dyn Transport>>,
    reachability: Option<Arc<dyn Reachability>>,
    storage: Option<Arc<dyn KeyValueStore>>,
    device_info: Option<Arc<dyn DeviceInfoProvider>>,
    enricher: Option<Arc<dyn Enricher>>,
    clock: Option<Arc<dyn Clock>>,
}

impl UmamiClientBuilder {
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn reachability(mut self, probe: Arc<dyn Reachability>) -> Self {
        self.reachability = Some(probe);
        self
    }

    pub fn storage(mut self, storage: Arc<dyn KeyValueStore>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn device_info(mut self, provider: Arc<dyn DeviceInfoProvider>) -> Self {
        self.device_info = Some(provider);
        self
    }

    /// Replace the default Umami body builder
    pub fn enricher(mut self, enricher: Arc<dyn Enricher>) -> Self {
        self.enricher = Some(enricher);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> UmamiClient {
        let mut config = self.config;
        config.normalize();

        let transport = self.transport.unwrap_or_else(|| {
            if config.debug {
                Arc::new(DebugTransport)
            } else {
                Arc::new(HttpTransport::new(&config))
            }
        });
        let storage = self
            .storage
            .unwrap_or_else(|| Arc::new(MemoryStore::new()));
        let identity = Arc::new(IdentityManager::new(storage));
        let enricher = self.enricher.unwrap_or_else(|| {
            Arc::new(UmamiEnricher::new(
                config.website_id.clone().unwrap_or_default(),
                identity.clone(),
                DeviceInfoCache::new(self.device_info, config.app_version.clone()),
            ))
        });

        UmamiClient {
            inner: Arc::new(Inner {
                backoff: Backoff::new(config.retry.clone()),
                transport,
                oracle: OnlineOracle::new(self.reachability),
                enricher,
                identity,
                clock: self.clock.unwrap_or_else(|| Arc::new(TokioClock::default())),
                state: Mutex::new(DeliveryState::default()),
                drained: Notify::new(),
                config,
            }),
        }
    }
}

impl UmamiClient {
    /// Client with default collaborators (HTTP transport, in-memory store)
    pub fn new(config: TrackerConfig) -> Self {
        Self::builder(config).build()
    }

    pub fn builder(config: TrackerConfig) -> UmamiClientBuilder {
        UmamiClientBuilder {
            config,
            transport: None,
            reachability: None,
            storage: None,
            device_info: None,
            enricher: None,
            clock: None,
        }
    }

    /// Client from layered config files and environment, persisting
    /// identifiers under `~/.umami/telemetry` when possible.
    pub fn from_env() -> anyhow::Result<Self> {
        let config = load_tracker_config()?;
        let mut builder = Self::builder(config);
        match FileStore::in_default_dir() {
            Ok(store) => builder = builder.storage(Arc::new(store)),
            Err(e) => debug!(error = %e, "No state directory, identifiers kept in memory"),
        }
        Ok(builder.build())
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.inner.config
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.config.is_initialized()
    }

    /// Track a pageview or event.
    ///
    /// Only a missing website id or host URL is reported; delivery failures
    /// are retried in the background.
    pub async fn track(&self, payload: TrackPayload) -> Result<()> {
        let inner = &self.inner;
        if !inner.config.is_initialized() {
            return Err(TrackerError::NotInitialized);
        }
        if !inner.config.enabled {
            debug!("Tracking disabled, dropping event");
            return Ok(());
        }

        let body = inner.enricher.enrich(&payload).await?;

        if inner.config.batching.enabled || !inner.oracle.is_online().await {
            let now = inner.clock.now_millis();
            inner.lock_state().queue.push(body, 0, now);
            inner.request_flush(None);
            return Ok(());
        }

        if let Err(e) = inner.transport.send_one(&body).await {
            warn!(error = %e, "Failed to send event, queueing for retry");
            let due = inner.clock.now_millis().saturating_add(inner.delay_ms(1));
            inner.lock_state().queue.push(body, 1, due);
            inner.request_flush(None);
        }
        Ok(())
    }

    /// Ask for a flush round after `after` (default: 0, or the batching
    /// interval when batching). No-op while a timer is already armed.
    pub fn request_flush(&self, after: Option<Duration>) {
        self.inner.request_flush(after);
    }

    pub async fn identify(&self, payload: IdentifyPayload) -> Result<()> {
        self.inner
            .identity
            .identify(&payload.user_id, payload.user_properties)
            .await
    }

    pub async fn set_user_properties(&self, properties: Map<String, Value>) -> Result<()> {
        self.inner.identity.set_user_properties(properties).await
    }

    pub async fn set_custom_dimensions(&self, dimensions: Map<String, Value>) {
        self.inner.identity.set_custom_dimensions(dimensions).await;
    }

    /// Rotate the session id; returns the new one.
    pub async fn start_session(&self) -> Result<String> {
        self.inner.identity.start_session().await
    }

    /// Emit a `session_end` event. Never fails.
    pub async fn end_session(&self) {
        let payload = TrackPayload::event("session_end").with_url("/session");
        if let Err(e) = self.track(payload).await {
            debug!(error = %e, "session_end not tracked");
        }
    }

    pub async fn anonymous_id(&self) -> String {
        self.inner.identity.anonymous_id().await
    }

    pub async fn session_id(&self) -> String {
        self.inner.identity.session_id().await
    }

    pub async fn track_screen(&self, name: &str) -> Result<()> {
        self.track(
            TrackPayload::event("ScreenView")
                .with_url(format!("/{}", name))
                .with_title(name),
        )
        .await
    }

    pub async fn track_purchase(
        &self,
        amount: f64,
        currency: Option<&str>,
        data: Option<Map<String, Value>>,
    ) -> Result<()> {
        let mut merged = Map::new();
        merged.insert("amount".to_string(), json!(amount));
        if let Some(currency) = currency {
            merged.insert("currency".to_string(), json!(currency));
        }
        merged.extend(data.unwrap_or_default());

        self.track(TrackPayload {
            data: Some(merged),
            ..TrackPayload::event("Purchase").with_url("/purchase")
        })
        .await
    }

    pub async fn track_error(
        &self,
        name: &str,
        message: Option<&str>,
        data: Option<Map<String, Value>>,
    ) -> Result<()> {
        let mut merged = Map::new();
        if let Some(message) = message {
            merged.insert("message".to_string(), json!(message));
        }
        merged.extend(data.unwrap_or_default());

        self.track(TrackPayload {
            data: Some(merged),
            ..TrackPayload::event("Error").with_url("/error").with_title(name)
        })
        .await
    }

    pub fn status(&self) -> QueueStatus {
        let state = self.inner.lock_state();
        QueueStatus {
            pending: state.queue.len(),
            state: state.scheduler.state(),
            timers_armed: state.scheduler.timers_armed(),
        }
    }

    /// Copy of the records still waiting for delivery, in queue order
    pub fn pending_records(&self) -> Vec<QueuedRecord> {
        self.inner.lock_state().queue.iter().cloned().collect()
    }

    /// Wait until the queue is empty. Returns false if `timeout` ran out first.
    pub async fn drain(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, async {
            loop {
                let mut drained = std::pin::pin!(self.inner.drained.notified());
                // register before checking so a round ending in between still wakes us
                drained.as_mut().enable();
                if self.status().pending == 0 {
                    return;
                }
                drained.await;
            }
        })
        .await
        .is_ok()
    }
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, DeliveryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn delay_ms(&self, attempt: u32) -> u64 {
        u64::try_from(self.backoff.delay(attempt).as_millis()).unwrap_or(u64::MAX)
    }

    fn default_flush_delay(&self) -> Duration {
        if self.config.batching.enabled {
            Duration::from_millis(self.config.batching.max_interval_ms)
        } else {
            Duration::ZERO
        }
    }

    fn request_flush(self: &Arc<Self>, after: Option<Duration>) {
        let after = after.unwrap_or_else(|| self.default_flush_delay());
        let mut state = self.lock_state();
        self.arm(&mut state, after);
    }

    fn arm(self: &Arc<Self>, state: &mut DeliveryState, after: Duration) {
        let Some(delay) = state.scheduler.request(after) else {
            return;
        };
        debug!(delay_ms = delay.as_millis() as u64, "Flush timer armed");

        let inner = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            inner.flush_round().await;
        });
    }

    /// One flush round, run by the armed timer.
    async fn flush_round(self: Arc<Self>) {
        {
            let mut state = self.lock_state();
            if !state.scheduler.begin_round() {
                return;
            }
            if state.queue.is_empty() {
                self.finish_round(&mut state, None);
                return;
            }
        }

        if !self.oracle.is_online().await {
            debug!("Offline, deferring flush");
            let mut state = self.lock_state();
            self.finish_round(&mut state, Some(OFFLINE_RETRY_DELAY));
            return;
        }

        let batched = self.config.batching.enabled;
        let now = self.clock.now_millis();
        let selection = self.lock_state().queue.select(now, &self.config.batching);

        if !selection.is_empty() {
            debug!(count = selection.len(), batched, "Sending queued events");
            let result = deliver(self.transport.as_ref(), &selection.bodies, batched).await;

            let mut state = self.lock_state();
            match result {
                Ok(()) => {
                    state.queue.remove(&selection.ids);
                }
                Err(e) => {
                    let outcome = state.queue.record_failure(&selection.ids, now, &self.backoff);
                    warn!(
                        error = %e,
                        rescheduled = outcome.rescheduled.len(),
                        dropped = outcome.dropped.len(),
                        "Queued send failed"
                    );
                }
            }
        }

        let mut state = self.lock_state();
        let next = state.queue.next_due().map(|due| {
            Duration::from_millis(due.saturating_sub(self.clock.now_millis()))
        });
        self.finish_round(&mut state, next);
    }

    /// Back to Idle, then arm whatever the round or a parked request needs.
    fn finish_round(self: &Arc<Self>, state: &mut DeliveryState, next: Option<Duration>) {
        if state.queue.is_empty() {
            self.drained.notify_waiters();
        }
        if let Some(parked) = state.scheduler.finish_round() {
            self.arm(state, parked);
        }
        if let Some(next) = next {
            self.arm(state, next);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_uninitialized_client_rejects_track() {
        let client = UmamiClient::new(TrackerConfig::default());
        assert!(!client.is_initialized());

        let err = client.track(TrackPayload::pageview("/")).await.unwrap_err();
        assert!(matches!(err, TrackerError::NotInitialized));
        assert_eq!(client.status().pending, 0);
    }

    #[tokio::test]
    async fn test_disabled_client_doesnt_queue() {
        let config = TrackerConfig {
            enabled: false,
            ..TrackerConfig::new("site", "https://umami.local")
        };
        let client = UmamiClient::new(config);

        client.track(TrackPayload::pageview("/")).await.unwrap();
        assert_eq!(client.status().pending, 0);
        assert_eq!(client.status().state, FlushState::Idle);
    }

    #[tokio::test]
    async fn test_debug_client_sends_without_network() {
        let config = TrackerConfig {
            debug: true,
            ..TrackerConfig::new("site", "https://umami.invalid")
        };
        let client = UmamiClient::new(config);

        client.track(TrackPayload::event("Click")).await.unwrap();
        assert_eq!(client.status().pending, 0);
    }
}
