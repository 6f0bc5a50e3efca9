//! # Umami Telemetry
//!
//! Client-side event delivery for [Umami](https://umami.is) analytics.
//!
//! ## Delivery Guarantees
//!
//! - **Never Blocks**: `track()` returns after one send attempt or an enqueue
//! - **Ordered**: without batching, a queued event is never sent before an earlier one
//! - **Bounded Retries**: exponential backoff with jitter, then the event is dropped
//! - **Single Flight**: one flush timer and one send round at a time
//! - **Offline Aware**: sends pause while the reachability probe reports offline
//!
//! Delivery is best-effort. The queue lives in memory and is lost when the
//! process exits; call [`UmamiClient::drain`] before exiting a short-lived host.
//!
//! ## Usage
//!
//! ```no_run
//! use umami_telemetry::{TrackPayload, TrackerConfig, UmamiClient};
//!
//! # async fn run() -> umami_telemetry::Result<()> {
//! let client = UmamiClient::new(TrackerConfig::new("site-id", "https://umami.example.com"));
//! client.track(TrackPayload::pageview("/home")).await?;
//! client.track_screen("Settings").await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Opt-Out
//!
//! ```bash
//! export UMAMI_TELEMETRY_DISABLED=1
//! # or
//! export DO_NOT_TRACK=1
//!
//! # or in .umami/config.toml
//! [umami]
//! enabled = false
//! ```

pub mod backoff;
pub mod client;
pub mod clock;
pub mod config;
pub mod device;
pub mod enrich;
pub mod error;
pub mod events;
pub mod identity;
pub mod network;
pub mod queue;
pub mod scheduler;
pub mod storage;
pub mod transport;

pub use backoff::Backoff;
pub use client::{QueueStatus, UmamiClient, UmamiClientBuilder, OFFLINE_RETRY_DELAY};
pub use clock::{Clock, ManualClock, TokioClock};
pub use config::{load_tracker_config, BatchingPolicy, RetryPolicy, TrackerConfig};
pub use device::{DeviceInfo, DeviceInfoProvider};
pub use enrich::{Enricher, UmamiEnricher};
pub use error::{Result, TrackerError, TransportError};
pub use events::{EventBody, EventKind, IdentifyPayload, TrackPayload};
pub use network::{OnlineOracle, Reachability};
pub use queue::{DeliveryQueue, QueuedRecord, RecordId};
pub use scheduler::FlushState;
pub use storage::{FileStore, KeyValueStore, MemoryStore};
pub use transport::{DebugTransport, HttpTransport, Transport};
