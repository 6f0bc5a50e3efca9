//! Tracker error types.

use thiserror::Error;

/// Errors surfaced to callers of the tracker.
///
/// Delivery failures never show up here: they are absorbed by the queue and
/// retried in the background.
#[derive(Error, Debug)]
pub enum TrackerError {
    /// Tracking attempted before a website id and host URL were configured
    #[error("tracker not initialized: set website_id and host_url first")]
    NotInitialized,

    /// Key-value store failure
    #[error("storage error: {0}")]
    Storage(String),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failure of a single transport call.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Network or client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Collector answered with a non-success status
    #[error("collector returned HTTP {0}")]
    Status(u16),

    /// Any other send failure
    #[error("send failed: {0}")]
    Other(String),
}

/// Result type alias using TrackerError.
pub type Result<T> = std::result::Result<T, TrackerError>;
