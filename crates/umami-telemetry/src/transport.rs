//! Event transport
//!
//! Sends enriched event bodies to the Umami collector. A transport call is a
//! single all-or-nothing attempt; retrying is the scheduler's job.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::TrackerConfig;
use crate::error::TransportError;

/// Network primitive used to deliver events.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_one(&self, body: &Value) -> Result<(), TransportError>;
    async fn send_batch(&self, bodies: &[Value]) -> Result<(), TransportError>;
}

/// Invoke the transport once for a selection.
///
/// Batch mode always uses the batch endpoint, even for a single body.
pub async fn deliver(
    transport: &dyn Transport,
    bodies: &[Value],
    batched: bool,
) -> Result<(), TransportError> {
    match bodies {
        [] => Ok(()),
        [body] if !batched => transport.send_one(body).await,
        _ if batched => transport.send_batch(bodies).await,
        _ => Err(TransportError::Other(format!(
            "single-event mode cannot send {} bodies at once",
            bodies.len()
        ))),
    }
}

/// Posts events to `{host}{send_path}` and `{host}{batch_path}`.
pub struct HttpTransport {
    client: Client,
    send_url: String,
    batch_url: String,
}

impl HttpTransport {
    /// Endpoints are fixed from `config`; an unset host yields requests that fail.
    pub fn new(config: &TrackerConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();

        Self {
            client,
            send_url: config.send_url().unwrap_or_default(),
            batch_url: config.batch_url().unwrap_or_default(),
        }
    }

    async fn post(&self, url: &str, body: &Value) -> Result<(), TransportError> {
        debug!(url = %url, "Posting to collector");

        let response = self.client.post(url).json(body).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send_one(&self, body: &Value) -> Result<(), TransportError> {
        self.post(&self.send_url, body).await
    }

    async fn send_batch(&self, bodies: &[Value]) -> Result<(), TransportError> {
        self.post(&self.batch_url, &json!({ "events": bodies })).await
    }
}

/// Debug mode transport: logs events instead of sending them.
#[derive(Debug, Default, Clone, Copy)]
pub struct DebugTransport;

#[async_trait]
impl Transport for DebugTransport {
    async fn send_one(&self, body: &Value) -> Result<(), TransportError> {
        info!(
            event = %serde_json::to_string(body).unwrap_or_default(),
            "Telemetry event (debug mode - not sent)"
        );
        Ok(())
    }

    async fn send_batch(&self, bodies: &[Value]) -> Result<(), TransportError> {
        info!(
            count = bodies.len(),
            events = %serde_json::to_string(bodies).unwrap_or_default(),
            "Telemetry batch (debug mode - not sent)"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Calls {
        calls: Mutex<Vec<(&'static str, usize)>>,
    }

    #[async_trait]
    impl Transport for Calls {
        async fn send_one(&self, _body: &Value) -> Result<(), TransportError> {
            self.calls.lock().unwrap().push(("one", 1));
            Ok(())
        }

        async fn send_batch(&self, bodies: &[Value]) -> Result<(), TransportError> {
            self.calls.lock().unwrap().push(("batch", bodies.len()));
            Ok(())
        }
    }

    #[tokio::test]
    async fn single_mode_uses_send_one() {
        let transport = Calls::default();
        deliver(&transport, &[json!(1)], false).await.unwrap();
        assert_eq!(*transport.calls.lock().unwrap(), vec![("one", 1)]);
    }

    #[tokio::test]
    async fn batch_mode_uses_send_batch_even_for_one_body() {
        let transport = Calls::default();
        deliver(&transport, &[json!(1)], true).await.unwrap();
        deliver(&transport, &[json!(1), json!(2)], true).await.unwrap();
        assert_eq!(
            *transport.calls.lock().unwrap(),
            vec![("batch", 1), ("batch", 2)]
        );
    }

    #[tokio::test]
    async fn empty_selection_sends_nothing() {
        let transport = Calls::default();
        deliver(&transport, &[], true).await.unwrap();
        assert!(transport.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn http_transport_joins_paths_onto_host() {
        let transport = HttpTransport::new(&TrackerConfig::new("site", "https://umami.local/"));
        assert_eq!(transport.send_url, "https://umami.local/api/send");
        assert_eq!(transport.batch_url, "https://umami.local/api/send/batch");
    }

    #[tokio::test]
    async fn http_transport_without_host_fails_instead_of_panicking() {
        let transport = HttpTransport::new(&TrackerConfig::default());
        assert!(transport.send_one(&json!({})).await.is_err());
    }

    #[tokio::test]
    async fn debug_transport_always_succeeds() {
        assert!(DebugTransport.send_one(&json!({"type": "event"})).await.is_ok());
        assert!(DebugTransport.send_batch(&[json!(1), json!(2)]).await.is_ok());
    }
}
