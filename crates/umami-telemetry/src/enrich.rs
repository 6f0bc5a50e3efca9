//! Turning a raw payload into the body that gets queued and sent

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use crate::device::DeviceInfoCache;
use crate::error::Result;
use crate::events::{EventBody, TrackPayload};
use crate::identity::IdentityManager;

/// Produces the final, immutable body for a payload.
#[async_trait]
pub trait Enricher: Send + Sync {
    async fn enrich(&self, payload: &TrackPayload) -> Result<Value>;
}

/// Attaches website, device and identity data in Umami's body format.
pub struct UmamiEnricher {
    website_id: String,
    identity: Arc<IdentityManager>,
    device: DeviceInfoCache,
}

impl UmamiEnricher {
    pub fn new(website_id: impl Into<String>, identity: Arc<IdentityManager>, device: DeviceInfoCache) -> Self {
        Self {
            website_id: website_id.into(),
            identity,
            device,
        }
    }
}

#[async_trait]
impl Enricher for UmamiEnricher {
    async fn enrich(&self, payload: &TrackPayload) -> Result<Value> {
        let device = self.device.get().await;
        let identity = self.identity.snapshot().await;
        let body = EventBody::build(&self.website_id, payload, device, &identity);
        Ok(serde_json::to_value(body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    #[tokio::test]
    async fn enrich_attaches_identity_and_device() {
        let identity = Arc::new(IdentityManager::new(Arc::new(MemoryStore::new())));
        let enricher = UmamiEnricher::new(
            "site-42",
            identity.clone(),
            DeviceInfoCache::new(None, Some("3.1.0".to_string())),
        );

        let body = enricher
            .enrich(&TrackPayload::pageview("/home"))
            .await
            .unwrap();

        assert_eq!(body["payload"]["website"], "site-42");
        assert_eq!(
            body["payload"]["data"]["anonymousId"],
            identity.anonymous_id().await.as_str()
        );
        assert_eq!(body["payload"]["data"]["device"]["appVersion"], "3.1.0");
        assert!(body["payload"]["data"]["sessionId"]
            .as_str()
            .unwrap()
            .starts_with("sess_"));
    }
}
