//! Online/offline gating

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Host-supplied reachability check.
#[async_trait]
pub trait Reachability: Send + Sync {
    async fn is_online(&self) -> anyhow::Result<bool>;
}

/// Answers "can we send right now?", failing open.
///
/// A missing probe or a probe error counts as online: the send attempt itself
/// will fail if the network is actually down.
#[derive(Clone, Default)]
pub struct OnlineOracle {
    probe: Option<Arc<dyn Reachability>>,
}

impl OnlineOracle {
    pub fn new(probe: Option<Arc<dyn Reachability>>) -> Self {
        Self { probe }
    }

    pub async fn is_online(&self) -> bool {
        let Some(probe) = &self.probe else {
            return true;
        };
        match probe.is_online().await {
            Ok(online) => online,
            Err(e) => {
                debug!(error = %e, "Reachability probe failed, assuming online");
                true
            }
        }
    }
}

impl std::fmt::Debug for OnlineOracle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnlineOracle")
            .field("probe", &self.probe.is_some())
            .finish()
    }
}
