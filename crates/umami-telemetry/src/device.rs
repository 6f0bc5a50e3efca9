//! Device metadata attached to events

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub os: String, // "linux" | "macos" | "windows" | "ios" | "android"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_version: Option<String>,
}

/// Host-supplied device details; may be slow or fail.
#[async_trait]
pub trait DeviceInfoProvider: Send + Sync {
    async fn device_info(&self) -> anyhow::Result<DeviceInfo>;
}

/// Resolves device info once per process.
pub struct DeviceInfoCache {
    provider: Option<Arc<dyn DeviceInfoProvider>>,
    app_version: Option<String>,
    cached: OnceCell<DeviceInfo>,
}

impl DeviceInfoCache {
    pub fn new(provider: Option<Arc<dyn DeviceInfoProvider>>, app_version: Option<String>) -> Self {
        Self {
            provider,
            app_version,
            cached: OnceCell::new(),
        }
    }

    pub async fn get(&self) -> &DeviceInfo {
        self.cached.get_or_init(|| self.resolve()).await
    }

    async fn resolve(&self) -> DeviceInfo {
        if let Some(provider) = &self.provider {
            match provider.device_info().await {
                Ok(mut info) => {
                    if info.os.is_empty() {
                        info.os = get_os_string();
                    }
                    if info.app_version.is_none() {
                        info.app_version = self.app_version.clone();
                    }
                    return info;
                }
                Err(e) => debug!(error = %e, "Device info provider failed, using defaults"),
            }
        }
        default_device_info(self.app_version.clone())
    }
}

/// Minimal info from the running platform
pub fn default_device_info(app_version: Option<String>) -> DeviceInfo {
    DeviceInfo {
        os: get_os_string(),
        os_version: sysinfo::System::os_version(),
        model: None,
        app_version,
    }
}

/// Get OS string
pub fn get_os_string() -> String {
    if cfg!(target_os = "linux") {
        "linux".to_string()
    } else if cfg!(target_os = "macos") {
        "macos".to_string()
    } else if cfg!(target_os = "windows") {
        "windows".to_string()
    } else if cfg!(target_os = "ios") {
        "ios".to_string()
    } else if cfg!(target_os = "android") {
        "android".to_string()
    } else {
        "unknown".to_string()
    }
}
