//! Tracking payloads and the Umami request body

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::device::{get_os_string, DeviceInfo};
use crate::identity::IdentitySnapshot;

/// What the application asks to track.
///
/// A payload with a `name` is an event; without one it is a pageview.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrackPayload {
    pub hostname: Option<String>,
    pub language: Option<String>,
    pub referrer: Option<String>,
    pub screen: Option<String>, // "1170x2532"
    pub title: Option<String>,
    pub url: Option<String>,
    pub name: Option<String>,
    pub data: Option<Map<String, Value>>,

    // Per-event identity, used when the tracker has none of its own
    pub session_id: Option<String>,
    pub user_id: Option<String>,
    pub user_properties: Option<Map<String, Value>>,
    pub custom_dimensions: Option<Map<String, Value>>,
}

impl TrackPayload {
    pub fn pageview(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::default()
        }
    }

    pub fn event(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Add one entry to the event data
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data
            .get_or_insert_with(Map::new)
            .insert(key.into(), value.into());
        self
    }
}

/// User identification request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentifyPayload {
    pub user_id: String,
    pub user_properties: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Event,
    Pageview,
}

/// Body posted to the collector's send endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventBody {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub payload: EventPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventPayload {
    pub website: String,
    pub hostname: String,
    pub language: String,
    pub referrer: String,
    pub screen: String,
    pub title: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub data: Map<String, Value>,
}

impl EventBody {
    /// Build the body for `payload`.
    ///
    /// Tracker-level identity wins over the payload's own identity fields;
    /// those only fill gaps.
    pub fn build(
        website_id: &str,
        payload: &TrackPayload,
        device: &DeviceInfo,
        identity: &IdentitySnapshot,
    ) -> Self {
        let mut data = payload.data.clone().unwrap_or_default();

        if let Ok(device) = serde_json::to_value(device) {
            data.insert("device".to_string(), device);
        }
        insert_opt(
            &mut data,
            "userId",
            identity.user_id.as_ref().or(payload.user_id.as_ref()).cloned().map(Value::String),
        );
        data.insert(
            "anonymousId".to_string(),
            Value::String(identity.anonymous_id.clone()),
        );
        insert_opt(
            &mut data,
            "userProperties",
            identity
                .user_properties
                .as_ref()
                .or(payload.user_properties.as_ref())
                .cloned()
                .map(Value::Object),
        );
        insert_opt(
            &mut data,
            "customDimensions",
            identity
                .custom_dimensions
                .as_ref()
                .or(payload.custom_dimensions.as_ref())
                .cloned()
                .map(Value::Object),
        );
        let session_id = if identity.session_id.is_empty() {
            payload.session_id.clone()
        } else {
            Some(identity.session_id.clone())
        };
        insert_opt(&mut data, "sessionId", session_id.map(Value::String));

        Self {
            kind: if payload.name.is_some() {
                EventKind::Event
            } else {
                EventKind::Pageview
            },
            payload: EventPayload {
                website: website_id.to_string(),
                hostname: payload
                    .hostname
                    .clone()
                    .unwrap_or_else(|| format!("{}-app", get_os_string())),
                language: payload.language.clone().unwrap_or_else(default_language),
                referrer: payload.referrer.clone().unwrap_or_default(),
                screen: payload.screen.clone().unwrap_or_else(|| "0x0".to_string()),
                title: payload.title.clone().unwrap_or_default(),
                url: payload
                    .url
                    .clone()
                    .unwrap_or_else(|| "app://screen".to_string()),
                name: payload.name.clone(),
                data,
            },
        }
    }
}

fn insert_opt(data: &mut Map<String, Value>, key: &str, value: Option<Value>) {
    if let Some(value) = value {
        data.insert(key.to_string(), value);
    }
}

/// Locale from `LANG` (`en_US.UTF-8` becomes `en-US`), else `en`
fn default_language() -> String {
    std::env::var("LANG")
        .ok()
        .and_then(|lang| {
            let locale = lang.split('.').next().unwrap_or_default().replace('_', "-");
            if locale.is_empty() || locale == "C" || locale == "POSIX" {
                None
            } else {
                Some(locale)
            }
        })
        .unwrap_or_else(|| "en".to_string())
}
