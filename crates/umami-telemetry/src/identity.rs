//! Anonymous, session and user identity
//!
//! Identifiers are read from the key-value store on first use and created
//! (then stored) when missing. Store failures never block tracking: a fresh
//! identifier is used and the failure is logged.

use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::error::Result;
use crate::storage::KeyValueStore;

pub const ANONYMOUS_ID_KEY: &str = "umami:anonymousId";
pub const SESSION_ID_KEY: &str = "umami:sessionId";
pub const USER_ID_KEY: &str = "umami:userId";
pub const USER_PROPS_KEY: &str = "umami:userProps";

/// `anon_<hex>` / `sess_<hex>` style identifier
pub fn random_id(prefix: &str) -> String {
    format!("{}_{}", prefix, Uuid::new_v4().simple())
}

/// Identity values attached to every event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IdentitySnapshot {
    pub anonymous_id: String,
    pub session_id: String,
    pub user_id: Option<String>,
    pub user_properties: Option<Map<String, Value>>,
    pub custom_dimensions: Option<Map<String, Value>>,
}

#[derive(Debug, Default)]
struct IdentityState {
    anonymous_id: Option<String>,
    session_id: Option<String>,
    user_id: Option<String>,
    user_properties: Option<Map<String, Value>>,
    custom_dimensions: Option<Map<String, Value>>,
    user_loaded: bool,
}

/// Owns identity state and its persistence.
pub struct IdentityManager {
    store: Arc<dyn KeyValueStore>,
    state: Mutex<IdentityState>,
}

impl IdentityManager {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            state: Mutex::new(IdentityState::default()),
        }
    }

    /// Stored anonymous id, created on first use
    pub async fn anonymous_id(&self) -> String {
        let mut state = self.state.lock().await;
        if let Some(id) = &state.anonymous_id {
            return id.clone();
        }
        let id = self.load_or_create(ANONYMOUS_ID_KEY, "anon").await;
        state.anonymous_id = Some(id.clone());
        id
    }

    /// Stored session id, created on first use
    pub async fn session_id(&self) -> String {
        let mut state = self.state.lock().await;
        if let Some(id) = &state.session_id {
            return id.clone();
        }
        let id = self.load_or_create(SESSION_ID_KEY, "sess").await;
        state.session_id = Some(id.clone());
        id
    }

    /// Replace the session id with a fresh one.
    pub async fn start_session(&self) -> Result<String> {
        let mut state = self.state.lock().await;
        let id = random_id("sess");
        state.session_id = Some(id.clone());
        self.store.set(SESSION_ID_KEY, &id).await?;
        Ok(id)
    }

    /// Set the user id; properties, when given, replace the current ones.
    pub async fn identify(&self, user_id: &str, properties: Option<Map<String, Value>>) -> Result<()> {
        let mut state = self.state.lock().await;
        state.user_loaded = true;
        state.user_id = Some(user_id.to_string());
        if properties.is_some() {
            state.user_properties = properties;
        }

        self.store.set(USER_ID_KEY, user_id).await?;
        if let Some(props) = &state.user_properties {
            self.store
                .set(USER_PROPS_KEY, &serde_json::to_string(props)?)
                .await?;
        }
        Ok(())
    }

    /// Merge into the current user properties.
    pub async fn set_user_properties(&self, properties: Map<String, Value>) -> Result<()> {
        let mut state = self.state.lock().await;
        self.load_user(&mut state).await;
        let merged = state.user_properties.get_or_insert_with(Map::new);
        merged.extend(properties);
        let encoded = serde_json::to_string(merged)?;
        self.store.set(USER_PROPS_KEY, &encoded).await
    }

    /// Merge custom dimensions for later events (not persisted).
    pub async fn set_custom_dimensions(&self, dimensions: Map<String, Value>) {
        let mut state = self.state.lock().await;
        state
            .custom_dimensions
            .get_or_insert_with(Map::new)
            .extend(dimensions);
    }

    pub async fn snapshot(&self) -> IdentitySnapshot {
        let anonymous_id = self.anonymous_id().await;
        let session_id = self.session_id().await;

        let mut state = self.state.lock().await;
        self.load_user(&mut state).await;
        IdentitySnapshot {
            anonymous_id,
            session_id,
            user_id: state.user_id.clone(),
            user_properties: state.user_properties.clone(),
            custom_dimensions: state.custom_dimensions.clone(),
        }
    }

    /// Pull a previously identified user from the store, once.
    async fn load_user(&self, state: &mut IdentityState) {
        if state.user_loaded {
            return;
        }
        state.user_loaded = true;

        if let Some(user_id) = self.get_quietly(USER_ID_KEY).await {
            state.user_id.get_or_insert(user_id);
        }
        if let Some(raw) = self.get_quietly(USER_PROPS_KEY).await {
            match serde_json::from_str::<Map<String, Value>>(&raw) {
                Ok(props) => {
                    state.user_properties.get_or_insert(props);
                }
                Err(e) => debug!(error = %e, "Ignoring unreadable stored user properties"),
            }
        }
    }

    async fn load_or_create(&self, key: &str, prefix: &str) -> String {
        if let Some(existing) = self.get_quietly(key).await.filter(|v| !v.trim().is_empty()) {
            return existing.trim().to_string();
        }
        let fresh = random_id(prefix);
        if let Err(e) = self.store.set(key, &fresh).await {
            debug!(key = key, error = %e, "Could not persist identifier");
        }
        fresh
    }

    async fn get_quietly(&self, key: &str) -> Option<String> {
        match self.store.get(key).await {
            Ok(value) => value,
            Err(e) => {
                debug!(key = key, error = %e, "Identity store read failed");
                None
            }
        }
    }
}
