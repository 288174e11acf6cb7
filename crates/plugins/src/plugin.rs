use std::collections::BTreeSet;

use {
    async_trait::async_trait,
    parlor_store::Message,
    serde::{Deserialize, Serialize},
    serde_json::Value,
    tracing::warn,
};

use crate::{error::Error, event::RoomEvent, handlers::EventHandlers};

/// Immutable plugin identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginMetadata {
    /// Registry key; unique per manager.
    pub id: String,
    pub name: String,
    /// Semantic version string.
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub author: String,
}

impl PluginMetadata {
    pub fn new(id: impl Into<String>, name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            version: version.into(),
            description: String::new(),
            author: String::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }
}

/// Operational settings of a plugin.
///
/// The manager keeps the live copy once the plugin is registered; later
/// changes go through [`crate::PluginManager::update_config`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PluginConfig {
    /// Sent as `X-API-Key` and used to sign webhook bodies.
    pub api_key: Option<String>,
    /// Absolute http/https URL receiving webhook deliveries.
    pub webhook_url: Option<String>,
    pub event_subscriptions: BTreeSet<RoomEvent>,
    /// Total webhook attempts. Falls back to the manager default.
    pub retry_attempts: Option<u32>,
    /// Base backoff delay in milliseconds. Falls back to the manager default.
    pub retry_delay_ms: Option<u64>,
    pub custom_config: Option<Value>,
}

impl PluginConfig {
    pub fn subscribed(events: impl IntoIterator<Item = RoomEvent>) -> Self {
        Self {
            event_subscriptions: events.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn with_webhook(mut self, url: impl Into<String>) -> Self {
        self.webhook_url = Some(url.into());
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_retry(mut self, attempts: u32, delay_ms: u64) -> Self {
        self.retry_attempts = Some(attempts);
        self.retry_delay_ms = Some(delay_ms);
        self
    }

    pub fn is_subscribed(&self, event: RoomEvent) -> bool {
        self.event_subscriptions.contains(&event)
    }
}

/// Lifecycle contract every plugin implements.
///
/// The manager calls `initialize` once before the plugin becomes reachable and
/// `terminate` once when it is unregistered. Implementations that start
/// timers or open connections in `initialize` must release them in
/// `terminate`.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn metadata(&self) -> &PluginMetadata;

    /// Settings the plugin is registered with.
    fn config(&self) -> PluginConfig;

    async fn initialize(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn terminate(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called by the manager when dispatching an event to this plugin failed.
    fn on_error(&self, error: &Error) {
        warn!(plugin_id = %self.metadata().id, error = %error, "plugin dispatch failed");
    }

    /// Local handler table used by the default `handle_event`.
    fn handlers(&self) -> Option<&EventHandlers> {
        None
    }

    /// Handle a subscribed event in-process.
    async fn handle_event(&self, event: RoomEvent, data: &Value) -> anyhow::Result<()> {
        match self.handlers() {
            Some(handlers) => handlers.dispatch(event, data).await,
            None => Ok(()),
        }
    }
}

/// Rewrites messages on their way into or out of a room.
///
/// Errors never block the message: the manager falls back to the original.
#[async_trait]
pub trait MessageTransformer: Send + Sync {
    async fn transform_incoming(&self, message: Message) -> anyhow::Result<Message>;
    async fn transform_outgoing(&self, message: Message) -> anyhow::Result<Message>;
}

/// Content moderation capability.
///
/// Errors fail open: `validate_content` is treated as allowed and
/// `sanitize_content` as a no-op.
#[async_trait]
pub trait ContentModerator: Send + Sync {
    async fn validate_content(&self, content: &str) -> anyhow::Result<bool>;
    async fn sanitize_content(&self, content: &str) -> anyhow::Result<String>;
}
