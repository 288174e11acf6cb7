//! Plugin system: contract, event fan-out, webhook delivery and built-ins.
//!
//! Plugins are registered with a [`PluginManager`] owned by the application.
//! Each registered plugin subscribes to a set of [`RoomEvent`]s; when an event
//! is announced the manager runs the plugin's in-process handlers and, if the
//! plugin has a webhook URL, POSTs the event to it with bounded retries.

pub mod builtin;
pub mod error;
pub mod event;
pub mod handlers;
pub mod manager;
pub mod plugin;
pub mod remote;
pub mod retry;
pub mod webhook;

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_support;

pub use {
    error::{Error, LifecycleStage, Result},
    event::RoomEvent,
    handlers::EventHandlers,
    manager::{
        DispatchSummary, ManagerSettings, PluginManager, PluginRecord, PluginRegistration,
        PluginStatus,
    },
    plugin::{ContentModerator, MessageTransformer, Plugin, PluginConfig, PluginMetadata},
    remote::RemotePlugin,
    retry::{RetryPolicy, retry_with_backoff},
    webhook::{WebhookError, WebhookSender},
};

/// Current time as ISO-8601 UTC with millisecond precision.
pub(crate) fn timestamp_now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
