use std::{fmt, time::Duration};

use crate::{event::RoomEvent, webhook::WebhookError};

/// Lifecycle hook that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleStage {
    Initialize,
    Terminate,
}

impl fmt::Display for LifecycleStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Initialize => "initialize",
            Self::Terminate => "terminate",
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("plugin '{plugin_id}' is already registered")]
    DuplicateId { plugin_id: String },

    #[error("plugin '{plugin_id}' not found")]
    NotFound { plugin_id: String },

    #[error("plugin '{plugin_id}' has an invalid webhook url '{url}': {reason}")]
    InvalidWebhook {
        plugin_id: String,
        url: String,
        reason: String,
    },

    /// A lifecycle hook returned an error.
    #[error("plugin '{plugin_id}' failed to {stage}: {source:#}")]
    Plugin {
        plugin_id: String,
        stage: LifecycleStage,
        #[source]
        source: anyhow::Error,
    },

    #[error("plugin '{plugin_id}' failed to handle {event}: {source:#}")]
    Handler {
        plugin_id: String,
        event: RoomEvent,
        #[source]
        source: anyhow::Error,
    },

    #[error("plugin '{plugin_id}' did not handle {event} within {}ms", .after.as_millis())]
    Timeout {
        plugin_id: String,
        event: RoomEvent,
        after: Duration,
    },

    #[error("plugin '{plugin_id}' panicked while handling {event}: {message}")]
    Panicked {
        plugin_id: String,
        event: RoomEvent,
        message: String,
    },

    #[error(transparent)]
    Webhook(#[from] WebhookError),
}

impl Error {
    /// The plugin the error is attributed to.
    pub fn plugin_id(&self) -> &str {
        match self {
            Self::DuplicateId { plugin_id }
            | Self::NotFound { plugin_id }
            | Self::InvalidWebhook { plugin_id, .. }
            | Self::Plugin { plugin_id, .. }
            | Self::Handler { plugin_id, .. }
            | Self::Timeout { plugin_id, .. }
            | Self::Panicked { plugin_id, .. } => plugin_id,
            Self::Webhook(e) => e.plugin_id(),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
