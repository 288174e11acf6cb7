/// Config schema types (server, plugin manager, built-in plugins).
use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ParlorConfig {
    pub server: ServerConfig,
    pub plugins: PluginsConfig,
}

/// HTTP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    /// Rooms created in the in-memory store at start-up.
    pub rooms: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".into(),
            port: 8787,
            rooms: vec!["general".into()],
        }
    }
}

/// Plugin manager settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginsConfig {
    /// Deadline for a single plugin's in-process event handling.
    /// Unset means handlers may run indefinitely.
    pub handler_timeout_ms: Option<u64>,

    /// Fallbacks for plugins that don't set their own retry policy.
    pub webhook: WebhookDefaults,

    pub broadcaster: BroadcasterConfig,

    pub word_filter: WordFilterConfig,
}

/// Webhook delivery defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookDefaults {
    /// Total delivery attempts, including the first one.
    pub retry_attempts: u32,

    /// Base backoff delay; doubled after every failed attempt.
    pub retry_delay_ms: u64,

    /// Per-attempt HTTP timeout. Unset means the request is only bounded by
    /// the remote end.
    pub request_timeout_ms: Option<u64>,
}

impl Default for WebhookDefaults {
    fn default() -> Self {
        Self {
            retry_attempts: 3,
            retry_delay_ms: 1000,
            request_timeout_ms: None,
        }
    }
}

/// Periodic broadcast agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcasterConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    /// Upper bound on the number of rooms the agent posts into.
    pub max_rooms: usize,
    pub sender: String,
    pub message: String,
}

impl Default for BroadcasterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 300,
            max_rooms: 10,
            sender: "broadcast-bot".into(),
            message: "Reminder: be kind, stay on topic.".into(),
        }
    }
}

/// Blocked-word moderation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WordFilterConfig {
    pub enabled: bool,
    pub words: Vec<String>,
}
