use {
    async_trait::async_trait,
    serde::Deserialize,
    serde_json::Value,
    tracing::{debug, warn},
};

use crate::{
    error::Error,
    event::RoomEvent,
    plugin::{Plugin, PluginConfig, PluginMetadata},
};

/// A plugin hosted outside the process and reached only through its webhook.
///
/// Registered over HTTP; it has no in-process behaviour beyond logging.
#[derive(Debug, Clone, Deserialize)]
pub struct RemotePlugin {
    metadata: PluginMetadata,
    #[serde(default)]
    config: PluginConfig,
}

impl RemotePlugin {
    pub fn new(metadata: PluginMetadata, config: PluginConfig) -> Self {
        Self { metadata, config }
    }
}

#[async_trait]
impl Plugin for RemotePlugin {
    fn metadata(&self) -> &PluginMetadata {
        &self.metadata
    }

    fn config(&self) -> PluginConfig {
        self.config.clone()
    }

    fn on_error(&self, error: &Error) {
        warn!(plugin_id = %self.metadata.id, error = %error, "remote plugin delivery failed");
    }

    async fn handle_event(&self, event: RoomEvent, _data: &Value) -> anyhow::Result<()> {
        debug!(plugin_id = %self.metadata.id, %event, "remote plugin event queued for webhook");
        Ok(())
    }
}
