use std::{sync::Arc, time::Instant};

use {parlor_plugins::PluginManager, parlor_store::InMemoryRoomStore};

/// Shared gateway state handed to every route.
pub struct GatewayState {
    pub plugins: Arc<PluginManager>,
    pub store: Arc<InMemoryRoomStore>,
    pub version: String,
    pub started_at: Instant,
}

impl GatewayState {
    pub fn new(plugins: Arc<PluginManager>, store: Arc<InMemoryRoomStore>) -> Arc<Self> {
        Arc::new(Self {
            plugins,
            store,
            version: env!("CARGO_PKG_VERSION").to_string(),
            started_at: Instant::now(),
        })
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
