//! Plugins shipped with the server.

pub mod broadcaster;
pub mod word_filter;

use std::sync::Arc;

use {parlor_config::PluginsConfig, parlor_store::RoomStore, tracing::info};

pub use {
    broadcaster::{BROADCASTER_ID, Broadcaster, BroadcasterSettings},
    word_filter::{WORD_FILTER_ID, WordFilter},
};

use crate::{
    error::Result,
    manager::{PluginManager, PluginRegistration},
    plugin::{MessageTransformer, Plugin},
};

/// Register the built-in plugins enabled in `config`.
pub async fn register_builtins(
    manager: &Arc<PluginManager>,
    store: Arc<dyn RoomStore>,
    config: &PluginsConfig,
) -> Result<()> {
    if config.word_filter.enabled {
        let filter = Arc::new(WordFilter::from_config(&config.word_filter));
        manager
            .register_plugin(
                PluginRegistration::new(Arc::clone(&filter) as Arc<dyn Plugin>)
                    .with_transformer(Arc::clone(&filter) as Arc<dyn MessageTransformer>)
                    .with_moderator(filter),
            )
            .await?;
    }

    if config.broadcaster.enabled {
        let broadcaster = Broadcaster::new(
            BroadcasterSettings::from(&config.broadcaster),
            store,
            Arc::downgrade(manager),
        );
        manager.register_plugin(Arc::new(broadcaster)).await?;
    }

    info!(plugins = manager.get_plugins().await.len(), "built-in plugins registered");
    Ok(())
}

#[cfg(test)]
mod tests {
    use {super::*, crate::manager::ManagerSettings, parlor_store::InMemoryRoomStore};

    #[tokio::test(start_paused = true)]
    async fn test_registers_enabled_builtins() {
        let manager = PluginManager::new(ManagerSettings::default());
        let mut config = PluginsConfig::default();
        config.word_filter.enabled = true;
        config.word_filter.words = vec!["heck".into()];

        register_builtins(&manager, Arc::new(InMemoryRoomStore::new()), &config)
            .await
            .unwrap();

        assert!(manager.get_plugin(BROADCASTER_ID).await.is_some());
        let filter = manager.get_plugin(WORD_FILTER_ID).await.unwrap();
        assert_eq!(filter.status().capabilities, vec!["transformer", "moderator"]);
        assert!(!manager.validate_content("what the heck").await);
        assert_eq!(manager.sanitize_content("what the heck").await, "what the ****");

        manager.unregister_plugin(BROADCASTER_ID).await.unwrap();
    }

    #[tokio::test]
    async fn test_disabled_builtins_are_skipped() {
        let manager = PluginManager::new(ManagerSettings::default());
        let mut config = PluginsConfig::default();
        config.broadcaster.enabled = false;

        register_builtins(&manager, Arc::new(InMemoryRoomStore::new()), &config)
            .await
            .unwrap();
        assert!(manager.get_plugins().await.is_empty());
    }
}
