//! Configuration: schema, discovery and loading.
//!
//! Config files are looked up as `parlor.{toml,yaml,yml,json}` in the working
//! directory, then in `~/.config/parlor/`. String values may reference
//! environment variables with `${VAR}` or `${VAR:-fallback}`.

pub mod env_subst;
pub mod loader;
pub mod schema;

pub use {
    loader::{clear_config_dir, config_dir, discover_and_load, load_config, set_config_dir},
    schema::{
        BroadcasterConfig, ParlorConfig, PluginsConfig, ServerConfig, WebhookDefaults,
        WordFilterConfig,
    },
};
