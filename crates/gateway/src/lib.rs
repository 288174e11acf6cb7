//! Gateway: HTTP surface of the plugin system and the composition root.
//!
//! Lifecycle:
//! 1. Load config
//! 2. Create the room store and seed the configured rooms
//! 3. Build the plugin manager and register the enabled built-ins
//! 4. Serve the plugin API until Ctrl-C, then unregister every plugin

pub mod auth;
pub mod routes;
pub mod server;
pub mod state;
