use std::{net::SocketAddr, sync::Arc};

use {
    axum::{
        Router,
        extract::State,
        response::{IntoResponse, Json},
        routing::{get, post, put},
    },
    parlor_config::ParlorConfig,
    parlor_plugins::{ManagerSettings, PluginManager, builtin::register_builtins},
    parlor_store::{InMemoryRoomStore, RoomStore},
    tower_http::{
        cors::{Any, CorsLayer},
        trace::TraceLayer,
    },
    tracing::{info, warn},
};

use crate::{routes, state::GatewayState};

// ── Server startup ───────────────────────────────────────────────────────────

/// Build the gateway router (shared between production startup and tests).
pub fn build_gateway_app(state: Arc<GatewayState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route(
            "/api/plugins",
            get(routes::list_plugins).post(routes::register_plugin),
        )
        .route(
            "/api/plugins/{id}",
            get(routes::get_plugin).delete(routes::unregister_plugin),
        )
        .route("/api/plugins/{id}/actions", post(routes::plugin_action))
        .route(
            "/api/plugins/{id}/subscriptions",
            put(routes::update_subscriptions),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Wire store, plugin manager and built-in plugins from `config`.
pub async fn build_state(config: &ParlorConfig) -> anyhow::Result<Arc<GatewayState>> {
    let store = Arc::new(InMemoryRoomStore::new());
    for name in &config.server.rooms {
        store.create_room(name).await;
    }

    let plugins = PluginManager::new(ManagerSettings::from_config(&config.plugins));
    register_builtins(
        &plugins,
        Arc::clone(&store) as Arc<dyn RoomStore>,
        &config.plugins,
    )
    .await?;

    Ok(GatewayState::new(plugins, store))
}

/// Start the gateway HTTP server and block until Ctrl-C.
pub async fn start_gateway(config: ParlorConfig) -> anyhow::Result<()> {
    let state = build_state(&config).await?;
    let app = build_gateway_app(Arc::clone(&state));

    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Startup banner.
    let rooms = state.store.list_rooms().await?.len();
    let lines = [
        format!("parlor gateway v{}", state.version),
        format!("listening on {addr}"),
        format!(
            "{} plugins registered, {rooms} rooms",
            state.plugins.get_plugins().await.len()
        ),
    ];
    let width = lines.iter().map(|l| l.len()).max().unwrap_or(0) + 4;
    info!("┌{}┐", "─".repeat(width));
    for line in &lines {
        info!("│  {:<w$}│", line, w = width - 2);
    }
    info!("└{}┘", "─".repeat(width));

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    shutdown_plugins(&state.plugins).await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

/// Unregister every plugin, newest first.
pub async fn shutdown_plugins(plugins: &PluginManager) {
    for record in plugins.plugins_in_order().await.into_iter().rev() {
        if let Err(e) = plugins.unregister_plugin(record.id()).await {
            warn!(plugin_id = %record.id(), error = %e, "plugin did not shut down cleanly");
        }
    }
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn health_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": state.version,
        "plugins": state.plugins.get_plugins().await.len(),
        "uptimeSecs": state.uptime_secs(),
    }))
}
