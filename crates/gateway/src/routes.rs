//! `/api/plugins` handlers.

use std::sync::Arc;

use {
    axum::{
        Json,
        extract::{Path, State},
        http::{HeaderMap, StatusCode},
        response::{IntoResponse, Response},
    },
    parlor_plugins::{Error as PluginError, Plugin, RemotePlugin, RoomEvent, webhook::HEADER_API_KEY},
    parlor_store::{NewMessage, RoomStore, StoreError},
    serde::Deserialize,
    serde_json::json,
    tracing::{info, warn},
};

use crate::{auth::check_plugin_key, state::GatewayState};

// ── Errors ───────────────────────────────────────────────────────────────────

/// JSON error body with a status code.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    fn not_found(plugin_id: &str) -> Self {
        Self::new(StatusCode::NOT_FOUND, format!("plugin '{plugin_id}' not found"))
    }

    fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ── Registry ─────────────────────────────────────────────────────────────────

pub async fn register_plugin(
    State(state): State<Arc<GatewayState>>,
    Json(plugin): Json<RemotePlugin>,
) -> ApiResult<impl IntoResponse> {
    let plugin_id = plugin.metadata().id.clone();
    state
        .plugins
        .register_plugin(Arc::new(plugin))
        .await
        .map_err(|e| {
            warn!(plugin_id = %plugin_id, error = %e, "plugin registration rejected");
            ApiError::internal(e.to_string())
        })?;
    info!(plugin_id = %plugin_id, "remote plugin registered over http");
    Ok(Json(json!({ "success": true, "pluginId": plugin_id })))
}

pub async fn list_plugins(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    let plugins: Vec<_> = state
        .plugins
        .plugins_in_order()
        .await
        .iter()
        .map(|record| record.status())
        .collect();
    Json(json!({ "plugins": plugins }))
}

pub async fn get_plugin(
    State(state): State<Arc<GatewayState>>,
    Path(plugin_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let record = state
        .plugins
        .get_plugin(&plugin_id)
        .await
        .ok_or_else(|| ApiError::not_found(&plugin_id))?;
    Ok(Json(record.status()))
}

pub async fn unregister_plugin(
    State(state): State<Arc<GatewayState>>,
    Path(plugin_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    state
        .plugins
        .unregister_plugin(&plugin_id)
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?;
    Ok(Json(json!({ "success": true, "pluginId": plugin_id })))
}

// ── Actions ──────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionRequest {
    pub action: String,
    pub room_id: Option<String>,
    pub content: Option<String>,
}

/// Perform an action on behalf of a plugin. Only `send_message` exists.
pub async fn plugin_action(
    State(state): State<Arc<GatewayState>>,
    Path(plugin_id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<ActionRequest>,
) -> ApiResult<impl IntoResponse> {
    let record = state
        .plugins
        .get_plugin(&plugin_id)
        .await
        .ok_or_else(|| ApiError::not_found(&plugin_id))?;

    let provided = headers
        .get(HEADER_API_KEY)
        .and_then(|value| value.to_str().ok());
    let check = check_plugin_key(record.config().api_key.as_deref(), provided);
    if !check.is_allowed() {
        warn!(plugin_id = %plugin_id, ?check, "plugin action rejected");
        return Err(ApiError::new(StatusCode::UNAUTHORIZED, "invalid API key"));
    }

    match request.action.as_str() {
        "send_message" => {},
        other => return Err(ApiError::bad_request(format!("unsupported action '{other}'"))),
    }
    let (Some(room_id), Some(content)) = (request.room_id, request.content) else {
        return Err(ApiError::bad_request("send_message requires roomId and content"));
    };

    let content = state.plugins.sanitize_content(content).await;
    if !state.plugins.validate_content(&content).await {
        return Err(ApiError::bad_request("content rejected by moderation"));
    }

    // Transformers may rewrite content and sender; the room is fixed by the request.
    let draft = NewMessage::now(content, plugin_id.as_str()).draft(room_id.as_str());
    let incoming = state.plugins.transform_incoming(draft).await;

    let message = state
        .store
        .add_message_to_room(&room_id, NewMessage::from(incoming))
        .await
        .map_err(|e| match e {
            StoreError::RoomNotFound(_) => ApiError::new(StatusCode::NOT_FOUND, e.to_string()),
            StoreError::EmptyContent => ApiError::bad_request(e.to_string()),
        })?;

    let data = serde_json::to_value(&message).map_err(|e| ApiError::internal(e.to_string()))?;
    let summary = state
        .plugins
        .notify_plugins(RoomEvent::MessageCreated, data)
        .await;
    info!(
        plugin_id = %plugin_id,
        room_id = %room_id,
        notified = summary.notified,
        failed = summary.failed,
        "plugin sent message"
    );

    let message = state.plugins.transform_outgoing(message).await;
    Ok(Json(json!({ "success": true, "message": message })))
}

// ── Subscriptions ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionRequest {
    pub events: Vec<RoomEvent>,
    pub webhook_url: Option<String>,
}

pub async fn update_subscriptions(
    State(state): State<Arc<GatewayState>>,
    Path(plugin_id): Path<String>,
    Json(request): Json<SubscriptionRequest>,
) -> ApiResult<impl IntoResponse> {
    let subscriptions = state
        .plugins
        .update_subscriptions(&plugin_id, request.events, request.webhook_url)
        .await
        .map_err(|e| match e {
            PluginError::NotFound { .. } => ApiError::not_found(&plugin_id),
            PluginError::InvalidWebhook { .. } => ApiError::bad_request(e.to_string()),
            other => ApiError::internal(other.to_string()),
        })?;
    info!(plugin_id = %plugin_id, count = subscriptions.len(), "subscriptions updated");
    Ok(Json(json!({ "success": true, "subscriptions": subscriptions })))
}
