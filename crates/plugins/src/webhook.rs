//! Outbound webhook delivery for plugins hosted out of process.

use std::time::Duration;

use {
    hmac::{Hmac, Mac},
    reqwest::header::CONTENT_TYPE,
    serde::Serialize,
    serde_json::Value,
    sha2::Sha256,
    tracing::{debug, info},
};

use crate::{
    event::RoomEvent,
    plugin::{PluginConfig, PluginMetadata},
    retry::{RetryPolicy, retry_with_backoff},
    timestamp_now,
};

pub const HEADER_PLUGIN_ID: &str = "X-Plugin-ID";
pub const HEADER_EVENT_TYPE: &str = "X-Event-Type";
pub const HEADER_API_KEY: &str = "X-API-Key";
/// `sha256=<hex>` HMAC of the raw body keyed with the plugin's API key.
/// Only sent when the plugin has an API key.
pub const HEADER_SIGNATURE: &str = "X-Plugin-Signature";

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("webhook for plugin '{plugin_id}' responded {status}: {body}")]
    Status {
        plugin_id: String,
        status: u16,
        body: String,
    },

    #[error("webhook request for plugin '{plugin_id}' failed: {source}")]
    Transport {
        plugin_id: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to encode webhook payload for plugin '{plugin_id}': {source}")]
    Encode {
        plugin_id: String,
        #[source]
        source: serde_json::Error,
    },
}

impl WebhookError {
    pub fn plugin_id(&self) -> &str {
        match self {
            Self::Status { plugin_id, .. }
            | Self::Transport { plugin_id, .. }
            | Self::Encode { plugin_id, .. } => plugin_id,
        }
    }
}

/// JSON body POSTed to a plugin's webhook URL.
#[derive(Debug, Serialize)]
pub struct WebhookPayload<'a> {
    pub event: RoomEvent,
    pub data: &'a Value,
    pub timestamp: String,
    pub plugin: PluginRef<'a>,
}

#[derive(Debug, Serialize)]
pub struct PluginRef<'a> {
    pub id: &'a str,
    pub name: &'a str,
    pub version: &'a str,
}

/// HMAC-SHA256 signature header value for `body`.
pub fn sign_payload(api_key: &str, body: &[u8]) -> Option<String> {
    let mut mac = Hmac::<Sha256>::new_from_slice(api_key.as_bytes()).ok()?;
    mac.update(body);
    Some(format!("sha256={:x}", mac.finalize().into_bytes()))
}

/// Delivers events to plugin webhooks with bounded retries.
pub struct WebhookSender {
    client: reqwest::Client,
    defaults: RetryPolicy,
    request_timeout: Option<Duration>,
}

impl WebhookSender {
    pub fn new(defaults: RetryPolicy, request_timeout: Option<Duration>) -> Self {
        Self {
            client: reqwest::Client::new(),
            defaults,
            request_timeout,
        }
    }

    /// The plugin's own retry settings, falling back to the sender defaults.
    pub fn policy_for(&self, config: &PluginConfig) -> RetryPolicy {
        RetryPolicy {
            attempts: config.retry_attempts.unwrap_or(self.defaults.attempts),
            base_delay: config
                .retry_delay_ms
                .map_or(self.defaults.base_delay, Duration::from_millis),
        }
    }

    /// POST `event` to the plugin's webhook. No-op when no URL is configured.
    ///
    /// The payload and its timestamp are built once; every retry resends the
    /// same body.
    pub async fn deliver(
        &self,
        metadata: &PluginMetadata,
        config: &PluginConfig,
        event: RoomEvent,
        data: &Value,
    ) -> Result<(), WebhookError> {
        let Some(url) = config.webhook_url.as_deref() else {
            return Ok(());
        };

        let payload = WebhookPayload {
            event,
            data,
            timestamp: timestamp_now(),
            plugin: PluginRef {
                id: &metadata.id,
                name: &metadata.name,
                version: &metadata.version,
            },
        };
        let body = serde_json::to_vec(&payload).map_err(|source| WebhookError::Encode {
            plugin_id: metadata.id.clone(),
            source,
        })?;
        let api_key = config.api_key.as_deref().unwrap_or_default();
        let signature = config
            .api_key
            .as_deref()
            .and_then(|key| sign_payload(key, &body));

        let policy = self.policy_for(config);
        retry_with_backoff(policy, |attempt| {
            debug!(plugin_id = %metadata.id, %event, attempt = attempt + 1, "sending webhook");
            self.post_once(&metadata.id, url, event, api_key, signature.as_deref(), &body)
        })
        .await?;

        info!(plugin_id = %metadata.id, %event, "webhook delivered");
        Ok(())
    }

    async fn post_once(
        &self,
        plugin_id: &str,
        url: &str,
        event: RoomEvent,
        api_key: &str,
        signature: Option<&str>,
        body: &[u8],
    ) -> Result<(), WebhookError> {
        let mut request = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .header(HEADER_PLUGIN_ID, plugin_id)
            .header(HEADER_EVENT_TYPE, event.as_str())
            .header(HEADER_API_KEY, api_key)
            .body(body.to_vec());
        if let Some(signature) = signature {
            request = request.header(HEADER_SIGNATURE, signature);
        }
        if let Some(timeout) = self.request_timeout {
            request = request.timeout(timeout);
        }

        let response = request
            .send()
            .await
            .map_err(|source| WebhookError::Transport {
                plugin_id: plugin_id.to_string(),
                source,
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(WebhookError::Status {
            plugin_id: plugin_id.to_string(),
            status: status.as_u16(),
            body,
        })
    }
}
