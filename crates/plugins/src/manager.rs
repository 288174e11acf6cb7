//! Plugin registry and event fan-out.

use std::{
    any::Any,
    collections::{BTreeSet, HashMap, HashSet},
    panic::AssertUnwindSafe,
    sync::{
        Arc, PoisonError, RwLock as StdRwLock,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use {
    futures::{
        FutureExt,
        future::{BoxFuture, join_all},
    },
    parlor_config::PluginsConfig,
    parlor_store::Message,
    serde::Serialize,
    serde_json::{Value, json},
    tokio::sync::RwLock,
    tracing::{debug, error, info, warn},
};

use crate::{
    error::{Error, LifecycleStage, Result},
    event::RoomEvent,
    plugin::{ContentModerator, MessageTransformer, Plugin, PluginConfig, PluginMetadata},
    retry::RetryPolicy,
    timestamp_now,
    webhook::WebhookSender,
};

// ── Settings ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManagerSettings {
    /// Deadline for one plugin's `handle_event`. `None` waits indefinitely.
    pub handler_timeout: Option<Duration>,
    /// Used when a plugin doesn't configure its own retry policy.
    pub webhook_retry: RetryPolicy,
    /// Per-attempt webhook HTTP timeout.
    pub webhook_request_timeout: Option<Duration>,
}

impl ManagerSettings {
    pub fn from_config(config: &PluginsConfig) -> Self {
        Self {
            handler_timeout: config.handler_timeout_ms.map(Duration::from_millis),
            webhook_retry: RetryPolicy::new(
                config.webhook.retry_attempts,
                Duration::from_millis(config.webhook.retry_delay_ms),
            ),
            webhook_request_timeout: config.webhook.request_timeout_ms.map(Duration::from_millis),
        }
    }
}

// ── Registration ────────────────────────────────────────────────────────────

/// A plugin plus the optional capabilities it is registered with.
pub struct PluginRegistration {
    plugin: Arc<dyn Plugin>,
    transformer: Option<Arc<dyn MessageTransformer>>,
    moderator: Option<Arc<dyn ContentModerator>>,
}

impl PluginRegistration {
    pub fn new(plugin: Arc<dyn Plugin>) -> Self {
        Self {
            plugin,
            transformer: None,
            moderator: None,
        }
    }

    pub fn with_transformer(mut self, transformer: Arc<dyn MessageTransformer>) -> Self {
        self.transformer = Some(transformer);
        self
    }

    pub fn with_moderator(mut self, moderator: Arc<dyn ContentModerator>) -> Self {
        self.moderator = Some(moderator);
        self
    }
}

impl<P: Plugin + 'static> From<Arc<P>> for PluginRegistration {
    fn from(plugin: Arc<P>) -> Self {
        Self::new(plugin)
    }
}

/// Registry entry for an active plugin.
pub struct PluginRecord {
    metadata: PluginMetadata,
    config: StdRwLock<PluginConfig>,
    plugin: Arc<dyn Plugin>,
    transformer: Option<Arc<dyn MessageTransformer>>,
    moderator: Option<Arc<dyn ContentModerator>>,
    registered_at: String,
    seq: u64,
}

/// Serializable view of a registered plugin.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginStatus {
    pub metadata: PluginMetadata,
    pub subscriptions: Vec<RoomEvent>,
    pub webhook_url: Option<String>,
    pub has_api_key: bool,
    pub capabilities: Vec<&'static str>,
    pub registered_at: String,
}

impl PluginRecord {
    pub fn id(&self) -> &str {
        &self.metadata.id
    }

    pub fn metadata(&self) -> &PluginMetadata {
        &self.metadata
    }

    pub fn plugin(&self) -> &Arc<dyn Plugin> {
        &self.plugin
    }

    /// Snapshot of the live config.
    pub fn config(&self) -> PluginConfig {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_subscribed(&self, event: RoomEvent) -> bool {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_subscribed(event)
    }

    pub fn status(&self) -> PluginStatus {
        let config = self.config();
        let mut capabilities = Vec::new();
        if self.transformer.is_some() {
            capabilities.push("transformer");
        }
        if self.moderator.is_some() {
            capabilities.push("moderator");
        }
        PluginStatus {
            metadata: self.metadata.clone(),
            subscriptions: config.event_subscriptions.into_iter().collect(),
            webhook_url: config.webhook_url,
            has_api_key: config.api_key.is_some(),
            capabilities,
            registered_at: self.registered_at.clone(),
        }
    }

    /// Incoming transform; returns the original message if the plugin fails.
    pub async fn transform_incoming(&self, message: Message) -> Message {
        let Some(transformer) = &self.transformer else {
            return message;
        };
        match transformer.transform_incoming(message.clone()).await {
            Ok(transformed) => transformed,
            Err(e) => {
                warn!(plugin_id = %self.id(), error = %e, "transform_incoming failed, keeping original");
                message
            },
        }
    }

    /// Outgoing transform; returns the original message if the plugin fails.
    pub async fn transform_outgoing(&self, message: Message) -> Message {
        let Some(transformer) = &self.transformer else {
            return message;
        };
        match transformer.transform_outgoing(message.clone()).await {
            Ok(transformed) => transformed,
            Err(e) => {
                warn!(plugin_id = %self.id(), error = %e, "transform_outgoing failed, keeping original");
                message
            },
        }
    }

    /// `true` unless the moderator explicitly rejects the content.
    pub async fn validate_content(&self, content: &str) -> bool {
        let Some(moderator) = &self.moderator else {
            return true;
        };
        moderator.validate_content(content).await.unwrap_or_else(|e| {
            warn!(plugin_id = %self.id(), error = %e, "validate_content failed, allowing");
            true
        })
    }

    pub async fn sanitize_content(&self, content: String) -> String {
        let Some(moderator) = &self.moderator else {
            return content;
        };
        match moderator.sanitize_content(&content).await {
            Ok(sanitized) => sanitized,
            Err(e) => {
                warn!(plugin_id = %self.id(), error = %e, "sanitize_content failed, keeping original");
                content
            },
        }
    }
}

// ── Manager ─────────────────────────────────────────────────────────────────

/// Outcome of one `notify_plugins` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    /// Plugins the event was dispatched to.
    pub notified: usize,
    /// Of those, how many failed (handler, timeout or webhook).
    pub failed: usize,
}

#[derive(Default)]
struct Registry {
    active: HashMap<String, Arc<PluginRecord>>,
    /// Ids with a register or unregister in flight.
    pending: HashSet<String>,
}

pub struct PluginManager {
    registry: RwLock<Registry>,
    webhooks: WebhookSender,
    handler_timeout: Option<Duration>,
    next_seq: AtomicU64,
}

impl PluginManager {
    pub fn new(settings: ManagerSettings) -> Arc<Self> {
        Arc::new(Self {
            registry: RwLock::new(Registry::default()),
            webhooks: WebhookSender::new(
                settings.webhook_retry,
                settings.webhook_request_timeout,
            ),
            handler_timeout: settings.handler_timeout,
            next_seq: AtomicU64::new(0),
        })
    }

    /// Validate, initialize and insert a plugin, then announce it to the
    /// other plugins as `PluginRegistered`.
    ///
    /// The id is reserved before `initialize` runs, so a concurrent
    /// registration of the same id fails with [`Error::DuplicateId`].
    pub async fn register_plugin(&self, registration: impl Into<PluginRegistration>) -> Result<()> {
        let PluginRegistration {
            plugin,
            transformer,
            moderator,
        } = registration.into();
        let metadata = plugin.metadata().clone();
        let config = plugin.config();
        let plugin_id = metadata.id.clone();

        if let Some(url) = &config.webhook_url {
            validate_webhook_url(&plugin_id, url)?;
        }

        {
            let mut registry = self.registry.write().await;
            if registry.active.contains_key(&plugin_id)
                || !registry.pending.insert(plugin_id.clone())
            {
                return Err(Error::DuplicateId { plugin_id });
            }
        }

        if let Err(source) = plugin.initialize().await {
            self.registry.write().await.pending.remove(&plugin_id);
            error!(plugin_id = %plugin_id, error = %source, "plugin initialization failed");
            return Err(Error::Plugin {
                plugin_id,
                stage: LifecycleStage::Initialize,
                source,
            });
        }

        let record = Arc::new(PluginRecord {
            metadata: metadata.clone(),
            config: StdRwLock::new(config),
            plugin,
            transformer,
            moderator,
            registered_at: timestamp_now(),
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
        });
        {
            let mut registry = self.registry.write().await;
            registry.pending.remove(&plugin_id);
            registry.active.insert(plugin_id.clone(), record);
        }
        info!(plugin_id = %plugin_id, version = %metadata.version, "plugin registered");

        self.fan_out(
            RoomEvent::PluginRegistered,
            json!({ "pluginId": plugin_id, "metadata": metadata }),
            Some(plugin_id.clone()),
        )
        .await;
        Ok(())
    }

    /// Terminate and remove a plugin. The entry is removed and survivors are
    /// told even when `terminate` fails; that failure is returned afterwards.
    pub async fn unregister_plugin(&self, plugin_id: &str) -> Result<()> {
        let record = {
            let mut registry = self.registry.write().await;
            let record = registry.active.get(plugin_id).cloned();
            match record {
                Some(record) if registry.pending.insert(plugin_id.to_string()) => record,
                _ => {
                    return Err(Error::NotFound {
                        plugin_id: plugin_id.to_string(),
                    });
                },
            }
        };

        let terminated = record.plugin.terminate().await;

        {
            let mut registry = self.registry.write().await;
            registry.active.remove(plugin_id);
            registry.pending.remove(plugin_id);
        }

        if let Err(e) = &terminated {
            error!(plugin_id = %plugin_id, error = %e, "plugin termination failed, removed anyway");
        } else {
            info!(plugin_id = %plugin_id, "plugin unregistered");
        }

        self.fan_out(
            RoomEvent::PluginUnregistered,
            json!({ "pluginId": plugin_id, "metadata": record.metadata }),
            None,
        )
        .await;

        terminated.map_err(|source| Error::Plugin {
            plugin_id: plugin_id.to_string(),
            stage: LifecycleStage::Terminate,
            source,
        })
    }

    pub async fn get_plugin(&self, plugin_id: &str) -> Option<Arc<PluginRecord>> {
        self.registry.read().await.active.get(plugin_id).cloned()
    }

    pub async fn get_plugins(&self) -> HashMap<String, Arc<PluginRecord>> {
        self.registry.read().await.active.clone()
    }

    /// Active plugins in registration order.
    pub async fn plugins_in_order(&self) -> Vec<Arc<PluginRecord>> {
        let mut records: Vec<_> = self.registry.read().await.active.values().cloned().collect();
        records.sort_by_key(|r| r.seq);
        records
    }

    /// Apply `update` to a plugin's live config. The result is validated
    /// before it replaces the current config.
    pub async fn update_config<F>(&self, plugin_id: &str, update: F) -> Result<PluginConfig>
    where
        F: FnOnce(&mut PluginConfig),
    {
        let record = self
            .get_plugin(plugin_id)
            .await
            .ok_or_else(|| Error::NotFound {
                plugin_id: plugin_id.to_string(),
            })?;

        let mut config = record.config.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = config.clone();
        update(&mut next);
        if let Some(url) = &next.webhook_url {
            validate_webhook_url(plugin_id, url)?;
        }
        *config = next.clone();
        debug!(plugin_id = %plugin_id, "plugin config updated");
        Ok(next)
    }

    /// Replace a plugin's subscriptions and, when given, its webhook URL.
    /// Returns the new subscription list.
    pub async fn update_subscriptions(
        &self,
        plugin_id: &str,
        events: impl IntoIterator<Item = RoomEvent>,
        webhook_url: Option<String>,
    ) -> Result<Vec<RoomEvent>> {
        let events: BTreeSet<RoomEvent> = events.into_iter().collect();
        let config = self
            .update_config(plugin_id, |config| {
                config.event_subscriptions = events;
                if webhook_url.is_some() {
                    config.webhook_url = webhook_url;
                }
            })
            .await?;
        Ok(config.event_subscriptions.into_iter().collect())
    }

    /// Dispatch `event` to every subscribed plugin and wait for all of them.
    ///
    /// Never fails: per-plugin failures are logged, handed to the plugin's
    /// `on_error` and re-announced as [`RoomEvent::PluginError`].
    pub fn notify_plugins(&self, event: RoomEvent, data: Value) -> BoxFuture<'_, DispatchSummary> {
        self.fan_out(event, data, None)
    }

    fn fan_out(
        &self,
        event: RoomEvent,
        data: Value,
        exclude: Option<String>,
    ) -> BoxFuture<'_, DispatchSummary> {
        async move {
            let targets: Vec<Arc<PluginRecord>> = {
                let registry = self.registry.read().await;
                registry
                    .active
                    .values()
                    .filter(|r| exclude.as_deref() != Some(r.id()))
                    .filter(|r| r.is_subscribed(event))
                    .cloned()
                    .collect()
            };
            if targets.is_empty() {
                debug!(%event, "no subscribers");
                return DispatchSummary::default();
            }
            debug!(%event, subscribers = targets.len(), "dispatching event");

            let data = &data;
            let outcomes = join_all(targets.iter().map(|record| async move {
                // A panicking plugin must not unwind through its siblings.
                let dispatched = AssertUnwindSafe(self.dispatch_to(record, event, data))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|payload| {
                        Err(Error::Panicked {
                            plugin_id: record.id().to_string(),
                            event,
                            message: panic_message(&*payload),
                        })
                    });
                match dispatched {
                    Ok(()) => true,
                    Err(err) => {
                        self.report_failure(record, event, err).await;
                        false
                    },
                }
            }))
            .await;

            DispatchSummary {
                notified: targets.len(),
                failed: outcomes.into_iter().filter(|ok| !ok).count(),
            }
        }
        .boxed()
    }

    async fn dispatch_to(&self, record: &PluginRecord, event: RoomEvent, data: &Value) -> Result<()> {
        let handled = async {
            record
                .plugin
                .handle_event(event, data)
                .await
                .map_err(|source| Error::Handler {
                    plugin_id: record.id().to_string(),
                    event,
                    source,
                })
        };
        match self.handler_timeout {
            Some(after) => tokio::time::timeout(after, handled)
                .await
                .map_err(|_| Error::Timeout {
                    plugin_id: record.id().to_string(),
                    event,
                    after,
                })??,
            None => handled.await?,
        }

        let config = record.config();
        if config.webhook_url.is_some() {
            self.webhooks
                .deliver(&record.metadata, &config, event, data)
                .await?;
        }
        Ok(())
    }

    async fn report_failure(&self, record: &PluginRecord, event: RoomEvent, err: Error) {
        error!(plugin_id = %record.id(), %event, error = %err, "plugin notification failed");
        let hook = std::panic::catch_unwind(AssertUnwindSafe(|| record.plugin.on_error(&err)));
        if let Err(payload) = hook {
            warn!(
                plugin_id = %record.id(),
                panic = %panic_message(&*payload),
                "on_error hook panicked"
            );
        }

        if event == RoomEvent::PluginError {
            return;
        }
        let payload = json!({
            "pluginId": record.id(),
            "error": err.to_string(),
            "event": event,
            "timestamp": timestamp_now(),
        });
        self.fan_out(RoomEvent::PluginError, payload, Some(record.id().to_string()))
            .await;
    }

    // ── Capability pipelines ────────────────────────────────────────────────

    /// Run every registered transformer over an incoming message, in
    /// registration order.
    pub async fn transform_incoming(&self, mut message: Message) -> Message {
        for record in self.plugins_in_order().await {
            message = record.transform_incoming(message).await;
        }
        message
    }

    pub async fn transform_outgoing(&self, mut message: Message) -> Message {
        for record in self.plugins_in_order().await {
            message = record.transform_outgoing(message).await;
        }
        message
    }

    /// `false` only if some moderator explicitly rejects the content.
    pub async fn validate_content(&self, content: &str) -> bool {
        for record in self.plugins_in_order().await {
            if !record.validate_content(content).await {
                debug!(plugin_id = %record.id(), "content rejected");
                return false;
            }
        }
        true
    }

    pub async fn sanitize_content(&self, content: impl Into<String>) -> String {
        let mut content = content.into();
        for record in self.plugins_in_order().await {
            content = record.sanitize_content(content).await;
        }
        content
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

fn validate_webhook_url(plugin_id: &str, raw: &str) -> Result<()> {
    let invalid = |reason: String| Error::InvalidWebhook {
        plugin_id: plugin_id.to_string(),
        url: raw.to_string(),
        reason,
    };
    let parsed = url::Url::parse(raw).map_err(|e| invalid(e.to_string()))?;
    match parsed.scheme() {
        "http" | "https" => {},
        other => return Err(invalid(format!("unsupported scheme '{other}'"))),
    }
    if parsed.host_str().is_none_or(str::is_empty) {
        return Err(invalid("missing host".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Mutex,
        atomic::{AtomicBool, AtomicUsize},
    };

    use {
        super::*, crate::handlers::EventHandlers, crate::test_support::spawn_receiver,
        async_trait::async_trait, chrono::Utc,
    };

    /// Records every event it handles; failure modes are switchable.
    struct Probe {
        metadata: PluginMetadata,
        config: PluginConfig,
        handlers: EventHandlers,
        seen: Arc<Mutex<Vec<(RoomEvent, Value)>>>,
        errors: Mutex<Vec<String>>,
        fail_init: bool,
        fail_terminate: bool,
        terminated: AtomicUsize,
    }

    impl Probe {
        fn new(id: &str, events: impl IntoIterator<Item = RoomEvent>) -> Self {
            Self::with_config(id, PluginConfig::subscribed(events))
        }

        fn with_config(id: &str, config: PluginConfig) -> Self {
            let seen: Arc<Mutex<Vec<(RoomEvent, Value)>>> = Arc::default();
            let handlers = EventHandlers::new();
            for event in RoomEvent::ALL {
                let seen = Arc::clone(&seen);
                handlers.on(event, move |data| {
                    let seen = Arc::clone(&seen);
                    async move {
                        seen.lock().unwrap().push((event, data));
                        Ok(())
                    }
                });
            }
            Self {
                metadata: PluginMetadata::new(id, id.to_uppercase(), "1.0.0"),
                config,
                handlers,
                seen,
                errors: Mutex::default(),
                fail_init: false,
                fail_terminate: false,
                terminated: AtomicUsize::new(0),
            }
        }

        fn failing_on(self, event: RoomEvent) -> Self {
            self.handlers.on(event, |_| async {
                Err::<(), _>(anyhow::anyhow!("handler exploded"))
            });
            self
        }

        fn seen(&self) -> Vec<(RoomEvent, Value)> {
            self.seen.lock().unwrap().clone()
        }

        fn seen_of(&self, event: RoomEvent) -> Vec<Value> {
            self.seen()
                .into_iter()
                .filter(|(e, _)| *e == event)
                .map(|(_, data)| data)
                .collect()
        }
    }

    #[async_trait]
    impl Plugin for Probe {
        fn metadata(&self) -> &PluginMetadata {
            &self.metadata
        }

        fn config(&self) -> PluginConfig {
            self.config.clone()
        }

        async fn initialize(&self) -> anyhow::Result<()> {
            if self.fail_init {
                anyhow::bail!("init refused");
            }
            Ok(())
        }

        async fn terminate(&self) -> anyhow::Result<()> {
            self.terminated.fetch_add(1, Ordering::SeqCst);
            if self.fail_terminate {
                anyhow::bail!("terminate refused");
            }
            Ok(())
        }

        fn on_error(&self, error: &Error) {
            self.errors.lock().unwrap().push(error.to_string());
        }

        fn handlers(&self) -> Option<&EventHandlers> {
            Some(&self.handlers)
        }
    }

    fn manager() -> Arc<PluginManager> {
        PluginManager::new(ManagerSettings::default())
    }

    fn message(content: &str) -> Message {
        Message {
            id: "m1".into(),
            room_id: "r1".into(),
            content: content.into(),
            sender: "alice".into(),
            timestamp: Utc::now(),
        }
    }

    // ── Registration ──

    #[tokio::test]
    async fn test_duplicate_id_is_rejected() {
        let manager = manager();
        manager
            .register_plugin(Arc::new(Probe::new("dup", [])))
            .await
            .unwrap();

        let err = manager
            .register_plugin(Arc::new(Probe::new("dup", [])))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateId { ref plugin_id } if plugin_id == "dup"));
        assert_eq!(manager.get_plugins().await.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_duplicate_registration_admits_one() {
        let manager = manager();
        let (a, b) = tokio::join!(
            manager.register_plugin(Arc::new(Probe::new("race", []))),
            manager.register_plugin(Arc::new(Probe::new("race", []))),
        );
        assert_eq!([a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count(), 1);
        assert_eq!(manager.get_plugins().await.len(), 1);
    }

    #[tokio::test]
    async fn test_non_http_webhook_rejected_and_registry_unchanged() {
        let manager = manager();
        for url in ["ftp://example.com/hook", "ws://example.com/hook", "not a url", "http://"] {
            let probe = Probe::with_config(
                "bad",
                PluginConfig::default().with_webhook(url),
            );
            let err = manager.register_plugin(Arc::new(probe)).await.unwrap_err();
            assert!(
                matches!(err, Error::InvalidWebhook { .. }),
                "{url} should be rejected, got {err}"
            );
        }
        assert!(manager.get_plugins().await.is_empty());
        assert!(manager.get_plugin("bad").await.is_none());
    }

    #[tokio::test]
    async fn test_failed_initialize_does_not_register() {
        let manager = manager();
        let mut probe = Probe::new("broken", []);
        probe.fail_init = true;

        let err = manager.register_plugin(Arc::new(probe)).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Plugin {
                stage: LifecycleStage::Initialize,
                ..
            }
        ));
        assert!(manager.get_plugin("broken").await.is_none());

        // The id reservation is released.
        manager
            .register_plugin(Arc::new(Probe::new("broken", [])))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_plugin_registered_reaches_only_later_registrations() {
        let manager = manager();
        let c = Arc::new(Probe::new("c", []));
        let d = Arc::new(Probe::new("d", [RoomEvent::PluginRegistered]));
        let e = Arc::new(Probe::new("e", [RoomEvent::PluginRegistered]));

        manager.register_plugin(Arc::clone(&c)).await.unwrap();
        manager.register_plugin(Arc::clone(&d)).await.unwrap();
        manager.register_plugin(Arc::clone(&e)).await.unwrap();

        let seen = d.seen_of(RoomEvent::PluginRegistered);
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0]["pluginId"], "e");
        assert_eq!(seen[0]["metadata"], serde_json::to_value(&e.metadata).unwrap());
        // E is not told about its own registration.
        assert!(e.seen().is_empty());
    }

    // ── Unregistration ──

    #[tokio::test]
    async fn test_unregister_removes_even_when_terminate_fails() {
        let manager = manager();
        let mut probe = Probe::new("sticky", []);
        probe.fail_terminate = true;
        let probe = Arc::new(probe);
        manager.register_plugin(Arc::clone(&probe)).await.unwrap();

        let err = manager.unregister_plugin("sticky").await.unwrap_err();
        assert!(matches!(
            err,
            Error::Plugin {
                stage: LifecycleStage::Terminate,
                ..
            }
        ));
        assert!(manager.get_plugin("sticky").await.is_none());
        assert_eq!(probe.terminated.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unregister_unknown_is_not_found() {
        let err = manager().unregister_plugin("ghost").await.unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_survivors_hear_about_unregistration() {
        let manager = manager();
        let watcher = Arc::new(Probe::new("watcher", [RoomEvent::PluginUnregistered]));
        let mut leaving = Probe::new("leaving", [RoomEvent::PluginUnregistered]);
        leaving.fail_terminate = true;
        let leaving = Arc::new(leaving);
        manager.register_plugin(Arc::clone(&watcher)).await.unwrap();
        manager.register_plugin(Arc::clone(&leaving)).await.unwrap();

        let _ = manager.unregister_plugin("leaving").await;

        let seen = watcher.seen_of(RoomEvent::PluginUnregistered);
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0]["pluginId"], "leaving");
        assert!(leaving.seen().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_unregister_terminates_once() {
        let manager = manager();
        let probe = Arc::new(Probe::new("once", []));
        manager.register_plugin(Arc::clone(&probe)).await.unwrap();

        let (a, b) = tokio::join!(
            manager.unregister_plugin("once"),
            manager.unregister_plugin("once"),
        );
        assert!(a.is_ok() != b.is_ok());
        assert_eq!(probe.terminated.load(Ordering::SeqCst), 1);
    }

    // ── Fan-out ──

    #[tokio::test]
    async fn test_unsubscribed_plugin_is_never_invoked() {
        let server = spawn_receiver(vec![]).await;
        let manager = manager();
        let deaf = Arc::new(Probe::with_config(
            "deaf",
            PluginConfig::subscribed([RoomEvent::RoomCreated]).with_webhook(&server.url),
        ));
        manager.register_plugin(Arc::clone(&deaf)).await.unwrap();

        let summary = manager
            .notify_plugins(RoomEvent::MessageCreated, json!({"content": "hi"}))
            .await;

        assert_eq!(summary, DispatchSummary::default());
        assert!(deaf.seen().is_empty());
        assert!(server.received().is_empty());
    }

    #[tokio::test]
    async fn test_handler_and_webhook_both_receive_message() {
        let server = spawn_receiver(vec![]).await;
        let manager = manager();
        let a = Arc::new(Probe::new("a", [RoomEvent::MessageCreated]));
        let b = Arc::new(Probe::with_config(
            "b",
            PluginConfig::subscribed([RoomEvent::MessageCreated]).with_webhook(&server.url),
        ));
        manager.register_plugin(Arc::clone(&a)).await.unwrap();
        manager.register_plugin(Arc::clone(&b)).await.unwrap();

        let payload = json!({"content": "hi", "roomId": "r1"});
        let summary = manager
            .notify_plugins(RoomEvent::MessageCreated, payload.clone())
            .await;

        assert_eq!(summary, DispatchSummary {
            notified: 2,
            failed: 0
        });
        assert_eq!(a.seen(), vec![(RoomEvent::MessageCreated, payload)]);
        let received = server.received();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].header("x-event-type"), "message.created");
        assert_eq!(received[0].body["data"]["content"], "hi");
    }

    #[tokio::test]
    async fn test_webhook_retries_until_third_attempt() {
        let server = spawn_receiver(vec![500, 500]).await;
        let manager = manager();
        let hooked = Arc::new(Probe::with_config(
            "hooked",
            PluginConfig::subscribed([RoomEvent::MessageCreated])
                .with_webhook(&server.url)
                .with_retry(3, 25),
        ));
        manager.register_plugin(Arc::clone(&hooked)).await.unwrap();

        let summary = manager
            .notify_plugins(RoomEvent::MessageCreated, json!({}))
            .await;

        assert_eq!(summary.failed, 0);
        let received = server.received();
        assert_eq!(received.len(), 3);
        assert_eq!(server.successes(), 1);
        let first_gap = received[1].at - received[0].at;
        let second_gap = received[2].at - received[1].at;
        assert!(first_gap >= Duration::from_millis(25));
        assert!(second_gap >= Duration::from_millis(50));
        assert!(hooked.errors.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failure_is_isolated_and_reannounced() {
        let manager = manager();
        let flaky = Arc::new(
            Probe::new("flaky", [RoomEvent::MessageCreated, RoomEvent::PluginError])
                .failing_on(RoomEvent::MessageCreated),
        );
        let healthy = Arc::new(Probe::new("healthy", [RoomEvent::MessageCreated]));
        let monitor = Arc::new(Probe::new("monitor", [RoomEvent::PluginError]));
        for probe in [&flaky, &healthy, &monitor] {
            manager.register_plugin(Arc::clone(probe)).await.unwrap();
        }

        let summary = manager
            .notify_plugins(RoomEvent::MessageCreated, json!({"content": "x"}))
            .await;

        assert_eq!(summary, DispatchSummary {
            notified: 2,
            failed: 1
        });
        assert_eq!(healthy.seen_of(RoomEvent::MessageCreated).len(), 1);

        let errors = flaky.errors.lock().unwrap().clone();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("handler exploded"));

        let reports = monitor.seen_of(RoomEvent::PluginError);
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0]["pluginId"], "flaky");
        assert_eq!(reports[0]["event"], "message.created");
        assert!(reports[0]["error"].as_str().unwrap().contains("handler exploded"));
        assert!(reports[0]["timestamp"].is_string());
        // The failing plugin isn't sent its own error report.
        assert!(flaky.seen_of(RoomEvent::PluginError).is_empty());
    }

    #[tokio::test]
    async fn test_plugin_error_failures_are_not_reannounced() {
        let manager = manager();
        let grumpy = Arc::new(
            Probe::new("grumpy", [RoomEvent::PluginError]).failing_on(RoomEvent::PluginError),
        );
        let monitor = Arc::new(Probe::new("monitor", [RoomEvent::PluginError]));
        manager.register_plugin(Arc::clone(&grumpy)).await.unwrap();
        manager.register_plugin(Arc::clone(&monitor)).await.unwrap();

        let summary = manager
            .notify_plugins(RoomEvent::PluginError, json!({"pluginId": "elsewhere"}))
            .await;

        assert_eq!(summary.failed, 1);
        assert_eq!(grumpy.errors.lock().unwrap().len(), 1);
        // Only the original announcement, no second-order report.
        assert_eq!(monitor.seen_of(RoomEvent::PluginError).len(), 1);
    }

    struct Stalled {
        metadata: PluginMetadata,
        errors: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Plugin for Stalled {
        fn metadata(&self) -> &PluginMetadata {
            &self.metadata
        }

        fn config(&self) -> PluginConfig {
            PluginConfig::subscribed([RoomEvent::MessageCreated])
        }

        fn on_error(&self, error: &Error) {
            self.errors.lock().unwrap().push(error.to_string());
        }

        async fn handle_event(&self, _event: RoomEvent, _data: &Value) -> anyhow::Result<()> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_handler_timeout_counts_as_failure() {
        let manager = PluginManager::new(ManagerSettings {
            handler_timeout: Some(Duration::from_millis(500)),
            ..ManagerSettings::default()
        });
        let stalled = Arc::new(Stalled {
            metadata: PluginMetadata::new("stalled", "Stalled", "0.1.0"),
            errors: Mutex::default(),
        });
        manager.register_plugin(Arc::clone(&stalled)).await.unwrap();

        let summary = manager
            .notify_plugins(RoomEvent::MessageCreated, json!({}))
            .await;

        assert_eq!(summary.failed, 1);
        let errors = stalled.errors.lock().unwrap();
        assert_eq!(errors.as_slice(), [
            "plugin 'stalled' did not handle message.created within 500ms"
        ]);
    }

    /// Panics in both its handler and its error hook.
    struct Crashing {
        metadata: PluginMetadata,
    }

    #[async_trait]
    impl Plugin for Crashing {
        fn metadata(&self) -> &PluginMetadata {
            &self.metadata
        }

        fn config(&self) -> PluginConfig {
            PluginConfig::subscribed([RoomEvent::MessageCreated])
        }

        fn on_error(&self, _error: &Error) {
            panic!("error hook bug");
        }

        async fn handle_event(&self, _event: RoomEvent, _data: &Value) -> anyhow::Result<()> {
            panic!("plugin bug");
        }
    }

    #[tokio::test]
    async fn test_panicking_plugin_does_not_starve_siblings() {
        let manager = manager();
        let crashing = Arc::new(Crashing {
            metadata: PluginMetadata::new("crashing", "Crashing", "0.1.0"),
        });
        let healthy = Arc::new(Probe::new("healthy", [RoomEvent::MessageCreated]));
        let monitor = Arc::new(Probe::new("monitor", [RoomEvent::PluginError]));
        manager.register_plugin(crashing).await.unwrap();
        manager.register_plugin(Arc::clone(&healthy)).await.unwrap();
        manager.register_plugin(Arc::clone(&monitor)).await.unwrap();

        let summary = manager
            .notify_plugins(RoomEvent::MessageCreated, json!({"content": "x"}))
            .await;

        assert_eq!(summary, DispatchSummary {
            notified: 2,
            failed: 1
        });
        assert_eq!(healthy.seen_of(RoomEvent::MessageCreated).len(), 1);

        let reports = monitor.seen_of(RoomEvent::PluginError);
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0]["pluginId"], "crashing");
        assert!(reports[0]["error"].as_str().unwrap().contains("plugin bug"));

        // Still dispatchable afterwards.
        let summary = manager
            .notify_plugins(RoomEvent::MessageCreated, json!({"content": "y"}))
            .await;
        assert_eq!(summary.failed, 1);
        assert_eq!(healthy.seen_of(RoomEvent::MessageCreated).len(), 2);
    }

    // ── Config updates ──

    #[tokio::test]
    async fn test_update_subscriptions_changes_routing() {
        let manager = manager();
        let probe = Arc::new(Probe::new("mover", [RoomEvent::RoomCreated]));
        manager.register_plugin(Arc::clone(&probe)).await.unwrap();

        let subs = manager
            .update_subscriptions(
                "mover",
                [RoomEvent::ParticipantJoined, RoomEvent::MessageCreated],
                None,
            )
            .await
            .unwrap();
        assert_eq!(subs, vec![RoomEvent::MessageCreated, RoomEvent::ParticipantJoined]);

        manager.notify_plugins(RoomEvent::RoomCreated, json!({})).await;
        manager
            .notify_plugins(RoomEvent::ParticipantJoined, json!({"userId": "u1"}))
            .await;
        assert_eq!(probe.seen(), vec![(
            RoomEvent::ParticipantJoined,
            json!({"userId": "u1"})
        )]);
    }

    #[tokio::test]
    async fn test_update_rejects_bad_webhook_and_keeps_config() {
        let manager = manager();
        manager
            .register_plugin(Arc::new(Probe::new("keep", [RoomEvent::RoomCreated])))
            .await
            .unwrap();

        let err = manager
            .update_subscriptions("keep", [], Some("file:///etc/passwd".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidWebhook { .. }));

        let record = manager.get_plugin("keep").await.unwrap();
        assert!(record.is_subscribed(RoomEvent::RoomCreated));
        assert!(record.config().webhook_url.is_none());

        let err = manager
            .update_subscriptions("nobody", [], None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_status_summarizes_record() {
        let manager = manager();
        let probe = Probe::with_config(
            "status",
            PluginConfig::subscribed([RoomEvent::MessageCreated])
                .with_webhook("https://hooks.example.com/p")
                .with_api_key("secret"),
        );
        manager.register_plugin(Arc::new(probe)).await.unwrap();

        let status = manager.get_plugin("status").await.unwrap().status();
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["metadata"]["id"], "status");
        assert_eq!(json["subscriptions"], json!(["message.created"]));
        assert_eq!(json["webhookUrl"], "https://hooks.example.com/p");
        assert_eq!(json["hasApiKey"], true);
        assert_eq!(json["capabilities"], json!([]));
        assert!(json.get("apiKey").is_none());
    }

    // ── Capabilities ──

    struct Shouty {
        fail: AtomicBool,
    }

    #[async_trait]
    impl MessageTransformer for Shouty {
        async fn transform_incoming(&self, mut message: Message) -> anyhow::Result<Message> {
            if self.fail.load(Ordering::SeqCst) {
                anyhow::bail!("transformer down");
            }
            message.content = message.content.to_uppercase();
            Ok(message)
        }

        async fn transform_outgoing(&self, mut message: Message) -> anyhow::Result<Message> {
            message.content.push('!');
            Ok(message)
        }
    }

    struct Picky;

    #[async_trait]
    impl ContentModerator for Picky {
        async fn validate_content(&self, content: &str) -> anyhow::Result<bool> {
            if content.is_empty() {
                anyhow::bail!("cannot judge empty content");
            }
            Ok(!content.contains("spam"))
        }

        async fn sanitize_content(&self, content: &str) -> anyhow::Result<String> {
            if content.contains('\0') {
                anyhow::bail!("binary content");
            }
            Ok(content.replace("darn", "d**n"))
        }
    }

    #[tokio::test]
    async fn test_moderator_fails_open() {
        let manager = manager();
        manager
            .register_plugin(
                PluginRegistration::new(Arc::new(Probe::new("picky", [])))
                    .with_moderator(Arc::new(Picky)),
            )
            .await
            .unwrap();

        assert!(manager.validate_content("").await);
        assert!(manager.validate_content("hello").await);
        assert!(!manager.validate_content("buy spam now").await);
        assert_eq!(manager.sanitize_content("oh darn").await, "oh d**n");
        assert_eq!(manager.sanitize_content("a\0b").await, "a\0b");
    }

    #[tokio::test]
    async fn test_transformers_chain_and_fail_open() {
        let manager = manager();
        let shouty = Arc::new(Shouty {
            fail: AtomicBool::new(false),
        });
        manager
            .register_plugin(
                PluginRegistration::new(Arc::new(Probe::new("shouty", [])))
                    .with_transformer(Arc::clone(&shouty) as Arc<dyn MessageTransformer>),
            )
            .await
            .unwrap();

        let record = manager.get_plugin("shouty").await.unwrap();
        assert_eq!(record.status().capabilities, vec!["transformer"]);

        assert_eq!(manager.transform_incoming(message("hi")).await.content, "HI");
        assert_eq!(manager.transform_outgoing(message("hi")).await.content, "hi!");

        shouty.fail.store(true, Ordering::SeqCst);
        assert_eq!(manager.transform_incoming(message("hi")).await.content, "hi");
    }

    #[test]
    fn test_settings_from_config() {
        let mut config = PluginsConfig::default();
        config.handler_timeout_ms = Some(1500);
        config.webhook.retry_attempts = 5;
        config.webhook.retry_delay_ms = 200;

        let settings = ManagerSettings::from_config(&config);
        assert_eq!(settings.handler_timeout, Some(Duration::from_millis(1500)));
        assert_eq!(
            settings.webhook_retry,
            RetryPolicy::new(5, Duration::from_millis(200))
        );
        assert!(settings.webhook_request_timeout.is_none());
    }
}
