//! Periodic broadcast agent.
//!
//! Tracks up to `max_rooms` rooms and posts a fixed message into each of them
//! on every tick. Posted messages are announced through the manager as
//! `message.created`, like any other store write.

use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, Weak},
    time::Duration,
};

use {
    anyhow::Context,
    async_trait::async_trait,
    parlor_config::BroadcasterConfig,
    parlor_store::{NewMessage, RoomStore},
    serde_json::Value,
    tokio::{sync::Mutex, task::JoinHandle, time::MissedTickBehavior},
    tracing::{debug, info, warn},
};

use crate::{
    event::RoomEvent,
    handlers::EventHandlers,
    manager::PluginManager,
    plugin::{Plugin, PluginConfig, PluginMetadata},
};

pub const BROADCASTER_ID: &str = "periodic-broadcaster";

#[derive(Debug, Clone)]
pub struct BroadcasterSettings {
    pub interval: Duration,
    pub max_rooms: usize,
    pub sender: String,
    pub message: String,
}

impl From<&BroadcasterConfig> for BroadcasterSettings {
    fn from(config: &BroadcasterConfig) -> Self {
        Self {
            interval: Duration::from_secs(config.interval_secs.max(1)),
            max_rooms: config.max_rooms,
            sender: config.sender.clone(),
            message: config.message.clone(),
        }
    }
}

#[derive(Debug, Default)]
struct Tracking {
    /// Room ids in the order they started being tracked.
    rooms: Vec<String>,
    activity: HashMap<String, u64>,
    participants: HashMap<String, usize>,
}

impl Tracking {
    fn track(&mut self, room_id: &str, max_rooms: usize) -> bool {
        if self.rooms.len() >= max_rooms || self.rooms.iter().any(|r| r == room_id) {
            return false;
        }
        self.rooms.push(room_id.to_string());
        true
    }
}

type SharedTracking = Arc<std::sync::Mutex<Tracking>>;

fn lock(tracking: &SharedTracking) -> std::sync::MutexGuard<'_, Tracking> {
    tracking.lock().unwrap_or_else(PoisonError::into_inner)
}

fn room_id_of<'a>(data: &'a Value, key: &str, event: RoomEvent) -> anyhow::Result<&'a str> {
    data.get(key)
        .and_then(Value::as_str)
        .with_context(|| format!("{event} payload has no '{key}'"))
}

pub struct Broadcaster {
    metadata: PluginMetadata,
    settings: BroadcasterSettings,
    store: Arc<dyn RoomStore>,
    manager: Weak<PluginManager>,
    handlers: EventHandlers,
    tracking: SharedTracking,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl Broadcaster {
    pub fn new(
        settings: BroadcasterSettings,
        store: Arc<dyn RoomStore>,
        manager: Weak<PluginManager>,
    ) -> Self {
        let metadata =
            PluginMetadata::new(BROADCASTER_ID, "Periodic Broadcaster", env!("CARGO_PKG_VERSION"))
                .with_description("Posts a recurring message into active rooms");
        Self {
            metadata,
            settings,
            store,
            manager,
            handlers: EventHandlers::new(),
            tracking: SharedTracking::default(),
            timer: Mutex::new(None),
        }
    }

    pub fn tracked_rooms(&self) -> Vec<String> {
        lock(&self.tracking).rooms.clone()
    }

    /// Messages seen in `room_id` from senders other than the broadcaster.
    pub fn activity(&self, room_id: &str) -> u64 {
        lock(&self.tracking)
            .activity
            .get(room_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn participants(&self, room_id: &str) -> usize {
        lock(&self.tracking)
            .participants
            .get(room_id)
            .copied()
            .unwrap_or(0)
    }

    pub async fn is_running(&self) -> bool {
        self.timer
            .lock()
            .await
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    fn register_handlers(&self) {
        let max_rooms = self.settings.max_rooms;

        let tracking = Arc::clone(&self.tracking);
        self.handlers.on(RoomEvent::RoomCreated, move |data| {
            let tracking = Arc::clone(&tracking);
            async move {
                let room_id = room_id_of(&data, "id", RoomEvent::RoomCreated)?;
                if lock(&tracking).track(room_id, max_rooms) {
                    debug!(room_id, "broadcaster tracking new room");
                }
                Ok(())
            }
        });

        let tracking = Arc::clone(&self.tracking);
        let own_sender = self.settings.sender.clone();
        self.handlers.on(RoomEvent::MessageCreated, move |data| {
            let tracking = Arc::clone(&tracking);
            let own_sender = own_sender.clone();
            async move {
                if data.get("sender").and_then(Value::as_str) == Some(own_sender.as_str()) {
                    return Ok(());
                }
                let room_id = room_id_of(&data, "roomId", RoomEvent::MessageCreated)?;
                *lock(&tracking)
                    .activity
                    .entry(room_id.to_string())
                    .or_default() += 1;
                Ok(())
            }
        });

        let tracking = Arc::clone(&self.tracking);
        self.handlers.on(RoomEvent::ParticipantJoined, move |data| {
            let tracking = Arc::clone(&tracking);
            async move {
                let room_id = room_id_of(&data, "roomId", RoomEvent::ParticipantJoined)?;
                *lock(&tracking)
                    .participants
                    .entry(room_id.to_string())
                    .or_default() += 1;
                Ok(())
            }
        });

        let tracking = Arc::clone(&self.tracking);
        self.handlers.on(RoomEvent::ParticipantLeft, move |data| {
            let tracking = Arc::clone(&tracking);
            async move {
                let room_id = room_id_of(&data, "roomId", RoomEvent::ParticipantLeft)?;
                if let Some(count) = lock(&tracking).participants.get_mut(room_id) {
                    *count = count.saturating_sub(1);
                }
                Ok(())
            }
        });
    }
}

/// Post the broadcast into every tracked room and announce each message.
/// Returns how many rooms were posted to.
async fn broadcast_round(
    settings: &BroadcasterSettings,
    store: &dyn RoomStore,
    manager: &Weak<PluginManager>,
    tracking: &SharedTracking,
) -> usize {
    let rooms = lock(tracking).rooms.clone();
    let mut posted = 0;
    for room_id in rooms {
        let message = NewMessage::now(&settings.message, &settings.sender);
        let stored = match store.add_message_to_room(&room_id, message).await {
            Ok(stored) => stored,
            Err(e) => {
                warn!(room_id = %room_id, error = %e, "broadcast failed");
                continue;
            },
        };
        posted += 1;

        let Some(manager) = manager.upgrade() else {
            continue;
        };
        match serde_json::to_value(&stored) {
            Ok(data) => {
                manager.notify_plugins(RoomEvent::MessageCreated, data).await;
            },
            Err(e) => warn!(room_id = %room_id, error = %e, "failed to encode broadcast message"),
        }
    }
    posted
}

#[async_trait]
impl Plugin for Broadcaster {
    fn metadata(&self) -> &PluginMetadata {
        &self.metadata
    }

    fn config(&self) -> PluginConfig {
        PluginConfig::subscribed([
            RoomEvent::RoomCreated,
            RoomEvent::MessageCreated,
            RoomEvent::ParticipantJoined,
            RoomEvent::ParticipantLeft,
        ])
    }

    fn handlers(&self) -> Option<&EventHandlers> {
        Some(&self.handlers)
    }

    async fn initialize(&self) -> anyhow::Result<()> {
        let rooms = self
            .store
            .list_rooms()
            .await
            .context("failed to load rooms for broadcasting")?;
        {
            let mut tracking = lock(&self.tracking);
            for room in rooms.iter().take(self.settings.max_rooms) {
                tracking.track(&room.id, self.settings.max_rooms);
            }
        }
        self.register_handlers();

        let settings = self.settings.clone();
        let store = Arc::clone(&self.store);
        let manager = Weak::clone(&self.manager);
        let tracking = Arc::clone(&self.tracking);
        let handle = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + settings.interval;
            let mut ticker = tokio::time::interval_at(start, settings.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let posted = broadcast_round(&settings, store.as_ref(), &manager, &tracking).await;
                debug!(posted, "broadcast round finished");
            }
        });

        if let Some(previous) = self.timer.lock().await.replace(handle) {
            previous.abort();
        }
        info!(
            rooms = self.tracked_rooms().len(),
            interval_secs = self.settings.interval.as_secs(),
            "broadcaster started"
        );
        Ok(())
    }

    async fn terminate(&self) -> anyhow::Result<()> {
        if let Some(handle) = self.timer.lock().await.take() {
            handle.abort();
        }
        *lock(&self.tracking) = Tracking::default();
        self.handlers.clear();
        info!("broadcaster stopped");
        Ok(())
    }
}

impl Drop for Broadcaster {
    fn drop(&mut self) {
        if let Some(handle) = self.timer.get_mut().take() {
            handle.abort();
        }
    }
}
