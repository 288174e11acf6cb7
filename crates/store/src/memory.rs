use std::collections::HashMap;

use {
    async_trait::async_trait,
    chrono::Utc,
    tokio::sync::RwLock,
    tracing::debug,
};

use crate::{
    store::{RoomStore, StoreError},
    types::{Message, NewMessage, Room},
};

#[derive(Default)]
struct Inner {
    rooms: HashMap<String, Room>,
    messages: HashMap<String, Vec<Message>>,
}

/// Process-local store. Contents are lost on restart.
#[derive(Default)]
pub struct InMemoryRoomStore {
    inner: RwLock<Inner>,
}

impl InMemoryRoomStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a room with a fresh id.
    pub async fn create_room(&self, name: &str) -> Room {
        let room = Room {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            created_at: Utc::now(),
        };
        let mut inner = self.inner.write().await;
        inner.rooms.insert(room.id.clone(), room.clone());
        inner.messages.insert(room.id.clone(), Vec::new());
        debug!(room_id = %room.id, name, "room created");
        room
    }

    /// Messages of a room in insertion order.
    pub async fn messages(&self, room_id: &str) -> Result<Vec<Message>, StoreError> {
        self.inner
            .read()
            .await
            .messages
            .get(room_id)
            .cloned()
            .ok_or_else(|| StoreError::RoomNotFound(room_id.to_string()))
    }
}

#[async_trait]
impl RoomStore for InMemoryRoomStore {
    async fn list_rooms(&self) -> Result<Vec<Room>, StoreError> {
        let mut rooms: Vec<_> = self.inner.read().await.rooms.values().cloned().collect();
        rooms.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(rooms)
    }

    async fn add_message_to_room(
        &self,
        room_id: &str,
        message: NewMessage,
    ) -> Result<Message, StoreError> {
        if message.content.trim().is_empty() {
            return Err(StoreError::EmptyContent);
        }

        let mut inner = self.inner.write().await;
        let messages = inner
            .messages
            .get_mut(room_id)
            .ok_or_else(|| StoreError::RoomNotFound(room_id.to_string()))?;

        let stored = Message {
            id: uuid::Uuid::new_v4().to_string(),
            room_id: room_id.to_string(),
            content: message.content,
            sender: message.sender,
            timestamp: message.timestamp,
        };
        messages.push(stored.clone());
        Ok(stored)
    }
}
