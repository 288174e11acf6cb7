/// Storage abstraction for rooms and their messages.
use async_trait::async_trait;

use crate::types::{Message, NewMessage, Room};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("room '{0}' not found")]
    RoomNotFound(String),

    #[error("message content must not be empty")]
    EmptyContent,
}

#[async_trait]
pub trait RoomStore: Send + Sync {
    /// All rooms, oldest first.
    async fn list_rooms(&self) -> Result<Vec<Room>, StoreError>;

    /// Append a message to a room and return the stored message.
    async fn add_message_to_room(
        &self,
        room_id: &str,
        message: NewMessage,
    ) -> Result<Message, StoreError>;
}
