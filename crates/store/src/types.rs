use {
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
};

/// A chat room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// A message as stored in a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub room_id: String,
    pub content: String,
    pub sender: String,
    pub timestamp: DateTime<Utc>,
}

/// Fields supplied by the writer when appending a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessage {
    pub content: String,
    pub sender: String,
    pub timestamp: DateTime<Utc>,
}

impl NewMessage {
    /// A message stamped with the current time.
    pub fn now(content: impl Into<String>, sender: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            sender: sender.into(),
            timestamp: Utc::now(),
        }
    }

    /// Unsaved `Message` view with an empty id, for pipelines that run
    /// before the store assigns one.
    pub fn draft(self, room_id: impl Into<String>) -> Message {
        Message {
            id: String::new(),
            room_id: room_id.into(),
            content: self.content,
            sender: self.sender,
            timestamp: self.timestamp,
        }
    }
}

impl From<Message> for NewMessage {
    fn from(message: Message) -> Self {
        Self {
            content: message.content,
            sender: message.sender,
            timestamp: message.timestamp,
        }
    }
}
