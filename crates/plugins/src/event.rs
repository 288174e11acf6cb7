use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// Domain events plugins can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RoomEvent {
    #[serde(rename = "message.created")]
    MessageCreated,
    #[serde(rename = "message.updated")]
    MessageUpdated,
    #[serde(rename = "room.created")]
    RoomCreated,
    #[serde(rename = "room.updated")]
    RoomUpdated,
    #[serde(rename = "participant.joined")]
    ParticipantJoined,
    #[serde(rename = "participant.left")]
    ParticipantLeft,
    #[serde(rename = "plugin.registered")]
    PluginRegistered,
    #[serde(rename = "plugin.unregistered")]
    PluginUnregistered,
    #[serde(rename = "plugin.error")]
    PluginError,
}

impl RoomEvent {
    pub const ALL: [RoomEvent; 9] = [
        Self::MessageCreated,
        Self::MessageUpdated,
        Self::RoomCreated,
        Self::RoomUpdated,
        Self::ParticipantJoined,
        Self::ParticipantLeft,
        Self::PluginRegistered,
        Self::PluginUnregistered,
        Self::PluginError,
    ];

    /// Wire name, as sent in the `X-Event-Type` header and webhook body.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MessageCreated => "message.created",
            Self::MessageUpdated => "message.updated",
            Self::RoomCreated => "room.created",
            Self::RoomUpdated => "room.updated",
            Self::ParticipantJoined => "participant.joined",
            Self::ParticipantLeft => "participant.left",
            Self::PluginRegistered => "plugin.registered",
            Self::PluginUnregistered => "plugin.unregistered",
            Self::PluginError => "plugin.error",
        }
    }
}

impl fmt::Display for RoomEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown event type '{0}'")]
pub struct UnknownEvent(pub String);

impl FromStr for RoomEvent {
    type Err = UnknownEvent;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|e| e.as_str() == s)
            .ok_or_else(|| UnknownEvent(s.to_string()))
    }
}
