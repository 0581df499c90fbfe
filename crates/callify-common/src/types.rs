//! Core type definitions and protocol constants for Callify signaling.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// WebSocket subprotocol identifier echoed back when a client offers it.
/// Bump this on breaking wire-format changes.
pub const SUBPROTOCOL: &str = "callify.v1";

/// Destination literal that addresses every other member of a room.
pub const BROADCAST_DEST: &str = "all";

/// Meeting name given to rooms created implicitly by the first chat message.
pub const PLACEHOLDER_MEET_NAME: &str = "Unnamed Meeting";

/// Codes carried in `error` and `warning` notices sent back to a client.
pub mod notice_code {
    /// The inbound envelope could not be decoded or was incomplete.
    pub const PROTOCOL: &str = "protocol";
    /// A chat message was relayed live but could not be persisted.
    pub const CHAT_NOT_PERSISTED: &str = "chat-not-persisted";
}

/// One persisted chat line.
///
/// The timestamp is assigned by the coordinator when the message is received,
/// never by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Display name of the sender at the time of sending.
    #[serde(rename = "sendersName")]
    pub sender_name: String,
    /// Message body.
    #[serde(rename = "message")]
    pub text: String,
    /// Server-side receipt time.
    pub time: DateTime<Utc>,
}

impl ChatMessage {
    /// Stamp a new message with the current server time.
    #[must_use]
    pub fn stamped(sender_name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            sender_name: sender_name.into(),
            text: text.into(),
            time: Utc::now(),
        }
    }
}

/// Descriptive metadata of a room record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomMetadata {
    /// Human readable meeting name.
    pub meet_name: String,
    /// Peer id of the participant that caused the room to exist.
    pub owner_id: String,
}

impl RoomMetadata {
    /// Placeholder metadata for a room first seen through a chat message.
    #[must_use]
    pub fn placeholder(owner_id: impl Into<String>) -> Self {
        Self {
            meet_name: PLACEHOLDER_MEET_NAME.to_string(),
            owner_id: owner_id.into(),
        }
    }
}

/// A stored room together with its chat history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomRecord {
    /// Room identifier shared by all participants.
    pub room_id: String,
    /// Room metadata, set once when the record is created.
    #[serde(flatten)]
    pub metadata: RoomMetadata,
    /// Creation time of the record.
    pub created_at: DateTime<Utc>,
    /// Chat history in server receipt order.
    #[serde(default)]
    pub chats: Vec<ChatMessage>,
}

impl RoomRecord {
    /// Create an empty record with the given metadata.
    #[must_use]
    pub fn new(room_id: impl Into<String>, metadata: RoomMetadata) -> Self {
        Self {
            room_id: room_id.into(),
            metadata,
            created_at: Utc::now(),
            chats: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_message_uses_storage_field_names() {
        let msg = ChatMessage::stamped("Alice", "hi");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["sendersName"], "Alice");
        assert_eq!(json["message"], "hi");
        assert!(json["time"].is_string());
    }

    #[test]
    fn placeholder_metadata_names_the_owner() {
        let meta = RoomMetadata::placeholder("p1");
        assert_eq!(meta.meet_name, PLACEHOLDER_MEET_NAME);
        assert_eq!(meta.owner_id, "p1");
    }

    #[test]
    fn room_record_flattens_metadata() {
        let record = RoomRecord::new("r1", RoomMetadata::placeholder("p1"));
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["roomId"], "r1");
        assert_eq!(json["meetName"], PLACEHOLDER_MEET_NAME);
        assert_eq!(json["ownerId"], "p1");
        assert_eq!(json["chats"].as_array().map(Vec::len), Some(0));
    }
}
