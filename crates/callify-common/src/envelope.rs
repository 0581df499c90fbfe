//! Callify JSON envelopes.
//!
//! Every WebSocket text frame carries one envelope of the form
//! `{"event": "<name>", "data": { ... }}`. Inbound frames decode into the
//! closed [`ClientEvent`] type; anything that does not fit is a
//! [`ProtocolError`] at the boundary. Outbound frames are [`ServerEvent`]s.

use crate::types::{notice_code, BROADCAST_DEST};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Errors produced while decoding an inbound envelope.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The frame is not valid JSON or does not match any known envelope.
    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),
    /// A required field was present but empty.
    #[error("empty field: {0}")]
    EmptyField(&'static str),
}

/// Where a negotiation signal is addressed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Destination {
    /// Every other member of the room.
    All,
    /// A single peer, by client-chosen peer id.
    Peer(String),
}

impl TryFrom<String> for Destination {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.is_empty() {
            Err("destination must not be empty".to_string())
        } else if value == BROADCAST_DEST {
            Ok(Self::All)
        } else {
            Ok(Self::Peer(value))
        }
    }
}

impl From<Destination> for String {
    fn from(dest: Destination) -> Self {
        match dest {
            Destination::All => BROADCAST_DEST.to_string(),
            Destination::Peer(peer) => peer,
        }
    }
}

/// Join request, also the shape of the join notice relayed to a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Join {
    /// Peer id chosen by the client.
    pub uuid: String,
    /// Display name shown to other participants.
    #[serde(rename = "displayName")]
    pub display_name: String,
    /// Room to join.
    pub room: String,
}

/// An offer, answer or ICE candidate addressed to a peer or to the room.
///
/// Everything besides the routing header is kept in `payload` and forwarded
/// untouched (`sdp` for offers and answers, `ice` for candidates).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Negotiation {
    /// Peer id of the sender.
    pub uuid: String,
    /// Target peer or the whole room.
    pub dest: Destination,
    /// Room the negotiation belongs to.
    pub room: String,
    /// Opaque negotiation body.
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

/// A WebRTC signaling message, discriminated by its `type` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Signal {
    /// Presence announcement for peer discovery.
    Join(Join),
    /// SDP offer.
    Offer(Negotiation),
    /// SDP answer.
    Answer(Negotiation),
    /// ICE candidate.
    Ice(Negotiation),
}

impl Signal {
    /// Wire name of the signal kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Join(_) => "join",
            Self::Offer(_) => "offer",
            Self::Answer(_) => "answer",
            Self::Ice(_) => "ice",
        }
    }

    /// Room the signal belongs to.
    #[must_use]
    pub fn room(&self) -> &str {
        match self {
            Self::Join(join) => &join.room,
            Self::Offer(n) | Self::Answer(n) | Self::Ice(n) => &n.room,
        }
    }
}

/// Chat message as sent by a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatSend {
    /// Room to post into.
    pub room: String,
    /// Sender display name.
    pub displayname: String,
    /// Message body.
    pub message: String,
    /// Sender peer id; the coordinator falls back to the joined session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
}

/// Whiteboard stroke as sent by a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Drawing {
    /// Room whose whiteboard is drawn on.
    pub room: String,
    /// Opaque drawing data.
    #[serde(default)]
    pub data: Value,
}

/// Envelopes a client may send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    /// Enter a room.
    Join(Join),
    /// Relay a WebRTC negotiation message.
    WebrtcSignal(Signal),
    /// Post a chat message.
    SendChatMessage(ChatSend),
    /// Relay a whiteboard stroke.
    Drawing(Drawing),
}

impl ClientEvent {
    /// Decode and validate one inbound text frame.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError`] when the frame is not a known envelope or a
    /// required field is empty.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let event: Self = serde_json::from_str(text)?;
        event.validate()?;
        Ok(event)
    }

    /// Wire name of the event, used for logging and metrics labels.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Join(_) => "join",
            Self::WebrtcSignal(_) => "webrtc-signal",
            Self::SendChatMessage(_) => "send-chat-message",
            Self::Drawing(_) => "drawing",
        }
    }

    /// Room the envelope is addressed to.
    #[must_use]
    pub fn room(&self) -> &str {
        match self {
            Self::Join(join) => &join.room,
            Self::WebrtcSignal(signal) => signal.room(),
            Self::SendChatMessage(chat) => &chat.room,
            Self::Drawing(drawing) => &drawing.room,
        }
    }

    fn validate(&self) -> Result<(), ProtocolError> {
        if self.room().is_empty() {
            return Err(ProtocolError::EmptyField("room"));
        }
        match self {
            Self::Join(join) | Self::WebrtcSignal(Signal::Join(join)) if join.uuid.is_empty() => {
                Err(ProtocolError::EmptyField("uuid"))
            }
            _ => Ok(()),
        }
    }
}

/// Acknowledgement sent to a client after a successful join.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinSuccess {
    /// Joined room.
    pub room: String,
    /// Peer id the client registered with.
    pub uuid: String,
    /// Display name the client registered with.
    #[serde(rename = "displayName")]
    pub display_name: String,
}

/// Live chat message fanned out to a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatBroadcast {
    /// Room the message was posted in.
    pub room: String,
    /// Sender peer id, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    /// Sender display name.
    pub displayname: String,
    /// Message body.
    pub message: String,
    /// Server receipt time.
    pub time: DateTime<Utc>,
}

/// Departure notice for a participant whose connection ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserLeft {
    /// Peer id of the departed participant.
    pub uuid: String,
    /// Display name of the departed participant.
    #[serde(rename = "displayName")]
    pub display_name: String,
}

/// Non-fatal error or warning returned to the sender of an envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    /// Machine-readable code, see [`notice_code`].
    pub code: String,
    /// Human-readable description.
    pub message: String,
}

impl Notice {
    /// Notice for an envelope that failed to decode.
    #[must_use]
    pub fn protocol(err: &ProtocolError) -> Self {
        Self {
            code: notice_code::PROTOCOL.to_string(),
            message: err.to_string(),
        }
    }

    /// Notice for a chat message that was relayed but not stored.
    #[must_use]
    pub fn chat_not_persisted(reason: impl std::fmt::Display) -> Self {
        Self {
            code: notice_code::CHAT_NOT_PERSISTED.to_string(),
            message: format!("message delivered but not saved: {reason}"),
        }
    }
}

/// Envelopes the coordinator sends to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// Relayed negotiation message or synthesized join notice.
    WebrtcSignal(Signal),
    /// Join acknowledgement, sent to the joiner only.
    JoinSuccess(JoinSuccess),
    /// Chat message from another participant.
    ChatMessage(ChatBroadcast),
    /// Opaque whiteboard data from another participant.
    Drawing(Value),
    /// Another participant disconnected.
    UserLeft(UserLeft),
    /// The last envelope from this client was rejected.
    Error(Notice),
    /// The last envelope from this client was only partially handled.
    Warning(Notice),
}

impl ServerEvent {
    /// Wire name of the event, used for logging and metrics labels.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::WebrtcSignal(_) => "webrtc-signal",
            Self::JoinSuccess(_) => "join-success",
            Self::ChatMessage(_) => "chat-message",
            Self::Drawing(_) => "drawing",
            Self::UserLeft(_) => "user-left",
            Self::Error(_) => "error",
            Self::Warning(_) => "warning",
        }
    }

    /// Serialize into a text frame body.
    ///
    /// # Errors
    ///
    /// Returns an error if a payload value cannot be represented as JSON.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
