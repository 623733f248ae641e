//! Topic table and payload shapes for cross-node replication.
//!
//! Every bus record travels as a [`BusEnvelope`]: the topic name, the name of the
//! lobby node (or execution node) that published it, and a JSON payload. The
//! envelope is decoded once into a [`BusMessage`] at the subscriber boundary so
//! nothing deeper in the process handles untyped payloads.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::protocol::ProtocolError;
use crate::chat::ChatMessage;
use crate::game::{GameId, GameSession};
use crate::node::NodeAnnouncement;
use crate::user::User;

/// Bus topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    LobbyHello,
    LobbyHeartbeat,
    UserNew,
    UserDisconnect,
    GameNew,
    GameUpdate,
    GameRemove,
    NodeHello,
    NodeHeartbeat,
    LobbyMessage,
    LobbyMessageRemoved,
}

impl Topic {
    pub const ALL: [Topic; 11] = [
        Topic::LobbyHello,
        Topic::LobbyHeartbeat,
        Topic::UserNew,
        Topic::UserDisconnect,
        Topic::GameNew,
        Topic::GameUpdate,
        Topic::GameRemove,
        Topic::NodeHello,
        Topic::NodeHeartbeat,
        Topic::LobbyMessage,
        Topic::LobbyMessageRemoved,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::LobbyHello => "lobby.hello",
            Self::LobbyHeartbeat => "lobby.heartbeat",
            Self::UserNew => "user.new",
            Self::UserDisconnect => "user.disconnect",
            Self::GameNew => "game.new",
            Self::GameUpdate => "game.update",
            Self::GameRemove => "game.remove",
            Self::NodeHello => "node.hello",
            Self::NodeHeartbeat => "node.heartbeat",
            Self::LobbyMessage => "lobby.message",
            Self::LobbyMessageRemoved => "lobby.message.removed",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Topic {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Topic::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ProtocolError::UnknownTopic(s.to_string()))
    }
}

/// Raw bus record as published and delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusEnvelope {
    pub topic: String,
    /// Publishing node's configured identity.
    pub origin: String,
    /// JSON-encoded payload.
    pub payload: String,
}

/// Typed bus message, one variant per topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusMessage {
    LobbyHello(String),
    LobbyHeartbeat(String),
    UserNew(User),
    UserDisconnect(User),
    GameNew(GameSession),
    GameUpdate(GameSession),
    GameRemove(GameId),
    NodeHello(NodeAnnouncement),
    NodeHeartbeat(NodeAnnouncement),
    LobbyMessage(ChatMessage),
    LobbyMessageRemoved(Uuid),
}

impl BusMessage {
    pub fn topic(&self) -> Topic {
        match self {
            Self::LobbyHello(_) => Topic::LobbyHello,
            Self::LobbyHeartbeat(_) => Topic::LobbyHeartbeat,
            Self::UserNew(_) => Topic::UserNew,
            Self::UserDisconnect(_) => Topic::UserDisconnect,
            Self::GameNew(_) => Topic::GameNew,
            Self::GameUpdate(_) => Topic::GameUpdate,
            Self::GameRemove(_) => Topic::GameRemove,
            Self::NodeHello(_) => Topic::NodeHello,
            Self::NodeHeartbeat(_) => Topic::NodeHeartbeat,
            Self::LobbyMessage(_) => Topic::LobbyMessage,
            Self::LobbyMessageRemoved(_) => Topic::LobbyMessageRemoved,
        }
    }

    /// Wrap this message in an envelope stamped with `origin`.
    pub fn encode(&self, origin: &str) -> Result<BusEnvelope, ProtocolError> {
        let payload = match self {
            Self::LobbyHello(name) | Self::LobbyHeartbeat(name) => to_json(name),
            Self::UserNew(user) | Self::UserDisconnect(user) => to_json(user),
            Self::GameNew(game) | Self::GameUpdate(game) => to_json(game),
            Self::GameRemove(id) => to_json(id),
            Self::NodeHello(node) | Self::NodeHeartbeat(node) => to_json(node),
            Self::LobbyMessage(message) => to_json(message),
            Self::LobbyMessageRemoved(id) => to_json(id),
        }?;
        Ok(BusEnvelope {
            topic: self.topic().as_str().to_string(),
            origin: origin.to_string(),
            payload,
        })
    }

    /// Decode an envelope's topic and payload.
    pub fn decode(envelope: &BusEnvelope) -> Result<Self, ProtocolError> {
        let payload = envelope.payload.as_str();
        let msg = match envelope.topic.parse::<Topic>()? {
            Topic::LobbyHello => Self::LobbyHello(from_json(payload)?),
            Topic::LobbyHeartbeat => Self::LobbyHeartbeat(from_json(payload)?),
            Topic::UserNew => Self::UserNew(from_json(payload)?),
            Topic::UserDisconnect => Self::UserDisconnect(from_json(payload)?),
            Topic::GameNew => Self::GameNew(from_json(payload)?),
            Topic::GameUpdate => Self::GameUpdate(from_json(payload)?),
            Topic::GameRemove => Self::GameRemove(from_json(payload)?),
            Topic::NodeHello => Self::NodeHello(from_json(payload)?),
            Topic::NodeHeartbeat => Self::NodeHeartbeat(from_json(payload)?),
            Topic::LobbyMessage => Self::LobbyMessage(from_json(payload)?),
            Topic::LobbyMessageRemoved => Self::LobbyMessageRemoved(from_json(payload)?),
        };
        Ok(msg)
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<String, ProtocolError> {
    serde_json::to_string(value).map_err(|e| ProtocolError::SerializeError(e.to_string()))
}

fn from_json<T: for<'de> Deserialize<'de>>(payload: &str) -> Result<T, ProtocolError> {
    serde_json::from_str(payload).map_err(|e| ProtocolError::DeserializeError(e.to_string()))
}
