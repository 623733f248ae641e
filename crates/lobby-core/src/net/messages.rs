use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::chat::ChatMessage;
use crate::game::{GameId, GameListSummary, GameStateSummary, NewGameRequest};

/// Client wire message type discriminator (first byte of every frame).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    // Client -> Lobby
    NewGame = 0x01,
    JoinGame = 0x02,
    WatchGame = 0x03,
    LeaveGame = 0x04,
    StartGame = 0x05,
    SendChat = 0x06,
    RemoveChat = 0x07,

    // Lobby -> Client
    UserList = 0x10,
    GameList = 0x11,
    GameListChanged = 0x12,
    GameStateChanged = 0x13,
    GameRemoved = 0x14,
    HandOff = 0x15,
    JoinFailed = 0x16,

    // Lobby -> Client (chat channel)
    ChatMessage = 0x20,
    ChatRemoved = 0x21,
}

impl MessageType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(Self::NewGame),
            0x02 => Some(Self::JoinGame),
            0x03 => Some(Self::WatchGame),
            0x04 => Some(Self::LeaveGame),
            0x05 => Some(Self::StartGame),
            0x06 => Some(Self::SendChat),
            0x07 => Some(Self::RemoveChat),
            0x10 => Some(Self::UserList),
            0x11 => Some(Self::GameList),
            0x12 => Some(Self::GameListChanged),
            0x13 => Some(Self::GameStateChanged),
            0x14 => Some(Self::GameRemoved),
            0x15 => Some(Self::HandOff),
            0x16 => Some(Self::JoinFailed),
            0x20 => Some(Self::ChatMessage),
            0x21 => Some(Self::ChatRemoved),
            _ => None,
        }
    }
}

// ---- Client -> Lobby ----

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewGameMsg {
    pub request: NewGameRequest,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinGameMsg {
    pub game_id: GameId,
    pub password: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchGameMsg {
    pub game_id: GameId,
    pub password: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaveGameMsg {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartGameMsg {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendChatMsg {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveChatMsg {
    pub message_id: Uuid,
}

// ---- Lobby -> Client ----

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserListMsg {
    pub users: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameListMsg {
    pub games: Vec<GameListSummary>,
}

/// A game was created or its list entry changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameListChangedMsg {
    pub game: GameListSummary,
}

/// Full game state, sent to the game's members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameStateChangedMsg {
    pub game: GameStateSummary,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameRemovedMsg {
    pub game_id: GameId,
}

/// Instructs a client to reconnect to the execution node running its game.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandOffMsg {
    pub address: String,
    pub node_name: String,
    pub credential: String,
    pub game_id: GameId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinFailedMsg {
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessageMsg {
    pub message: ChatMessage,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRemovedMsg {
    pub message_id: Uuid,
}

/// Actions a connected client can request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    NewGame(NewGameMsg),
    JoinGame(JoinGameMsg),
    WatchGame(WatchGameMsg),
    LeaveGame(LeaveGameMsg),
    StartGame(StartGameMsg),
    SendChat(SendChatMsg),
    RemoveChat(RemoveChatMsg),
}

/// Notifications pushed to connected clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    UserList(UserListMsg),
    GameList(GameListMsg),
    GameListChanged(GameListChangedMsg),
    GameStateChanged(GameStateChangedMsg),
    GameRemoved(GameRemovedMsg),
    HandOff(HandOffMsg),
    JoinFailed(JoinFailedMsg),
    ChatMessage(ChatMessageMsg),
    ChatRemoved(ChatRemovedMsg),
}

impl ServerMessage {
    pub fn join_failed(reason: impl Into<String>) -> Self {
        Self::JoinFailed(JoinFailedMsg {
            reason: reason.into(),
        })
    }
}
