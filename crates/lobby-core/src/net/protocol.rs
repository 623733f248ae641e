use serde::{Deserialize, Serialize};

use super::messages::{
    ChatMessageMsg, ChatRemovedMsg, ClientMessage, GameListChangedMsg, GameListMsg,
    GameRemovedMsg, GameStateChangedMsg, HandOffMsg, JoinFailedMsg, JoinGameMsg, LeaveGameMsg,
    MessageType, NewGameMsg, RemoveChatMsg, SendChatMsg, ServerMessage, StartGameMsg,
    UserListMsg, WatchGameMsg,
};

/// Maximum client frame size in bytes.
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024; // 64 KiB

#[derive(Debug)]
pub enum ProtocolError {
    EmptyMessage,
    UnknownMessageType(u8),
    UnknownTopic(String),
    PayloadTooLarge(usize),
    SerializeError(String),
    DeserializeError(String),
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyMessage => write!(f, "empty message"),
            Self::UnknownMessageType(b) => write!(f, "unknown message type: 0x{b:02x}"),
            Self::UnknownTopic(t) => write!(f, "unknown bus topic: {t}"),
            Self::PayloadTooLarge(size) => {
                write!(
                    f,
                    "payload too large: {size} bytes (max {MAX_MESSAGE_SIZE})"
                )
            },
            Self::SerializeError(e) => write!(f, "serialize error: {e}"),
            Self::DeserializeError(e) => write!(f, "deserialize error: {e}"),
        }
    }
}

impl std::error::Error for ProtocolError {}

/// Encode a serializable payload with a 1-byte type prefix.
pub fn encode_message<T: Serialize>(
    msg_type: MessageType,
    payload: &T,
) -> Result<Vec<u8>, ProtocolError> {
    let payload_bytes =
        rmp_serde::to_vec(payload).map_err(|e| ProtocolError::SerializeError(e.to_string()))?;
    let total = 1 + payload_bytes.len();
    if total > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::PayloadTooLarge(total));
    }
    let mut buf = Vec::with_capacity(total);
    buf.push(msg_type as u8);
    buf.extend_from_slice(&payload_bytes);
    Ok(buf)
}

/// Encode a `ClientMessage` to wire format.
pub fn encode_client_message(msg: &ClientMessage) -> Result<Vec<u8>, ProtocolError> {
    match msg {
        ClientMessage::NewGame(m) => encode_message(MessageType::NewGame, m),
        ClientMessage::JoinGame(m) => encode_message(MessageType::JoinGame, m),
        ClientMessage::WatchGame(m) => encode_message(MessageType::WatchGame, m),
        ClientMessage::LeaveGame(m) => encode_message(MessageType::LeaveGame, m),
        ClientMessage::StartGame(m) => encode_message(MessageType::StartGame, m),
        ClientMessage::SendChat(m) => encode_message(MessageType::SendChat, m),
        ClientMessage::RemoveChat(m) => encode_message(MessageType::RemoveChat, m),
    }
}

/// Encode a `ServerMessage` to wire format.
pub fn encode_server_message(msg: &ServerMessage) -> Result<Vec<u8>, ProtocolError> {
    match msg {
        ServerMessage::UserList(m) => encode_message(MessageType::UserList, m),
        ServerMessage::GameList(m) => encode_message(MessageType::GameList, m),
        ServerMessage::GameListChanged(m) => encode_message(MessageType::GameListChanged, m),
        ServerMessage::GameStateChanged(m) => encode_message(MessageType::GameStateChanged, m),
        ServerMessage::GameRemoved(m) => encode_message(MessageType::GameRemoved, m),
        ServerMessage::HandOff(m) => encode_message(MessageType::HandOff, m),
        ServerMessage::JoinFailed(m) => encode_message(MessageType::JoinFailed, m),
        ServerMessage::ChatMessage(m) => encode_message(MessageType::ChatMessage, m),
        ServerMessage::ChatRemoved(m) => encode_message(MessageType::ChatRemoved, m),
    }
}

/// Extract the message type byte from raw wire data.
pub fn decode_message_type(data: &[u8]) -> Result<MessageType, ProtocolError> {
    if data.is_empty() {
        return Err(ProtocolError::EmptyMessage);
    }
    MessageType::from_byte(data[0]).ok_or(ProtocolError::UnknownMessageType(data[0]))
}

/// Decode a MessagePack payload (bytes after the type prefix).
pub fn decode_payload<T: for<'de> Deserialize<'de>>(data: &[u8]) -> Result<T, ProtocolError> {
    if data.is_empty() {
        return Err(ProtocolError::EmptyMessage);
    }
    rmp_serde::from_slice(&data[1..]).map_err(|e| ProtocolError::DeserializeError(e.to_string()))
}

/// Decode raw wire data into a `ClientMessage`.
pub fn decode_client_message(data: &[u8]) -> Result<ClientMessage, ProtocolError> {
    let msg_type = decode_message_type(data)?;
    match msg_type {
        MessageType::NewGame => Ok(ClientMessage::NewGame(decode_payload::<NewGameMsg>(data)?)),
        MessageType::JoinGame => Ok(ClientMessage::JoinGame(decode_payload::<JoinGameMsg>(
            data,
        )?)),
        MessageType::WatchGame => Ok(ClientMessage::WatchGame(decode_payload::<WatchGameMsg>(
            data,
        )?)),
        MessageType::LeaveGame => Ok(ClientMessage::LeaveGame(decode_payload::<LeaveGameMsg>(
            data,
        )?)),
        MessageType::StartGame => Ok(ClientMessage::StartGame(decode_payload::<StartGameMsg>(
            data,
        )?)),
        MessageType::SendChat => Ok(ClientMessage::SendChat(decode_payload::<SendChatMsg>(
            data,
        )?)),
        MessageType::RemoveChat => Ok(ClientMessage::RemoveChat(
            decode_payload::<RemoveChatMsg>(data)?,
        )),
        _ => Err(ProtocolError::UnknownMessageType(data[0])),
    }
}

/// Decode raw wire data into a `ServerMessage`.
pub fn decode_server_message(data: &[u8]) -> Result<ServerMessage, ProtocolError> {
    let msg_type = decode_message_type(data)?;
    match msg_type {
        MessageType::UserList => Ok(ServerMessage::UserList(decode_payload::<UserListMsg>(
            data,
        )?)),
        MessageType::GameList => Ok(ServerMessage::GameList(decode_payload::<GameListMsg>(
            data,
        )?)),
        MessageType::GameListChanged => Ok(ServerMessage::GameListChanged(decode_payload::<
            GameListChangedMsg,
        >(data)?)),
        MessageType::GameStateChanged => Ok(ServerMessage::GameStateChanged(decode_payload::<
            GameStateChangedMsg,
        >(data)?)),
        MessageType::GameRemoved => Ok(ServerMessage::GameRemoved(decode_payload::<
            GameRemovedMsg,
        >(data)?)),
        MessageType::HandOff => Ok(ServerMessage::HandOff(decode_payload::<HandOffMsg>(data)?)),
        MessageType::JoinFailed => Ok(ServerMessage::JoinFailed(decode_payload::<
            JoinFailedMsg,
        >(data)?)),
        MessageType::ChatMessage => Ok(ServerMessage::ChatMessage(decode_payload::<
            ChatMessageMsg,
        >(data)?)),
        MessageType::ChatRemoved => Ok(ServerMessage::ChatRemoved(decode_payload::<
            ChatRemovedMsg,
        >(data)?)),
        _ => Err(ProtocolError::UnknownMessageType(data[0])),
    }
}
