use std::collections::HashMap;

use bytes::Bytes;
use tokio::sync::mpsc;

use lobby_core::net::messages::ServerMessage;
use lobby_core::net::protocol::encode_server_message;
use lobby_core::user::ConnectionId;

/// Bounded channel to one client's writer task.
pub type ClientSender = mpsc::Sender<Bytes>;

/// Who a notification is for. The hub resolves this against local connections only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Audience {
    Connection(ConnectionId),
    Connections(Vec<ConnectionId>),
    Everyone,
    EveryoneExcept(Vec<ConnectionId>),
}

/// A client notification produced by a lobby operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub audience: Audience,
    pub message: ServerMessage,
}

impl Outbound {
    pub fn to(connection_id: impl Into<ConnectionId>, message: ServerMessage) -> Self {
        Self {
            audience: Audience::Connection(connection_id.into()),
            message,
        }
    }

    pub fn everyone(message: ServerMessage) -> Self {
        Self {
            audience: Audience::Everyone,
            message,
        }
    }

    pub fn everyone_except(excluded: Vec<ConnectionId>, message: ServerMessage) -> Self {
        Self {
            audience: Audience::EveryoneExcept(excluded),
            message,
        }
    }

    pub fn connections(ids: Vec<ConnectionId>, message: ServerMessage) -> Self {
        Self {
            audience: Audience::Connections(ids),
            message,
        }
    }

    /// Whether `connection_id` is addressed.
    pub fn reaches(&self, connection_id: &str) -> bool {
        match &self.audience {
            Audience::Connection(id) => id == connection_id,
            Audience::Connections(ids) => ids.iter().any(|id| id == connection_id),
            Audience::Everyone => true,
            Audience::EveryoneExcept(excluded) => !excluded.iter().any(|id| id == connection_id),
        }
    }
}

/// Connections terminated on this node.
#[derive(Default)]
pub struct ClientHub {
    clients: HashMap<ConnectionId, ClientSender>,
}

impl ClientHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, connection_id: ConnectionId, sender: ClientSender) {
        self.clients.insert(connection_id, sender);
    }

    pub fn unregister(&mut self, connection_id: &str) -> bool {
        self.clients.remove(connection_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Deliver each notification to the local connections it addresses. Slow
    /// clients whose buffers are full miss the message.
    pub fn deliver(&self, outbound: &[Outbound]) {
        for out in outbound {
            let data = match encode_server_message(&out.message) {
                Ok(data) => Bytes::from(data),
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to encode client notification");
                    continue;
                },
            };
            match &out.audience {
                Audience::Connection(id) => self.send_bytes(id, data),
                Audience::Connections(ids) => {
                    for id in ids {
                        self.send_bytes(id, data.clone());
                    }
                },
                Audience::Everyone | Audience::EveryoneExcept(_) => {
                    for id in self.clients.keys().filter(|id| out.reaches(id)) {
                        self.send_bytes(id, data.clone());
                    }
                },
            }
        }
    }

    pub fn send(&self, connection_id: &str, message: &ServerMessage) {
        match encode_server_message(message) {
            Ok(data) => self.send_bytes(connection_id, Bytes::from(data)),
            Err(e) => tracing::warn!(error = %e, "Failed to encode client notification"),
        }
    }

    fn send_bytes(&self, connection_id: &str, data: Bytes) {
        let Some(sender) = self.clients.get(connection_id) else {
            return;
        };
        if let Err(e) = sender.try_send(data) {
            tracing::debug!(
                connection_id,
                error = %e,
                "Failed to send to client (channel full or closed)"
            );
        }
    }
}
