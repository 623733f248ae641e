//! The single mutation boundary of a lobby node.
//!
//! Client actions and replicated bus records both land here, serialized behind one
//! `RwLock`. Every mutating call commits locally, publishes the change with this
//! node's name as origin, and returns the client notifications it caused. Records
//! read back from the bus are applied through [`Lobby::apply`], which discards
//! echoes of this node's own mutations.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use uuid::Uuid;

use lobby_core::chat::ChatMessage;
use lobby_core::game::{
    Departure, GameId, GameListSummary, GameSession, JoinError, NewGameRequest,
};
use lobby_core::net::bus::{BusEnvelope, BusMessage};
use lobby_core::net::messages::{
    ChatMessageMsg, ChatRemovedMsg, GameListChangedMsg, GameListMsg, GameRemovedMsg,
    GameStateChangedMsg, ServerMessage, UserListMsg,
};
use lobby_core::user::{ConnectionId, User};

use crate::bus::{BusError, MessageBus};
use crate::chat::ChatLog;
use crate::config::LobbyConfig;
use crate::directory::{ReplicaOutcome, UserDirectory};
use crate::error::{LobbyError, LobbyResult};
use crate::handoff::{HandOffIssuer, LOBBY_AUDIENCE, LobbyClaims, TokenError, TokenSigner};
use crate::hub::Outbound;
use crate::registry::GameRegistry;
use crate::store::StoreHandle;
use crate::tracker::NodeTracker;

pub type SharedLobby = Arc<RwLock<Lobby>>;

/// Chat lines replayed to a client when it connects.
const CHAT_REPLAY: usize = 50;

/// Construction parameters for [`Lobby`].
#[derive(Debug, Clone)]
pub struct LobbySettings {
    pub node_name: String,
    pub token_secret: String,
    pub issuer: String,
    pub handoff_ttl: Duration,
    pub heartbeat_timeout: Duration,
    pub max_chat_messages: usize,
    pub max_chat_length: usize,
}

impl From<&LobbyConfig> for LobbySettings {
    fn from(config: &LobbyConfig) -> Self {
        Self {
            node_name: config.node_name.clone(),
            token_secret: config.auth.token_secret.clone(),
            issuer: config.auth.issuer.clone(),
            handoff_ttl: config.handoff_ttl(),
            heartbeat_timeout: config.heartbeat_timeout(),
            max_chat_messages: config.limits.max_chat_messages,
            max_chat_length: config.limits.max_chat_length,
        }
    }
}

/// Which seat a join request asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Seat {
    Player,
    Spectator,
}

pub struct Lobby {
    node_name: String,
    directory: UserDirectory,
    games: GameRegistry,
    nodes: NodeTracker,
    chat: ChatLog,
    handoff: HandOffIssuer,
    bus: Arc<dyn MessageBus>,
    store: StoreHandle,
    max_chat_length: usize,
}

impl Lobby {
    pub fn new(settings: LobbySettings, bus: Arc<dyn MessageBus>, store: StoreHandle) -> Self {
        let signer = TokenSigner::new(&settings.token_secret, settings.issuer);
        Self {
            node_name: settings.node_name,
            directory: UserDirectory::new(),
            games: GameRegistry::new(),
            nodes: NodeTracker::new(settings.heartbeat_timeout),
            chat: ChatLog::new(settings.max_chat_messages),
            handoff: HandOffIssuer::new(signer, settings.handoff_ttl),
            bus,
            store,
            max_chat_length: settings.max_chat_length,
        }
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    pub fn directory(&self) -> &UserDirectory {
        &self.directory
    }

    pub fn games(&self) -> &GameRegistry {
        &self.games
    }

    pub fn nodes(&self) -> &NodeTracker {
        &self.nodes
    }

    pub fn chat(&self) -> &ChatLog {
        &self.chat
    }

    pub fn user(&self, connection_id: &str) -> Option<&User> {
        self.directory.get(connection_id)
    }

    /// Verify a lobby token presented by a connecting client.
    pub fn authenticate(&self, token: &str) -> Result<LobbyClaims, TokenError> {
        self.handoff
            .signer()
            .verify::<LobbyClaims>(token, LOBBY_AUDIENCE)
            .map(|claims| claims.body)
    }

    fn publish(&self, message: BusMessage) -> Result<(), BusError> {
        let envelope = message.encode(&self.node_name)?;
        self.bus.publish(envelope)
    }

    /// Publish a record describing a mutation already committed locally. A failure
    /// cannot be rolled back, so it is logged and the caller proceeds.
    fn replicate(&self, message: BusMessage) {
        let topic = message.topic();
        if let Err(e) = self.publish(message) {
            tracing::error!(%topic, error = %e, "Failed to publish bus record");
        }
    }

    // ---- Lifecycle ----

    pub fn announce(&self) {
        tracing::info!(node = %self.node_name, "Announcing lobby node");
        self.replicate(BusMessage::LobbyHello(self.node_name.clone()));
    }

    pub fn heartbeat(&self) {
        self.replicate(BusMessage::LobbyHeartbeat(self.node_name.clone()));
    }

    /// Mark silent execution nodes disconnected. Returns the newly evicted names.
    pub fn check_timeouts(&mut self) -> Vec<String> {
        self.nodes.check_timeouts()
    }

    /// Seed the registry with sessions recovered from the durable store.
    pub fn restore_games(&mut self, games: Vec<GameSession>) -> usize {
        let count = games.len();
        for game in games {
            self.games.upsert(game);
        }
        count
    }

    // ---- User Directory ----

    /// Register a user whose connection terminates on this node. Returns false for a
    /// duplicate connection id, which neither replaces the entry nor republishes.
    pub fn register_user(&mut self, mut user: User) -> LobbyResult<bool> {
        if user.connection_id.is_empty() {
            return Err(LobbyError::InvalidArgument(
                "connection id is required".to_string(),
            ));
        }
        if user.name.trim().is_empty() {
            return Err(LobbyError::InvalidArgument("user name is required".to_string()));
        }

        user.origin_node.clone_from(&self.node_name);
        if !self.directory.insert_local(user.clone()) {
            tracing::debug!(connection_id = %user.connection_id, "Duplicate registration ignored");
            return Ok(false);
        }
        tracing::info!(connection_id = %user.connection_id, name = %user.name, "User registered");
        self.replicate(BusMessage::UserNew(user));
        Ok(true)
    }

    /// Remove a user and release any forming game they were in. An unknown
    /// connection is a logged no-op.
    pub fn unregister_user(&mut self, connection_id: &str) -> LobbyResult<Vec<Outbound>> {
        if connection_id.is_empty() {
            return Err(LobbyError::InvalidArgument(
                "connection id is required".to_string(),
            ));
        }
        let Some(user) = self.directory.remove(connection_id) else {
            tracing::info!(connection_id, "No session found for disconnecting connection");
            return Ok(Vec::new());
        };
        tracing::info!(connection_id, name = %user.name, "User unregistered");
        self.replicate(BusMessage::UserDisconnect(user.clone()));
        Ok(self.depart(&user, Departure::Disconnected, None))
    }

    /// Names of users visible to `viewer`.
    pub fn visible_users(&self, viewer: Option<&User>) -> Vec<String> {
        self.directory
            .visible_to(viewer)
            .into_iter()
            .map(|u| u.name.clone())
            .collect()
    }

    pub fn visible_games(&self, viewer: Option<&User>) -> Vec<GameListSummary> {
        self.games
            .visible_to(viewer)
            .into_iter()
            .map(GameSession::list_summary)
            .collect()
    }

    /// Initial state for a freshly connected client: users, games, and recent chat.
    /// Anonymous connections (not in the directory) get the unfiltered lists.
    pub fn welcome(&self, connection_id: &str) -> Vec<Outbound> {
        let viewer = self.directory.get(connection_id);
        let mut out = vec![
            Outbound::to(
                connection_id,
                ServerMessage::UserList(UserListMsg {
                    users: self.visible_users(viewer),
                }),
            ),
            Outbound::to(
                connection_id,
                ServerMessage::GameList(GameListMsg {
                    games: self.visible_games(viewer),
                }),
            ),
        ];
        out.extend(self.chat.recent(CHAT_REPLAY).into_iter().map(|message| {
            Outbound::to(
                connection_id,
                ServerMessage::ChatMessage(ChatMessageMsg { message }),
            )
        }));
        out
    }

    fn user_for(&self, connection_id: &str) -> LobbyResult<User> {
        self.directory
            .get(connection_id)
            .cloned()
            .ok_or_else(|| LobbyError::NotFound("You are not logged in.".to_string()))
    }

    // ---- Game sessions ----

    /// Create a game, or with `quick_join` set, join the oldest matching open game
    /// and only create when none exists.
    pub fn create_game(
        &mut self,
        connection_id: &str,
        request: NewGameRequest,
    ) -> LobbyResult<(GameId, Vec<Outbound>)> {
        let user = self.user_for(connection_id)?;
        if request.game_type.trim().is_empty() {
            return Err(LobbyError::InvalidArgument(
                "A game type is required.".to_string(),
            ));
        }
        if self.games.game_for_member(&user.name).is_some() {
            return Err(JoinError::AlreadyInGame.into());
        }

        if request.quick_join
            && let Some(id) = self.games.quick_join_candidate(&request.game_type, &user)
        {
            tracing::info!(connection_id, game_id = %id, "Quick join matched an open game");
            let out = self.take_seat(&user, id, "", Seat::Player)?;
            return Ok((id, out));
        }

        let game = GameSession::new(&user, &request);
        let id = game.id;
        self.games.upsert(game.clone());
        tracing::info!(
            connection_id,
            game_id = %id,
            game_type = %game.game_type,
            "Game created"
        );
        self.replicate(BusMessage::GameNew(game.clone()));
        Ok((id, self.game_changed(&game, None)))
    }

    pub fn join_game(
        &mut self,
        connection_id: &str,
        game_id: GameId,
        password: &str,
    ) -> LobbyResult<Vec<Outbound>> {
        let user = self.user_for(connection_id)?;
        self.take_seat(&user, game_id, password, Seat::Player)
    }

    pub fn watch_game(
        &mut self,
        connection_id: &str,
        game_id: GameId,
        password: &str,
    ) -> LobbyResult<Vec<Outbound>> {
        let user = self.user_for(connection_id)?;
        self.take_seat(&user, game_id, password, Seat::Spectator)
    }

    fn take_seat(
        &mut self,
        user: &User,
        game_id: GameId,
        password: &str,
        seat: Seat,
    ) -> LobbyResult<Vec<Outbound>> {
        if let Some(current) = self.games.game_for_member(&user.name)
            && current != game_id
        {
            return Err(JoinError::AlreadyInGame.into());
        }
        let game = self
            .games
            .get_mut(game_id)
            .ok_or_else(|| LobbyError::NotFound("That game no longer exists.".to_string()))?;
        match seat {
            Seat::Player => game.join(user, password)?,
            Seat::Spectator => game.watch(user, password)?,
        }
        let game = game.clone();
        tracing::info!(name = %user.name, game_id = %game_id, ?seat, "Joined game");
        self.replicate(BusMessage::GameUpdate(game.clone()));
        Ok(self.game_changed(&game, None))
    }

    /// Leave the caller's game. Not being in a game is a no-op; a started game
    /// can no longer be left through the lobby.
    pub fn leave_game(&mut self, connection_id: &str) -> LobbyResult<Vec<Outbound>> {
        let user = self.user_for(connection_id)?;
        let Some(id) = self.games.game_for_member(&user.name) else {
            tracing::debug!(connection_id, "Leave requested outside any game");
            return Ok(Vec::new());
        };
        if self.games.get(id).is_some_and(|g| g.started) {
            return Err(JoinError::AlreadyStarted.into());
        }
        Ok(self.depart(&user, Departure::Left, Some(user.connection_id.clone())))
    }

    /// Membership removal shared by leave and disconnect. `notify` also receives the
    /// resulting game state (the departing client itself, when still connected).
    ///
    /// Members of a started game stay in its record until the execution node
    /// publishes `game.remove`; without that message they cannot join or create
    /// another game.
    fn depart(
        &mut self,
        user: &User,
        departure: Departure,
        notify: Option<ConnectionId>,
    ) -> Vec<Outbound> {
        let Some(id) = self.games.game_for_member(&user.name) else {
            return Vec::new();
        };
        let Some(game) = self.games.get_mut(id) else {
            return Vec::new();
        };
        if game.started {
            tracing::debug!(name = %user.name, game_id = %id, "Member of started game departed");
            return Vec::new();
        }
        game.remove_member(&user.name, departure);
        let game = game.clone();

        if game.is_empty() {
            self.games.remove(id);
            tracing::info!(game_id = %id, "Game emptied, removing");
            self.replicate(BusMessage::GameRemove(id));
            return vec![game_removed(id)];
        }

        self.replicate(BusMessage::GameUpdate(game.clone()));
        self.game_changed(&game, notify)
    }

    /// Start the caller's game: owner only, on the least-loaded execution node.
    pub fn start_game(&mut self, connection_id: &str) -> LobbyResult<Vec<Outbound>> {
        let user = self.user_for(connection_id)?;
        let id = match self.games.games_for_member(&user.name).as_slice() {
            [] => return Err(LobbyError::NotFound("You are not in a game.".to_string())),
            [id] => *id,
            _ => return Err(JoinError::AlreadyInGame.into()),
        };
        let game = self
            .games
            .get(id)
            .ok_or_else(|| LobbyError::NotFound("You are not in a game.".to_string()))?;
        if game.owner != user.name {
            return Err(JoinError::NotOwner.into());
        }
        if game.started {
            return Err(JoinError::AlreadyStarted.into());
        }

        let node = self.nodes.claim_node_for_game().ok_or_else(|| {
            LobbyError::ResourceExhausted(
                "Could not find a game node for your game. Try again later.".to_string(),
            )
        })?;
        let game = self
            .games
            .get_mut(id)
            .ok_or_else(|| LobbyError::NotFound("You are not in a game.".to_string()))?;
        game.mark_started(node.clone());
        let game = game.clone();
        tracing::info!(game_id = %id, node = %node.name, "Game started");

        self.replicate(BusMessage::GameUpdate(game.clone()));
        self.store.save(&game);

        let mut out = self.game_changed(&game, None);
        out.extend(self.hand_offs(&game));
        Ok(out)
    }

    /// Hand-offs for the members of a started game whose connections are local.
    fn hand_offs(&self, game: &GameSession) -> Vec<Outbound> {
        let Some(node) = &game.node else {
            return Vec::new();
        };
        game.members
            .values()
            .filter(|m| m.user.origin_node == self.node_name)
            .filter_map(|m| match self.handoff.issue(game, node, m) {
                Ok(msg) => Some(Outbound::to(
                    m.user.connection_id.clone(),
                    ServerMessage::HandOff(msg),
                )),
                Err(e) => {
                    tracing::error!(name = %m.user.name, game_id = %game.id, error = %e, "Failed to issue hand-off");
                    None
                },
            })
            .collect()
    }

    /// List entry to everyone not in a blocked pairing with a player, full state to
    /// the members (and `also`).
    fn game_changed(&self, game: &GameSession, also: Option<ConnectionId>) -> Vec<Outbound> {
        let players: Vec<&User> = game.players().map(|m| &m.user).collect();
        let hidden = self.directory.blocked_with_any(&players);
        let mut members = game.connection_ids();
        if let Some(id) = also
            && !members.contains(&id)
        {
            members.push(id);
        }
        vec![
            Outbound::everyone_except(
                hidden,
                ServerMessage::GameListChanged(GameListChangedMsg {
                    game: game.list_summary(),
                }),
            ),
            Outbound::connections(
                members,
                ServerMessage::GameStateChanged(GameStateChangedMsg {
                    game: game.state_summary(),
                }),
            ),
        ]
    }

    // ---- Chat ----

    /// Post a lobby chat line. It reaches clients (including this node's) when the
    /// bus delivers it back, so a bus failure is the caller's failure.
    pub fn post_chat(&mut self, connection_id: &str, text: &str) -> LobbyResult<Uuid> {
        let user = self.user_for(connection_id)?;
        let text = text.trim();
        if text.is_empty() {
            return Err(LobbyError::InvalidArgument("Chat message is empty.".to_string()));
        }
        if text.chars().count() > self.max_chat_length {
            return Err(LobbyError::InvalidArgument(format!(
                "Chat messages are limited to {} characters.",
                self.max_chat_length
            )));
        }
        if text.chars().any(|c| c.is_control() && c != '\n') {
            return Err(LobbyError::InvalidArgument(
                "Chat message contains control characters.".to_string(),
            ));
        }
        let message = ChatMessage::new(user.name, text);
        let id = message.id;
        self.publish(BusMessage::LobbyMessage(message))?;
        Ok(id)
    }

    /// Remove one of the caller's own chat lines.
    pub fn remove_chat(&mut self, connection_id: &str, message_id: Uuid) -> LobbyResult<()> {
        let user = self.user_for(connection_id)?;
        let message = self
            .chat
            .get(message_id)
            .ok_or_else(|| LobbyError::NotFound("That message no longer exists.".to_string()))?;
        if message.user != user.name {
            return Err(LobbyError::InvalidArgument(
                "Only the author can remove a message.".to_string(),
            ));
        }
        self.publish(BusMessage::LobbyMessageRemoved(message_id))?;
        Ok(())
    }

    // ---- Replication ----

    /// Apply one bus record to the local replica.
    pub fn apply(&mut self, envelope: &BusEnvelope) -> Vec<Outbound> {
        let message = match BusMessage::decode(envelope) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(
                    topic = %envelope.topic,
                    origin = %envelope.origin,
                    error = %e,
                    "Dropping undecodable bus record"
                );
                return Vec::new();
            },
        };
        let from_self = envelope.origin == self.node_name;

        match message {
            BusMessage::LobbyHello(name) => {
                if !from_self {
                    tracing::info!(peer = %name, "Lobby node announced");
                }
                Vec::new()
            },
            BusMessage::LobbyHeartbeat(name) => {
                if !from_self {
                    tracing::debug!(peer = %name, "Lobby node heartbeat");
                }
                Vec::new()
            },
            BusMessage::UserNew(user) => {
                self.apply_user_new(user);
                Vec::new()
            },
            BusMessage::UserDisconnect(user) => {
                if self.directory.remove(&user.connection_id).is_some() {
                    tracing::debug!(connection_id = %user.connection_id, "Replica user removed");
                }
                Vec::new()
            },
            BusMessage::GameNew(_) | BusMessage::GameUpdate(_) | BusMessage::GameRemove(_)
                if from_self =>
            {
                Vec::new()
            },
            BusMessage::GameNew(game) => self.apply_game(game, true),
            BusMessage::GameUpdate(game) => self.apply_game(game, false),
            BusMessage::GameRemove(id) => self.apply_game_remove(id, &envelope.origin),
            BusMessage::NodeHello(announcement) => {
                self.nodes.on_hello(&announcement);
                Vec::new()
            },
            BusMessage::NodeHeartbeat(announcement) => {
                self.nodes.on_heartbeat(&announcement);
                Vec::new()
            },
            BusMessage::LobbyMessage(message) => {
                if !self.chat.push(message.clone()) {
                    return Vec::new();
                }
                vec![Outbound::everyone(ServerMessage::ChatMessage(
                    ChatMessageMsg { message },
                ))]
            },
            BusMessage::LobbyMessageRemoved(message_id) => {
                if self.chat.remove(message_id).is_none() {
                    return Vec::new();
                }
                vec![Outbound::everyone(ServerMessage::ChatRemoved(
                    ChatRemovedMsg { message_id },
                ))]
            },
        }
    }

    fn apply_user_new(&mut self, user: User) {
        let connection_id = user.connection_id.clone();
        match self.directory.apply_remote_new(user, &self.node_name) {
            ReplicaOutcome::Echo => {},
            ReplicaOutcome::Inserted => {
                tracing::debug!(%connection_id, "Replica user added");
            },
            ReplicaOutcome::Departed => {
                tracing::debug!(%connection_id, "user.new after disconnect, ignoring");
            },
            ReplicaOutcome::Replaced => {
                let anomaly = LobbyError::ReplicationAnomaly(format!(
                    "user.new for known connection {connection_id}"
                ));
                tracing::warn!(error = %anomaly, "Adopting incoming user record");
            },
        }
    }

    fn apply_game(&mut self, game: GameSession, is_new: bool) -> Vec<Outbound> {
        let id = game.id;
        if self.games.was_removed(id) {
            let anomaly = LobbyError::ReplicationAnomaly(format!("record for removed game {id}"));
            tracing::warn!(error = %anomaly, "Ignoring stale game record");
            return Vec::new();
        }
        if !game.started && self.games.get(id).is_some_and(|g| g.started) {
            let anomaly =
                LobbyError::ReplicationAnomaly(format!("unstarted record for started game {id}"));
            tracing::warn!(error = %anomaly, "Keeping local started game");
            return Vec::new();
        }
        let previous = self.games.upsert(game.clone());
        if is_new && previous.is_some() {
            let anomaly = LobbyError::ReplicationAnomaly(format!("game.new for known game {id}"));
            tracing::warn!(error = %anomaly, "Adopting incoming game record");
        } else if !is_new && previous.is_none() {
            tracing::debug!(game_id = %id, "game.update for unknown game, adopting");
        }

        let newly_started = game.started && !previous.is_some_and(|p| p.started);
        let mut out = self.game_changed(&game, None);
        if newly_started {
            if let Some(node) = &game.node {
                self.nodes.record_game(&node.name);
            }
            out.extend(self.hand_offs(&game));
        }
        out
    }

    fn apply_game_remove(&mut self, id: GameId, origin: &str) -> Vec<Outbound> {
        // Started games are retired by their execution node; clearing a record
        // this node never stored is harmless.
        self.store.remove(id);
        match self.games.remove(id) {
            Some(_) => {
                tracing::info!(game_id = %id, %origin, "Replica game removed");
                vec![game_removed(id)]
            },
            None => Vec::new(),
        }
    }
}

fn game_removed(game_id: GameId) -> Outbound {
    Outbound::everyone(ServerMessage::GameRemoved(GameRemovedMsg { game_id }))
}
