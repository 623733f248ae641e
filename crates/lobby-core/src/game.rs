use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::time::unix_millis;
use crate::user::{ConnectionId, User};

/// Maximum number of non-spectator members in a session.
pub const MAX_PLAYERS: usize = 2;

/// Globally unique game session identifier, allocated by the node that creates it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GameId(pub Uuid);

impl GameId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for GameId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for GameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for GameId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Parameters a client supplies when creating (or quick-joining) a game.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NewGameRequest {
    pub name: String,
    pub game_type: String,
    /// Empty means public.
    pub password: String,
    /// Whether spectators may watch.
    pub spectators: bool,
    pub show_hand: bool,
    pub quick_join: bool,
    pub custom_data: String,
}

/// A user's seat in a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    pub user: User,
    pub is_spectator: bool,
    #[serde(default)]
    pub custom_data: String,
}

/// Execution node a started session was handed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignedNode {
    pub name: String,
    pub address: String,
}

/// Observable lifecycle phase, derived from membership and the started flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GamePhase {
    Forming,
    Ready,
    Started,
    Empty,
}

/// Why a member is leaving. Only affects the notice appended to the session log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Departure {
    Left,
    Disconnected,
}

/// Rejections from the session state machine. `Display` is the reason shown to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinError {
    AlreadyMember,
    AlreadyInGame,
    AlreadyStarted,
    Full,
    WrongPassword,
    Blocked,
    SpectatorsDisabled,
    NotOwner,
}

impl fmt::Display for JoinError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Self::AlreadyMember => "You are already in that game.",
            Self::AlreadyInGame => "You are already in a game so cannot join another one.",
            Self::AlreadyStarted => "That game has already started.",
            Self::Full => "That game is full.",
            Self::WrongPassword => "Incorrect password for that game.",
            Self::Blocked => "You cannot join that game.",
            Self::SpectatorsDisabled => "That game does not allow spectators.",
            Self::NotOwner => "Only the game owner can start the game.",
        };
        f.write_str(reason)
    }
}

impl std::error::Error for JoinError {}

/// A pending or active match. The full record is what replicates over the bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameSession {
    pub id: GameId,
    pub name: String,
    pub game_type: String,
    /// Name of the owning member. Always a non-spectator while any remain.
    pub owner: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub show_hand: bool,
    #[serde(default)]
    pub spectators: bool,
    pub created_at: u64,
    #[serde(default)]
    pub started: bool,
    pub members: BTreeMap<String, Member>,
    #[serde(default)]
    pub messages: Vec<String>,
    #[serde(default)]
    pub node: Option<AssignedNode>,
}

impl GameSession {
    /// Create a session with `owner` seated as its first player.
    pub fn new(owner: &User, request: &NewGameRequest) -> Self {
        let mut members = BTreeMap::new();
        members.insert(
            owner.name.clone(),
            Member {
                user: owner.clone(),
                is_spectator: false,
                custom_data: request.custom_data.clone(),
            },
        );
        Self {
            id: GameId::new(),
            name: request.name.clone(),
            game_type: request.game_type.clone(),
            owner: owner.name.clone(),
            password: request.password.clone(),
            show_hand: request.show_hand,
            spectators: request.spectators,
            created_at: unix_millis(),
            started: false,
            members,
            messages: Vec::new(),
            node: None,
        }
    }

    pub fn has_password(&self) -> bool {
        !self.password.is_empty()
    }

    pub fn has_member(&self, name: &str) -> bool {
        self.members.contains_key(name)
    }

    pub fn players(&self) -> impl Iterator<Item = &Member> {
        self.members.values().filter(|m| !m.is_spectator)
    }

    pub fn spectators(&self) -> impl Iterator<Item = &Member> {
        self.members.values().filter(|m| m.is_spectator)
    }

    pub fn player_count(&self) -> usize {
        self.players().count()
    }

    /// Connection ids of every player and spectator.
    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.members
            .values()
            .map(|m| m.user.connection_id.clone())
            .collect()
    }

    /// A session without players is empty even if spectators remain.
    pub fn is_empty(&self) -> bool {
        self.player_count() == 0
    }

    pub fn phase(&self) -> GamePhase {
        match (self.player_count(), self.started) {
            (0, _) => GamePhase::Empty,
            (_, true) => GamePhase::Started,
            (n, false) if n >= MAX_PLAYERS => GamePhase::Ready,
            _ => GamePhase::Forming,
        }
    }

    /// Seat `user` as a player.
    pub fn join(&mut self, user: &User, password: &str) -> Result<(), JoinError> {
        if self.has_member(&user.name) {
            return Err(JoinError::AlreadyMember);
        }
        if self.started {
            return Err(JoinError::AlreadyStarted);
        }
        if self.player_count() >= MAX_PLAYERS {
            return Err(JoinError::Full);
        }
        self.check_password(password)?;
        self.check_blocked(user)?;

        self.insert_member(user, false);
        self.messages.push(format!("{} has joined the game", user.name));
        Ok(())
    }

    /// Seat `user` as a spectator.
    pub fn watch(&mut self, user: &User, password: &str) -> Result<(), JoinError> {
        if self.has_member(&user.name) {
            return Err(JoinError::AlreadyMember);
        }
        if !self.spectators {
            return Err(JoinError::SpectatorsDisabled);
        }
        if self.started {
            return Err(JoinError::AlreadyStarted);
        }
        self.check_password(password)?;
        self.check_blocked(user)?;

        self.insert_member(user, true);
        self.messages
            .push(format!("{} has joined the game as a spectator", user.name));
        Ok(())
    }

    /// Remove a member, handing ownership to the remaining player first when the
    /// owner departs. Returns false if `name` was not a member.
    pub fn remove_member(&mut self, name: &str, departure: Departure) -> bool {
        if !self.has_member(name) {
            return false;
        }

        if self.owner == name {
            let next = self
                .players()
                .find(|m| m.user.name != name)
                .map(|m| m.user.name.clone());
            if let Some(next) = next {
                self.owner = next;
            }
        }

        self.members.remove(name);
        let notice = match departure {
            Departure::Left => format!("{name} has left the game"),
            Departure::Disconnected => format!("{name} has disconnected"),
        };
        self.messages.push(notice);
        true
    }

    /// Lock the session and record where it runs.
    pub fn mark_started(&mut self, node: AssignedNode) {
        self.started = true;
        self.node = Some(node);
    }

    /// Open, public, not started, with a free player seat.
    pub fn can_quick_join(&self, game_type: &str) -> bool {
        self.game_type.eq_ignore_ascii_case(game_type)
            && !self.started
            && !self.has_password()
            && self.player_count() < MAX_PLAYERS
    }

    /// Hidden from `viewer` when any player and the viewer are in a blocked pairing.
    pub fn is_visible_to(&self, viewer: &User) -> bool {
        !self.players().any(|m| m.user.is_blocked_with(viewer))
    }

    /// Lobby-list view of the session.
    pub fn list_summary(&self) -> GameListSummary {
        GameListSummary {
            id: self.id,
            name: self.name.clone(),
            game_type: self.game_type.clone(),
            started: self.started,
            created_at: self.created_at,
            needs_password: self.has_password(),
            show_hand: self.show_hand,
            players: self.players().map(|m| m.user.name.clone()).collect(),
        }
    }

    /// Full view of the session for its members.
    pub fn state_summary(&self) -> GameStateSummary {
        GameStateSummary {
            id: self.id,
            name: self.name.clone(),
            game_type: self.game_type.clone(),
            started: self.started,
            created_at: self.created_at,
            owner: self.owner.clone(),
            players: self
                .players()
                .map(|m| PlayerSummary {
                    name: m.user.name.clone(),
                    custom_data: m.custom_data.clone(),
                })
                .collect(),
            spectators: self.spectators().map(|m| m.user.name.clone()).collect(),
            messages: self.messages.clone(),
        }
    }

    fn check_password(&self, password: &str) -> Result<(), JoinError> {
        if self.has_password() && self.password != password {
            return Err(JoinError::WrongPassword);
        }
        Ok(())
    }

    fn check_blocked(&self, user: &User) -> Result<(), JoinError> {
        if self.players().any(|m| m.user.is_blocked_with(user)) {
            return Err(JoinError::Blocked);
        }
        Ok(())
    }

    fn insert_member(&mut self, user: &User, is_spectator: bool) {
        self.members.insert(
            user.name.clone(),
            Member {
                user: user.clone(),
                is_spectator,
                custom_data: String::new(),
            },
        );
    }
}

/// Entry in the lobby game list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameListSummary {
    pub id: GameId,
    pub name: String,
    pub game_type: String,
    pub started: bool,
    pub created_at: u64,
    pub needs_password: bool,
    pub show_hand: bool,
    pub players: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerSummary {
    pub name: String,
    pub custom_data: String,
}

/// Game state pushed to a session's members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameStateSummary {
    pub id: GameId,
    pub name: String,
    pub game_type: String,
    pub started: bool,
    pub created_at: u64,
    pub owner: String,
    pub players: Vec<PlayerSummary>,
    pub spectators: Vec<String>,
    pub messages: Vec<String>,
}
