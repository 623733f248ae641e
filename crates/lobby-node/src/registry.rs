use std::collections::HashMap;

use lobby_core::game::{GameId, GameSession};
use lobby_core::user::User;

use crate::tombstones::Tombstones;

/// Game id -> session replica. The node that hosts a member's connection is
/// authoritative for mutations that member causes.
#[derive(Debug, Default)]
pub struct GameRegistry {
    games: HashMap<GameId, GameSession>,
    removed: Tombstones<GameId>,
}

impl GameRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a session. Returns the previous record, if any.
    pub fn upsert(&mut self, game: GameSession) -> Option<GameSession> {
        self.games.insert(game.id, game)
    }

    /// Remove a session and remember its id, so records for it that arrive
    /// late can be recognized as stale.
    pub fn remove(&mut self, id: GameId) -> Option<GameSession> {
        self.removed.insert(id);
        self.games.remove(&id)
    }

    pub fn was_removed(&self, id: GameId) -> bool {
        self.removed.contains(&id)
    }

    pub fn get(&self, id: GameId) -> Option<&GameSession> {
        self.games.get(&id)
    }

    pub fn get_mut(&mut self, id: GameId) -> Option<&mut GameSession> {
        self.games.get_mut(&id)
    }

    pub fn contains(&self, id: GameId) -> bool {
        self.games.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.games.len()
    }

    pub fn is_empty(&self) -> bool {
        self.games.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &GameSession> {
        self.games.values()
    }

    /// Ids of every session `name` is a member of, oldest first. More than one
    /// only while concurrent joins on different nodes have not yet converged.
    pub fn games_for_member(&self, name: &str) -> Vec<GameId> {
        let mut found: Vec<&GameSession> =
            self.games.values().filter(|g| g.has_member(name)).collect();
        found.sort_by_key(|g| (g.created_at, g.id));
        found.into_iter().map(|g| g.id).collect()
    }

    pub fn game_for_member(&self, name: &str) -> Option<GameId> {
        self.games_for_member(name).into_iter().next()
    }

    /// The oldest open session of `game_type` that `user` could join, ordered by
    /// (created_at, id) so every node scanning the same replica picks the same one.
    pub fn quick_join_candidate(&self, game_type: &str, user: &User) -> Option<GameId> {
        self.games
            .values()
            .filter(|g| g.can_quick_join(game_type) && g.is_visible_to(user))
            .min_by_key(|g| (g.created_at, g.id))
            .map(|g| g.id)
    }

    /// Sessions visible to `viewer`, oldest first. All sessions when anonymous.
    pub fn visible_to(&self, viewer: Option<&User>) -> Vec<&GameSession> {
        let mut games: Vec<&GameSession> = self
            .games
            .values()
            .filter(|g| viewer.is_none_or(|v| g.is_visible_to(v)))
            .collect();
        games.sort_by_key(|g| (g.created_at, g.id));
        games
    }

    pub fn started_count(&self) -> usize {
        self.games.values().filter(|g| g.started).count()
    }
}
