use std::collections::HashMap;

use lobby_core::user::{ConnectionId, User};

use crate::tombstones::Tombstones;

/// Result of applying a replicated `user.new` record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicaOutcome {
    Inserted,
    /// The connection was already known; the incoming record replaced it.
    Replaced,
    /// The record originated on this node and was already applied.
    Echo,
    /// The connection already disconnected; the record arrived late.
    Departed,
}

/// Connection id -> user. Authoritative for users whose `origin_node` is this node,
/// a best-effort replica for everyone else.
#[derive(Debug, Default)]
pub struct UserDirectory {
    users: HashMap<ConnectionId, User>,
    departed: Tombstones<ConnectionId>,
}

impl UserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a locally terminated user. Returns false when the connection id is
    /// already present, leaving the existing entry untouched.
    pub fn insert_local(&mut self, user: User) -> bool {
        if self.users.contains_key(&user.connection_id) {
            return false;
        }
        self.users.insert(user.connection_id.clone(), user);
        true
    }

    /// Apply a `user.new` record received from the bus.
    pub fn apply_remote_new(&mut self, user: User, local_node: &str) -> ReplicaOutcome {
        if user.origin_node == local_node {
            return ReplicaOutcome::Echo;
        }
        if self.departed.contains(user.connection_id.as_str()) {
            return ReplicaOutcome::Departed;
        }
        match self.users.insert(user.connection_id.clone(), user) {
            Some(_) => ReplicaOutcome::Replaced,
            None => ReplicaOutcome::Inserted,
        }
    }

    /// Remove a connection. Idempotent. The id is remembered so a `user.new`
    /// delivered after its `user.disconnect` does not bring the user back.
    pub fn remove(&mut self, connection_id: &str) -> Option<User> {
        self.departed.insert(connection_id.to_string());
        self.users.remove(connection_id)
    }

    pub fn get(&self, connection_id: &str) -> Option<&User> {
        self.users.get(connection_id)
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &User> {
        self.users.values()
    }

    /// Users visible to `viewer`, sorted by name. Everyone when `viewer` is None,
    /// otherwise everyone not in a blocked pairing with the viewer.
    pub fn visible_to(&self, viewer: Option<&User>) -> Vec<&User> {
        let mut users: Vec<&User> = self
            .users
            .values()
            .filter(|u| viewer.is_none_or(|v| !u.is_blocked_with(v)))
            .collect();
        users.sort_by(|a, b| {
            a.name
                .cmp(&b.name)
                .then_with(|| a.connection_id.cmp(&b.connection_id))
        });
        users
    }

    /// Connection ids of every known user in a blocked pairing with any of `users`.
    pub fn blocked_with_any(&self, users: &[&User]) -> Vec<ConnectionId> {
        self.users
            .values()
            .filter(|u| users.iter().any(|other| u.is_blocked_with(other)))
            .map(|u| u.connection_id.clone())
            .collect()
    }
}
