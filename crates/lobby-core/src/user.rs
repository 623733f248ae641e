use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Identity of a live client connection. Unique per connection, not per account.
pub type ConnectionId = String;

/// A user present in the lobby. The directory keys users by connection, while
/// blocking and game membership are keyed by `name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub connection_id: ConnectionId,
    pub name: String,
    /// Lobby node that terminates this user's connection. Stamped on registration.
    #[serde(default)]
    pub origin_node: String,
    #[serde(default)]
    pub block_list: BTreeSet<String>,
    #[serde(default)]
    pub user_data: String,
}

impl User {
    pub fn new(connection_id: impl Into<ConnectionId>, name: impl Into<String>) -> Self {
        Self {
            connection_id: connection_id.into(),
            name: name.into(),
            origin_node: String::new(),
            block_list: BTreeSet::new(),
            user_data: String::new(),
        }
    }

    /// Builder-style helper to add names to the block list.
    pub fn with_blocked<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.block_list.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn has_blocked(&self, other: &User) -> bool {
        self.block_list.contains(&other.name)
    }

    /// True when either user has the other on their block list.
    pub fn is_blocked_with(&self, other: &User) -> bool {
        self.has_blocked(other) || other.has_blocked(self)
    }
}
