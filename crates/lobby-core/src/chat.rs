use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::time::unix_millis;

/// A lobby chat line. Ids are allocated by the posting node and unique across nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub user: String,
    pub message: String,
    pub time: u64,
}

impl ChatMessage {
    pub fn new(user: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user: user.into(),
            message: message.into(),
            time: unix_millis(),
        }
    }
}
