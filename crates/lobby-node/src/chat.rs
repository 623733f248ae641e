use std::collections::VecDeque;

use uuid::Uuid;

use lobby_core::chat::ChatMessage;

/// Default number of lobby chat lines retained.
const DEFAULT_MAX_MESSAGES: usize = 200;

/// Bounded, ordered lobby chat history. Oldest lines are evicted first.
#[derive(Debug)]
pub struct ChatLog {
    messages: VecDeque<ChatMessage>,
    max_messages: usize,
}

impl Default for ChatLog {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGES)
    }
}

impl ChatLog {
    pub fn new(max_messages: usize) -> Self {
        Self {
            messages: VecDeque::new(),
            max_messages,
        }
    }

    /// Append a message. A message id already present is ignored (bus redelivery).
    pub fn push(&mut self, message: ChatMessage) -> bool {
        if self.get(message.id).is_some() {
            return false;
        }
        self.messages.push_back(message);
        while self.messages.len() > self.max_messages {
            self.messages.pop_front();
        }
        true
    }

    pub fn remove(&mut self, id: Uuid) -> Option<ChatMessage> {
        let pos = self.messages.iter().position(|m| m.id == id)?;
        self.messages.remove(pos)
    }

    pub fn get(&self, id: Uuid) -> Option<&ChatMessage> {
        self.messages.iter().find(|m| m.id == id)
    }

    /// Up to `limit` most recent messages, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<ChatMessage> {
        let skip = self.messages.len().saturating_sub(limit);
        self.messages.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
