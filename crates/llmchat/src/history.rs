use serde::{Deserialize, Serialize};

use crate::types::{ConversationId, Message, Role};

/// Ordered messages of one conversation.
///
/// Completed turns are appended as a user/assistant pair through
/// [`ChatHistory::commit_turn`]; tool traffic inside a turn never lands here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatHistory {
    pub id: ConversationId,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    messages: Vec<Message>,
}

impl Default for ChatHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatHistory {
    pub fn new() -> Self {
        let now = chrono::Utc::now();
        ChatHistory {
            id: ConversationId::new(),
            created_at: now,
            updated_at: now,
            messages: Vec::new(),
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Number of completed user turns.
    pub fn turns(&self) -> usize {
        self.messages.iter().filter(|m| m.role == Role::User).count()
    }

    /// Append one message as-is.
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
        self.updated_at = chrono::Utc::now();
    }

    /// Record a finished turn: the user's message, then the final reply.
    pub fn commit_turn(&mut self, user: Message, assistant: Message) {
        self.messages.push(user);
        self.messages.push(assistant);
        self.updated_at = chrono::Utc::now();
    }
}
