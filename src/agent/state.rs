//! Conversation state threaded through the control loop

use serde::{Deserialize, Serialize};

use crate::model::{Message, Role};

/// Messages exchanged so far plus the number of model calls made
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    pub messages: Vec<Message>,
    pub iteration_count: usize,
}

impl ConversationState {
    /// State holding a single user task
    pub fn from_task(task: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::user(task)],
            iteration_count: 0,
        }
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Insert `prompt` as the leading system message unless one is already there
    pub fn ensure_system(&mut self, prompt: &str) {
        let has_system = self
            .messages
            .first()
            .map(|m| m.role == Role::System)
            .unwrap_or(false);
        if !has_system {
            self.messages.insert(0, Message::system(prompt));
        }
    }

    /// Text of the most recent assistant message
    pub fn last_assistant_text(&self) -> Option<String> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant)
            .map(Message::text)
    }
}
