//! Conversation history
//!
//! Append-only log of user and assistant turns. The system turn is never
//! stored here; the request builder synthesizes it from configuration.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One message in a conversation. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    role: Role,
    content: String,
}

impl Turn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn content(&self) -> &str {
        &self.content
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HistoryError {
    #[error("Context window must hold at least one turn (got {0})")]
    InvalidWindow(usize),
    #[error("System turns are supplied by configuration and cannot be stored in history")]
    SystemTurn,
}

/// Ordered log of conversation turns
#[derive(Debug, Clone, Default)]
pub struct ConversationHistory {
    turns: Vec<Turn>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a turn to the end of the log
    pub fn append(&mut self, turn: Turn) -> Result<(), HistoryError> {
        if turn.role == Role::System {
            return Err(HistoryError::SystemTurn);
        }
        self.turns.push(turn);
        Ok(())
    }

    /// The last `min(n, len)` turns in original order.
    pub fn windowed(&self, n: usize) -> Result<&[Turn], HistoryError> {
        if n == 0 {
            return Err(HistoryError::InvalidWindow(n));
        }
        let start = self.turns.len().saturating_sub(n);
        Ok(&self.turns[start..])
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    #[allow(dead_code)] // Used in tests
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// Owned copy for readers outside the controller
    pub fn snapshot(&self) -> Vec<Turn> {
        self.turns.clone()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}
