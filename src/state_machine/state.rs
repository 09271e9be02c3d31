//! Session state types

use crate::config::ClearPolicy;
use crate::llm::ChatError;
use serde::Serialize;
use std::fmt;

/// Session state.
///
/// The in-flight answer lives inside `Streaming`, so it exists only while a
/// stream is being folded and disappears with the state that owns it.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum SessionState {
    /// Ready for user input, no open stream
    #[default]
    Idle,

    /// Request sent, waiting for the first delta
    Sending,

    /// Deltas arriving; `answer` is everything folded so far
    Streaming { answer: String },

    /// Sentinel received; the answer is being committed
    Completed { answer: String },

    /// Stream failed; nothing from it will be committed
    Errored {
        error: ChatError,
        partial: Option<String>,
    },
}

impl SessionState {
    pub fn status(&self) -> SessionStatus {
        match self {
            SessionState::Idle => SessionStatus::Idle,
            SessionState::Sending => SessionStatus::Sending,
            SessionState::Streaming { .. } => SessionStatus::Streaming,
            SessionState::Completed { .. } => SessionStatus::Completed,
            SessionState::Errored { .. } => SessionStatus::Errored,
        }
    }

    /// A stream is open (or about to be) for this state
    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::Sending | SessionState::Streaming { .. })
    }

    /// Text folded so far, if any
    pub fn partial_answer(&self) -> Option<&str> {
        match self {
            SessionState::Streaming { answer } => Some(answer),
            _ => None,
        }
    }
}

/// Data-free view of [`SessionState`] for callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Idle,
    Sending,
    Streaming,
    Completed,
    Errored,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Sending => "sending",
            SessionStatus::Streaming => "streaming",
            SessionStatus::Completed => "completed",
            SessionStatus::Errored => "errored",
        };
        f.write_str(name)
    }
}

/// Context for the controller (immutable configuration)
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    pub clear_policy: ClearPolicy,
}

impl SessionContext {
    pub fn new(clear_policy: ClearPolicy) -> Self {
        Self { clear_policy }
    }
}
