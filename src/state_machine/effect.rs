//! Effects produced by state transitions

use crate::config::SessionConfig;
use crate::llm::ChatError;

/// Effects to be executed after state transition
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Append the user's turn to history
    AppendUserTurn { text: String },

    /// Build the request from history and open a stream
    OpenStream { config: Box<SessionConfig> },

    /// Close the active stream, if any; no event for it is processed afterwards
    CloseStream,

    /// Commit the finished answer to history as an assistant turn
    CommitAnswer { answer: String },

    /// Empty the history
    ClearHistory,

    /// Publish the new state to observers
    PublishState,

    /// Publish a partial answer snapshot
    PublishPartial { delta: String, text: String },

    /// Terminal notifications
    NotifyCompleted { answer: String },
    NotifyFailed {
        error: ChatError,
        partial: Option<String>,
    },
    NotifyCancelled { partial: Option<String> },

    /// Feed `Event::Settle` back into the machine
    Settle,
}

impl Effect {
    pub fn publish_partial(delta: impl Into<String>, text: impl Into<String>) -> Self {
        Effect::PublishPartial {
            delta: delta.into(),
            text: text.into(),
        }
    }
}
