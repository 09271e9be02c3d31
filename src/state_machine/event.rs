//! Events that can occur in a session

use crate::config::SessionConfig;
use crate::llm::ChatError;

/// Events that trigger state transitions
#[derive(Debug, Clone)]
pub enum Event {
    // User events
    UserMessage {
        text: String,
        /// Snapshot captured at send time
        config: Box<SessionConfig>,
    },
    UserCancel,
    ClearHistory,

    // Stream events (already parsed)
    TextDelta {
        text: String,
    },
    Sentinel,
    StreamFailed {
        error: ChatError,
    },

    /// Leave a terminal state once its effects ran
    Settle,
}
