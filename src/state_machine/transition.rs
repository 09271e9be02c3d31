//! Pure state transition function
//!
//! Given the same state, context and event, `transition` always returns the
//! same result. All I/O happens in the runtime while executing effects.

use super::{Effect, Event, SessionContext, SessionState};
use crate::config::ClearPolicy;
use crate::llm::ChatError;
use thiserror::Error;

/// Result of a state transition
#[derive(Debug)]
pub struct TransitionResult {
    pub new_state: SessionState,
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    pub fn new(state: SessionState) -> Self {
        Self {
            new_state: state,
            effects: vec![],
        }
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    pub fn with_effects(mut self, effects: impl IntoIterator<Item = Effect>) -> Self {
        self.effects.extend(effects);
        self
    }
}

/// Errors that can occur during transition
#[derive(Debug, Error, PartialEq)]
pub enum TransitionError {
    #[error("A message is already being answered (cancel it first)")]
    Busy,
    #[error("Message is empty")]
    EmptyMessage,
    #[error("Invalid configuration: {0}")]
    InvalidConfig(ChatError),
    #[error("Cannot clear the conversation while a message is being answered")]
    ClearWhileActive,
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),
}

impl From<TransitionError> for ChatError {
    fn from(err: TransitionError) -> Self {
        let message = err.to_string();
        match err {
            TransitionError::InvalidConfig(inner) => inner,
            TransitionError::EmptyMessage => ChatError::validation(message),
            TransitionError::Busy
            | TransitionError::ClearWhileActive
            | TransitionError::InvalidTransition(_) => ChatError::state(message),
        }
    }
}

pub fn transition(
    state: &SessionState,
    context: &SessionContext,
    event: Event,
) -> Result<TransitionResult, TransitionError> {
    match (state, event) {
        // ============================================================
        // Sending
        // ============================================================

        // Idle + UserMessage -> Sending
        (SessionState::Idle, Event::UserMessage { text, config }) => {
            if text.trim().is_empty() {
                return Err(TransitionError::EmptyMessage);
            }
            config.validate().map_err(TransitionError::InvalidConfig)?;

            Ok(TransitionResult::new(SessionState::Sending)
                .with_effect(Effect::AppendUserTurn { text })
                .with_effect(Effect::PublishState)
                .with_effect(Effect::OpenStream { config }))
        }

        // Any other state + UserMessage -> reject, nothing changes
        (_, Event::UserMessage { .. }) => Err(TransitionError::Busy),

        // ============================================================
        // Folding deltas
        // ============================================================

        // Sending + first delta -> Streaming
        (SessionState::Sending, Event::TextDelta { text }) => {
            Ok(TransitionResult::new(SessionState::Streaming {
                answer: text.clone(),
            })
            .with_effect(Effect::PublishState)
            .with_effect(Effect::publish_partial(text.clone(), text)))
        }

        // Streaming + delta -> Streaming with the delta appended
        (SessionState::Streaming { answer }, Event::TextDelta { text }) => {
            let mut answer = answer.clone();
            answer.push_str(&text);
            Ok(TransitionResult::new(SessionState::Streaming {
                answer: answer.clone(),
            })
            .with_effect(Effect::publish_partial(text, answer)))
        }

        // ============================================================
        // Completion
        // ============================================================

        // Sending/Streaming + Sentinel -> Completed; commit and settle
        (SessionState::Sending, Event::Sentinel) => Ok(complete(String::new())),
        (SessionState::Streaming { answer }, Event::Sentinel) => Ok(complete(answer.clone())),

        (SessionState::Completed { .. }, Event::Settle) => {
            Ok(TransitionResult::new(SessionState::Idle).with_effect(Effect::PublishState))
        }

        // ============================================================
        // Errors
        // ============================================================

        (SessionState::Sending, Event::StreamFailed { error }) => Ok(fail(error, None)),
        (SessionState::Streaming { answer }, Event::StreamFailed { error }) => {
            Ok(fail(error, Some(answer.clone())))
        }

        (SessionState::Errored { .. }, Event::Settle) => {
            Ok(TransitionResult::new(SessionState::Idle).with_effect(Effect::PublishState))
        }

        // ============================================================
        // Cancellation
        // ============================================================

        (SessionState::Sending | SessionState::Streaming { .. }, Event::UserCancel) => {
            Ok(cancel(state.partial_answer()))
        }

        // Cancel is safe everywhere else and does nothing
        (_, Event::UserCancel) => Ok(TransitionResult::new(state.clone())),

        // ============================================================
        // Clearing
        // ============================================================

        (SessionState::Idle, Event::ClearHistory) => {
            Ok(TransitionResult::new(SessionState::Idle).with_effect(Effect::ClearHistory))
        }

        (_, Event::ClearHistory) if state.is_active() => match context.clear_policy {
            ClearPolicy::Reject => Err(TransitionError::ClearWhileActive),
            ClearPolicy::CancelActive => Ok(cancel(state.partial_answer())
                .with_effect(Effect::ClearHistory)),
        },

        // ============================================================
        // Invalid Transitions
        // ============================================================
        (state, event) => Err(TransitionError::InvalidTransition(format!(
            "No transition from {} with event {:?}",
            state.status(),
            event
        ))),
    }
}

fn complete(answer: String) -> TransitionResult {
    TransitionResult::new(SessionState::Completed {
        answer: answer.clone(),
    })
    .with_effects([
        Effect::CloseStream,
        Effect::CommitAnswer {
            answer: answer.clone(),
        },
        Effect::PublishState,
        Effect::NotifyCompleted { answer },
        Effect::Settle,
    ])
}

fn fail(error: ChatError, partial: Option<String>) -> TransitionResult {
    TransitionResult::new(SessionState::Errored {
        error: error.clone(),
        partial: partial.clone(),
    })
    .with_effects([
        Effect::CloseStream,
        Effect::PublishState,
        Effect::NotifyFailed { error, partial },
        Effect::Settle,
    ])
}

fn cancel(partial: Option<&str>) -> TransitionResult {
    TransitionResult::new(SessionState::Idle).with_effects([
        Effect::CloseStream,
        Effect::PublishState,
        Effect::NotifyCancelled {
            partial: partial.map(str::to_string),
        },
    ])
}
