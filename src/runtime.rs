//! Runtime for a chat session
//!
//! One task owns the state machine, the history and the active stream; the
//! `SessionController` handle talks to it over channels, so every mutation is
//! serialized through a single consumer.

mod executor;


pub use executor::SessionRuntime;

use crate::config::{save_config, ConfigStore, ControllerOptions, SessionConfig, StoreError};
use crate::history::Turn;
use crate::llm::{ChatError, StreamTransport};
use crate::state_machine::SessionStatus;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

const COMMAND_BUFFER: usize = 32;
const UPDATE_BUFFER: usize = 512;

/// Updates sent to subscribers
#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    StateChanged {
        status: SessionStatus,
    },
    /// `text` is the whole answer so far; a lagging subscriber can skip
    /// intermediate partials without losing content
    Partial {
        delta: String,
        text: String,
    },
    Completed {
        answer: String,
    },
    /// The user turn stays in history; `partial` is incomplete text, never
    /// committed
    Failed {
        error: ChatError,
        partial: Option<String>,
    },
    Cancelled {
        partial: Option<String>,
    },
}

impl SessionUpdate {
    /// Completed, failed or cancelled
    #[allow(dead_code)] // Used in tests
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionUpdate::Completed { .. }
                | SessionUpdate::Failed { .. }
                | SessionUpdate::Cancelled { .. }
        )
    }
}

/// Requests from the handle to the runtime task
#[derive(Debug)]
pub(crate) enum Command {
    Send {
        text: String,
        reply: oneshot::Sender<Result<(), ChatError>>,
    },
    Cancel {
        reply: oneshot::Sender<()>,
    },
    Clear {
        reply: oneshot::Sender<Result<(), ChatError>>,
    },
    History {
        reply: oneshot::Sender<Vec<Turn>>,
    },
    Config {
        reply: oneshot::Sender<SessionConfig>,
    },
    UpdateConfig {
        config: Box<SessionConfig>,
        reply: oneshot::Sender<Result<(), ChatError>>,
    },
}

#[derive(Debug, Error)]
pub enum SaveConfigError {
    #[error(transparent)]
    Controller(#[from] ChatError),
    #[error("Failed to save config: {0}")]
    Store(#[from] StoreError),
}

/// Handle to a running session
#[derive(Clone)]
pub struct SessionController {
    command_tx: mpsc::Sender<Command>,
    state_rx: watch::Receiver<SessionStatus>,
    broadcast_tx: broadcast::Sender<SessionUpdate>,
    store: Arc<dyn ConfigStore>,
}

impl SessionController {
    /// Load the persisted config and start the runtime task.
    pub fn spawn<T>(transport: T, store: Arc<dyn ConfigStore>, options: ControllerOptions) -> Self
    where
        T: StreamTransport + 'static,
    {
        let config = crate::config::load_config(&*store);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (state_tx, state_rx) = watch::channel(SessionStatus::Idle);
        let (broadcast_tx, _) = broadcast::channel(UPDATE_BUFFER);

        let runtime = SessionRuntime::new(
            transport,
            config,
            options,
            command_rx,
            state_tx,
            broadcast_tx.clone(),
        );
        tokio::spawn(runtime.run());

        Self {
            command_tx,
            state_rx,
            broadcast_tx,
            store,
        }
    }

    async fn request<R>(
        &self,
        make: impl FnOnce(oneshot::Sender<R>) -> Command,
    ) -> Result<R, ChatError> {
        let (reply, rx) = oneshot::channel();
        self.command_tx
            .send(make(reply))
            .await
            .map_err(|_| stopped())?;
        rx.await.map_err(|_| stopped())
    }

    /// Start answering `text`. Returns once the message is accepted; the
    /// answer arrives through [`subscribe`](Self::subscribe).
    pub async fn send(&self, text: impl Into<String>) -> Result<(), ChatError> {
        let text = text.into();
        self.request(|reply| Command::Send { text, reply }).await?
    }

    /// Close the active stream and discard its partial answer. Safe in any
    /// state.
    pub async fn cancel(&self) -> Result<(), ChatError> {
        self.request(|reply| Command::Cancel { reply }).await
    }

    pub async fn clear(&self) -> Result<(), ChatError> {
        self.request(|reply| Command::Clear { reply }).await?
    }

    pub fn current_state(&self) -> SessionStatus {
        *self.state_rx.borrow()
    }

    /// Receiver that observes every state published after this call
    #[allow(dead_code)] // Used in tests
    pub fn state_changes(&self) -> watch::Receiver<SessionStatus> {
        self.state_rx.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionUpdate> {
        self.broadcast_tx.subscribe()
    }

    /// Copy of the conversation so far
    pub async fn history(&self) -> Result<Vec<Turn>, ChatError> {
        self.request(|reply| Command::History { reply }).await
    }

    pub async fn config(&self) -> Result<SessionConfig, ChatError> {
        self.request(|reply| Command::Config { reply }).await
    }

    /// Replace the config snapshot. A stream already in flight keeps the
    /// snapshot it was sent with.
    pub async fn update_config(&self, config: SessionConfig) -> Result<(), ChatError> {
        let config = Box::new(config);
        self.request(|reply| Command::UpdateConfig { config, reply })
            .await?
    }

    /// Persist the current config snapshot
    pub async fn save_config(&self) -> Result<(), SaveConfigError> {
        let config = self.config().await?;
        save_config(&*self.store, &config)?;
        tracing::info!(model = %config.model, "Config saved");
        Ok(())
    }
}

fn stopped() -> ChatError {
    ChatError::state("Session controller stopped")
}
