//! Session runtime executor

use super::{Command, SessionUpdate};

use crate::config::{ControllerOptions, SessionConfig};
use crate::history::{ConversationHistory, Turn};
use crate::llm::{
    parse, request, ChatError, ChatRequest, RawEvent, StreamChunk, StreamHandle,
    StreamTransport,
};
use crate::state_machine::{transition, Effect, Event, SessionContext, SessionState, SessionStatus};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};

const STREAM_BUFFER: usize = 64;

/// Message from a stream pump task, tagged with the session it belongs to
#[derive(Debug)]
struct StreamMessage {
    session_id: String,
    signal: StreamSignal,
}

#[derive(Debug)]
enum StreamSignal {
    Event(RawEvent),
    Failed(ChatError),
    /// The far end closed the stream
    Ended,
}

/// Single consumer for one chat session
pub struct SessionRuntime<T: StreamTransport + 'static> {
    context: SessionContext,
    state: SessionState,
    history: ConversationHistory,
    config: SessionConfig,
    transport: Arc<T>,
    idle_timeout: Option<Duration>,
    command_rx: mpsc::Receiver<Command>,
    stream_rx: mpsc::Receiver<StreamMessage>,
    stream_tx: mpsc::Sender<StreamMessage>,
    state_tx: watch::Sender<SessionStatus>,
    broadcast_tx: broadcast::Sender<SessionUpdate>,
    /// Close capability of the open stream, if any
    active: Option<StreamHandle>,
}

impl<T: StreamTransport + 'static> SessionRuntime<T> {
    pub(crate) fn new(
        transport: T,
        config: SessionConfig,
        options: ControllerOptions,
        command_rx: mpsc::Receiver<Command>,
        state_tx: watch::Sender<SessionStatus>,
        broadcast_tx: broadcast::Sender<SessionUpdate>,
    ) -> Self {
        let (stream_tx, stream_rx) = mpsc::channel(STREAM_BUFFER);
        Self {
            context: SessionContext::new(options.clear_policy),
            state: SessionState::Idle,
            history: ConversationHistory::new(),
            config,
            transport: Arc::new(transport),
            idle_timeout: options.idle_timeout,
            command_rx,
            stream_rx,
            stream_tx,
            state_tx,
            broadcast_tx,
            active: None,
        }
    }

    pub async fn run(mut self) {
        tracing::info!(model = %self.config.model, "Starting session runtime");

        loop {
            tokio::select! {
                command = self.command_rx.recv() => match command {
                    Some(command) => self.handle_command(command),
                    // Every handle is gone
                    None => break,
                },
                Some(message) = self.stream_rx.recv() => {
                    self.handle_stream_message(message);
                }
            }
        }

        self.close_active();
        tracing::info!("Session runtime stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Send { text, reply } => {
                let event = Event::UserMessage {
                    text,
                    config: Box::new(self.config.clone()),
                };
                let result = self.process_event(event).map_err(ChatError::from);
                if let Err(e) = &result {
                    tracing::debug!(kind = e.kind.as_str(), error = %e, "Message rejected");
                }
                let _ = reply.send(result);
            }
            Command::Cancel { reply } => {
                if let Err(e) = self.process_event(Event::UserCancel) {
                    tracing::warn!(error = %e, "Cancel failed");
                }
                let _ = reply.send(());
            }
            Command::Clear { reply } => {
                let result = self
                    .process_event(Event::ClearHistory)
                    .map_err(ChatError::from);
                let _ = reply.send(result);
            }
            Command::History { reply } => {
                let _ = reply.send(self.history.snapshot());
            }
            Command::Config { reply } => {
                let _ = reply.send(self.config.clone());
            }
            Command::UpdateConfig { config, reply } => {
                let result = config.validate().map(|()| {
                    tracing::debug!(config = ?config, "Config updated");
                    self.config = *config;
                });
                let _ = reply.send(result);
            }
        }
    }

    fn handle_stream_message(&mut self, message: StreamMessage) {
        let is_current = self
            .active
            .as_ref()
            .is_some_and(|h| h.session_id() == message.session_id && !h.is_closed());
        if !is_current {
            tracing::debug!(session_id = %message.session_id, "Dropping event for closed stream");
            return;
        }

        let event = match message.signal {
            StreamSignal::Event(raw) => match parse(&raw) {
                StreamChunk::TextDelta(text) => Event::TextDelta { text },
                StreamChunk::Sentinel => Event::Sentinel,
                StreamChunk::Malformed(reason) => Event::StreamFailed {
                    error: ChatError::protocol(reason),
                },
                StreamChunk::Ignorable => {
                    tracing::trace!(name = %raw.name, "Ignoring stream event");
                    return;
                }
            },
            StreamSignal::Failed(error) => Event::StreamFailed { error },
            StreamSignal::Ended => Event::StreamFailed {
                error: ChatError::connection("Stream closed before completion"),
            },
        };

        if let Err(e) = self.process_event(event) {
            tracing::warn!(session_id = %message.session_id, error = %e, "Stream event not applied");
        }
    }

    fn process_event(&mut self, event: Event) -> Result<(), crate::state_machine::TransitionError> {
        // Effects may chain further events (e.g. Settle)
        let mut events_to_process = vec![event];

        while let Some(current_event) = events_to_process.pop() {
            // Pure state transition
            let result = transition(&self.state, &self.context, current_event)?;

            let old_state = std::mem::replace(&mut self.state, result.new_state);
            if old_state.status() != self.state.status() {
                tracing::debug!(
                    from = %old_state.status(),
                    to = %self.state.status(),
                    "State changed"
                );
            }

            for effect in result.effects {
                if let Some(generated_event) = self.execute_effect(effect) {
                    events_to_process.push(generated_event);
                }
            }
        }

        Ok(())
    }

    /// Execute an effect and optionally return a generated event
    fn execute_effect(&mut self, effect: Effect) -> Option<Event> {
        match effect {
            Effect::AppendUserTurn { text } => {
                if let Err(e) = self.history.append(Turn::user(text)) {
                    tracing::error!(error = %e, "Failed to append user turn");
                }
                None
            }

            Effect::OpenStream { config } => self.open_stream(&config),

            Effect::CloseStream => {
                self.close_active();
                None
            }

            Effect::CommitAnswer { answer } => {
                if let Err(e) = self.history.append(Turn::assistant(answer)) {
                    tracing::error!(error = %e, "Failed to commit answer");
                }
                None
            }

            Effect::ClearHistory => {
                tracing::debug!(turns = self.history.len(), "Clearing history");
                self.history.clear();
                None
            }

            Effect::PublishState => {
                let status = self.state.status();
                self.state_tx.send_replace(status);
                self.publish(SessionUpdate::StateChanged { status });
                None
            }

            Effect::PublishPartial { delta, text } => {
                self.publish(SessionUpdate::Partial { delta, text });
                None
            }

            Effect::NotifyCompleted { answer } => {
                tracing::info!(chars = answer.chars().count(), "Answer completed");
                self.publish(SessionUpdate::Completed { answer });
                None
            }

            Effect::NotifyFailed { error, partial } => {
                tracing::warn!(
                    kind = error.kind.as_str(),
                    status = ?error.status,
                    error = %error,
                    partial_chars = partial.as_deref().map_or(0, |p| p.chars().count()),
                    "Answer failed"
                );
                self.publish(SessionUpdate::Failed { error, partial });
                None
            }

            Effect::NotifyCancelled { partial } => {
                tracing::info!("Answer cancelled");
                self.publish(SessionUpdate::Cancelled { partial });
                None
            }

            Effect::Settle => Some(Event::Settle),
        }
    }

    fn publish(&self, update: SessionUpdate) {
        // No subscribers is fine
        let _ = self.broadcast_tx.send(update);
    }

    fn close_active(&mut self) {
        if let Some(handle) = self.active.take() {
            handle.close();
        }
    }

    /// Build the request and spawn a task that pumps the stream into this
    /// runtime. Returns `StreamFailed` if the request cannot be built.
    fn open_stream(&mut self, config: &SessionConfig) -> Option<Event> {
        let request = match request::build(config, &self.history) {
            Ok(request) => request,
            Err(error) => return Some(Event::StreamFailed { error }),
        };

        let session_id = uuid::Uuid::new_v4().to_string();
        let handle = StreamHandle::new(session_id.clone());
        if let Some(previous) = self.active.replace(handle.clone()) {
            previous.close();
        }

        tracing::info!(
            session_id = %session_id,
            model = %request.payload.model,
            messages = request.payload.messages.len(),
            "Opening stream"
        );

        tokio::spawn(pump_stream(
            self.transport.clone(),
            request,
            handle,
            self.stream_tx.clone(),
            self.idle_timeout,
        ));

        // The events will come from the spawned task
        None
    }
}

/// Forward one stream's events, in order, until it ends, fails or is closed.
#[allow(clippy::needless_pass_by_value)] // Owned by the spawned task
async fn pump_stream<T: StreamTransport + ?Sized>(
    transport: Arc<T>,
    request: ChatRequest,
    handle: StreamHandle,
    tx: mpsc::Sender<StreamMessage>,
    idle_timeout: Option<Duration>,
) {
    let tag = |signal| StreamMessage {
        session_id: handle.session_id().to_string(),
        signal,
    };

    // Race the open against close
    let mut stream = tokio::select! {
        biased;

        () = handle.closed() => {
            tracing::debug!(session_id = %handle.session_id(), "Stream closed before open");
            return;
        }

        result = bounded(idle_timeout, transport.open(&request)) => match result {
            Ok(Ok(stream)) => stream,
            Ok(Err(error)) => {
                let _ = tx.send(tag(StreamSignal::Failed(error))).await;
                return;
            }
            Err(limit) => {
                let error = ChatError::connection(format!("No response headers within {limit:?}"));
                let _ = tx.send(tag(StreamSignal::Failed(error))).await;
                return;
            }
        }
    };

    loop {
        let next = tokio::select! {
            biased;

            () = handle.closed() => return,

            next = bounded(idle_timeout, stream.next()) => next,
        };

        let signal = match next {
            Ok(Some(Ok(event))) => StreamSignal::Event(event),
            Ok(Some(Err(error))) => StreamSignal::Failed(error),
            Ok(None) => StreamSignal::Ended,
            Err(limit) => StreamSignal::Failed(ChatError::connection(format!(
                "No stream event within {limit:?}"
            ))),
        };
        let last = !matches!(signal, StreamSignal::Event(_));

        if tx.send(tag(signal)).await.is_err() || last {
            return;
        }
    }
}

/// Await `future`, giving up once `idle_timeout` elapses if one is set.
/// `Err` carries the limit that elapsed.
async fn bounded<F: std::future::Future>(
    idle_timeout: Option<Duration>,
    future: F,
) -> Result<F::Output, Duration> {
    match idle_timeout {
        Some(limit) => tokio::time::timeout(limit, future).await.map_err(|_| limit),
        None => Ok(future.await),
    }
}
