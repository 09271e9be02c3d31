//! Streaming chat completion boundary
//!
//! Builds requests, opens event streams, and interprets the events that
//! come back.

mod error;
mod openai;
pub mod parser;
pub mod request;
mod types;

pub use error::{ChatError, ChatErrorKind};
pub use openai::OpenAIStreamTransport;
pub use parser::{parse, StreamChunk};
pub use types::*;

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Lazy, in-order sequence of raw events for one request
pub type EventStream = BoxStream<'static, Result<RawEvent, ChatError>>;

/// Opens one streaming connection per request
#[async_trait]
pub trait StreamTransport: Send + Sync {
    /// Send the request and return once the response headers are in.
    /// Events are read lazily from the returned stream.
    async fn open(&self, request: &ChatRequest) -> Result<EventStream, ChatError>;
}

#[async_trait]
impl<T: StreamTransport + ?Sized> StreamTransport for Arc<T> {
    async fn open(&self, request: &ChatRequest) -> Result<EventStream, ChatError> {
        (**self).open(request).await
    }
}

/// Close capability for one open stream.
///
/// Closing is idempotent and may happen at any time, including after the
/// stream ended on its own.
#[derive(Debug, Clone)]
pub struct StreamHandle {
    session_id: String,
    cancel: CancellationToken,
}

impl StreamHandle {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Returns `true` if this call closed the stream
    pub fn close(&self) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        tracing::debug!(session_id = %self.session_id, "Closing stream");
        self.cancel.cancel();
        true
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once `close` has been called
    pub async fn closed(&self) {
        self.cancel.cancelled().await;
    }
}

/// Logging wrapper for stream transports
pub struct LoggingTransport {
    inner: Arc<dyn StreamTransport>,
}

impl LoggingTransport {
    pub fn new(inner: Arc<dyn StreamTransport>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl StreamTransport for LoggingTransport {
    async fn open(&self, request: &ChatRequest) -> Result<EventStream, ChatError> {
        let start = Instant::now();
        let result = self.inner.open(request).await;
        let duration = start.elapsed();

        match &result {
            Ok(_) => {
                tracing::info!(
                    url = %request.url,
                    model = %request.payload.model,
                    messages = request.payload.messages.len(),
                    duration_ms = %duration.as_millis(),
                    "Stream opened"
                );
            }
            Err(e) => {
                tracing::error!(
                    url = %request.url,
                    model = %request.payload.model,
                    duration_ms = %duration.as_millis(),
                    status = ?e.status,
                    error = %e.message,
                    "Stream open failed"
                );
            }
        }

        result
    }
}
