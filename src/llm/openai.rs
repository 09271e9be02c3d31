//! `OpenAI`-compatible streaming transport
//!
//! POSTs to `{endpoint}/v1/chat/completions` with `stream: true` and frames
//! the response body as server-sent events.

use super::types::{ChatRequest, RawEvent};
use super::{ChatError, EventStream, StreamTransport};
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::{header, Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Chat completions over SSE for `OpenAI` and compatible servers
pub struct OpenAIStreamTransport {
    client: Client,
}

impl OpenAIStreamTransport {
    pub fn new() -> Result<Self, ChatError> {
        // No overall timeout: streams stay open for as long as the model talks.
        // Silence is bounded by the runtime's idle timeout instead.
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| ChatError::connection(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl StreamTransport for OpenAIStreamTransport {
    async fn open(&self, request: &ChatRequest) -> Result<EventStream, ChatError> {
        let response = self
            .client
            .post(request.url.clone())
            .header(header::AUTHORIZATION, format!("Bearer {}", request.api_key))
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::ACCEPT, "text/event-stream")
            .json(&request.payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ChatError::connection(format!("Request timeout: {e}"))
                } else if e.is_connect() {
                    ChatError::connection(format!("Connection failed: {e}"))
                } else {
                    ChatError::connection(format!("Request failed: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(error_from_status(status, &body));
        }

        let events = response
            .bytes_stream()
            .eventsource()
            .map(|item| match item {
                Ok(event) => Ok(RawEvent {
                    name: event.event,
                    data: event.data,
                }),
                Err(e) => Err(ChatError::connection(format!("Stream read failed: {e}"))),
            });

        Ok(events.boxed())
    }
}

/// Map a non-success response to a connection error, keeping the server's
/// own message when the body is an `OpenAI` error object.
fn error_from_status(status: StatusCode, body: &str) -> ChatError {
    let err = if let Ok(error_resp) = serde_json::from_str::<OpenAIErrorResponse>(body) {
        let message = error_resp.error.message;
        match status.as_u16() {
            401 | 403 => ChatError::connection(format!("Authentication failed: {message}")),
            429 => ChatError::connection(format!("Rate limit exceeded: {message}")),
            400 => ChatError::connection(format!("Invalid request: {message}")),
            500..=599 => ChatError::connection(format!("Server error: {message}")),
            _ => ChatError::connection(format!("HTTP {status}: {message}")),
        }
    } else if body.trim().is_empty() {
        ChatError::connection(format!("HTTP {status}"))
    } else {
        ChatError::connection(format!("HTTP {status} error: {}", body.trim()))
    };
    err.with_status(status.as_u16())
}

#[derive(Debug, Deserialize)]
struct OpenAIErrorResponse {
    error: OpenAIError,
}

#[derive(Debug, Deserialize)]
struct OpenAIError {
    message: String,
}
