//! Common types for streaming chat completions

use crate::history::Turn;
use reqwest::Url;
use serde::Serialize;
use std::fmt;

/// Outgoing request: where to send it, how to authenticate, what to send
#[derive(Clone, PartialEq)]
pub struct ChatRequest {
    pub url: Url,
    pub api_key: String,
    pub payload: ChatPayload,
}

impl fmt::Debug for ChatRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatRequest")
            .field("url", &self.url.as_str())
            .field("payload", &self.payload)
            .finish_non_exhaustive()
    }
}

/// JSON body of a chat completion request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatPayload {
    pub model: String,
    pub temperature: f64,
    pub top_p: f64,
    pub stream: bool,
    pub messages: Vec<Turn>,
}

/// One server-sent event as delivered by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    /// SSE event name; `message` when the server sent none
    pub name: String,
    pub data: String,
}

impl RawEvent {
    pub fn new(name: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }

    /// A default-named event, the shape chat completion chunks arrive in
    pub fn message(data: impl Into<String>) -> Self {
        Self::new("message", data)
    }
}
