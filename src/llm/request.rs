//! Request construction
//!
//! Pure: reads the configuration snapshot and the history, never mutates
//! either. The caller appends the new user turn before building.

use super::types::{ChatPayload, ChatRequest};
use super::ChatError;
use crate::config::SessionConfig;
use crate::history::{ConversationHistory, Turn};
use reqwest::Url;

const COMPLETIONS_PATH: [&str; 3] = ["v1", "chat", "completions"];

/// Resolve `{endpoint}/v1/chat/completions`. The path is appended to the
/// endpoint's own path; its query string is kept.
pub fn completions_url(endpoint: &str) -> Result<Url, ChatError> {
    let invalid =
        |reason: &str| ChatError::validation(format!("Invalid endpoint URL '{endpoint}': {reason}"));

    let mut url = Url::parse(endpoint.trim()).map_err(|e| invalid(&e.to_string()))?;
    url.path_segments_mut()
        .map_err(|()| invalid("not a base URL"))?
        .pop_if_empty()
        .extend(COMPLETIONS_PATH);
    Ok(url)
}

/// Build the streaming request for the current conversation.
///
/// Messages are `[system] ++ history.windowed(max_context_turns)`. The system
/// turn is always present, with empty content when no prompt is configured.
pub fn build(config: &SessionConfig, history: &ConversationHistory) -> Result<ChatRequest, ChatError> {
    let url = completions_url(&config.endpoint)?;
    let window = history
        .windowed(config.max_context_turns)
        .map_err(|e| ChatError::validation(e.to_string()))?;

    let mut messages = Vec::with_capacity(window.len() + 1);
    messages.push(Turn::system(config.system_prompt.clone()));
    messages.extend_from_slice(window);

    Ok(ChatRequest {
        url,
        api_key: config.api_key.clone(),
        payload: ChatPayload {
            model: config.model.clone(),
            temperature: config.temperature,
            top_p: config.top_p,
            stream: true,
            messages,
        },
    })
}
