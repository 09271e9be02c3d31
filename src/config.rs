//! Session configuration
//!
//! A `SessionConfig` is an immutable snapshot: each send captures the
//! snapshot current at send time, later edits only affect later sends.

mod store;

pub use store::{
    load_config, save_config, ConfigStore, MemoryConfigStore, SqliteConfigStore, StoreError,
};

use crate::llm::ChatError;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com";
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";
pub const DEFAULT_MAX_CONTEXT_TURNS: usize = 30;
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Per-request settings, persisted by [`save_config`]
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    #[serde(rename = "systemPrompt")]
    pub system_prompt: String,
    #[serde(rename = "url")]
    pub endpoint: String,
    #[serde(rename = "apiKey")]
    pub api_key: String,
    pub model: String,
    pub temperature: f64,
    pub top_p: f64,
    #[serde(rename = "maxLength")]
    pub max_context_turns: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            system_prompt: String::new(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key: String::new(),
            model: DEFAULT_MODEL.to_string(),
            temperature: 1.0,
            top_p: 1.0,
            max_context_turns: DEFAULT_MAX_CONTEXT_TURNS,
        }
    }
}

// The API key must never reach the logs.
impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("system_prompt", &self.system_prompt)
            .field("endpoint", &self.endpoint)
            .field("api_key", &if self.api_key.is_empty() { "" } else { "<redacted>" })
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("top_p", &self.top_p)
            .field("max_context_turns", &self.max_context_turns)
            .finish()
    }
}

impl SessionConfig {
    /// Check everything that can be checked before touching the network.
    pub fn validate(&self) -> Result<(), ChatError> {
        let url = Url::parse(self.endpoint.trim())
            .map_err(|e| ChatError::validation(format!("Invalid endpoint URL '{}': {e}", self.endpoint)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ChatError::validation(format!(
                "Endpoint must use http or https, got '{}'",
                url.scheme()
            )));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ChatError::validation(format!(
                "temperature must be within [0, 2], got {}",
                self.temperature
            )));
        }
        if !(0.0..=1.0).contains(&self.top_p) {
            return Err(ChatError::validation(format!(
                "top_p must be within [0, 1], got {}",
                self.top_p
            )));
        }
        if self.max_context_turns == 0 {
            return Err(ChatError::validation(
                "maxLength must be at least 1 turn",
            ));
        }
        Ok(())
    }

    /// Overlay environment variables on top of a loaded snapshot
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(endpoint) = std::env::var("CHATSTREAM_ENDPOINT") {
            self.endpoint = endpoint;
        }
        if let Ok(api_key) = std::env::var("OPENAI_API_KEY") {
            self.api_key = api_key;
        }
        if let Ok(model) = std::env::var("CHATSTREAM_MODEL") {
            self.model = model;
        }
        if let Ok(prompt) = std::env::var("CHATSTREAM_SYSTEM_PROMPT") {
            self.system_prompt = prompt;
        }
        self
    }

    /// Update a single field by its persisted name (used by `/set`)
    pub fn set_field(&mut self, field: &str, value: &str) -> Result<(), ChatError> {
        match field {
            "systemPrompt" | "system_prompt" => self.system_prompt = value.to_string(),
            "url" | "endpoint" => self.endpoint = value.to_string(),
            "apiKey" | "api_key" => self.api_key = value.to_string(),
            "model" => self.model = value.to_string(),
            "temperature" => self.temperature = parse_number(field, value)?,
            "top_p" => self.top_p = parse_number(field, value)?,
            "maxLength" | "max_context_turns" => {
                self.max_context_turns = value.trim().parse().map_err(|_| {
                    ChatError::validation(format!("{field} must be a positive integer"))
                })?;
            }
            other => {
                return Err(ChatError::validation(format!("Unknown setting '{other}'")));
            }
        }
        Ok(())
    }
}

fn parse_number(field: &str, value: &str) -> Result<f64, ChatError> {
    value
        .trim()
        .parse::<f64>()
        .map_err(|_| ChatError::validation(format!("{field} must be a number")))
}

/// What `clear()` does while a stream is active
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClearPolicy {
    /// Refuse with a state error; the caller must cancel first
    Reject,
    /// Close the active transport, discard the partial answer, then clear
    #[default]
    CancelActive,
}

/// Runtime options for the controller (not persisted)
#[derive(Debug, Clone)]
pub struct ControllerOptions {
    /// Maximum silence between stream events; `None` waits forever
    pub idle_timeout: Option<Duration>,
    pub clear_policy: ClearPolicy,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            idle_timeout: Some(DEFAULT_IDLE_TIMEOUT),
            clear_policy: ClearPolicy::default(),
        }
    }
}

impl ControllerOptions {
    pub fn from_env() -> Self {
        let mut options = Self::default();
        if let Some(secs) = std::env::var("CHATSTREAM_IDLE_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
        {
            options.idle_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        match std::env::var("CHATSTREAM_CLEAR_POLICY").as_deref() {
            Ok("reject") => options.clear_policy = ClearPolicy::Reject,
            Ok("cancel") => options.clear_policy = ClearPolicy::CancelActive,
            Ok(other) => tracing::warn!(value = %other, "Ignoring unknown CHATSTREAM_CLEAR_POLICY"),
            Err(_) => {}
        }
        options
    }
}
