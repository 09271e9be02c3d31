//! Stream event parser
//!
//! Stateless: each raw event maps to exactly one semantic unit, independent
//! of anything that came before it.

use super::types::RawEvent;
use serde::Deserialize;

/// Literal end-of-stream marker
pub const SENTINEL: &str = "[DONE]";

/// Semantic meaning of one raw stream event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamChunk {
    /// Incremental answer text, never empty
    TextDelta(String),
    /// No further deltas will arrive for this turn
    Sentinel,
    /// The event could not be interpreted
    Malformed(String),
    /// Keepalives, role-only deltas, usage chunks
    Ignorable,
}

pub fn parse(event: &RawEvent) -> StreamChunk {
    if !event.name.is_empty() && event.name != "message" {
        return StreamChunk::Ignorable;
    }

    let data = event.data.trim();
    if data.is_empty() {
        return StreamChunk::Ignorable;
    }
    if data == SENTINEL {
        return StreamChunk::Sentinel;
    }

    let chunk: CompletionChunk = match serde_json::from_str(data) {
        Ok(chunk) => chunk,
        Err(e) => return StreamChunk::Malformed(format!("Invalid chunk JSON: {e}")),
    };

    if let Some(error) = chunk.error {
        return StreamChunk::Malformed(format!("Upstream error: {}", error.message));
    }

    chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta)
        .and_then(|delta| delta.content)
        .filter(|content| !content.is_empty())
        .map_or(StreamChunk::Ignorable, StreamChunk::TextDelta)
}

// Chat completion chunk wire types

#[derive(Debug, Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    error: Option<ChunkError>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<ChunkDelta>,
}

#[derive(Debug, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkError {
    #[serde(default)]
    message: String,
}
