//! Decoding of framed `data:` lines into stream events.
//!
//! Contract:
//! - A line yields at most one event.
//! - Anything that does not decode (keep-alives, non-JSON payloads, envelopes
//!   without a content delta) is `NoEvent`, never an error. Only the transport
//!   can abort a stream.

use serde::Deserialize;

const DATA_PREFIX: &str = "data: ";
const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    NoEvent,
    StreamEnd,
    ContentDelta(String),
}

// ---- Wire structs (minimal, OpenAI-compatible chunk) ----
#[derive(Deserialize)]
struct ChunkEnvelope {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<ChunkDelta>,
}

#[derive(Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

pub fn decode_line(line: &str) -> SseEvent {
    let Some(rest) = line.strip_prefix(DATA_PREFIX) else {
        return SseEvent::NoEvent;
    };
    let payload = rest.trim();
    if payload == DONE_SENTINEL {
        return SseEvent::StreamEnd;
    }
    let envelope = match serde_json::from_str::<ChunkEnvelope>(payload) {
        Ok(env) => env,
        Err(e) => {
            tracing::trace!(error = %e, "skipping undecodable sse payload");
            return SseEvent::NoEvent;
        }
    };
    envelope
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta)
        .and_then(|d| d.content)
        .filter(|s| !s.is_empty())
        .map_or(SseEvent::NoEvent, SseEvent::ContentDelta)
}
