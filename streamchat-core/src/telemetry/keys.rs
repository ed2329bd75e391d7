//! Span and event field names used by the chat stream.
//! Keep these stable; log queries and dashboards match on them.

pub const KEY_CONVERSATION_ID: &str = "chat.conversation_id";
pub const KEY_REQUEST_ID: &str = "req.id";
pub const KEY_BACKEND: &str = "chat.backend";
pub const KEY_MOOD: &str = "chat.mood";

pub const KEY_DELTAS: &str = "stream.deltas";
pub const KEY_OUTCOME: &str = "stream.outcome";
pub const KEY_LATENCY_MS: &str = "latency.ms";

pub const KEY_ERROR_KIND: &str = "error.kind";
