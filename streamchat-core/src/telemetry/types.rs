use serde::{Deserialize, Serialize};

/// How a stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamOutcome {
    /// A structured payload was captured.
    Structured,
    /// The stream ended without one; the raw text became the reply.
    RawFallback,
    /// Aborted with a surfaced error and rolled back.
    Failed,
}

impl StreamOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Structured => "structured",
            Self::RawFallback => "raw_fallback",
            Self::Failed => "failed",
        }
    }
}

/// One record per finished stream, handed to the installed sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamReport {
    pub request_id: String,
    pub conversation_id: Option<String>,
    pub backend: String,
    pub outcome: StreamOutcome,
    /// Content deltas received, including ones after the payload settled.
    pub deltas: usize,
    pub latency_ms: u64,
    pub created_at_ms: i64,
    pub error_kind: Option<String>,
    pub error_message: Option<String>,
}

impl StreamReport {
    pub fn new(request_id: impl Into<String>, backend: &str, outcome: StreamOutcome) -> Self {
        Self {
            request_id: request_id.into(),
            conversation_id: None,
            backend: backend.to_string(),
            outcome,
            deltas: 0,
            latency_ms: 0,
            created_at_ms: crate::model::now_ms(),
            error_kind: None,
            error_message: None,
        }
    }

    pub fn conversation_id_opt(mut self, id: Option<impl ToString>) -> Self {
        self.conversation_id = id.map(|v| v.to_string());
        self
    }

    pub fn deltas(mut self, n: usize) -> Self {
        self.deltas = n;
        self
    }

    pub fn latency_ms(mut self, ms: u64) -> Self {
        self.latency_ms = ms;
        self
    }

    pub fn error(mut self, err: &crate::error::ChatError) -> Self {
        self.error_kind = Some(err.kind().to_string());
        self.error_message = Some(err.to_string());
        self
    }
}
