use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Fixed icon set a section can point at. Unknown keys render as `Eye`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SectionIcon {
    #[default]
    Eye,
    Image,
    Waves,
    Thread,
}

impl SectionIcon {
    pub fn from_key(key: &str) -> Self {
        match key {
            "image" => Self::Image,
            "waves" => Self::Waves,
            "thread" => Self::Thread,
            _ => Self::Eye,
        }
    }

    pub fn key(self) -> &'static str {
        match self {
            Self::Eye => "eye",
            Self::Image => "image",
            Self::Waves => "waves",
            Self::Thread => "thread",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Section {
    #[serde(default)]
    pub title: String,
    /// Raw icon key as emitted by the model; see [`Section::icon`].
    #[serde(default)]
    pub icon: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<String>>,
}

impl Section {
    pub fn icon(&self) -> SectionIcon {
        SectionIcon::from_key(&self.icon)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ImportanceLevel {
    Quick,
    Medium,
    Long,
}

impl ImportanceLevel {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "quick" => Some(Self::Quick),
            "medium" => Some(Self::Medium),
            "long" => Some(Self::Long),
            _ => None,
        }
    }
}

/// The structured object the accumulator reconstructs from the stream.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct StructuredPayload {
    pub analysis: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sections: Option<Vec<Section>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closing: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta_awareness: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authentic_response: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "score_in_range"
    )]
    pub resonance_score: Option<u8>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "known_importance"
    )]
    pub importance_level: Option<ImportanceLevel>,
}

/// Anything but an integer in 1..=100 reads as no score.
fn score_in_range<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u8>, D::Error> {
    let v = Option::<Value>::deserialize(d)?;
    Ok(v.as_ref()
        .and_then(Value::as_u64)
        .filter(|n| (1..=100).contains(n))
        .map(|n| n as u8))
}

fn known_importance<'de, D: Deserializer<'de>>(d: D) -> Result<Option<ImportanceLevel>, D::Error> {
    let v = Option::<Value>::deserialize(d)?;
    Ok(v.as_ref().and_then(Value::as_str).and_then(ImportanceLevel::parse))
}

/// One turn in a conversation.
///
/// A user message only ever carries `raw_content`. An assistant message shows
/// `raw_content` while streaming (or as a fallback) and `payload` once the
/// structured parse succeeds; the projector clears `raw_content` at that point.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: Uuid,
    pub role: Role,
    #[serde(default)]
    pub raw_content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<StructuredPayload>,
    /// Marks the single placeholder assistant message of an active stream.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub in_progress: bool,
    pub created_at_ms: i64,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role: Role::User,
            raw_content: text.into(),
            payload: None,
            in_progress: false,
            created_at_ms: now_ms(),
        }
    }

    /// A finished assistant message holding plain text only.
    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role: Role::Assistant,
            raw_content: text.into(),
            payload: None,
            in_progress: false,
            created_at_ms: now_ms(),
        }
    }

    pub fn placeholder() -> Self {
        Self {
            in_progress: true,
            ..Self::assistant_text(String::new())
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.role == Role::Assistant && self.in_progress
    }

    /// Text sent back to the backend as conversation history.
    pub fn history_text(&self) -> String {
        match &self.payload {
            Some(p) if self.raw_content.is_empty() => {
                serde_json::to_string(p).unwrap_or_default()
            }
            _ => self.raw_content.clone(),
        }
    }
}

pub type ConversationId = Uuid;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Conversation {
    pub id: ConversationId,
    pub owner_id: String,
    pub title: String,
    pub updated_at_ms: i64,
}

/// An owner's mark on one message. At most one per `(owner_id, message_id)`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Bookmark {
    pub owner_id: String,
    pub message_id: Uuid,
    pub created_at_ms: i64,
}

/// A `{role, content}` pair as the backend expects it.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

/// Outbound request body.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub messages: Vec<ChatTurn>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<ConversationId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}
