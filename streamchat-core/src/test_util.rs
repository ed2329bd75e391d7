//! Doubles shared by the session tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use futures::channel::mpsc;
use futures::stream;
use futures_util::StreamExt;
use uuid::Uuid;

use crate::backend::ChatBackend;
use crate::error::{ChatError, CoreResult};
use crate::http_client::ByteStream;
use crate::model::{Bookmark, ChatRequest, Conversation, ConversationId, Message};
use crate::store::ConversationStore;

/// What one `open_stream` call does.
pub enum Script {
    /// Accept the request and send these body fragments, then end.
    Body(Vec<String>),
    /// Reject the request with this error.
    Reject(ChatError),
    /// Accept and forward whatever the test pushes into the channel.
    Live(mpsc::UnboundedReceiver<CoreResult<Bytes>>),
}

impl Script {
    /// OpenAI-style delta lines for `deltas`, terminated by `[DONE]`.
    pub fn deltas(deltas: &[&str]) -> Self {
        let mut body: Vec<String> = deltas.iter().map(|d| delta_line(d)).collect();
        body.push("data: [DONE]\n\n".to_string());
        Script::Body(body)
    }

    /// A live body plus the sender that feeds it.
    pub fn live() -> (Self, mpsc::UnboundedSender<CoreResult<Bytes>>) {
        let (tx, rx) = mpsc::unbounded();
        (Script::Live(rx), tx)
    }
}

pub fn delta_line(content: &str) -> String {
    let envelope = serde_json::json!({"choices": [{"delta": {"content": content}}]});
    format!("data: {envelope}\n\n")
}

/// Plays back one [`Script`] per request, in order, and keeps every request.
#[derive(Default)]
pub struct ScriptedBackend {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedBackend {
    pub fn new(scripts: impl IntoIterator<Item = Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn open_stream(&self, req: &ChatRequest, _request_id: &str) -> CoreResult<ByteStream> {
        self.requests.lock().unwrap().push(req.clone());
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ChatError::transport("no scripted response left"))?;
        match script {
            Script::Body(parts) => {
                let items: Vec<CoreResult<Bytes>> =
                    parts.into_iter().map(|p| Ok(Bytes::from(p))).collect();
                Ok(stream::iter(items).boxed())
            }
            Script::Reject(err) => Err(err),
            Script::Live(rx) => Ok(rx.boxed()),
        }
    }
}

/// Store whose every operation fails.
#[derive(Default)]
pub struct FailingStore;

#[async_trait]
impl ConversationStore for FailingStore {
    async fn create_conversation(&self, _owner_id: &str, _title: &str) -> CoreResult<ConversationId> {
        Err(ChatError::Store("disk unavailable".into()))
    }

    async fn append_message(&self, _id: ConversationId, _message: &Message) -> CoreResult<()> {
        Err(ChatError::Store("disk unavailable".into()))
    }

    async fn list_messages(&self, _id: ConversationId) -> CoreResult<Vec<Message>> {
        Err(ChatError::Store("disk unavailable".into()))
    }

    async fn list_conversations(&self, _owner_id: &str) -> CoreResult<Vec<Conversation>> {
        Err(ChatError::Store("disk unavailable".into()))
    }

    async fn toggle_bookmark(&self, _owner_id: &str, _message_id: Uuid) -> CoreResult<bool> {
        Err(ChatError::Store("disk unavailable".into()))
    }

    async fn list_bookmarks(&self, _owner_id: &str) -> CoreResult<Vec<Bookmark>> {
        Err(ChatError::Store("disk unavailable".into()))
    }
}
