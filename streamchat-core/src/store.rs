use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{ChatError, CoreResult};
use crate::model::{Bookmark, Conversation, ConversationId, Message, now_ms};

/// Durable home of conversations and their messages.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn create_conversation(&self, owner_id: &str, title: &str) -> CoreResult<ConversationId>;

    async fn append_message(
        &self,
        conversation_id: ConversationId,
        message: &Message,
    ) -> CoreResult<()>;

    /// Messages in insertion order.
    async fn list_messages(&self, conversation_id: ConversationId) -> CoreResult<Vec<Message>>;

    /// Conversations of one owner, most recently updated first.
    async fn list_conversations(&self, owner_id: &str) -> CoreResult<Vec<Conversation>>;

    /// Bookmark `message_id` for `owner_id`, or remove the bookmark if it is
    /// already there. Returns whether the message is bookmarked afterwards.
    async fn toggle_bookmark(&self, owner_id: &str, message_id: Uuid) -> CoreResult<bool>;

    /// Bookmarks of one owner, newest first.
    async fn list_bookmarks(&self, owner_id: &str) -> CoreResult<Vec<Bookmark>>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ConversationDoc {
    conversation: Conversation,
    #[serde(default)]
    messages: Vec<Message>,
}

impl ConversationDoc {
    fn new(owner_id: &str, title: &str) -> Self {
        Self {
            conversation: Conversation {
                id: Uuid::new_v4(),
                owner_id: owner_id.to_string(),
                title: title.to_string(),
                updated_at_ms: now_ms(),
            },
            messages: Vec::new(),
        }
    }

    fn push(&mut self, message: &Message) {
        self.messages.push(message.clone());
        self.conversation.updated_at_ms = self.conversation.updated_at_ms.max(now_ms());
    }
}

fn newest_first(mut convs: Vec<Conversation>) -> Vec<Conversation> {
    convs.sort_by(|a, b| b.updated_at_ms.cmp(&a.updated_at_ms));
    convs
}

/// Flip one bookmark in `marks`; true when it was added.
fn toggle_in(marks: &mut Vec<Bookmark>, owner_id: &str, message_id: Uuid) -> bool {
    let before = marks.len();
    marks.retain(|b| !(b.owner_id == owner_id && b.message_id == message_id));
    if marks.len() < before {
        return false;
    }
    marks.push(Bookmark {
        owner_id: owner_id.to_string(),
        message_id,
        created_at_ms: now_ms(),
    });
    true
}

fn owned_newest_first(marks: &[Bookmark], owner_id: &str) -> Vec<Bookmark> {
    // pushes are chronological, so reverse order is newest first
    marks
        .iter()
        .rev()
        .filter(|b| b.owner_id == owner_id)
        .cloned()
        .collect()
}

fn not_found(id: ConversationId) -> ChatError {
    ChatError::Store(format!("conversation {id} not found"))
}

/// Process-local store. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    docs: Mutex<HashMap<ConversationId, ConversationDoc>>,
    bookmarks: Mutex<Vec<Bookmark>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn create_conversation(&self, owner_id: &str, title: &str) -> CoreResult<ConversationId> {
        let doc = ConversationDoc::new(owner_id, title);
        let id = doc.conversation.id;
        self.docs.lock().await.insert(id, doc);
        Ok(id)
    }

    async fn append_message(
        &self,
        conversation_id: ConversationId,
        message: &Message,
    ) -> CoreResult<()> {
        let mut docs = self.docs.lock().await;
        let doc = docs
            .get_mut(&conversation_id)
            .ok_or_else(|| not_found(conversation_id))?;
        doc.push(message);
        Ok(())
    }

    async fn list_messages(&self, conversation_id: ConversationId) -> CoreResult<Vec<Message>> {
        let docs = self.docs.lock().await;
        docs.get(&conversation_id)
            .map(|d| d.messages.clone())
            .ok_or_else(|| not_found(conversation_id))
    }

    async fn list_conversations(&self, owner_id: &str) -> CoreResult<Vec<Conversation>> {
        let docs = self.docs.lock().await;
        Ok(newest_first(
            docs.values()
                .filter(|d| d.conversation.owner_id == owner_id)
                .map(|d| d.conversation.clone())
                .collect(),
        ))
    }

    async fn toggle_bookmark(&self, owner_id: &str, message_id: Uuid) -> CoreResult<bool> {
        Ok(toggle_in(&mut *self.bookmarks.lock().await, owner_id, message_id))
    }

    async fn list_bookmarks(&self, owner_id: &str) -> CoreResult<Vec<Bookmark>> {
        Ok(owned_newest_first(&self.bookmarks.lock().await, owner_id))
    }
}

/// One JSON document per conversation under `dir`, named `<id>.json`.
/// Bookmarks of every owner live in `bookmarks/index.json`.
///
/// Writes go to a sibling temp file that is then renamed over the target, so
/// a crash mid-write never leaves a truncated document behind. A single async
/// mutex serializes read-modify-write cycles within the process.
#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStore {
    pub async fn open(dir: impl Into<PathBuf>) -> CoreResult<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(dir.join("bookmarks")).await?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    fn doc_path(&self, id: ConversationId) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    async fn read_doc(&self, id: ConversationId) -> CoreResult<ConversationDoc> {
        let bytes = match tokio::fs::read(self.doc_path(id)).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(not_found(id)),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&bytes)
            .map_err(|e| ChatError::Store(format!("corrupt conversation {id}: {e}")))
    }

    async fn write_doc(&self, doc: &ConversationDoc) -> CoreResult<()> {
        write_atomic(&self.doc_path(doc.conversation.id), doc).await
    }

    fn bookmarks_path(&self) -> PathBuf {
        self.dir.join("bookmarks").join("index.json")
    }

    async fn read_bookmarks(&self) -> CoreResult<Vec<Bookmark>> {
        let path = self.bookmarks_path();
        let bytes = match tokio::fs::read(&path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&bytes)
            .map_err(|e| ChatError::Store(format!("corrupt bookmarks {}: {e}", path.display())))
    }
}

async fn write_atomic<T: Serialize>(target: &Path, value: &T) -> CoreResult<()> {
    let body = serde_json::to_vec_pretty(value).map_err(|e| ChatError::Other(e.into()))?;
    let tmp = target.with_extension("json.tmp");
    tokio::fs::write(&tmp, body).await?;
    tokio::fs::rename(&tmp, target).await?;
    Ok(())
}

#[async_trait]
impl ConversationStore for FileStore {
    async fn create_conversation(&self, owner_id: &str, title: &str) -> CoreResult<ConversationId> {
        let doc = ConversationDoc::new(owner_id, title);
        let _guard = self.write_lock.lock().await;
        self.write_doc(&doc).await?;
        Ok(doc.conversation.id)
    }

    async fn append_message(
        &self,
        conversation_id: ConversationId,
        message: &Message,
    ) -> CoreResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut doc = self.read_doc(conversation_id).await?;
        doc.push(message);
        self.write_doc(&doc).await
    }

    async fn list_messages(&self, conversation_id: ConversationId) -> CoreResult<Vec<Message>> {
        Ok(self.read_doc(conversation_id).await?.messages)
    }

    async fn list_conversations(&self, owner_id: &str) -> CoreResult<Vec<Conversation>> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut convs = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = tokio::fs::read(&path).await?;
            match serde_json::from_slice::<ConversationDoc>(&bytes) {
                Ok(doc) if doc.conversation.owner_id == owner_id => convs.push(doc.conversation),
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable conversation file");
                }
            }
        }
        Ok(newest_first(convs))
    }

    async fn toggle_bookmark(&self, owner_id: &str, message_id: Uuid) -> CoreResult<bool> {
        let _guard = self.write_lock.lock().await;
        let mut marks = self.read_bookmarks().await?;
        let added = toggle_in(&mut marks, owner_id, message_id);
        write_atomic(&self.bookmarks_path(), &marks).await?;
        Ok(added)
    }

    async fn list_bookmarks(&self, owner_id: &str) -> CoreResult<Vec<Bookmark>> {
        Ok(owned_newest_first(&self.read_bookmarks().await?, owner_id))
    }
}
