//! Per-conversation orchestration of one streamed reply at a time.
//!
//! `Idle → Sending → Streaming → Finalizing → Idle`, with
//! `Sending | Streaming → Errored → Idle` on a surfaced failure. A send that
//! arrives while the state is not `Idle` is ignored.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use tokio::sync::{mpsc, watch};
use tracing_futures::Instrument;
use uuid::Uuid;

use crate::accumulator::{JsonAccumulator, Progress};
use crate::backend::ChatBackend;
use crate::config::{Config, MemoryCfg};
use crate::error::{ChatError, CoreResult, Notice};
use crate::http_client::SseLines;
use crate::model::{ChatRequest, ChatTurn, ConversationId, Message};
use crate::mood::{Mood, detect_mood};
use crate::normalizer::{clean_text, conversation_title};
use crate::projector::{ChatEvent, MessageList, reduce};
use crate::sse::{SseEvent, decode_line};
use crate::store::ConversationStore;
use crate::telemetry::{self, StreamOutcome, StreamReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Sending,
    Streaming,
    Finalizing,
    Errored,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    /// The stream ended normally; this is the finished assistant message.
    Completed(Arc<Message>),
    /// Blank input, or a stream was already in flight.
    Ignored,
}

pub struct ChatSession {
    backend: Arc<dyn ChatBackend>,
    store: Option<Arc<dyn ConversationStore>>,
    memory: MemoryCfg,
    idle_timeout: Option<Duration>,
    state: Mutex<StreamState>,
    conversation_id: Mutex<Option<ConversationId>>,
    mood: Mutex<Mood>,
    snapshot: watch::Sender<MessageList>,
    notice_tx: mpsc::UnboundedSender<Notice>,
    notice_rx: Mutex<Option<mpsc::UnboundedReceiver<Notice>>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Puts the session back to `Idle` however `send` returns.
///
/// A `send` future dropped before it finalized or failed (a caller's timeout
/// or `select!`) is rolled back like a failed stream, without a notice.
struct IdleGuard<'a> {
    session: &'a ChatSession,
}

impl Drop for IdleGuard<'_> {
    fn drop(&mut self) {
        let mut state = lock(&self.session.state);
        if matches!(*state, StreamState::Sending | StreamState::Streaming) {
            tracing::debug!(state = ?*state, "send abandoned; rolling back");
            self.session.apply(ChatEvent::StreamFailed);
        }
        *state = StreamState::Idle;
    }
}

impl ChatSession {
    /// A fresh conversation. The configured greeting, if any, is shown and
    /// sent as history but never persisted.
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        store: Option<Arc<dyn ConversationStore>>,
        cfg: &Config,
    ) -> Self {
        let seed = cfg
            .session
            .greeting
            .as_deref()
            .map(|g| vec![Arc::new(Message::assistant_text(g))])
            .unwrap_or_default();
        Self::with_messages(backend, store, cfg, seed)
    }

    /// Reopen a stored conversation with its messages in order.
    pub async fn open(
        backend: Arc<dyn ChatBackend>,
        store: Arc<dyn ConversationStore>,
        cfg: &Config,
        conversation_id: ConversationId,
    ) -> CoreResult<Self> {
        let history = store.list_messages(conversation_id).await?;
        let session = Self::with_messages(
            backend,
            Some(store),
            cfg,
            history.into_iter().map(Arc::new).collect(),
        );
        *lock(&session.conversation_id) = Some(conversation_id);
        Ok(session)
    }

    fn with_messages(
        backend: Arc<dyn ChatBackend>,
        store: Option<Arc<dyn ConversationStore>>,
        cfg: &Config,
        messages: MessageList,
    ) -> Self {
        let (snapshot, _) = watch::channel(messages);
        let (notice_tx, notice_rx) = mpsc::unbounded_channel();
        Self {
            backend,
            store,
            memory: cfg.memory.clone(),
            idle_timeout: cfg.stream.idle_timeout(),
            state: Mutex::new(StreamState::Idle),
            conversation_id: Mutex::new(None),
            mood: Mutex::new(Mood::default()),
            snapshot,
            notice_tx,
            notice_rx: Mutex::new(Some(notice_rx)),
        }
    }

    /// Observe message-list snapshots. Each one is immutable.
    pub fn subscribe(&self) -> watch::Receiver<MessageList> {
        self.snapshot.subscribe()
    }

    pub fn messages(&self) -> MessageList {
        self.snapshot.borrow().clone()
    }

    pub fn state(&self) -> StreamState {
        *lock(&self.state)
    }

    pub fn mood(&self) -> Mood {
        *lock(&self.mood)
    }

    pub fn conversation_id(&self) -> Option<ConversationId> {
        *lock(&self.conversation_id)
    }

    /// Receiver of surfaced notices, one per failed stream. Only the first
    /// call gets it.
    pub fn take_notices(&self) -> Option<mpsc::UnboundedReceiver<Notice>> {
        lock(&self.notice_rx).take()
    }

    /// Send one user message and stream the reply into the message list.
    ///
    /// A surfaced failure rolls the list back to what it was before the call,
    /// pushes one [`Notice`] and is also returned as `Err`.
    pub async fn send(&self, text: &str) -> CoreResult<SendOutcome> {
        let text = clean_text(text);
        if text.is_empty() {
            return Ok(SendOutcome::Ignored);
        }
        let Some(_idle) = self.begin() else {
            tracing::debug!("send ignored: a stream is already in flight");
            return Ok(SendOutcome::Ignored);
        };

        let mood = detect_mood(&text);
        *lock(&self.mood) = mood;
        let user = Message::user(text);
        self.apply(ChatEvent::UserSent(user.clone()));
        let conversation_id = self.persist_user(&user).await;

        let request_id = Uuid::new_v4().to_string();
        let span = tracing::info_span!(
            "chat.stream",
            req.id = %request_id,
            chat.backend = self.backend.name(),
            chat.mood = mood.as_str(),
            chat.conversation_id = tracing::field::Empty,
            stream.deltas = tracing::field::Empty,
            stream.outcome = tracing::field::Empty,
            latency.ms = tracing::field::Empty,
            error.kind = tracing::field::Empty,
        );
        if let Some(id) = conversation_id {
            span.record(telemetry::KEY_CONVERSATION_ID, tracing::field::display(id));
        }

        let started = Instant::now();
        let mut acc = JsonAccumulator::new();
        let streamed = self
            .stream_reply(conversation_id, &request_id, &mut acc)
            .instrument(span.clone())
            .await;
        let latency_ms = started.elapsed().as_millis() as u64;
        span.record(telemetry::KEY_DELTAS, acc.deltas() as u64);
        span.record(telemetry::KEY_LATENCY_MS, latency_ms);

        let report = |outcome: StreamOutcome| {
            StreamReport::new(request_id.as_str(), self.backend.name(), outcome)
                .conversation_id_opt(conversation_id)
                .deltas(acc.deltas())
                .latency_ms(latency_ms)
        };

        if let Err(err) = streamed {
            self.set_state(StreamState::Errored);
            self.apply(ChatEvent::StreamFailed);
            span.record(telemetry::KEY_OUTCOME, StreamOutcome::Failed.as_str());
            span.record(telemetry::KEY_ERROR_KIND, err.kind());
            tracing::warn!(parent: &span, error = %err, "stream failed; send rolled back");
            // The receiver may be gone if the UI never asked for notices.
            let _ = self.notice_tx.send(err.notice());
            telemetry::emit(report(StreamOutcome::Failed).error(&err));
            return Err(err);
        }

        self.set_state(StreamState::Finalizing);
        self.apply(ChatEvent::StreamCompleted);
        let outcome = if acc.captured().is_some() {
            StreamOutcome::Structured
        } else {
            StreamOutcome::RawFallback
        };
        span.record(telemetry::KEY_OUTCOME, outcome.as_str());
        telemetry::emit(report(outcome));

        let reply = self
            .messages()
            .last()
            .cloned()
            .ok_or_else(|| ChatError::Other(anyhow::anyhow!("reply missing after completion")))?;
        self.persist_reply(conversation_id, &reply)
            .instrument(span)
            .await;
        Ok(SendOutcome::Completed(reply))
    }

    fn begin(&self) -> Option<IdleGuard<'_>> {
        let mut state = lock(&self.state);
        if *state != StreamState::Idle {
            return None;
        }
        *state = StreamState::Sending;
        Some(IdleGuard { session: self })
    }

    fn set_state(&self, next: StreamState) {
        *lock(&self.state) = next;
    }

    fn apply(&self, event: ChatEvent) {
        self.snapshot.send_modify(|list| *list = reduce(list, event));
    }

    async fn stream_reply(
        &self,
        conversation_id: Option<ConversationId>,
        request_id: &str,
        acc: &mut JsonAccumulator,
    ) -> CoreResult<()> {
        let request = self.build_request(conversation_id);
        tracing::debug!(turns = request.messages.len(), "opening stream");
        let body = self.backend.open_stream(&request, request_id).await?;
        self.set_state(StreamState::Streaming);

        let mut lines = SseLines::new(body);
        while let Some(line) = self.next_line(&mut lines).await? {
            match decode_line(&line) {
                SseEvent::ContentDelta(delta) => {
                    let progress = acc.push(&delta);
                    if matches!(progress, Progress::Complete(_)) {
                        tracing::debug!(deltas = acc.deltas(), "structured reply captured");
                    }
                    self.apply(ChatEvent::DeltaReceived(progress));
                }
                SseEvent::StreamEnd => break,
                SseEvent::NoEvent => {}
            }
        }
        if acc.is_empty() {
            return Err(ChatError::transport("stream ended without content"));
        }
        Ok(())
    }

    async fn next_line(&self, lines: &mut SseLines) -> CoreResult<Option<String>> {
        let next = match self.idle_timeout {
            Some(limit) => tokio::time::timeout(limit, lines.next())
                .await
                .map_err(|_| {
                    ChatError::transport(format!("no data received for {}ms", limit.as_millis()))
                })?,
            None => lines.next().await,
        };
        next.transpose()
    }

    fn build_request(&self, conversation_id: Option<ConversationId>) -> ChatRequest {
        let messages = self
            .snapshot
            .borrow()
            .iter()
            .filter(|m| !m.in_progress)
            .map(|m| ChatTurn {
                role: m.role,
                content: m.history_text(),
            })
            .collect();
        if self.memory.enabled {
            ChatRequest {
                messages,
                conversation_id,
                user_id: Some(self.memory.user_id.clone()),
            }
        } else {
            ChatRequest {
                messages,
                conversation_id: None,
                user_id: None,
            }
        }
    }

    /// Store the user message, creating the conversation on first use.
    /// Failures are logged and never undo what is displayed.
    async fn persist_user(&self, user: &Message) -> Option<ConversationId> {
        let store = self.store.as_ref()?;
        let id = match self.conversation_id() {
            Some(id) => id,
            None => {
                let title = conversation_title(&user.raw_content);
                match store.create_conversation(&self.memory.user_id, &title).await {
                    Ok(id) => {
                        *lock(&self.conversation_id) = Some(id);
                        id
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "could not create conversation");
                        return None;
                    }
                }
            }
        };
        if let Err(e) = store.append_message(id, user).await {
            tracing::warn!(error = %e, conversation_id = %id, "could not persist user message");
        }
        Some(id)
    }

    async fn persist_reply(&self, conversation_id: Option<ConversationId>, reply: &Message) {
        let (Some(store), Some(id)) = (self.store.as_ref(), conversation_id) else {
            return;
        };
        if let Err(e) = store.append_message(id, reply).await {
            tracing::warn!(error = %e, conversation_id = %id, "could not persist assistant reply");
        }
    }
}
