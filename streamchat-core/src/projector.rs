//! Pure reducer from (message list, chat event) to the next message list.
//!
//! Lists are never edited in place. Each call returns a new `Vec` whose
//! untouched entries share their `Arc` with the previous list, so a consumer
//! can tell what changed with `Arc::ptr_eq`.

use std::sync::Arc;

use crate::accumulator::Progress;
use crate::model::{Message, Role};

pub type MessageList = Vec<Arc<Message>>;

#[derive(Debug, Clone)]
pub enum ChatEvent {
    UserSent(Message),
    DeltaReceived(Progress),
    StreamCompleted,
    StreamFailed,
}

pub fn reduce(prev: &[Arc<Message>], event: ChatEvent) -> MessageList {
    match event {
        ChatEvent::UserSent(msg) => {
            let mut next = prev.to_vec();
            next.push(Arc::new(msg));
            next
        }
        ChatEvent::DeltaReceived(progress) => project(prev, progress),
        ChatEvent::StreamCompleted => {
            let mut next = prev.to_vec();
            if let Some(last) = next.last_mut().filter(|m| m.is_placeholder()) {
                let mut done = (**last).clone();
                done.in_progress = false;
                *last = Arc::new(done);
            }
            next
        }
        ChatEvent::StreamFailed => {
            let mut next = prev.to_vec();
            if next.last().is_some_and(|m| m.is_placeholder()) {
                next.pop();
            }
            if next.last().is_some_and(|m| m.role == Role::User) {
                next.pop();
            }
            next
        }
    }
}

/// Replace the trailing placeholder (or append one) to reflect `progress`.
pub fn project(prev: &[Arc<Message>], progress: Progress) -> MessageList {
    let placeholder = prev.last().filter(|m| m.is_placeholder());
    if matches!(progress, Progress::Settled) && placeholder.is_some() {
        return prev.to_vec();
    }
    let (base, current) = match placeholder {
        Some(last) => (&prev[..prev.len() - 1], (**last).clone()),
        None => (prev, Message::placeholder()),
    };
    let updated = match progress {
        Progress::Incomplete(raw) => Message {
            raw_content: raw,
            ..current
        },
        Progress::Complete(payload) => Message {
            raw_content: String::new(),
            payload: Some(payload),
            ..current
        },
        Progress::Settled => current,
    };
    let mut next = base.to_vec();
    next.push(Arc::new(updated));
    next
}
