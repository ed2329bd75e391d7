pub mod accumulator;
pub mod backend;
pub mod config;
pub mod error;
pub mod framer;
pub mod http_client;
pub mod model;
pub mod mood;
pub mod normalizer;
pub mod projector;
pub mod session;
pub mod sse;
pub mod store;
pub mod telemetry;
#[cfg(test)]
pub mod test_util;

pub use backend::{ChatBackend, HttpBackend};
pub use config::Config;
pub use error::{ChatError, CoreResult, Notice, NoticeKind};
pub use session::{ChatSession, SendOutcome, StreamState};
pub use store::{ConversationStore, FileStore, MemoryStore};
