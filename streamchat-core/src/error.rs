use thiserror::Error;

/// Core error type for streamchat.
/// Internally, modules can use `anyhow::Result<T>` for convenience,
/// but public boundaries should expose `CoreResult<T>` with this error.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("rate limited by backend: {message}")]
    RateLimited {
        retry_after: Option<u64>,
        message: String,
    },

    #[error("backend quota exhausted: {message}")]
    QuotaExhausted { message: String },

    #[error("transport failure{}: {message}", status_suffix(.status))]
    Transport {
        status: Option<u16>,
        message: String,
    },

    #[error("conversation store error: {0}")]
    Store(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" ({s})")).unwrap_or_default()
}

pub type CoreResult<T> = std::result::Result<T, ChatError>;

/// Category of a user-visible notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    RateLimited,
    QuotaExhausted,
    Failure,
}

/// A toast-style message the UI shows once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub kind: NoticeKind,
    pub text: String,
}

impl ChatError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            status: None,
            message: message.into(),
        }
    }

    /// Short stable name used in logs and stream reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::RateLimited { .. } => "rate_limited",
            Self::QuotaExhausted { .. } => "quota_exhausted",
            Self::Transport { .. } => "transport",
            Self::Store(_) => "store",
            Self::Io(_) => "io",
            Self::Other(_) => "other",
        }
    }

    /// Map an error that aborted a stream to the notice the user sees.
    /// Everything that is not rate limiting or quota collapses into one
    /// generic retry message.
    pub fn notice(&self) -> Notice {
        match self {
            Self::RateLimited { retry_after, .. } => Notice {
                kind: NoticeKind::RateLimited,
                text: match retry_after {
                    Some(secs) => format!("Rate limit exceeded. Wait {secs}s, then try again."),
                    None => "Rate limit exceeded. Wait a moment, then try again.".to_string(),
                },
            },
            Self::QuotaExhausted { .. } => Notice {
                kind: NoticeKind::QuotaExhausted,
                text: "Backend credits are exhausted. Top up your usage quota to continue."
                    .to_string(),
            },
            _ => Notice {
                kind: NoticeKind::Failure,
                text: "The connection wavered. Try again.".to_string(),
            },
        }
    }
}
