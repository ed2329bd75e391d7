use std::{fs, path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::error::{ChatError, CoreResult};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct BackendCfg {
    /// Full URL of the streaming chat endpoint.
    pub url: String,
    /// Name of the environment variable that contains the API key (optional).
    #[serde(default)]
    pub api_key_env: Option<String>,
}

impl Default for BackendCfg {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:54321/functions/v1/chat".to_string(),
            api_key_env: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct HttpCfg {
    /// Connect timeout; there is no total request timeout.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Idle keep-alive connections kept per host. Unset leaves reqwest's default.
    #[serde(default)]
    pub pool_max_idle_per_host: Option<usize>,
}

impl Default for HttpCfg {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            pool_max_idle_per_host: None,
        }
    }
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct StreamCfg {
    /// Longest wait for the next body fragment. Unset waits indefinitely.
    #[serde(default)]
    pub idle_timeout_ms: Option<u64>,
}

impl StreamCfg {
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct StoreCfg {
    /// Directory for conversation documents. Missing → in-memory store.
    #[serde(default)]
    pub dir: Option<String>,
}

fn default_owner() -> String {
    "local".to_string()
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct MemoryCfg {
    /// Send conversation and user ids so the backend can recall history.
    #[serde(default)]
    pub enabled: bool,
    /// Owner of created conversations; also the `userId` sent when enabled.
    #[serde(default = "default_owner")]
    pub user_id: String,
}

impl Default for MemoryCfg {
    fn default() -> Self {
        Self {
            enabled: false,
            user_id: default_owner(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct SessionCfg {
    /// Assistant greeting shown at the top of a fresh conversation.
    #[serde(default)]
    pub greeting: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct Config {
    #[serde(default)]
    pub backend: BackendCfg,
    #[serde(default)]
    pub http: HttpCfg,
    #[serde(default)]
    pub stream: StreamCfg,
    #[serde(default)]
    pub store: StoreCfg,
    #[serde(default)]
    pub memory: MemoryCfg,
    #[serde(default)]
    pub session: SessionCfg,
}

fn parse_error(e: impl Into<anyhow::Error>) -> ChatError {
    ChatError::Other(e.into())
}

impl Config {
    /// Read a config file. `.json` and `.toml` pick the format; any other
    /// extension is tried as JSON and then as TOML.
    pub fn from_path<P: AsRef<Path>>(path: P) -> CoreResult<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path)?;
        let text = std::str::from_utf8(&bytes).map_err(parse_error)?;
        let cfg: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(text).map_err(parse_error)?,
            Some("toml") => toml::from_str(text).map_err(parse_error)?,
            _ => match serde_json::from_str(text) {
                Ok(cfg) => cfg,
                Err(_) => toml::from_str(text).map_err(parse_error)?,
            },
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> CoreResult<()> {
        let url = &self.backend.url;
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ChatError::Validation(format!(
                "backend url '{url}' must be an http:// or https:// URL"
            )));
        }
        if self.stream.idle_timeout_ms == Some(0) {
            return Err(ChatError::Validation(
                "stream.idle_timeout_ms must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}
