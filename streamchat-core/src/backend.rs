use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use crate::config::Config;
use crate::error::{ChatError, CoreResult};
use crate::http_client::{ByteStream, HttpClient, RequestCtx};
use crate::model::ChatRequest;

/// The language-model side of a chat: takes the conversation so far and
/// answers with a server-sent event body.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Resolves once the backend accepted the request (2xx). Errors that
    /// arrive with the status (rate limit, quota, others) are returned here,
    /// before any body fragment.
    async fn open_stream(&self, req: &ChatRequest, request_id: &str) -> CoreResult<ByteStream>;
}

/// Streaming chat endpoint reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    http: HttpClient,
    url: String,
    api_key: Option<SecretString>,
}

impl HttpBackend {
    pub fn new(http: HttpClient, url: String, api_key: Option<SecretString>) -> Self {
        Self { http, url, api_key }
    }

    /// Build from config, reading the API key from the configured env var.
    pub fn from_config(cfg: &Config) -> CoreResult<Self> {
        let http = HttpClient::new(&cfg.http)?;
        let api_key = match &cfg.backend.api_key_env {
            Some(var) => {
                let key = std::env::var(var).map_err(|_| {
                    ChatError::Validation(format!("environment variable {var} is not set"))
                })?;
                Some(SecretString::from(key))
            }
            None => None,
        };
        Ok(Self::new(http, cfg.backend.url.clone(), api_key))
    }

    #[cfg(test)]
    pub fn new_for_tests(url: &str) -> Self {
        HttpBackend::new(
            HttpClient::new_default().unwrap(),
            url.to_string(),
            Some(SecretString::from("test-key".to_string())),
        )
    }

    fn headers(&self) -> Vec<(String, String)> {
        let mut h = Vec::new();
        if let Some(key) = &self.api_key {
            h.push((
                "Authorization".to_string(),
                format!("Bearer {}", key.expose_secret()),
            ));
        }
        h
    }
}

#[async_trait]
impl ChatBackend for HttpBackend {
    fn name(&self) -> &str {
        "http"
    }

    async fn open_stream(&self, req: &ChatRequest, request_id: &str) -> CoreResult<ByteStream> {
        let owned_headers = self.headers();
        let hdrs: Vec<(&str, &str)> = owned_headers
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        let ctx = RequestCtx {
            request_id: Some(request_id),
        };
        self.http.post_sse(&self.url, req, &hdrs, &ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ChatTurn, Role};
    use futures_util::StreamExt;
    use httpmock::Method::POST;
    use httpmock::MockServer;
    use serde_json::json;
    use uuid::Uuid;

    fn request(conversation_id: Option<Uuid>) -> ChatRequest {
        ChatRequest {
            messages: vec![
                ChatTurn {
                    role: Role::Assistant,
                    content: "What moves within you?".into(),
                },
                ChatTurn {
                    role: Role::User,
                    content: "a restless river".into(),
                },
            ],
            conversation_id,
            user_id: conversation_id.map(|_| "u1".to_string()),
        }
    }

    #[tokio::test]
    async fn posts_history_with_bearer_key() {
        let server = MockServer::start();
        let id = Uuid::new_v4();
        let m = server.mock(|when, then| {
            when.method(POST)
                .path("/functions/v1/chat")
                .header("authorization", "Bearer test-key")
                .json_body(json!({
                    "messages": [
                        {"role": "assistant", "content": "What moves within you?"},
                        {"role": "user", "content": "a restless river"}
                    ],
                    "conversationId": id.to_string(),
                    "userId": "u1"
                }));
            then.status(200).body("data: [DONE]\n");
        });
        let backend = HttpBackend::new_for_tests(&format!("{}/functions/v1/chat", server.base_url()));
        let mut body = backend.open_stream(&request(Some(id)), "req-1").await.unwrap();
        let mut raw = Vec::new();
        while let Some(chunk) = body.next().await {
            raw.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(raw, b"data: [DONE]\n");
        m.assert();
    }

    #[tokio::test]
    async fn missing_key_env_is_a_validation_error() {
        let mut cfg = Config::default();
        cfg.backend.api_key_env = Some("STREAMCHAT_TEST_KEY_THAT_IS_NEVER_SET".into());
        let err = HttpBackend::from_config(&cfg).unwrap_err();
        assert!(matches!(err, ChatError::Validation(_)));
    }

    #[tokio::test]
    async fn no_key_configured_sends_no_authorization() {
        let backend = HttpBackend::from_config(&Config::default()).unwrap();
        assert!(backend.headers().iter().all(|(k, _)| k != "Authorization"));
    }
}
