use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures::stream::BoxStream;
use futures_util::{Stream, StreamExt};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::config::HttpCfg;
use crate::error::{ChatError, CoreResult};
use crate::framer::LineFramer;

const ERROR_BODY_MAX: usize = 300;

/// Request context carries the per-send correlation id.
#[derive(Clone, Copy, Default)]
pub struct RequestCtx<'a> {
    pub request_id: Option<&'a str>,
}

/// Raw response body fragments as they come off the wire.
pub type ByteStream = BoxStream<'static, CoreResult<Bytes>>;

/// Thin wrapper around reqwest::Client with defaults and helpers.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: Client,
    user_agent: String,
}

impl HttpClient {
    pub fn new(cfg: &HttpCfg) -> CoreResult<Self> {
        // No total request timeout: a response body is open for as long as
        // the model keeps generating. Idle stalls are handled per fragment.
        let mut builder =
            Client::builder().connect_timeout(Duration::from_millis(cfg.connect_timeout_ms));
        if let Some(n) = cfg.pool_max_idle_per_host {
            builder = builder.pool_max_idle_per_host(n);
        }
        let inner = builder
            .build()
            .map_err(|e| ChatError::Other(anyhow::anyhow!("http client build failed: {e}")))?;
        Ok(Self {
            inner,
            user_agent: "streamchat/0.1".to_string(),
        })
    }

    pub fn new_default() -> CoreResult<Self> {
        Self::new(&HttpCfg::default())
    }

    /// POST JSON and return the response body as a byte stream once a 2xx
    /// status has been seen. Non-2xx statuses are mapped to typed errors
    /// before any body is handed out.
    pub async fn post_sse<T: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &T,
        headers: &[(&str, &str)],
        ctx: &RequestCtx<'_>,
    ) -> CoreResult<ByteStream> {
        let mut req = self
            .inner
            .post(url)
            .json(body)
            .header("User-Agent", &self.user_agent)
            .header("Accept", "text/event-stream");

        for (k, v) in headers {
            req = req.header(*k, *v);
        }
        if let Some(rid) = ctx.request_id {
            req = req.header("X-Request-Id", rid);
        }

        let resp = req.send().await.map_err(|e| {
            tracing::debug!(error = %e, "chat request failed before a response");
            ChatError::transport(format!("request failed: {e}"))
        })?;

        let status = resp.status();
        if !status.is_success() {
            let headers = resp.headers().clone();
            let ra = parse_retry_after(&headers);
            let body = resp.text().await.unwrap_or_default();
            return Err(map_http_error(status, ra, &body));
        }

        let stream = resp.bytes_stream().map(|chunk| {
            chunk.map_err(|e| ChatError::transport(format!("body read failed: {e}")))
        });
        Ok(stream.boxed())
    }
}

fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    if let Some(v) = headers.get("retry-after")
        && let Ok(s) = v.to_str()
        && let Ok(secs) = s.trim().parse::<u64>()
    {
        return Some(secs);
    }
    // HTTP-date forms are ignored.
    None
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// Prefer the `{"error": "..."}` message the backend sends; fall back to the
/// raw body, truncated.
fn error_message(body: &str) -> String {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(b) => truncate(&b.error, ERROR_BODY_MAX),
        Err(_) => truncate(body.trim(), ERROR_BODY_MAX),
    }
}

fn map_http_error(status: StatusCode, retry_after: Option<u64>, body: &str) -> ChatError {
    let message = error_message(body);
    match status {
        StatusCode::TOO_MANY_REQUESTS => ChatError::RateLimited {
            retry_after,
            message,
        },
        StatusCode::PAYMENT_REQUIRED => ChatError::QuotaExhausted { message },
        s => ChatError::Transport {
            status: Some(s.as_u16()),
            message,
        },
    }
}

fn truncate(s: &str, max: usize) -> String {
    crate::normalizer::truncate_chars(s, max)
}

/// Adapts a body byte stream into framed protocol lines.
///
/// Lines already buffered are yielded before the inner stream is polled
/// again. At end of input the trailing partial line is flushed once. A
/// transport error is yielded once and ends the stream.
pub struct SseLines {
    inner: ByteStream,
    framer: LineFramer,
    done: bool,
}

impl SseLines {
    pub fn new(inner: ByteStream) -> Self {
        Self {
            inner,
            framer: LineFramer::new(),
            done: false,
        }
    }
}

impl Stream for SseLines {
    type Item = CoreResult<String>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            if let Some(line) = self.framer.lines().next() {
                return Poll::Ready(Some(Ok(line)));
            }
            if self.done {
                return Poll::Ready(None);
            }

            match self.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    self.framer.feed(&chunk);
                    continue;
                }
                Poll::Ready(Some(Err(e))) => {
                    self.done = true;
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(None) => {
                    self.done = true;
                    if let Some(tail) = self.framer.finish() {
                        return Poll::Ready(Some(Ok(tail)));
                    }
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
