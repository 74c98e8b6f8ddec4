//! Streaming model client: transport contract, HTTP + mock implementations,
//! SSE decoding with buffered tool-call argument assembly, bounded-queue
//! back-pressure, and transport-level retry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use futures::future::BoxFuture;
use futures::prelude::*;
use futures::stream::BoxStream;
use reqwest::StatusCode;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::debug;
use tracing::trace;
use tracing::warn;

use crate::client_common::ConversationRequest;
use crate::client_common::MAX_EVENT_QUEUE;
use crate::client_common::ModelEvent;
use crate::client_common::ModelStream;
use crate::config::ResolvedConfig;
use crate::error::LinconaErr;
use crate::error::Result;
use crate::util::backoff;

/// A per-call-id argument buffer may not exceed this.
const MAX_TOOL_ARG_BYTES: usize = 1024 * 1024;
/// Total attempts per request, the first one included.
const MAX_ATTEMPTS: u64 = 4;

pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// What one transport send produced. HTTP-level failures are data, not
/// errors, so the retry loop can inspect status and `Retry-After`.
pub enum TransportReply {
    Stream(ByteStream),
    HttpError {
        status: u16,
        retry_after: Option<u64>,
        body: String,
    },
}

/// Contract between the client and whatever carries bytes: POST one request
/// body, get back an event-stream of bytes.
pub trait Transport: Send + Sync {
    fn send(&self, body: String) -> BoxFuture<'static, Result<TransportReply>>;
}

/// Production transport: POST `<base_url>/responses` with bearer auth.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    request_timeout: Duration,
}

impl HttpTransport {
    pub fn new(config: &ResolvedConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            request_timeout: config.request_timeout,
        }
    }
}

impl Transport for HttpTransport {
    fn send(&self, body: String) -> BoxFuture<'static, Result<TransportReply>> {
        let client = self.client.clone();
        let url = format!("{}/responses", self.base_url);
        let api_key = self.api_key.clone();
        let request_timeout = self.request_timeout;
        async move {
            debug!(url, "POST");
            let send = client
                .post(&url)
                .bearer_auth(api_key)
                .header(reqwest::header::ACCEPT, "text/event-stream")
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body)
                .send();
            // The timeout covers the handshake only; stream idleness is
            // policed separately so long turns are not cut off.
            let response = match timeout(request_timeout, send).await {
                Ok(Ok(response)) => response,
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => return Err(LinconaErr::Timeout(request_timeout)),
            };
            if response.status().is_success() {
                let stream = response.bytes_stream().map_err(LinconaErr::Reqwest).boxed();
                return Ok(TransportReply::Stream(stream));
            }
            let status = response.status().as_u16();
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok());
            // Error bodies are structured JSON; surface them so the user sees
            // the endpoint's message rather than a bare status code.
            let body = response.text().await.unwrap_or_default();
            Ok(TransportReply::HttpError {
                status,
                retry_after,
                body,
            })
        }
        .boxed()
    }
}

/// Test transport: replays a fixed list of pre-recorded chunks.
#[derive(Clone, Default)]
pub struct MockTransport {
    chunks: Vec<Bytes>,
}

impl MockTransport {
    pub fn new(chunks: impl IntoIterator<Item = impl Into<Bytes>>) -> Self {
        Self {
            chunks: chunks.into_iter().map(Into::into).collect(),
        }
    }

    /// Convenience: one `data:` frame per payload plus the `[DONE]` frame.
    pub fn from_payloads(payloads: &[&str]) -> Self {
        let mut chunks: Vec<Bytes> = payloads
            .iter()
            .map(|p| Bytes::from(format!("data: {p}\n\n")))
            .collect();
        chunks.push(Bytes::from_static(b"data: [DONE]\n\n"));
        Self { chunks }
    }
}

impl Transport for MockTransport {
    fn send(&self, _body: String) -> BoxFuture<'static, Result<TransportReply>> {
        let chunks = self.chunks.clone();
        async move {
            let stream = futures::stream::iter(chunks.into_iter().map(Ok)).boxed();
            Ok(TransportReply::Stream(stream))
        }
        .boxed()
    }
}

#[derive(Clone)]
pub struct ModelClient {
    transport: Arc<dyn Transport>,
    /// Idle cap for an open stream; also the per-attempt handshake cap.
    idle_timeout: Duration,
}

impl ModelClient {
    pub fn new(config: &ResolvedConfig) -> Self {
        Self {
            transport: Arc::new(HttpTransport::new(config)),
            idle_timeout: config.request_timeout,
        }
    }

    pub fn with_transport(transport: Arc<dyn Transport>, idle_timeout: Duration) -> Self {
        Self {
            transport,
            idle_timeout,
        }
    }

    /// Send the request and return the decoded event stream. Retries 429/5xx
    /// and connection failures with jittered exponential backoff, honouring
    /// `Retry-After`. Retrying happens strictly before the handshake
    /// succeeds, so no event is ever emitted twice.
    pub async fn stream(&self, request: &ConversationRequest) -> Result<ModelStream> {
        let body = request.to_body()?;
        let mut attempt = 0u64;
        loop {
            attempt += 1;
            match self.transport.send(body.clone()).await {
                Ok(TransportReply::Stream(stream)) => {
                    let (tx_event, rx_event) = mpsc::channel::<Result<ModelEvent>>(MAX_EVENT_QUEUE);
                    tokio::spawn(process_sse(stream, tx_event, self.idle_timeout));
                    return Ok(ModelStream { rx_event });
                }
                Ok(TransportReply::HttpError {
                    status,
                    retry_after,
                    body,
                }) => {
                    let retryable = status == 429 || (500..600).contains(&status);
                    if !retryable {
                        // 401 and other 4xx are never retried.
                        return Err(LinconaErr::TransportFatal(format!(
                            "unexpected status {status}: {body}"
                        )));
                    }
                    if attempt >= MAX_ATTEMPTS {
                        return Err(LinconaErr::RetryLimit(
                            StatusCode::from_u16(status)
                                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
                        ));
                    }
                    let delay = retry_after
                        .map(Duration::from_secs)
                        .unwrap_or_else(|| backoff(attempt))
                        .min(Duration::from_secs(30));
                    warn!(status, attempt, "retrying after {delay:?}");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    if attempt >= MAX_ATTEMPTS {
                        return Err(LinconaErr::TransportFatal(format!(
                            "connection failed after {attempt} attempts: {e}"
                        )));
                    }
                    let delay = backoff(attempt);
                    warn!(attempt, "connection failed ({e}), retrying after {delay:?}");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct SsePayload {
    #[serde(rename = "type")]
    kind: String,
    index: Option<u32>,
    text: Option<String>,
    call_id: Option<String>,
    name: Option<String>,
    delta: Option<String>,
    message: Option<String>,
}

/// Decode SSE frames into [`ModelEvent`]s. The bounded channel provides the
/// back-pressure: when the driver falls behind, `send` suspends and the
/// transport stops being polled. An error item is always enqueued before the
/// channel closes.
async fn process_sse<S>(stream: S, tx_event: mpsc::Sender<Result<ModelEvent>>, idle: Duration)
where
    S: Stream<Item = Result<Bytes>> + Unpin,
{
    let mut frames = stream.eventsource();
    // call_id -> (tool name, buffered argument JSON)
    let mut arg_buffers: HashMap<String, (String, String)> = HashMap::new();
    let mut turn_done = false;

    loop {
        let frame = match timeout(idle, frames.next()).await {
            Ok(Some(Ok(frame))) => frame,
            Ok(Some(Err(e))) => {
                let _ = tx_event.send(Err(LinconaErr::Stream(e.to_string()))).await;
                return;
            }
            Ok(None) => {
                if !turn_done {
                    let _ = tx_event.send(Ok(ModelEvent::TurnDone)).await;
                }
                return;
            }
            Err(_) => {
                let _ = tx_event
                    .send(Err(LinconaErr::Stream("idle timeout waiting for SSE".into())))
                    .await;
                return;
            }
        };

        if frame.data == "[DONE]" {
            if !turn_done {
                let _ = tx_event.send(Ok(ModelEvent::TurnDone)).await;
            }
            return;
        }

        let payload: SsePayload = match serde_json::from_str(&frame.data) {
            Ok(payload) => payload,
            Err(e) => {
                let _ = tx_event
                    .send(Err(LinconaErr::Parse(format!("malformed SSE payload: {e}"))))
                    .await;
                return;
            }
        };
        trace!(kind = payload.kind, "sse event");

        let event = match payload.kind.as_str() {
            "response.output_text.delta" => {
                let (Some(index), Some(text)) = (payload.index, payload.text) else {
                    let _ = tx_event
                        .send(Err(LinconaErr::Parse(
                            "output_text.delta missing index or text".into(),
                        )))
                        .await;
                    return;
                };
                Some(ModelEvent::TextDelta { index, text })
            }
            "response.output_text.done" => {
                let Some(index) = payload.index else {
                    let _ = tx_event
                        .send(Err(LinconaErr::Parse("output_text.done missing index".into())))
                        .await;
                    return;
                };
                Some(ModelEvent::MessageDone { index })
            }
            "response.tool_call.created" => {
                let (Some(call_id), Some(name)) = (payload.call_id, payload.name) else {
                    let _ = tx_event
                        .send(Err(LinconaErr::Parse(
                            "tool_call.created missing call_id or name".into(),
                        )))
                        .await;
                    return;
                };
                arg_buffers.insert(call_id.clone(), (name.clone(), String::new()));
                Some(ModelEvent::ToolCallStart { call_id, name })
            }
            "response.tool_call.arguments.delta" => {
                let (Some(call_id), Some(delta)) = (payload.call_id, payload.delta) else {
                    let _ = tx_event
                        .send(Err(LinconaErr::Parse(
                            "tool_call.arguments.delta missing call_id or delta".into(),
                        )))
                        .await;
                    return;
                };
                let Some((_, buffer)) = arg_buffers.get_mut(&call_id) else {
                    let _ = tx_event
                        .send(Err(LinconaErr::Parse(format!(
                            "argument delta for unknown call {call_id}"
                        ))))
                        .await;
                    return;
                };
                if buffer.len() + delta.len() > MAX_TOOL_ARG_BYTES {
                    let _ = tx_event
                        .send(Err(LinconaErr::Parse(format!(
                            "tool call {call_id}: argument buffer exceeded 1 MiB"
                        ))))
                        .await;
                    return;
                }
                buffer.push_str(&delta);
                None
            }
            "response.tool_call.done" => {
                let Some(call_id) = payload.call_id else {
                    let _ = tx_event
                        .send(Err(LinconaErr::Parse("tool_call.done missing call_id".into())))
                        .await;
                    return;
                };
                let (name, buffered) = match arg_buffers.remove(&call_id) {
                    Some(entry) => entry,
                    None => (payload.name.unwrap_or_default(), String::new()),
                };
                let args_json = if buffered.is_empty() {
                    "{}".to_string()
                } else {
                    buffered
                };
                if let Err(e) = serde_json::from_str::<serde_json::Value>(&args_json) {
                    let _ = tx_event
                        .send(Err(LinconaErr::Parse(format!(
                            "tool call {call_id}: arguments are not valid JSON: {e}"
                        ))))
                        .await;
                    return;
                }
                Some(ModelEvent::ToolCallReady {
                    call_id,
                    name,
                    args_json,
                })
            }
            "response.error" => {
                let message = payload.message.unwrap_or_else(|| "unknown error".to_string());
                let _ = tx_event.send(Err(LinconaErr::TransportFatal(message))).await;
                return;
            }
            "response.completed" => {
                turn_done = true;
                Some(ModelEvent::TurnDone)
            }
            other => {
                debug!(other, "ignoring unhandled sse event");
                None
            }
        };

        if let Some(event) = event
            && tx_event.send(Ok(event)).await.is_err()
        {
            // Receiver dropped; stop pulling from the transport.
            return;
        }
    }
}
