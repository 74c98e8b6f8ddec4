//! Request assembly and the typed event stream handed to the driver.

use std::pin::Pin;
use std::task::Context;
use std::task::Poll;

use futures::Stream;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::config::ReasoningEffort;
use crate::config::Verbosity;
use crate::error::Result;
use crate::models::Message;

/// Events within one model turn are delivered in the exact order produced by
/// the transport; queue capacity bounds how far the reader may run ahead of
/// the driver.
pub(crate) const MAX_EVENT_QUEUE: usize = 16;

/// One model turn's request, assembled by the driver from session state.
#[derive(Debug, Clone)]
pub struct ConversationRequest {
    pub model: String,
    pub input: Vec<Message>,
    /// Tool specs exactly as advertised by the registry.
    pub tools: Vec<serde_json::Value>,
    pub reasoning_effort: ReasoningEffort,
    pub verbosity: Option<Verbosity>,
}

/// Wire payload POSTed to `<base_url>/responses`.
#[derive(Debug, Serialize)]
struct RequestPayload<'a> {
    model: &'a str,
    input: &'a [Message],
    tools: &'a [serde_json::Value],
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning: Option<ReasoningParam>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    verbosity: Option<String>,
}

#[derive(Debug, Serialize)]
struct ReasoningParam {
    effort: String,
}

impl ConversationRequest {
    pub(crate) fn to_body(&self) -> Result<String> {
        let reasoning = match self.reasoning_effort {
            ReasoningEffort::None => None,
            effort => Some(ReasoningParam {
                effort: effort.to_string(),
            }),
        };
        let payload = RequestPayload {
            model: &self.model,
            input: &self.input,
            tools: &self.tools,
            reasoning,
            stream: true,
            verbosity: self.verbosity.map(|v| v.to_string()),
        };
        Ok(serde_json::to_string(&payload)?)
    }
}

/// Typed events decoded from the SSE stream. Transport and protocol failures
/// travel through the same channel as `Err` items so ordering is preserved.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelEvent {
    /// A chunk of assistant text for the output part at `index`.
    TextDelta { index: u32, text: String },
    /// The output part at `index` is complete.
    MessageDone { index: u32 },
    /// The model opened a tool call; argument deltas follow.
    ToolCallStart { call_id: String, name: String },
    /// Arguments fully buffered and known to be valid JSON.
    ToolCallReady {
        call_id: String,
        name: String,
        args_json: String,
    },
    /// The turn is complete.
    TurnDone,
}

pub struct ModelStream {
    pub(crate) rx_event: mpsc::Receiver<Result<ModelEvent>>,
}

impl std::fmt::Debug for ModelStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelStream").finish_non_exhaustive()
    }
}

impl Stream for ModelStream {
    type Item = Result<ModelEvent>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx_event.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn body_includes_reasoning_and_stream() {
        let request = ConversationRequest {
            model: "gpt-5".to_string(),
            input: vec![Message::user("hi")],
            tools: vec![],
            reasoning_effort: ReasoningEffort::High,
            verbosity: None,
        };
        let body: serde_json::Value =
            serde_json::from_str(&request.to_body().unwrap()).unwrap();
        assert_eq!(body["model"], "gpt-5");
        assert_eq!(body["stream"], true);
        assert_eq!(body["reasoning"]["effort"], "high");
        assert!(body.get("verbosity").is_none());
    }

    #[test]
    fn reasoning_none_is_omitted() {
        let request = ConversationRequest {
            model: "gpt-5".to_string(),
            input: vec![],
            tools: vec![],
            reasoning_effort: ReasoningEffort::None,
            verbosity: Some(Verbosity::High),
        };
        let body: serde_json::Value =
            serde_json::from_str(&request.to_body().unwrap()).unwrap();
        assert!(body.get("reasoning").is_none());
        assert_eq!(body["verbosity"], "high");
    }
}
