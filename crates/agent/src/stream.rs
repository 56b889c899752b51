//! Agent-level streaming events.
//!
//! A streaming run is a producer task feeding a bounded channel. The
//! producer side is an `EventSink`: it numbers events, races each send
//! against cancellation, and sends exactly one terminal event. The consumer
//! side is an [`EventStream`], which implements [`futures::Stream`] and stops
//! surfacing buffered progress once the run is cancelled.

use std::pin::Pin;
use std::task::{Context, Poll};

use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use taskloom_core::{Error, Result, RunContext, ToolCall};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::AgentResponse;

/// The kind of a [`StreamEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamEventKind {
    /// Partial text from the model.
    Token,
    /// A reasoning step's thought (ReAct only).
    Thought,
    /// A tool call is about to run.
    ToolStart,
    /// A tool call settled.
    ToolEnd,
    /// The final answer (ReAct only).
    Answer,
    /// The run finished successfully. Terminal.
    Complete,
    /// The run failed or was cancelled. Terminal.
    Error,
}

impl StreamEventKind {
    /// Whether this kind ends the stream.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Error)
    }

    /// Wire name, as used in SSE `event:` lines.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Token => "token",
            Self::Thought => "thought",
            Self::ToolStart => "tool_start",
            Self::ToolEnd => "tool_end",
            Self::Answer => "answer",
            Self::Complete => "complete",
            Self::Error => "error",
        }
    }
}

/// One event of a streaming run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    #[serde(rename = "type")]
    pub kind: StreamEventKind,

    /// Text payload (token text, thought, answer, or error message)
    #[serde(default)]
    pub content: String,

    /// Position in the stream, starting at 0
    pub index: u64,

    pub timestamp: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl StreamEvent {
    /// SSE event name for this event.
    pub fn event_type(&self) -> &'static str {
        self.kind.as_str()
    }

    pub fn is_terminal(&self) -> bool {
        self.kind.is_terminal()
    }
}

/// Create a connected sink/stream pair for one run.
pub(crate) fn channel(ctx: &RunContext, buffer: usize) -> (EventSink, EventStream) {
    let (tx, rx) = mpsc::channel(buffer.max(1));
    let sink = EventSink {
        tx: Some(tx),
        cancel: ctx.cancel_token().clone(),
        next_index: 0,
    };
    let stream = EventStream {
        rx,
        cancel: ctx.cancel_token().clone(),
        done: false,
    };
    (sink, stream)
}

/// Producer side of a streaming run.
///
/// A disabled sink (used by non-streaming runs) drops every event, so the
/// engines can emit unconditionally.
#[derive(Debug)]
pub(crate) struct EventSink {
    tx: Option<mpsc::Sender<StreamEvent>>,
    cancel: CancellationToken,
    next_index: u64,
}

impl EventSink {
    /// A sink that discards everything.
    pub(crate) fn disabled() -> Self {
        Self {
            tx: None,
            cancel: CancellationToken::new(),
            next_index: 0,
        }
    }

    /// Whether a consumer is attached. Engines use this to pick
    /// `chat_stream` over `chat`.
    pub(crate) fn is_live(&self) -> bool {
        self.tx.is_some()
    }

    fn next_event(&mut self, kind: StreamEventKind, content: String, metadata: Map<String, Value>) -> StreamEvent {
        let index = self.next_index;
        self.next_index += 1;
        StreamEvent {
            kind,
            content,
            index,
            timestamp: Utc::now(),
            metadata,
        }
    }

    /// Send a non-terminal event. Dropped once the run is cancelled or the
    /// consumer has gone away.
    pub(crate) async fn emit(&mut self, kind: StreamEventKind, content: impl Into<String>, metadata: Map<String, Value>) {
        debug_assert!(!kind.is_terminal(), "terminal events go through finish()");
        if self.tx.is_none() || self.cancel.is_cancelled() {
            return;
        }
        let event = self.next_event(kind, content.into(), metadata);
        let Some(tx) = &self.tx else { return };
        let delivered = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            sent = tx.send(event) => sent.is_ok(),
        };
        if !delivered {
            debug!(kind = kind.as_str(), "Stream consumer gone or run cancelled, dropping event");
        }
    }

    pub(crate) async fn token(&mut self, text: &str) {
        if !text.is_empty() {
            self.emit(StreamEventKind::Token, text, Map::new()).await;
        }
    }

    pub(crate) async fn thought(&mut self, thought: &str) {
        if !thought.trim().is_empty() {
            self.emit(StreamEventKind::Thought, thought, Map::new()).await;
        }
    }

    pub(crate) async fn answer(&mut self, answer: &str) {
        self.emit(StreamEventKind::Answer, answer, Map::new()).await;
    }

    pub(crate) async fn tool_start(&mut self, call: &ToolCall) {
        let mut metadata = Map::new();
        metadata.insert("tool_call_id".into(), json!(call.id));
        metadata.insert("tool".into(), json!(call.name));
        metadata.insert("args".into(), Value::Object(call.args.clone()));
        self.emit(StreamEventKind::ToolStart, call.name.clone(), metadata).await;
    }

    pub(crate) async fn tool_end(&mut self, call: &ToolCall) {
        let mut metadata = Map::new();
        metadata.insert("tool_call_id".into(), json!(call.id));
        metadata.insert("tool".into(), json!(call.name));
        metadata.insert("success".into(), json!(!call.failed()));
        self.emit(StreamEventKind::ToolEnd, call.render_outcome(), metadata).await;
    }

    /// Send the single terminal event for `outcome` and close the sink.
    ///
    /// Consuming `self` makes a second terminal event impossible.
    pub(crate) async fn finish(mut self, outcome: &Result<AgentResponse>) {
        let Some(tx) = self.tx.take() else { return };
        let event = match outcome {
            Ok(response) => {
                let mut metadata = Map::new();
                metadata.insert("iterations".into(), json!(response.iterations));
                metadata.insert("tool_calls_made".into(), json!(response.tool_calls_made));
                metadata.insert(
                    "max_iterations_exceeded".into(),
                    json!(response.max_iterations_exceeded),
                );
                metadata.insert("usage".into(), json!(response.usage));
                self.next_event(StreamEventKind::Complete, response.content.clone(), metadata)
            }
            Err(error) => {
                let mut metadata = Map::new();
                metadata.insert("phase".into(), json!(error.phase().as_str()));
                metadata.insert("reason".into(), json!(failure_reason(error)));
                self.next_event(StreamEventKind::Error, error.to_string(), metadata)
            }
        };
        if tx.send(event).await.is_err() {
            debug!("Stream consumer dropped before the terminal event");
        }
    }
}

fn failure_reason(error: &Error) -> &'static str {
    match error {
        Error::Cancelled => "cancelled",
        Error::DeadlineExceeded => "deadline_exceeded",
        _ => "failed",
    }
}

/// Consumer side of a streaming run.
///
/// Yields events in index order and ends after the terminal event. Once the
/// run's context is cancelled, buffered non-terminal events are discarded so
/// the next thing the caller sees is the terminal `error` event.
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::Receiver<StreamEvent>,
    cancel: CancellationToken,
    done: bool,
}

impl EventStream {
    /// Receive the next event, or `None` once the stream has ended.
    pub async fn recv(&mut self) -> Option<StreamEvent> {
        std::future::poll_fn(|cx| self.poll_event(cx)).await
    }

    /// Drain the stream into a vector.
    pub async fn collect_all(mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.recv().await {
            events.push(event);
        }
        events
    }

    fn poll_event(&mut self, cx: &mut Context<'_>) -> Poll<Option<StreamEvent>> {
        loop {
            if self.done {
                return Poll::Ready(None);
            }
            match self.rx.poll_recv(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(None) => {
                    self.done = true;
                    return Poll::Ready(None);
                }
                Poll::Ready(Some(event)) if event.is_terminal() => {
                    self.done = true;
                    return Poll::Ready(Some(event));
                }
                Poll::Ready(Some(_)) if self.cancel.is_cancelled() => continue,
                Poll::Ready(Some(event)) => return Poll::Ready(Some(event)),
            }
        }
    }
}

impl Stream for EventStream {
    type Item = StreamEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().poll_event(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use taskloom_core::Usage;

    fn response(content: &str) -> AgentResponse {
        AgentResponse {
            content: content.into(),
            iterations: 1,
            tool_calls_made: 0,
            tool_calls: vec![],
            max_iterations_exceeded: false,
            usage: Usage::new(3, 2),
        }
    }

    #[test]
    fn event_serialization_uses_snake_case_type() {
        let event = StreamEvent {
            kind: StreamEventKind::ToolStart,
            content: "multiply".into(),
            index: 3,
            timestamp: Utc::now(),
            metadata: Map::new(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"tool_start""#));
        assert!(json.contains(r#""index":3"#));
        assert!(!json.contains("metadata"));
        assert_eq!(event.event_type(), "tool_start");
    }

    #[test]
    fn terminal_kinds() {
        assert!(StreamEventKind::Complete.is_terminal());
        assert!(StreamEventKind::Error.is_terminal());
        assert!(!StreamEventKind::Answer.is_terminal());
    }

    #[tokio::test]
    async fn events_are_numbered_and_terminated_once() {
        let ctx = RunContext::new();
        let (mut sink, stream) = channel(&ctx, 8);
        sink.token("Hel").await;
        sink.token("lo").await;
        sink.finish(&Ok(response("Hello"))).await;

        let events: Vec<_> = stream.collect().await;
        assert_eq!(events.len(), 3);
        assert_eq!(
            events.iter().map(|e| e.index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert_eq!(events[2].kind, StreamEventKind::Complete);
        assert_eq!(events[2].content, "Hello");
        assert_eq!(events[2].metadata["iterations"], json!(1));
    }

    #[tokio::test]
    async fn cancellation_discards_buffered_progress() {
        let ctx = RunContext::new();
        let (mut sink, mut stream) = channel(&ctx, 8);
        sink.token("a").await;
        sink.token("b").await;
        ctx.cancel();
        sink.token("c").await;
        sink.finish(&Err(Error::Cancelled)).await;

        let first = stream.recv().await.unwrap();
        assert_eq!(first.kind, StreamEventKind::Error);
        assert_eq!(first.metadata["reason"], json!("cancelled"));
        assert_eq!(first.metadata["phase"], json!("caller"));
        assert!(stream.recv().await.is_none());
    }

    #[tokio::test]
    async fn disabled_sink_is_silent() {
        let mut sink = EventSink::disabled();
        assert!(!sink.is_live());
        sink.token("ignored").await;
        sink.finish(&Ok(response("done"))).await;
    }

    #[tokio::test]
    async fn dropped_sink_ends_stream() {
        let ctx = RunContext::new();
        let (sink, mut stream) = channel(&ctx, 1);
        drop(sink);
        assert!(stream.recv().await.is_none());
    }
}
