//! Shared test helpers for engine tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use taskloom_core::{
    BoxError, ChatRequest, ChatResponse, DeltaReceiver, FinishReason, LanguageModel, ModelError,
    ParamType, Parameter, RunContext, StreamDelta, Tool, ToolArgs, ToolCall, ToolSchema, Usage,
};
use tokio::sync::mpsc;

/// A model that replays scripted responses in order.
///
/// Once the script runs out every call fails with `InvalidResponse`.
pub struct ScriptedModel {
    script: Mutex<VecDeque<Result<ChatResponse, ModelError>>>,
    requests: Mutex<Vec<ChatRequest>>,
    calls: AtomicUsize,
    chunk_size: Option<usize>,
}

impl ScriptedModel {
    pub fn new(responses: Vec<ChatResponse>) -> Self {
        Self::from_results(responses.into_iter().map(Ok).collect())
    }

    pub fn from_results(results: Vec<Result<ChatResponse, ModelError>>) -> Self {
        Self {
            script: Mutex::new(results.into()),
            requests: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            chunk_size: None,
        }
    }

    /// A model whose only response is a network failure.
    pub fn failing() -> Self {
        Self::from_results(vec![Err(ModelError::Network("connection reset".into()))])
    }

    /// Stream text responses in chunks of `size` characters.
    pub fn chunked(mut self, size: usize) -> Self {
        self.chunk_size = Some(size.max(1));
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn next(&self, request: ChatRequest) -> Result<ChatResponse, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request);
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ModelError::InvalidResponse("script exhausted".into())))
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn chat(&self, _ctx: &RunContext, request: ChatRequest) -> Result<ChatResponse, ModelError> {
        self.next(request)
    }

    async fn chat_stream(
        &self,
        _ctx: &RunContext,
        request: ChatRequest,
    ) -> Result<DeltaReceiver, ModelError> {
        let response = self.next(request)?;
        let size = self.chunk_size.unwrap_or(usize::MAX);
        let chars: Vec<char> = response.content.chars().collect();
        let mut deltas: Vec<StreamDelta> = chars
            .chunks(size)
            .map(|chunk| StreamDelta {
                delta_text: chunk.iter().collect(),
                ..Default::default()
            })
            .collect();
        deltas.push(StreamDelta {
            tool_calls: response.tool_calls.clone(),
            finish_reason: Some(if response.tool_calls.is_empty() {
                FinishReason::Stop
            } else {
                FinishReason::ToolCalls
            }),
            usage: response.usage,
            ..Default::default()
        });
        let (tx, rx) = mpsc::channel(deltas.len());
        for delta in deltas {
            let _ = tx.try_send(Ok(delta));
        }
        Ok(rx)
    }
}

/// A model that never answers. Useful for cancellation and busy tests.
pub struct PendingModel;

#[async_trait]
impl LanguageModel for PendingModel {
    fn name(&self) -> &str {
        "pending"
    }

    async fn chat(&self, _ctx: &RunContext, _request: ChatRequest) -> Result<ChatResponse, ModelError> {
        std::future::pending().await
    }
}

/// A plain text response with fixed usage.
pub fn text(content: &str) -> ChatResponse {
    ChatResponse {
        content: content.to_string(),
        tool_calls: vec![],
        usage: Some(Usage::new(10, 5)),
        model: "mock-model".into(),
    }
}

/// A response requesting tool calls.
pub fn tool_calls(calls: Vec<ToolCall>) -> ChatResponse {
    ChatResponse {
        tool_calls: calls,
        ..text("")
    }
}

pub fn call(id: &str, name: &str, arguments: Value) -> ToolCall {
    ToolCall::with_id(id, name, args(arguments))
}

pub fn args(value: Value) -> ToolArgs {
    value.as_object().cloned().unwrap_or_default()
}

/// `multiply(a: integer, b: integer)`.
pub struct MultiplyTool;

#[async_trait]
impl Tool for MultiplyTool {
    fn name(&self) -> &str {
        "multiply"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::new("multiply", "Multiply two integers")
            .param(Parameter::required("a", ParamType::Integer, "first factor"))
            .param(Parameter::required("b", ParamType::Integer, "second factor"))
    }

    async fn execute(&self, _ctx: &RunContext, args: ToolArgs) -> Result<Value, BoxError> {
        let a = args.get("a").and_then(Value::as_i64).ok_or("missing a")?;
        let b = args.get("b").and_then(Value::as_i64).ok_or("missing b")?;
        Ok(json!(a * b))
    }
}

/// Always fails.
pub struct FailingTool;

#[async_trait]
impl Tool for FailingTool {
    fn name(&self) -> &str {
        "failing"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::new("failing", "Always fails")
    }

    async fn execute(&self, _ctx: &RunContext, _args: ToolArgs) -> Result<Value, BoxError> {
        Err("backend unavailable".into())
    }
}

/// Sleeps before answering.
pub struct SlowTool {
    delay: Duration,
}

impl SlowTool {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl Tool for SlowTool {
    fn name(&self) -> &str {
        "slow"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::new("slow", "Takes its time")
    }

    async fn execute(&self, _ctx: &RunContext, _args: ToolArgs) -> Result<Value, BoxError> {
        tokio::time::sleep(self.delay).await;
        Ok(json!("done"))
    }
}

/// Route engine logs to the test harness. Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
