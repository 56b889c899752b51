//! LanguageModel trait — the abstraction over LLM backends.
//!
//! A model receives the ordered message history (plus the tool schemas it may
//! call) and answers either with final text or with requested tool calls,
//! as a complete response or as a stream of deltas.
//!
//! Concrete providers (HTTP clients, auth, retries) live outside this crate.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::context::RunContext;
use crate::error::ModelError;
use crate::message::{Message, ToolCall};
use crate::tool::ToolSchema;

/// A request sent to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    /// The conversation messages, oldest first
    pub messages: Vec<Message>,

    /// Tools the model can call
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolSchema>,

    /// Temperature (0.0 = deterministic)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Stop sequences
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
}

impl ChatRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            tools: Vec::new(),
            temperature: None,
            max_tokens: None,
            stop: Vec::new(),
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolSchema>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_sampling(mut self, temperature: Option<f32>, max_tokens: Option<u32>) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_stop(mut self, stop: Vec<String>) -> Self {
        self.stop = stop;
        self
    }
}

/// A complete (non-streaming) response from the model.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatResponse {
    /// Generated text (may be empty when only tool calls are requested)
    pub content: String,

    /// Requested tool calls, in the order the model issued them
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,

    /// Token usage statistics
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,

    /// Which model actually responded
    #[serde(default)]
    pub model: String,
}

impl ChatResponse {
    /// A text-only response.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    /// A response requesting tool calls.
    pub fn calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            content: content.into(),
            tool_calls,
            ..Self::default()
        }
    }
}

/// Token usage information.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }

    /// Add another usage report to this one.
    pub fn accumulate(&mut self, other: &Usage) {
        self.prompt_tokens = self.prompt_tokens.saturating_add(other.prompt_tokens);
        self.completion_tokens = self.completion_tokens.saturating_add(other.completion_tokens);
        self.total_tokens = self.total_tokens.saturating_add(other.total_tokens);
    }
}

/// Why the model stopped producing output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    ToolCalls,
    Length,
    Other,
}

/// A single delta in a streaming response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamDelta {
    /// Incremental text
    #[serde(default)]
    pub delta_text: String,

    /// Tool calls completed in this delta. A repeated id extends the
    /// arguments of the earlier call.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,

    /// Set on the final delta
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,

    /// Usage info (typically only in the final delta)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// Receiving half of a model token stream.
pub type DeltaReceiver = mpsc::Receiver<std::result::Result<StreamDelta, ModelError>>;

/// The core LanguageModel trait.
///
/// Implementations must be safe for concurrent read-only use: several agents
/// may share one model behind an `Arc`.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// A human-readable name for this model backend.
    fn name(&self) -> &str;

    /// Send a request and get a complete response.
    async fn chat(
        &self,
        ctx: &RunContext,
        request: ChatRequest,
    ) -> std::result::Result<ChatResponse, ModelError>;

    /// Send a request and get a stream of response deltas.
    ///
    /// Default implementation calls `chat()` and wraps the result as a single delta.
    async fn chat_stream(
        &self,
        ctx: &RunContext,
        request: ChatRequest,
    ) -> std::result::Result<DeltaReceiver, ModelError> {
        let response = self.chat(ctx, request).await?;
        let finish_reason = if response.tool_calls.is_empty() {
            FinishReason::Stop
        } else {
            FinishReason::ToolCalls
        };
        let (tx, rx) = mpsc::channel(1);
        let _ = tx
            .send(Ok(StreamDelta {
                delta_text: response.content,
                tool_calls: response.tool_calls,
                finish_reason: Some(finish_reason),
                usage: response.usage,
            }))
            .await;
        Ok(rx)
    }
}

/// Accumulates stream deltas back into a complete response.
#[derive(Debug, Default)]
pub struct DeltaAccumulator {
    content: String,
    tool_calls: Vec<ToolCall>,
    usage: Option<Usage>,
    finish_reason: Option<FinishReason>,
}

impl DeltaAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one delta in.
    pub fn push(&mut self, delta: &StreamDelta) {
        self.content.push_str(&delta.delta_text);
        for call in &delta.tool_calls {
            if let Some(existing) = self.tool_calls.iter_mut().find(|c| c.id == call.id) {
                existing
                    .args
                    .extend(call.args.iter().map(|(k, v)| (k.clone(), v.clone())));
            } else {
                self.tool_calls.push(call.clone());
            }
        }
        if delta.usage.is_some() {
            self.usage = delta.usage;
        }
        if delta.finish_reason.is_some() {
            self.finish_reason = delta.finish_reason;
        }
    }

    pub fn finish_reason(&self) -> Option<FinishReason> {
        self.finish_reason
    }

    pub fn finish(self, model: &str) -> ChatResponse {
        ChatResponse {
            content: self.content,
            tool_calls: self.tool_calls,
            usage: self.usage,
            model: model.to_string(),
        }
    }
}
