//! Message and tool call domain types.
//!
//! These are the value objects that flow through every engine:
//! user input becomes a `user` message, the model answers with an
//! `assistant` message (optionally carrying tool calls), and every executed
//! call is answered by a `tool` message that references the call id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Arguments passed to a tool: a JSON object keyed by parameter name.
pub type ToolArgs = serde_json::Map<String, serde_json::Value>;

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions
    System,
    /// The end user
    User,
    /// The model
    Assistant,
    /// Tool execution result
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        };
        f.write_str(name)
    }
}

/// A single message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID
    pub id: String,

    /// Who sent this message
    pub role: Role,

    /// The text content
    pub content: String,

    /// Optional author name (e.g. the tool name on tool results)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// If this is a tool result, which tool call it responds to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// Tool calls requested by the assistant (if any)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,

    /// Timestamp
    pub timestamp: DateTime<Utc>,

    /// Optional metadata (summary markers, provider info, etc.)
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Message {
    fn with_role(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            name: None,
            tool_call_id: None,
            tool_calls: Vec::new(),
            timestamp: Utc::now(),
            metadata: serde_json::Map::new(),
        }
    }

    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, content)
    }

    /// Create a new assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, content)
    }

    /// Create an assistant message that requests tool calls.
    pub fn assistant_with_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        let mut msg = Self::with_role(Role::Assistant, content);
        msg.tool_calls = tool_calls;
        msg
    }

    /// Create a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(Role::System, content)
    }

    /// Create a tool result message answering `call`.
    ///
    /// A failed call is rendered as `Error: ...` so the model can react to it.
    pub fn tool_result(call: &ToolCall) -> Self {
        let mut msg = Self::with_role(Role::Tool, call.render_outcome());
        msg.name = Some(call.name.clone());
        msg.tool_call_id = Some(call.id.clone());
        msg
    }

    /// Whether this assistant message requested any tool calls.
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// Attach a metadata entry.
    pub fn with_metadata(mut self, key: &str, value: serde_json::Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }
}

/// A structured request, authored by the model, to invoke a named tool.
///
/// Created unsettled; the engine settles it exactly once with either a
/// result or an error after execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique ID for this tool call
    pub id: String,

    /// Name of the tool to invoke
    pub name: String,

    /// Arguments keyed by parameter name
    #[serde(default)]
    pub args: ToolArgs,

    /// Result value once executed successfully
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,

    /// Error text once execution failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolCall {
    /// Create an unsettled tool call with a fresh id.
    pub fn new(name: impl Into<String>, args: ToolArgs) -> Self {
        Self::with_id(format!("call_{}", Uuid::new_v4().simple()), name, args)
    }

    /// Create an unsettled tool call with an explicit id.
    pub fn with_id(id: impl Into<String>, name: impl Into<String>, args: ToolArgs) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            args,
            result: None,
            error: None,
        }
    }

    /// Whether a result or error has been attached.
    pub fn is_settled(&self) -> bool {
        self.result.is_some() || self.error.is_some()
    }

    /// Attach the execution outcome. Returns `false` and leaves the call
    /// untouched if it was already settled.
    pub fn settle(&mut self, outcome: std::result::Result<serde_json::Value, String>) -> bool {
        if self.is_settled() {
            return false;
        }
        match outcome {
            Ok(value) => self.result = Some(value),
            Err(error) => self.error = Some(error),
        }
        true
    }

    /// Whether the call failed.
    pub fn failed(&self) -> bool {
        self.error.is_some()
    }

    /// Text form of the outcome, as fed back to the model.
    pub fn render_outcome(&self) -> String {
        if let Some(error) = &self.error {
            return format!("Error: {error}");
        }
        match &self.result {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(value) => value.to_string(),
            None => String::new(),
        }
    }

    /// Compact `name(args)` rendering for logs and traces.
    pub fn signature(&self) -> String {
        format!("{}({})", self.name, serde_json::Value::Object(self.args.clone()))
    }
}
