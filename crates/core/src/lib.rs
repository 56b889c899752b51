//! # taskloom Core
//!
//! Domain types, traits, and error definitions shared by every taskloom
//! engine. This crate has no engine logic: it defines the data model
//! (messages, tool calls, conversation state), the two external capabilities
//! the engines consume (`LanguageModel` and `Tool`), and the per-agent
//! `ToolRegistry`.
//!
//! ## Design Philosophy
//!
//! Both external capabilities are traits here so concrete providers and tools
//! vary independently of the engines, and tests can script them.

pub mod context;
pub mod error;
pub mod message;
pub mod model;
pub mod state;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use context::RunContext;
pub use error::{BoxError, Error, ErrorPhase, ModelError, RegistryError, Result, ToolError};
pub use message::{Message, Role, ToolArgs, ToolCall};
pub use model::{
    ChatRequest, ChatResponse, DeltaAccumulator, DeltaReceiver, FinishReason, LanguageModel,
    StreamDelta, Usage,
};
pub use state::{ConversationState, DEFAULT_MAX_ITERATIONS};
pub use tool::{ParamType, Parameter, Tool, ToolRegistry, ToolSchema};
