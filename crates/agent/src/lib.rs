//! The taskloom engines: tool calling, ReAct reasoning, and conversation.
//!
//! Every engine follows the same cycle:
//!
//! 1. **Receive** the user input and append it to the conversation state
//! 2. **Trim** the state with the configured memory policy
//! 3. **Call** the language model with the pinned system prompt + history
//! 4. **If tools are requested**: execute them, append the results, loop to 2
//! 5. **Otherwise**: append the answer and return it
//!
//! The loop ends on a final answer, on the iteration bound (a partial answer
//! flagged with `max_iterations_exceeded`), or on an error. A failed run
//! leaves the history as it was before the run.
//!
//! Streaming runs execute on a spawned task and report progress through an
//! [`EventStream`] that always ends in exactly one terminal event.

mod base;
pub mod conversational;
pub mod function;
pub mod memory;
pub mod options;
pub mod react;
mod session;
mod step;
pub mod stream;

#[cfg(test)]
mod test_helpers;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use taskloom_core::{ConversationState, Result, RunContext, Tool, ToolCall, Usage};

pub use conversational::ConversationalAgent;
pub use function::FunctionAgent;
pub use memory::{
    ImportanceFn, MemoryManager, MemoryPolicy, ModelSummarizer, Summarizer, TrimReport,
};
pub use options::LoopOptions;
pub use react::{ReactAgent, ReasoningStep, StepAction};
pub use stream::{EventStream, StreamEvent, StreamEventKind};

/// The outcome of one successful run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResponse {
    /// Final answer, or the best partial answer when the bound was hit
    pub content: String,

    /// Model calls made during the run
    pub iterations: u32,

    pub tool_calls_made: usize,

    /// The settled tool calls of this run, in execution order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,

    /// True when the run stopped at the iteration bound
    #[serde(default)]
    pub max_iterations_exceeded: bool,

    /// Token usage reported by the model during this run
    #[serde(default)]
    pub usage: Usage,
}

/// Operations common to every engine.
///
/// Each agent owns one conversation state. Runs are serialized per agent:
/// any call that needs the state while a run holds it fails with
/// [`Error::AgentBusy`](taskloom_core::Error::AgentBusy).
#[async_trait]
pub trait Agent: Send + Sync {
    /// Process one input to completion.
    async fn run(&self, ctx: &RunContext, input: &str) -> Result<AgentResponse>;

    /// Process one input on a background task, reporting progress as events.
    ///
    /// Must be called inside a Tokio runtime. Fails immediately with
    /// `AgentBusy` if another run is in progress.
    fn run_stream(&self, ctx: &RunContext, input: &str) -> Result<EventStream>;

    /// Register a tool. Rejects duplicates and malformed tools.
    fn add_tool(&mut self, tool: Arc<dyn Tool>) -> Result<()>;

    /// Discard history and counters.
    fn reset(&self) -> Result<()>;

    /// Snapshot the conversation state.
    fn export(&self) -> Result<ConversationState>;

    /// Replace the conversation state verbatim.
    fn import(&self, state: ConversationState) -> Result<()>;
}
