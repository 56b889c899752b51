//! Runtime options shared by every engine.

use taskloom_config::{AgentSettings, ToolConcurrency};

/// The subset of [`AgentSettings`] an engine consults while running.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopOptions {
    /// Pinned at the head of every model call, never stored in state
    pub system_prompt: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Maximum model calls per run
    pub max_iterations: u32,
    /// Capacity of the streaming event channel
    pub stream_buffer: usize,
    pub tool_concurrency: ToolConcurrency,
    /// ReAct only: clarifying re-prompts allowed in a row
    pub max_reprompts: u32,
}

impl From<&AgentSettings> for LoopOptions {
    fn from(settings: &AgentSettings) -> Self {
        Self {
            system_prompt: settings.system_prompt.clone(),
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
            max_iterations: settings.max_iterations,
            stream_buffer: settings.stream_buffer,
            tool_concurrency: settings.tool_concurrency,
            max_reprompts: settings.react.max_reprompts,
        }
    }
}

impl Default for LoopOptions {
    fn default() -> Self {
        Self::from(&AgentSettings::default())
    }
}
