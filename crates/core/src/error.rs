//! Error types for the taskloom domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; the top-level [`Error`]
//! knows which phase of a run produced it.

use thiserror::Error;

/// A boxed error raised by a tool implementation.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The top-level error type for all taskloom operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Model errors ---
    #[error("LLM call failed: {0}")]
    Model(#[from] ModelError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Registry errors ---
    #[error("Tool registry error: {0}")]
    Registry(#[from] RegistryError),

    // --- Loop guard errors ---
    #[error("Reasoning stalled after {reprompts} re-prompt(s); last thought: {last_thought}")]
    ReasoningStalled { reprompts: u32, last_thought: String },

    // --- Caller signals ---
    #[error("Run cancelled by caller")]
    Cancelled,

    #[error("Run deadline exceeded")]
    DeadlineExceeded,

    #[error("Agent is busy with another run")]
    AgentBusy,

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

/// The phase of an agent run that produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorPhase {
    /// The language model call itself failed.
    ModelCall,
    /// A tool was missing or failed.
    ToolCall,
    /// A loop safety valve fired (stall).
    LoopGuard,
    /// The caller cancelled, timed out, or overlapped runs.
    Caller,
    /// Construction, configuration, or (de)serialization.
    Setup,
}

impl ErrorPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ModelCall => "model_call",
            Self::ToolCall => "tool_call",
            Self::LoopGuard => "loop_guard",
            Self::Caller => "caller",
            Self::Setup => "setup",
        }
    }
}

impl std::fmt::Display for ErrorPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    /// Which phase of the run produced this error.
    pub fn phase(&self) -> ErrorPhase {
        match self {
            Self::Model(_) => ErrorPhase::ModelCall,
            Self::Tool(_) => ErrorPhase::ToolCall,
            Self::ReasoningStalled { .. } => ErrorPhase::LoopGuard,
            Self::Cancelled | Self::DeadlineExceeded | Self::AgentBusy => ErrorPhase::Caller,
            Self::Registry(_) | Self::Config { .. } => ErrorPhase::Setup,
        }
    }

    /// True for caller-side cancellation or deadline expiry.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled | Self::DeadlineExceeded)
    }
}

// --- Bounded context errors ---

/// Failures reported by a [`LanguageModel`](crate::model::LanguageModel).
///
/// The engines never retry these; provider-level retry belongs to the model
/// implementation.
#[derive(Debug, Clone, Error)]
pub enum ModelError {
    #[error("API request failed: {message} (status: {status_code})")]
    Request { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid model response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name}: {source}")]
    ExecutionFailed {
        tool_name: String,
        #[source]
        source: BoxError,
    },

    #[error("Invalid arguments for {tool_name}: {reason}")]
    InvalidArguments { tool_name: String, reason: String },
}

impl ToolError {
    /// Name of the tool this error concerns.
    pub fn tool_name(&self) -> &str {
        match self {
            Self::NotFound(name) => name,
            Self::ExecutionFailed { tool_name, .. } | Self::InvalidArguments { tool_name, .. } => {
                tool_name
            }
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("A tool named '{0}' is already registered")]
    DuplicateTool(String),

    #[error("Invalid tool: {0}")]
    InvalidTool(String),
}
