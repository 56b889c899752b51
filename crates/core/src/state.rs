//! Conversation state shared by all engines.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::message::{Message, Role};
use crate::model::Usage;

/// Default bound on model calls per run.
pub const DEFAULT_MAX_ITERATIONS: u32 = 10;

/// The ordered message history of one agent plus its accounting fields.
///
/// Owned by exactly one agent instance. `export`/`import` on the agents
/// move it across the persistence boundary verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    /// Unique conversation ID
    pub id: String,

    /// Ordered messages
    pub messages: Vec<Message>,

    /// Model calls made in the current (or last) run
    pub iteration: u32,

    /// Bound on model calls per run
    pub max_iterations: u32,

    /// Token usage reported by the model, accumulated across runs
    #[serde(default)]
    pub usage: Usage,

    /// When this state was created
    pub created_at: DateTime<Utc>,

    /// When the last message was added
    pub updated_at: DateTime<Utc>,
}

impl ConversationState {
    /// Create an empty state with the given iteration bound.
    pub fn new(max_iterations: u32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            messages: Vec::new(),
            iteration: 0,
            max_iterations,
            usage: Usage::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Append a message.
    pub fn push(&mut self, message: Message) {
        self.updated_at = Utc::now();
        self.messages.push(message);
    }

    /// Replace the message list (used by memory policies).
    pub fn replace_messages(&mut self, messages: Vec<Message>) {
        self.updated_at = Utc::now();
        self.messages = messages;
    }

    /// Discard history and counters, keeping only the iteration bound.
    pub fn clear(&mut self) {
        *self = Self::new(self.max_iterations);
    }

    /// Whether the state holds no messages and no counters.
    pub fn is_initial(&self) -> bool {
        self.messages.is_empty() && self.iteration == 0 && self.usage == Usage::default()
    }

    /// Start a new run: reset the per-run iteration counter.
    pub fn begin_run(&mut self) {
        self.iteration = 0;
    }

    /// Count one model call. Returns `false` once the bound is exceeded.
    pub fn tick(&mut self) -> bool {
        self.iteration += 1;
        self.iteration <= self.max_iterations
    }

    /// Add model-reported usage to the running totals.
    pub fn record_usage(&mut self, usage: &Usage) {
        self.usage.accumulate(usage);
    }

    /// Rough token estimate (4 chars ≈ 1 token).
    pub fn estimated_tokens(&self) -> usize {
        self.messages.iter().map(|m| m.content.len().div_ceil(4)).sum()
    }

    /// Tool result messages whose `tool_call_id` does not match exactly one
    /// earlier tool call. Empty for a well-formed history.
    pub fn orphaned_tool_results(&self) -> Vec<&Message> {
        let mut orphans = Vec::new();
        for (idx, msg) in self.messages.iter().enumerate() {
            if msg.role != Role::Tool {
                continue;
            }
            let Some(call_id) = &msg.tool_call_id else {
                orphans.push(msg);
                continue;
            };
            let matches = self.messages[..idx]
                .iter()
                .flat_map(|m| m.tool_calls.iter())
                .filter(|c| &c.id == call_id)
                .count();
            if matches != 1 {
                orphans.push(msg);
            }
        }
        orphans
    }
}

impl Default for ConversationState {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ITERATIONS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{ToolArgs, ToolCall};

    #[test]
    fn state_tracks_updates() {
        let mut state = ConversationState::new(3);
        let created = state.created_at;
        state.push(Message::user("First message"));
        assert_eq!(state.messages.len(), 1);
        assert!(state.updated_at >= created);
    }

    #[test]
    fn tick_respects_bound() {
        let mut state = ConversationState::new(2);
        assert!(state.tick());
        assert!(state.tick());
        assert!(!state.tick());
        state.begin_run();
        assert_eq!(state.iteration, 0);
    }

    #[test]
    fn clear_returns_to_initial() {
        let mut state = ConversationState::new(4);
        state.push(Message::user("hello"));
        state.tick();
        state.record_usage(&Usage::new(10, 5));
        state.clear();
        assert!(state.is_initial());
        assert_eq!(state.max_iterations, 4);
    }

    #[test]
    fn token_estimate() {
        let mut state = ConversationState::default();
        // 20 chars ≈ 5 tokens
        state.push(Message::user("12345678901234567890"));
        assert_eq!(state.estimated_tokens(), 5);
    }

    #[test]
    fn detects_orphaned_tool_results() {
        let mut state = ConversationState::default();
        let mut call = ToolCall::with_id("c1", "echo", ToolArgs::new());
        state.push(Message::user("hi"));
        state.push(Message::assistant_with_calls("", vec![call.clone()]));
        call.settle(Ok(serde_json::json!("ok")));
        state.push(Message::tool_result(&call));
        assert!(state.orphaned_tool_results().is_empty());

        let stray = ToolCall::with_id("c9", "echo", ToolArgs::new());
        state.push(Message::tool_result(&stray));
        assert_eq!(state.orphaned_tool_results().len(), 1);
    }

    #[test]
    fn json_roundtrip_is_identical() {
        let mut state = ConversationState::new(5);
        state.push(Message::user("What is 25 * 4?"));
        state.push(Message::assistant("100"));
        let json = serde_json::to_string(&state).unwrap();
        let back: ConversationState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }
}
