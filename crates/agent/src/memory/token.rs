//! Token estimation for the token-budget policy.
//!
//! Character heuristic: ~4 characters per token, rounded up. Close enough
//! for BPE tokenizers on English text and keeps trimming deterministic.

use taskloom_core::Message;

/// Per-message overhead for role names and delimiters in the wire format.
const MESSAGE_OVERHEAD: usize = 4;

/// Estimate the token count for a string.
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

/// Estimate tokens for one message, including requested tool calls.
pub fn estimate_message_tokens(message: &Message) -> usize {
    let calls: usize = message
        .tool_calls
        .iter()
        .map(|c| estimate_tokens(&c.signature()))
        .sum();
    MESSAGE_OVERHEAD + estimate_tokens(&message.content) + calls
}

pub fn estimate_messages_tokens(messages: &[Message]) -> usize {
    messages.iter().map(estimate_message_tokens).sum()
}
