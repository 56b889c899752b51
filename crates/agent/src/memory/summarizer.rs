//! Summarization backends for the summarize policy.

use std::sync::Arc;

use async_trait::async_trait;
use taskloom_core::{ChatRequest, LanguageModel, Message, ModelError, Role, RunContext};

const DEFAULT_INSTRUCTIONS: &str = "Summarize the conversation below in a few sentences. \
Keep names, numbers, decisions and open questions. Reply with the summary only.";

/// Collapses a block of messages into a short text summary.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(
        &self,
        ctx: &RunContext,
        messages: &[Message],
    ) -> std::result::Result<String, ModelError>;
}

/// Summarizer backed by a [`LanguageModel`] call.
pub struct ModelSummarizer {
    model: Arc<dyn LanguageModel>,
    instructions: String,
    max_tokens: Option<u32>,
}

impl ModelSummarizer {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self {
            model,
            instructions: DEFAULT_INSTRUCTIONS.to_string(),
            max_tokens: Some(512),
        }
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }
}

#[async_trait]
impl Summarizer for ModelSummarizer {
    async fn summarize(
        &self,
        ctx: &RunContext,
        messages: &[Message],
    ) -> std::result::Result<String, ModelError> {
        let request = ChatRequest::new(vec![
            Message::system(&self.instructions),
            Message::user(render_transcript(messages)),
        ])
        .with_sampling(Some(0.0), self.max_tokens);

        let response = self.model.chat(ctx, request).await?;
        let summary = response.content.trim();
        if summary.is_empty() {
            return Err(ModelError::InvalidResponse("empty summary".into()));
        }
        Ok(summary.to_string())
    }
}

/// Plain-text transcript, one line per message.
pub(crate) fn render_transcript(messages: &[Message]) -> String {
    let mut out = String::new();
    for msg in messages {
        let line = match msg.role {
            Role::Tool => format!(
                "tool ({}): {}",
                msg.name.as_deref().unwrap_or("unknown"),
                msg.content
            ),
            Role::Assistant if msg.has_tool_calls() => {
                let calls: Vec<String> = msg.tool_calls.iter().map(|c| c.signature()).collect();
                format!("assistant: {} [called {}]", msg.content, calls.join(", "))
            }
            role => format!("{role}: {}", msg.content),
        };
        out.push_str(line.trim_end());
        out.push('\n');
    }
    out
}
